use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{CommandOutput, CommandSpec, PanelutilsError, PanelutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A trait for running external programs.
///
/// A non-zero exit is not an error at this layer: it is reported through
/// [`CommandOutput::status`] so that callers can decide how to react. Errors are reserved for
/// programs that could not be started or that exceeded their timeout.
#[async_trait]
pub trait CommandInvoker: Send + Sync {
    /// Runs the program described by `spec` to completion and captures its output.
    async fn run(&self, spec: &CommandSpec) -> PanelutilsResult<CommandOutput>;

    /// Resolves `program` on the search path.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Invokes real programs on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInvoker;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandInvoker for SystemInvoker {
    async fn run(&self, spec: &CommandSpec) -> PanelutilsResult<CommandOutput> {
        let program = spec.get_program().clone();

        let mut command = Command::new(&program);
        command
            .args(spec.get_args())
            .envs(spec.get_envs().iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match spec.get_stdin() {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        tracing::debug!(program = %program, args = spec.get_args().len(), "running external program");

        let child = command
            .spawn()
            .map_err(|source| PanelutilsError::CommandSpawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout kills the child through `kill_on_drop`.
        let output = match spec.get_timeout() {
            Some(timeout) => tokio::time::timeout(*timeout, child.wait_with_output())
                .await
                .map_err(|_| PanelutilsError::CommandTimeout {
                    program: program.clone(),
                    timeout: *timeout,
                })??,
            None => child.wait_with_output().await?,
        };

        let output = CommandOutput::from(output);
        if !output.success() {
            tracing::debug!(
                program = %program,
                status = %output.status_display(),
                "external program failed"
            );
        }

        Ok(output)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_system_invoker_captures_streams() -> anyhow::Result<()> {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 4"]);
        let output = SystemInvoker.run(&spec).await?;

        assert_eq!(output.status, Some(4));
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err");

        Ok(())
    }

    #[tokio::test]
    async fn test_system_invoker_streams_stdin_file() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let input = temp_dir.path().join("dump.sql");
        std::fs::write(&input, "SELECT 1;\n")?;

        let spec = CommandSpec::new("cat").stdin_file(&input);
        let output = SystemInvoker.run(&spec).await?;

        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "SELECT 1;\n");

        Ok(())
    }

    #[tokio::test]
    async fn test_system_invoker_reports_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-program-7f3a");
        let result = SystemInvoker.run(&spec).await;

        assert!(matches!(result, Err(PanelutilsError::CommandSpawn { .. })));
        assert!(SystemInvoker
            .locate("definitely-not-a-real-program-7f3a")
            .is_none());
    }

    #[tokio::test]
    async fn test_system_invoker_reports_missing_stdin_file() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let spec = CommandSpec::new("cat").stdin_file(temp_dir.path().join("missing.sql"));
        let result = SystemInvoker.run(&spec).await;

        assert!(matches!(
            result,
            Err(PanelutilsError::IoError(ref e)) if e.kind() == std::io::ErrorKind::NotFound
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_system_invoker_enforces_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        let result = SystemInvoker.run(&spec).await;

        assert!(matches!(result, Err(PanelutilsError::CommandTimeout { .. })));
    }
}
