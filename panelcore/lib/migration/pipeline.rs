use std::{
    fmt,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use panelutils::{CommandInvoker, CommandOutput, CommandSpec, SystemInvoker};
use tempfile::NamedTempFile;
use tokio::{fs, sync::Mutex};

use crate::{
    config::{BackendDescriptor, ConnectionParams, DEFAULT_TOOL_TIMEOUT, PGPASSWORD_ENV_VAR},
    engine::EngineSupervisor,
    migration::{strategy_for, MigrationArtifact, MigrationStrategy},
    storage::{Store, StorePool},
    PanelcoreError, PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Shown when a SQLite upload targets PostgreSQL but `pgloader` is missing.
pub const PGLOADER_INSTALL_HINT: &str =
    "To migrate from SQLite to PostgreSQL, please install pgloader first (apt install pgloader).";

/// The suffix of the copy kept while a SQLite file is being replaced.
pub const BACKUP_SUFFIX: &str = ".backup";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Exports and imports the panel database on either backend.
///
/// Only one export or import runs at a time.
pub struct MigrationPipeline {
    store: Arc<Store>,
    supervisor: Arc<EngineSupervisor>,
    invoker: Arc<dyn CommandInvoker>,
    tool_timeout: Duration,
    upload_dir: Option<PathBuf>,
    lock: Mutex<()>,
}

/// A validated import, ready to run once the engine is paused.
enum ImportPlan {
    ReplaceFile { live: PathBuf },
    CrossEngineLoad { params: ConnectionParams },
    LogicalRestore { params: ConnectionParams },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MigrationPipeline {
    /// Creates a pipeline over `store` that pauses `supervisor` during imports.
    pub fn new(store: Arc<Store>, supervisor: Arc<EngineSupervisor>) -> Self {
        Self {
            store,
            supervisor,
            invoker: Arc::new(SystemInvoker),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            upload_dir: None,
            lock: Mutex::new(()),
        }
    }

    /// Runs `pg_dump`, `psql` and `pgloader` through `invoker`.
    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Sets how long an external tool may run.
    pub fn with_tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    /// Stages uploads in `dir` instead of the system temporary directory.
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    /// Produces a portable copy of the database.
    ///
    /// SQLite exports the checkpointed database file. PostgreSQL exports a `pg_dump` script
    /// that drops and recreates every object it contains.
    pub async fn export(&self) -> PanelcoreResult<Vec<u8>> {
        let _guard = self.lock.lock().await;

        match self.store.descriptor() {
            BackendDescriptor::Sqlite { path } => {
                self.store.checkpoint().await?;
                let bytes = fs::read(path).await?;
                tracing::info!("exported sqlite database ({} bytes)", bytes.len());
                Ok(bytes)
            }
            BackendDescriptor::Postgres { dsn } => {
                let params = ConnectionParams::parse(dsn);
                let spec = pg_command("pg_dump", &params)
                    .args(["--clean", "--if-exists"])
                    .timeout(self.tool_timeout);

                let output = self.invoker.run(&spec).await.map_err(|e| {
                    PanelcoreError::Export {
                        tool: "pg_dump".to_string(),
                        status: "not started".to_string(),
                        stderr: e.to_string(),
                    }
                })?;

                if !output.success() {
                    tracing::error!(status = %output.status_display(), stderr = %output.stderr_lossy(), "pg_dump failed");
                    return Err(PanelcoreError::Export {
                        tool: "pg_dump".to_string(),
                        status: output.status_display(),
                        stderr: output.stderr_lossy(),
                    });
                }

                tracing::info!("exported postgres database ({} bytes)", output.stdout.len());
                Ok(output.stdout)
            }
        }
    }

    /// Applies an uploaded database to the active backend.
    ///
    /// The upload must be a SQLite file for the SQLite backend; the PostgreSQL backend accepts a
    /// SQLite file or a dump. Artifacts that cannot be applied are rejected before the engine is
    /// paused or any file is touched.
    pub async fn import(&self, bytes: Vec<u8>) -> PanelcoreResult<()> {
        let _guard = self.lock.lock().await;

        let artifact = MigrationArtifact::new(bytes);
        let strategy = strategy_for(self.store.kind(), artifact.format());
        tracing::info!(%strategy, format = %artifact.format(), "importing database");

        let plan = self.plan(strategy, &artifact)?;
        let upload = persist_artifact(&artifact, self.upload_dir.as_deref()).await?;
        let upload_path = upload.path();

        // Held until the engine has been restarted, so no other store user sees the swap.
        let mut slot = self.store.lock_exclusive().await;
        let slot_ref = &mut *slot;

        self.supervisor
            .while_paused(async move {
                match plan {
                    ImportPlan::ReplaceFile { live } => {
                        self.replace_file(slot_ref, &live, upload_path).await
                    }
                    ImportPlan::CrossEngineLoad { params } => {
                        self.cross_engine_load(&params, upload_path).await
                    }
                    ImportPlan::LogicalRestore { params } => {
                        self.logical_restore(&params, upload_path).await
                    }
                }
            })
            .await?;
        drop(slot);

        tracing::info!(%strategy, "database import completed");
        Ok(())
    }

    fn plan(
        &self,
        strategy: MigrationStrategy,
        artifact: &MigrationArtifact,
    ) -> PanelcoreResult<ImportPlan> {
        if !strategy.touches_store() {
            return Err(PanelcoreError::FormatMismatch(format!(
                "a {} cannot be imported into the {} backend; only SQLite database files are accepted",
                artifact.format(),
                self.store.kind()
            )));
        }

        match (strategy, self.store.descriptor()) {
            (MigrationStrategy::ReplaceFile, BackendDescriptor::Sqlite { path }) => {
                Ok(ImportPlan::ReplaceFile { live: path.clone() })
            }
            (MigrationStrategy::CrossEngineLoad, BackendDescriptor::Postgres { dsn }) => {
                if self.invoker.locate("pgloader").is_none() {
                    return Err(PanelcoreError::MissingDependency {
                        tool: "pgloader".to_string(),
                        hint: PGLOADER_INSTALL_HINT.to_string(),
                    });
                }
                Ok(ImportPlan::CrossEngineLoad {
                    params: ConnectionParams::parse(dsn),
                })
            }
            (MigrationStrategy::LogicalRestore, BackendDescriptor::Postgres { dsn }) => {
                Ok(ImportPlan::LogicalRestore {
                    params: ConnectionParams::parse(dsn),
                })
            }
            (strategy, descriptor) => Err(PanelcoreError::custom(anyhow::anyhow!(
                "strategy {} does not apply to the {} backend",
                strategy,
                descriptor.kind()
            ))),
        }
    }

    /// Swaps the live SQLite file for `upload`, keeping a backup until the new file opens.
    async fn replace_file(
        &self,
        slot: &mut Option<StorePool>,
        live: &Path,
        upload: &Path,
    ) -> PanelcoreResult<()> {
        if let Some(pool) = slot.take() {
            // Fold the write-ahead log into the file so the backup is self-contained.
            let checkpointed = pool.checkpoint().await;
            pool.close().await;
            if let Err(e) = checkpointed {
                *slot = self.reopen_after_rollback().await;
                return Err(e);
            }
        }
        remove_sidecars(live).await;

        let backup = backup_path(live);
        if let Err(e) = replace_store_file(live, upload, &backup).await {
            *slot = self.reopen_after_rollback().await;
            return Err(e);
        }

        match self.store.open_detached().await {
            Ok(pool) => {
                *slot = Some(pool);
                if let Err(e) = fs::remove_file(&backup).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(error = %e, "failed to remove {}", backup.display());
                    }
                }
                tracing::info!("replaced sqlite database at {}", live.display());
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "imported database failed to open, rolling back");
                remove_sidecars(live).await;
                if let Err(restore_error) = restore_backup(live, &backup).await {
                    tracing::error!(error = %restore_error, "failed to restore database backup");
                    *slot = self.reopen_after_rollback().await;
                    return Err(restore_error);
                }
                *slot = self.reopen_after_rollback().await;
                Err(PanelcoreError::Import {
                    stage: "verify",
                    tool: "sqlite".to_string(),
                    status: "open failed".to_string(),
                    stderr: e.to_string(),
                })
            }
        }
    }

    async fn reopen_after_rollback(&self) -> Option<StorePool> {
        match self.store.open_detached().await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::error!(error = %e, "failed to reopen database after rollback");
                None
            }
        }
    }

    async fn cross_engine_load(
        &self,
        params: &ConnectionParams,
        upload: &Path,
    ) -> PanelcoreResult<()> {
        let mut spec = CommandSpec::new("pgloader")
            .args(["--verbose", "--with", "truncate"])
            .arg(upload.to_string_lossy())
            .arg(params.to_url()?)
            .timeout(self.tool_timeout);
        if let Some(password) = params.password() {
            spec = spec.env(PGPASSWORD_ENV_VAR, password);
        }

        let output = self.run_import_tool("load", &spec).await?;
        tracing::info!("pgloader migration completed: {}", last_line(&output));
        Ok(())
    }

    async fn logical_restore(&self, params: &ConnectionParams, upload: &Path) -> PanelcoreResult<()> {
        let spec = pg_command("psql", params)
            .args(["-v", "ON_ERROR_STOP=1"])
            .stdin_file(upload)
            .timeout(self.tool_timeout);

        self.run_import_tool("restore", &spec).await?;
        tracing::info!("psql restore completed");
        Ok(())
    }

    async fn run_import_tool(
        &self,
        stage: &'static str,
        spec: &CommandSpec,
    ) -> PanelcoreResult<CommandOutput> {
        let tool = spec.get_program().clone();
        let output = self
            .invoker
            .run(spec)
            .await
            .map_err(|e| PanelcoreError::Import {
                stage,
                tool: tool.clone(),
                status: "not started".to_string(),
                stderr: e.to_string(),
            })?;

        if !output.success() {
            tracing::error!(tool = %tool, status = %output.status_display(), stderr = %output.stderr_lossy(), "import tool failed");
            return Err(PanelcoreError::Import {
                stage,
                tool,
                status: output.status_display(),
                stderr: output.stderr_lossy(),
            });
        }

        Ok(output)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The backup sibling of a SQLite database file.
pub fn backup_path(live: &Path) -> PathBuf {
    let mut backup = live.as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    PathBuf::from(backup)
}

/// Moves `live` to `backup` and copies `artifact` into its place.
///
/// If the copy fails the backup is moved back, so `live` is left as it was. A live file that
/// does not exist yet is not an error.
pub(crate) async fn replace_store_file(
    live: &Path,
    artifact: &Path,
    backup: &Path,
) -> PanelcoreResult<()> {
    let _ = fs::remove_file(backup).await;

    let backed_up = match fs::rename(live, backup).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(import_io_error("backup", "rename", e)),
    };

    if let Err(e) = fs::copy(artifact, live).await {
        tracing::error!(error = %e, "failed to copy imported database into place");
        if backed_up {
            restore_backup(live, backup).await?;
        }
        return Err(import_io_error("replace", "copy", e));
    }

    Ok(())
}

async fn restore_backup(live: &Path, backup: &Path) -> PanelcoreResult<()> {
    if let Err(e) = fs::remove_file(live).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(error = %e, "failed to remove partial database");
        }
    }

    fs::rename(backup, live)
        .await
        .map_err(|e| import_io_error("rollback", "rename", e))?;
    tracing::info!("restored database from {}", backup.display());
    Ok(())
}

/// Removes the `-wal` and `-shm` files SQLite keeps next to `live`.
async fn remove_sidecars(live: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = live.as_os_str().to_owned();
        sidecar.push(suffix);
        if let Err(e) = fs::remove_file(PathBuf::from(sidecar)).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove sqlite {} file", suffix);
            }
        }
    }
}

async fn persist_artifact(
    artifact: &MigrationArtifact,
    dir: Option<&Path>,
) -> PanelcoreResult<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("dbimport-").suffix(artifact.file_suffix());
    let upload = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    fs::write(upload.path(), artifact.bytes()).await?;
    tracing::debug!("saved upload to {}", upload.path().display());
    Ok(upload)
}

fn pg_command(program: &str, params: &ConnectionParams) -> CommandSpec {
    let spec = CommandSpec::new(program).args(params.libpq_args());
    match params.password() {
        Some(password) => spec.env(PGPASSWORD_ENV_VAR, password),
        None => spec,
    }
}

fn import_io_error(stage: &'static str, tool: &str, error: io::Error) -> PanelcoreError {
    PanelcoreError::Import {
        stage,
        tool: tool.to_string(),
        status: error.kind().to_string(),
        stderr: error.to_string(),
    }
}

fn last_line(output: &CommandOutput) -> String {
    let stdout = output.stdout_lossy();
    stdout.lines().last().unwrap_or_default().trim().to_string()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Debug for MigrationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationPipeline")
            .field("store", &self.store)
            .field("supervisor", &self.supervisor)
            .field("tool_timeout", &self.tool_timeout)
            .field("upload_dir", &self.upload_dir)
            .finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use panelutils::{FakeInvoker, LogRing, PanelutilsResult};
    use tempfile::tempdir;

    use super::*;
    use crate::storage::SQLITE_MAGIC;

    const DSN: &str = "host=db user=xui password=secret dbname=panel port=5432";

    /// Checks whether the store can be read while a restore tool is running.
    struct StoreWatchingInvoker {
        store: Arc<Store>,
        store_blocked: StdMutex<Option<bool>>,
    }

    #[async_trait]
    impl CommandInvoker for StoreWatchingInvoker {
        async fn run(&self, _spec: &CommandSpec) -> PanelutilsResult<CommandOutput> {
            let blocked = tokio::time::timeout(Duration::from_millis(100), self.store.pool())
                .await
                .is_err();
            if let Ok(mut store_blocked) = self.store_blocked.lock() {
                *store_blocked = Some(blocked);
            }
            Ok(CommandOutput::success_with(""))
        }

        fn locate(&self, program: &str) -> Option<PathBuf> {
            Some(PathBuf::from("/usr/bin").join(program))
        }
    }

    fn supervisor(dir: &Path) -> Arc<EngineSupervisor> {
        Arc::new(EngineSupervisor::new(
            dir.join("xray"),
            dir.join("config.json"),
            LogRing::new(16),
        ))
    }

    fn postgres_pipeline(dir: &Path, invoker: Arc<FakeInvoker>) -> MigrationPipeline {
        let store = Arc::new(Store::unopened(BackendDescriptor::postgres(DSN)));
        MigrationPipeline::new(store, supervisor(dir)).with_invoker(invoker)
    }

    fn sqlite_upload() -> Vec<u8> {
        let mut bytes = SQLITE_MAGIC.to_vec();
        bytes.resize(1024, 0);
        bytes
    }

    #[tokio::test]
    async fn test_replace_store_file_rolls_back_failed_copy() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let live = temp_dir.path().join("x-ui.db");
        let backup = backup_path(&live);
        std::fs::write(&live, b"live database")?;

        let result =
            replace_store_file(&live, &temp_dir.path().join("missing-upload"), &backup).await;

        assert!(matches!(
            result,
            Err(PanelcoreError::Import { stage: "replace", .. })
        ));
        assert_eq!(std::fs::read(&live)?, b"live database");
        assert!(!backup.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_replace_store_file_keeps_backup_until_verified() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let live = temp_dir.path().join("x-ui.db");
        let upload = temp_dir.path().join("upload.db");
        let backup = backup_path(&live);
        std::fs::write(&live, b"old")?;
        std::fs::write(&upload, b"new")?;

        replace_store_file(&live, &upload, &backup).await?;

        assert_eq!(std::fs::read(&live)?, b"new");
        assert_eq!(std::fs::read(&backup)?, b"old");

        Ok(())
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/etc/x-ui/x-ui.db")),
            Path::new("/etc/x-ui/x-ui.db.backup")
        );
    }

    #[tokio::test]
    async fn test_import_sqlite_into_postgres_requires_pgloader() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let invoker = Arc::new(FakeInvoker::new());
        let pipeline = postgres_pipeline(temp_dir.path(), invoker.clone());

        let result = pipeline.import(sqlite_upload()).await;

        assert!(matches!(
            result,
            Err(PanelcoreError::MissingDependency { ref tool, .. }) if tool == "pgloader"
        ));
        assert!(invoker.calls().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_import_sqlite_into_postgres_runs_pgloader() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let invoker = Arc::new(FakeInvoker::new());
        invoker.respond("pgloader", CommandOutput::success_with("Total import time ✓\n"));
        let pipeline = postgres_pipeline(temp_dir.path(), invoker.clone());

        pipeline.import(sqlite_upload()).await?;

        let calls = invoker.calls_to("pgloader");
        assert_eq!(calls.len(), 1);
        let args = calls[0].spec.get_args();
        assert_eq!(&args[..3], &["--verbose", "--with", "truncate"]);
        assert!(args[3].ends_with(".db"));
        assert_eq!(args[4], "postgresql://xui:secret@db:5432/panel");

        Ok(())
    }

    #[tokio::test]
    async fn test_import_dump_into_postgres_streams_psql_stdin() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let invoker = Arc::new(FakeInvoker::new());
        invoker.respond("psql", CommandOutput::success_with(""));
        let pipeline = postgres_pipeline(temp_dir.path(), invoker.clone());

        let dump = b"DROP TABLE IF EXISTS users;\nCREATE TABLE users ();\n".to_vec();
        pipeline.import(dump.clone()).await?;

        let calls = invoker.calls_to("psql");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stdin.as_deref(), Some(dump.as_slice()));
        assert_eq!(
            calls[0].spec.get_args(),
            &vec![
                "-h",
                "db",
                "-U",
                "xui",
                "-d",
                "panel",
                "-p",
                "5432",
                "-v",
                "ON_ERROR_STOP=1"
            ]
        );
        assert!(calls[0]
            .spec
            .get_envs()
            .contains(&("PGPASSWORD".to_string(), "secret".to_string())));

        Ok(())
    }

    #[tokio::test]
    async fn test_import_locks_store_while_restoring() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let store = Arc::new(Store::unopened(BackendDescriptor::postgres(DSN)));
        let invoker = Arc::new(StoreWatchingInvoker {
            store: store.clone(),
            store_blocked: StdMutex::new(None),
        });
        let pipeline = MigrationPipeline::new(store.clone(), supervisor(temp_dir.path()))
            .with_invoker(invoker.clone());

        pipeline.import(b"CREATE TABLE users ();\n".to_vec()).await?;

        let blocked = *invoker
            .store_blocked
            .lock()
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(blocked, Some(true));

        // Released once the import returns.
        let after = tokio::time::timeout(Duration::from_millis(100), store.pool()).await;
        assert!(after.is_ok());

        Ok(())
    }

    #[tokio::test]
    async fn test_import_psql_failure_reports_stderr() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let invoker = Arc::new(FakeInvoker::new());
        invoker.respond(
            "psql",
            CommandOutput::failure_with(3, "ERROR:  syntax error at or near \"CREAT\""),
        );
        let pipeline = postgres_pipeline(temp_dir.path(), invoker);

        let result = pipeline.import(b"CREAT TABLE".to_vec()).await;

        match result {
            Err(PanelcoreError::Import {
                stage,
                tool,
                status,
                stderr,
            }) => {
                assert_eq!(stage, "restore");
                assert_eq!(tool, "psql");
                assert_eq!(status, "exit code 3");
                assert!(stderr.contains("syntax error"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_export_postgres_failure_is_export_error() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let invoker = Arc::new(FakeInvoker::new());
        invoker.respond(
            "pg_dump",
            CommandOutput::failure_with(1, "pg_dump: error: connection refused"),
        );
        let pipeline = postgres_pipeline(temp_dir.path(), invoker.clone());

        let result = pipeline.export().await;
        assert!(matches!(
            result,
            Err(PanelcoreError::Export { ref tool, ref stderr, .. })
                if tool == "pg_dump" && stderr.contains("connection refused")
        ));

        let args = invoker.calls_to("pg_dump")[0].spec.get_args().clone();
        assert_eq!(&args[args.len() - 2..], &["--clean", "--if-exists"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_export_postgres_returns_dump() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let invoker = Arc::new(FakeInvoker::new());
        invoker.respond(
            "pg_dump",
            CommandOutput::success_with("-- PostgreSQL database dump\n"),
        );
        let pipeline = postgres_pipeline(temp_dir.path(), invoker);

        assert_eq!(pipeline.export().await?, b"-- PostgreSQL database dump\n");

        Ok(())
    }
}
