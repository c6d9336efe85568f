use std::{
    fmt,
    fs::Permissions,
    future::Future,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use panelutils::{parse_level, CommandInvoker, CommandSpec, LogRing, SystemInvoker};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::Mutex,
    time,
};
use tracing::Level;
use zip::ZipArchive;

use crate::{
    config::{PanelConfig, DEFAULT_SERVICE_NAME},
    engine::{
        parse_version_output, parse_x25519_output, release_asset_name,
        EngineStatus, KeyPair, ProcessState, ReleaseClient, UNKNOWN_ENGINE_VERSION,
    },
    PanelcoreError, PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Returned by [`EngineSupervisor::read_logs`] when the journal cannot be read.
pub const JOURNAL_FAILURE_LINE: &str = "Failed to run journalctl command!";

/// How long the engine gets to exit after SIGTERM.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const ENGINE_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(windows)]
const ENGINE_ARCHIVE_ENTRY: &str = "xray.exe";

#[cfg(not(windows))]
const ENGINE_ARCHIVE_ENTRY: &str = "xray";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Owns the lifecycle of the engine process.
///
/// Lifecycle transitions are serialized; at most one engine child exists at any time.
pub struct EngineSupervisor {
    binary: PathBuf,
    config: PathBuf,
    service_name: String,
    log_ring: LogRing,
    invoker: Arc<dyn CommandInvoker>,
    releases: Option<ReleaseClient>,
    stop_grace: Duration,
    inner: Mutex<EngineInner>,
    last_error: Arc<StdMutex<Option<String>>>,
    update_lock: Mutex<()>,
}

#[derive(Debug, Default)]
struct EngineInner {
    child: Option<Child>,
    started_at: Option<Instant>,
    version: Option<String>,
    failure: Option<String>,
    generation: u64,
}

/// Restarts the engine if a pause is abandoned before it resumes.
struct ResumeOnDrop {
    supervisor: Option<Arc<EngineSupervisor>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EngineSupervisor {
    /// Creates a supervisor for `binary`, started with `config`.
    pub fn new(binary: impl Into<PathBuf>, config: impl Into<PathBuf>, log_ring: LogRing) -> Self {
        Self {
            binary: binary.into(),
            config: config.into(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_ring,
            invoker: Arc::new(SystemInvoker),
            releases: None,
            stop_grace: DEFAULT_STOP_GRACE,
            inner: Mutex::new(EngineInner::default()),
            last_error: Arc::new(StdMutex::new(None)),
            update_lock: Mutex::new(()),
        }
    }

    /// Creates a supervisor for the binary and config named by `config`.
    pub fn from_config(config: &PanelConfig, log_ring: LogRing) -> Self {
        Self::new(
            config.engine_binary_path(),
            config.engine_config_path(),
            log_ring,
        )
        .with_service_name(config.get_service_name())
    }

    /// Runs helper commands (`journalctl`, `xray x25519`, ...) through `invoker`.
    pub fn with_invoker(mut self, invoker: Arc<dyn CommandInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Uses `releases` instead of the upstream release index.
    pub fn with_release_client(mut self, releases: ReleaseClient) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Sets the service unit whose journal [`read_logs`](Self::read_logs) reads.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets how long a stopping engine gets before it is killed.
    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    /// The engine binary.
    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    /// The engine configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config
    }

    /// The current run state.
    pub async fn state(&self) -> ProcessState {
        let mut inner = self.inner.lock().await;
        self.refresh_state(&mut inner)
    }

    /// The run state together with the failure message and version.
    pub async fn status(&self) -> EngineStatus {
        let mut inner = self.inner.lock().await;
        let state = self.refresh_state(&mut inner);

        let error_msg = match state {
            ProcessState::Errored => inner.failure.clone().unwrap_or_default(),
            _ => String::new(),
        };

        EngineStatus {
            state,
            error_msg,
            version: inner
                .version
                .clone()
                .unwrap_or_else(|| UNKNOWN_ENGINE_VERSION.to_string()),
        }
    }

    /// Seconds since the running engine was spawned, zero when it is not running.
    pub async fn uptime(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        match self.refresh_state(&mut inner) {
            ProcessState::Running => inner
                .started_at
                .map(|started| started.elapsed().as_secs())
                .unwrap_or_default(),
            _ => 0,
        }
    }

    /// The last line the engine wrote to stderr, or the last spawn failure.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }

    /// Stops the engine.
    ///
    /// Sends SIGTERM and kills the process if it has not exited within the grace period.
    /// Stopping a stopped engine is a no-op.
    pub async fn stop(&self) -> PanelcoreResult<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, true).await
    }

    /// Stops any running engine, then starts a new one.
    ///
    /// With `force` the stop step never aborts the restart: an engine that ignores SIGTERM is
    /// killed. Without it, an engine that outlives the grace period is left running and the
    /// restart fails with [`PanelcoreError::Stop`].
    pub async fn restart(&self, force: bool) -> PanelcoreResult<()> {
        let generation = {
            let mut inner = self.inner.lock().await;

            match self.stop_locked(&mut inner, force).await {
                Ok(()) => {}
                Err(e) if force => {
                    tracing::warn!(error = %e, "failed to stop engine cleanly, starting anyway");
                }
                Err(e) => return Err(e),
            }

            self.spawn_locked(&mut inner)?
        };

        match self.probe_version().await {
            Ok(version) => self.cache_version(generation, version).await,
            Err(e) => tracing::debug!(error = %e, "could not determine engine version"),
        }

        Ok(())
    }

    /// Runs `work` with the engine stopped and restarts it afterwards.
    ///
    /// The restart is attempted on every exit path, including when `work` fails or the returned
    /// future is dropped. A failed restart is logged and does not replace the result of `work`.
    pub async fn while_paused<F, T>(self: &Arc<Self>, work: F) -> PanelcoreResult<T>
    where
        F: Future<Output = PanelcoreResult<T>>,
    {
        let mut guard = ResumeOnDrop {
            supervisor: Some(Arc::clone(self)),
        };

        let result = match self.stop().await {
            Ok(()) => work.await,
            Err(e) => Err(e),
        };

        guard.supervisor = None;
        if let Err(e) = self.restart(true).await {
            tracing::error!(error = %e, "failed to restart engine after pause");
        }

        result
    }

    /// The engine version reported by `<binary> -version`.
    pub async fn version(&self) -> PanelcoreResult<String> {
        let generation = {
            let inner = self.inner.lock().await;
            if let Some(version) = &inner.version {
                return Ok(version.clone());
            }
            inner.generation
        };

        let version = self.probe_version().await?;
        self.cache_version(generation, version.clone()).await;
        Ok(version)
    }

    /// The installable engine releases.
    pub async fn fetch_available_versions(&self) -> PanelcoreResult<Vec<String>> {
        self.release_client()?.available_versions().await
    }

    /// Replaces the engine binary with release `version` for this host.
    ///
    /// The archive is downloaded first; the engine is then stopped, the binary swapped and the
    /// engine restarted whatever the outcome. Only one update runs at a time.
    pub async fn replace_binary(self: &Arc<Self>, version: &str) -> PanelcoreResult<()> {
        self.replace_binary_for(std::env::consts::OS, std::env::consts::ARCH, version)
            .await
    }

    pub(crate) async fn replace_binary_for(
        self: &Arc<Self>,
        os: &str,
        arch: &str,
        version: &str,
    ) -> PanelcoreResult<()> {
        let _update = self.update_lock.try_lock().map_err(|_| {
            PanelcoreError::Release("an engine update is already in progress".to_string())
        })?;

        let asset = release_asset_name(os, arch)?;
        let archive = self.release_client()?.download(version, &asset).await?;
        let binary = self.binary.clone();

        self.while_paused(async move {
            tokio::task::spawn_blocking(move || install_engine_binary(archive.path(), &binary))
                .await?
        })
        .await?;

        tracing::info!("engine updated to {}", version);
        Ok(())
    }

    /// The last `count` log lines at or above `level`.
    ///
    /// With `use_journal` the lines come from the service journal; otherwise from the in-memory
    /// log of this process, which includes everything the engine printed.
    pub async fn read_logs(&self, count: usize, level: &str, use_journal: bool) -> Vec<String> {
        if !use_journal {
            let level = parse_level(level).unwrap_or(Level::TRACE);
            return self.log_ring.lines(count, level);
        }

        let spec = CommandSpec::new("journalctl")
            .args(["-u", self.service_name.as_str(), "--no-pager"])
            .args(["-n".to_string(), count.to_string()])
            .args(["-p", level])
            .timeout(ENGINE_COMMAND_TIMEOUT);

        match self.invoker.run(&spec).await {
            Ok(output) if output.success() => {
                output.stdout_lossy().lines().map(str::to_string).collect()
            }
            Ok(output) => {
                tracing::warn!(status = %output.status_display(), stderr = %output.stderr_lossy(), "journalctl failed");
                vec![JOURNAL_FAILURE_LINE.to_string()]
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to run journalctl");
                vec![JOURNAL_FAILURE_LINE.to_string()]
            }
        }
    }

    /// Generates an X25519 key pair with `<binary> x25519`.
    pub async fn generate_x25519(&self) -> PanelcoreResult<KeyPair> {
        let spec = CommandSpec::new(self.binary.to_string_lossy())
            .arg("x25519")
            .timeout(ENGINE_COMMAND_TIMEOUT);

        let output = self.invoker.run(&spec).await?;
        if !output.success() {
            return Err(PanelcoreError::custom(anyhow::anyhow!(
                "x25519 generation failed ({}): {}",
                output.status_display(),
                output.stderr_lossy()
            )));
        }

        parse_x25519_output(&output.stdout_lossy())
    }

    /// The engine configuration file as JSON.
    pub async fn config_json(&self) -> PanelcoreResult<serde_json::Value> {
        let contents = tokio::fs::read_to_string(&self.config).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn release_client(&self) -> PanelcoreResult<ReleaseClient> {
        match &self.releases {
            Some(releases) => Ok(releases.clone()),
            None => ReleaseClient::new(),
        }
    }

    fn refresh_state(&self, inner: &mut EngineInner) -> ProcessState {
        let exit = match inner.child.as_mut() {
            Some(child) => child.try_wait(),
            None => return Self::idle_state(inner),
        };

        match exit {
            Ok(None) => return ProcessState::Running,
            Ok(Some(status)) if status.success() => {
                tracing::info!("engine exited");
            }
            Ok(Some(status)) => self.record_abnormal_exit(inner, status),
            Err(e) => {
                inner.failure = Some(e.to_string());
            }
        }

        inner.child = None;
        inner.started_at = None;
        Self::idle_state(inner)
    }

    fn record_abnormal_exit(&self, inner: &mut EngineInner, status: ExitStatus) {
        let reason = self
            .last_error()
            .unwrap_or_else(|| format!("engine exited with {}", status));
        tracing::error!(%status, "engine exited abnormally");
        inner.failure = Some(reason.clone());
        self.set_last_error(Some(reason));
    }

    /// Stores `version` unless the engine was respawned while it was being probed.
    async fn cache_version(&self, generation: u64, version: String) {
        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            inner.version = Some(version);
        }
    }

    fn idle_state(inner: &EngineInner) -> ProcessState {
        match inner.failure {
            Some(_) => ProcessState::Errored,
            None => ProcessState::Stopped,
        }
    }

    async fn stop_locked(&self, inner: &mut EngineInner, escalate: bool) -> PanelcoreResult<()> {
        let Some(mut child) = inner.child.take() else {
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            inner.started_at = None;
            if !status.success() {
                self.record_abnormal_exit(inner, status);
            }
            return Ok(());
        }

        if let Some(pid) = child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "failed to send SIGTERM to engine");
            }
        }

        match time::timeout(self.stop_grace, child.wait()).await {
            Ok(status) => {
                tracing::info!("engine stopped ({})", status?);
            }
            Err(_) if escalate => {
                tracing::warn!("engine ignored SIGTERM for {:?}, killing it", self.stop_grace);
                child.kill().await?;
            }
            Err(_) => {
                inner.child = Some(child);
                return Err(PanelcoreError::Stop(format!(
                    "engine did not exit within {:?}",
                    self.stop_grace
                )));
            }
        }

        inner.started_at = None;
        inner.failure = None;
        inner.version = None;
        Ok(())
    }

    /// Spawns the engine and returns its generation.
    fn spawn_locked(&self, inner: &mut EngineInner) -> PanelcoreResult<u64> {
        self.set_last_error(None);

        let spawned = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(&self.config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(binary = %self.binary.display(), error = %reason, "failed to spawn engine");
                inner.failure = Some(reason.clone());
                self.set_last_error(Some(reason.clone()));
                return Err(PanelcoreError::Spawn {
                    binary: self.binary.display().to_string(),
                    reason,
                });
            }
        };

        if let Some(stdout) = child.stdout.take() {
            forward_engine_output(stdout, None);
        }

        if let Some(stderr) = child.stderr.take() {
            forward_engine_output(stderr, Some(Arc::clone(&self.last_error)));
        }

        tracing::info!(pid = ?child.id(), "engine started");
        inner.child = Some(child);
        inner.started_at = Some(Instant::now());
        inner.failure = None;
        inner.version = None;
        inner.generation += 1;

        Ok(inner.generation)
    }

    async fn probe_version(&self) -> PanelcoreResult<String> {
        let spec = CommandSpec::new(self.binary.to_string_lossy())
            .arg("-version")
            .timeout(ENGINE_COMMAND_TIMEOUT);

        let output = self.invoker.run(&spec).await?;
        parse_version_output(&output.stdout_lossy())
            .filter(|_| output.success())
            .ok_or_else(|| {
                PanelcoreError::custom(anyhow::anyhow!(
                    "unexpected version output: {}",
                    output.stdout_lossy()
                ))
            })
    }

    fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Debug for EngineSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSupervisor")
            .field("binary", &self.binary)
            .field("config", &self.config)
            .field("service_name", &self.service_name)
            .field("stop_grace", &self.stop_grace)
            .finish_non_exhaustive()
    }
}

impl Drop for ResumeOnDrop {
    fn drop(&mut self) {
        let Some(supervisor) = self.supervisor.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = supervisor.restart(true).await {
                        tracing::error!(error = %e, "failed to restart engine after abandoned pause");
                    }
                });
            }
            Err(_) => tracing::error!("engine left stopped: no runtime to restart it on"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies engine output into the application log, line by line.
fn forward_engine_output<R>(reader: R, last_error: Option<Arc<StdMutex<Option<String>>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let level = engine_line_level(&line);
            if level == Level::ERROR {
                tracing::error!(target: "xray", "{}", line);
            } else if level == Level::WARN {
                tracing::warn!(target: "xray", "{}", line);
            } else if level == Level::DEBUG {
                tracing::debug!(target: "xray", "{}", line);
            } else {
                tracing::info!(target: "xray", "{}", line);
            }

            if let Some(slot) = &last_error {
                if let Ok(mut slot) = slot.lock() {
                    *slot = Some(line);
                }
            }
        }
    });
}

/// The severity of an engine log line, from its `[Level]` tag.
fn engine_line_level(line: &str) -> Level {
    if line.contains("[Error]") {
        Level::ERROR
    } else if line.contains("[Warning]") {
        Level::WARN
    } else if line.contains("[Debug]") {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Extracts the engine from a release archive and moves it onto `target`.
///
/// The binary is staged in a temporary file next to `target`, so the final rename stays on one
/// filesystem and a failure never leaves a partial binary in place.
fn install_engine_binary(archive: &Path, target: &Path) -> PanelcoreResult<()> {
    let mut archive = ZipArchive::new(std::fs::File::open(archive)?)?;
    let mut entry = archive.by_name(ENGINE_ARCHIVE_ENTRY)?;

    let dir = target
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    std::io::copy(&mut entry, &mut staged)?;
    staged.as_file().sync_all()?;
    std::fs::set_permissions(staged.path(), Permissions::from_mode(0o755))?;
    staged.persist(target).map_err(|e| e.error)?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
