use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use panelutils::PanelutilsError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a panelcore-related operation.
pub type PanelcoreResult<T> = Result<T, PanelcoreError>;

/// An error that occurred while controlling the engine or the panel database.
#[derive(Debug, Error)]
pub enum PanelcoreError {
    /// Missing or malformed configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The database could not be opened.
    #[error("database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    /// Applying the schema migrations failed.
    #[error("database schema error: {0}")]
    Schema(#[from] sqlx::migrate::MigrateError),

    /// A query against an open database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A single metrics probe failed. Never fatal.
    #[error("probe `{probe}` failed: {reason}")]
    Probe {
        /// The probe that failed.
        probe: &'static str,

        /// Why it failed.
        reason: String,
    },

    /// The engine process could not be started.
    #[error("failed to spawn engine `{binary}`: {reason}")]
    Spawn {
        /// The binary that was launched.
        binary: String,

        /// Why the launch failed.
        reason: String,
    },

    /// The engine process could not be stopped.
    #[error("failed to stop engine: {0}")]
    Stop(String),

    /// There is no release build for the host.
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform {
        /// The host operating system.
        os: String,

        /// The host architecture.
        arch: String,
    },

    /// An artifact does not fit the active backend.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// A required external tool is not installed.
    #[error("`{tool}` is not installed. {hint}")]
    MissingDependency {
        /// The missing tool.
        tool: String,

        /// How to install it.
        hint: String,
    },

    /// Exporting the database failed.
    #[error("export with `{tool}` failed ({status}): {stderr}")]
    Export {
        /// The tool that failed.
        tool: String,

        /// The tool's exit status.
        status: String,

        /// What the tool wrote to stderr.
        stderr: String,
    },

    /// Importing an artifact failed.
    #[error("import failed during {stage} with `{tool}` ({status}): {stderr}")]
    Import {
        /// The import stage that failed.
        stage: &'static str,

        /// The tool or operation that failed.
        tool: String,

        /// The exit status or error kind.
        status: String,

        /// Diagnostic output.
        stderr: String,
    },

    /// The release index or download could not be used.
    #[error("release error: {0}")]
    Release(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred while reading a release archive.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML parse error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An error raised by the utilities crate.
    #[error(transparent)]
    Utils(#[from] PanelutilsError),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PanelcoreError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> PanelcoreError {
        PanelcoreError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
