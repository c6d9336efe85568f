use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::PanelcoreError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The two interchangeable persistence engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A single SQLite file.
    Sqlite,

    /// A PostgreSQL server.
    Postgres,
}

/// Which engine the panel stores its data in and where to find it.
///
/// Chosen once at startup and never changed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDescriptor {
    /// A SQLite database file.
    Sqlite {
        /// The database file.
        path: PathBuf,
    },

    /// A PostgreSQL database reached through a `key=value` connection string.
    Postgres {
        /// The connection string.
        dsn: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BackendDescriptor {
    /// Describes a SQLite database at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::Sqlite { path: path.into() }
    }

    /// Describes a PostgreSQL database reached through `dsn`.
    pub fn postgres(dsn: impl Into<String>) -> Self {
        Self::Postgres { dsn: dsn.into() }
    }

    /// The engine kind.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Sqlite { .. } => BackendKind::Sqlite,
            Self::Postgres { .. } => BackendKind::Postgres,
        }
    }

    /// The database file, for the SQLite engine.
    pub fn sqlite_path(&self) -> Option<&Path> {
        match self {
            Self::Sqlite { path } => Some(path),
            Self::Postgres { .. } => None,
        }
    }

    /// The connection string, for the PostgreSQL engine.
    pub fn postgres_dsn(&self) -> Option<&str> {
        match self {
            Self::Sqlite { .. } => None,
            Self::Postgres { dsn } => Some(dsn),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for BackendKind {
    type Err = PanelcoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(PanelcoreError::Configuration(format!(
                "unsupported database type: {}",
                other
            ))),
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

impl Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite { path } => write!(f, "sqlite at {}", path.display()),
            // The DSN carries the password.
            Self::Postgres { .. } => write!(f, "postgres"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
