use std::fmt::{self, Display};

use crate::{
    config::BackendKind,
    storage::{detect_format, ArtifactFormat},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How an uploaded artifact is applied to the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStrategy {
    /// Swap the SQLite file for the uploaded one.
    ReplaceFile,

    /// Load a SQLite file into PostgreSQL with `pgloader`.
    CrossEngineLoad,

    /// Replay a dump into PostgreSQL with `psql`.
    LogicalRestore,

    /// The artifact cannot be applied to this backend.
    Reject,
}

/// An uploaded database together with its detected format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationArtifact {
    bytes: Vec<u8>,
    format: ArtifactFormat,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MigrationStrategy {
    /// Whether the strategy modifies the store and so needs the engine paused.
    pub fn touches_store(&self) -> bool {
        !matches!(self, Self::Reject)
    }
}

impl MigrationArtifact {
    /// Wraps `bytes`, detecting their format from the header.
    pub fn new(bytes: Vec<u8>) -> Self {
        let format = detect_format(&bytes);
        Self { bytes, format }
    }

    /// The raw artifact.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The detected format.
    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// The suffix given to the artifact when it is written to disk.
    pub fn file_suffix(&self) -> &'static str {
        match self.format {
            // pgloader infers the source type from the extension.
            ArtifactFormat::SqliteFile => ".db",
            ArtifactFormat::LogicalDump => ".sql",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks the import strategy for an artifact of `format` on a `backend` store.
pub fn strategy_for(backend: BackendKind, format: ArtifactFormat) -> MigrationStrategy {
    match (backend, format) {
        (BackendKind::Sqlite, ArtifactFormat::SqliteFile) => MigrationStrategy::ReplaceFile,
        (BackendKind::Sqlite, ArtifactFormat::LogicalDump) => MigrationStrategy::Reject,
        (BackendKind::Postgres, ArtifactFormat::SqliteFile) => MigrationStrategy::CrossEngineLoad,
        (BackendKind::Postgres, ArtifactFormat::LogicalDump) => MigrationStrategy::LogicalRestore,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for MigrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplaceFile => write!(f, "replace-file"),
            Self::CrossEngineLoad => write!(f, "cross-engine-load"),
            Self::LogicalRestore => write!(f, "logical-restore"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SQLITE_MAGIC;

    #[test]
    fn test_strategy_table() {
        use ArtifactFormat::*;
        use BackendKind::*;

        assert_eq!(strategy_for(Sqlite, SqliteFile), MigrationStrategy::ReplaceFile);
        assert_eq!(strategy_for(Sqlite, LogicalDump), MigrationStrategy::Reject);
        assert_eq!(
            strategy_for(Postgres, SqliteFile),
            MigrationStrategy::CrossEngineLoad
        );
        assert_eq!(
            strategy_for(Postgres, LogicalDump),
            MigrationStrategy::LogicalRestore
        );

        assert!(!MigrationStrategy::Reject.touches_store());
        assert!(MigrationStrategy::LogicalRestore.touches_store());
    }

    #[test]
    fn test_migration_artifact_detects_format() {
        let mut bytes = SQLITE_MAGIC.to_vec();
        bytes.extend_from_slice(b"rest of the page");

        let artifact = MigrationArtifact::new(bytes);
        assert_eq!(artifact.format(), ArtifactFormat::SqliteFile);
        assert_eq!(artifact.file_suffix(), ".db");

        let artifact = MigrationArtifact::new(b"CREATE TABLE users ();".to_vec());
        assert_eq!(artifact.format(), ArtifactFormat::LogicalDump);
        assert_eq!(artifact.file_suffix(), ".sql");
    }
}
