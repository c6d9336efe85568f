use std::{
    fmt::{self, Display},
    path::Path,
};

use tokio::{fs::File, io::AsyncReadExt};

use crate::PanelcoreResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The header every SQLite database file starts with.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The concrete format of a migration artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactFormat {
    /// A SQLite database file.
    SqliteFile,

    /// Anything else, treated as a textual PostgreSQL dump.
    LogicalDump,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Classifies `bytes` by the SQLite header at offset 0.
pub fn detect_format(bytes: &[u8]) -> ArtifactFormat {
    if bytes.starts_with(SQLITE_MAGIC) {
        ArtifactFormat::SqliteFile
    } else {
        ArtifactFormat::LogicalDump
    }
}

/// Classifies the file at `path` by reading only its header.
pub async fn detect_file_format(path: impl AsRef<Path>) -> PanelcoreResult<ArtifactFormat> {
    let mut file = File::open(path.as_ref()).await?;
    let mut header = Vec::with_capacity(SQLITE_MAGIC.len());
    (&mut file)
        .take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut header)
        .await?;

    Ok(detect_format(&header))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqliteFile => write!(f, "sqlite database file"),
            Self::LogicalDump => write!(f, "logical dump"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
