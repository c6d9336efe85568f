use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Reported as the engine version when it cannot be determined.
pub const UNKNOWN_ENGINE_VERSION: &str = "Unknown";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The run state of the engine process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// The process is alive.
    #[serde(rename = "running")]
    Running,

    /// No process is running and none failed.
    #[default]
    #[serde(rename = "stop")]
    Stopped,

    /// The last spawn failed or the process exited abnormally.
    #[serde(rename = "error")]
    Errored,
}

/// The engine section of a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// The run state.
    pub state: ProcessState,

    /// The failure message when the state is [`ProcessState::Errored`].
    pub error_msg: String,

    /// The engine version, or [`UNKNOWN_ENGINE_VERSION`].
    pub version: String,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: ProcessState::Stopped,
            error_msg: String::new(),
            version: UNKNOWN_ENGINE_VERSION.to_string(),
        }
    }
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stop"),
            Self::Errored => write!(f, "error"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_state_wire_values() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&ProcessState::Running)?, "\"running\"");
        assert_eq!(serde_json::to_string(&ProcessState::Stopped)?, "\"stop\"");
        assert_eq!(serde_json::to_string(&ProcessState::Errored)?, "\"error\"");
        assert_eq!(
            serde_json::from_str::<ProcessState>("\"error\"")?,
            ProcessState::Errored
        );

        Ok(())
    }
}
