//! `panelutils::error` is a module containing error utilities for the panel core.

use std::time::Duration;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a panelutils-related operation.
pub type PanelutilsResult<T> = Result<T, PanelutilsError>;

/// An error that occurred while running a utility operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PanelutilsError {
    /// An external program could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    CommandSpawn {
        /// The program that was invoked.
        program: String,

        /// The underlying spawn error.
        source: std::io::Error,
    },

    /// An external program did not finish within its deadline.
    #[error("`{program}` did not finish within {timeout:?}")]
    CommandTimeout {
        /// The program that was invoked.
        program: String,

        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
