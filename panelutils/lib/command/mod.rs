//! `panelutils::command` models external program invocation as typed operations.
//!
//! Every call produces a [`CommandOutput`] carrying the exit status and the captured streams, so
//! callers branch on a structured result instead of on the absence of an error.

mod invoker;
mod spec;

#[cfg(any(test, feature = "fake"))]
mod fake;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use invoker::*;
pub use spec::*;

#[cfg(any(test, feature = "fake"))]
pub use fake::*;
