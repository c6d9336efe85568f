//! Host and process metrics for the panel status page.
//!
//! Sampling is on demand. Every probe is independent, so a probe that fails leaves its fields
//! at zero without affecting the rest of the snapshot.

mod collector;
mod probes;
mod public_ip;
mod snapshot;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use collector::*;
pub use public_ip::*;
pub use snapshot::*;
