//! Supervision of the proxy engine process.
//!
//! The engine is an external Xray binary. The supervisor starts and stops it, replaces the
//! binary with a published release, and exposes its logs and helper commands.

mod platform;
mod release;
mod state;
mod supervisor;
mod tools;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use platform::*;
pub use release::*;
pub use state::*;
pub use supervisor::*;
pub use tools::*;
