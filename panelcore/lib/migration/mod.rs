//! Export and import of the panel database.
//!
//! An import looks at what was uploaded and which engine is active, picks one of four
//! strategies, and runs it with the proxy engine paused.

mod pipeline;
mod strategy;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use pipeline::*;
pub use strategy::*;
