//! Storage backend for the panel database.
//!
//! The panel keeps its data in either a SQLite file or a PostgreSQL server. Both engines share
//! one versioned schema, migrated on open, and both are seeded with a default administrator.

mod format;
mod store;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use format::*;
pub use store::*;
