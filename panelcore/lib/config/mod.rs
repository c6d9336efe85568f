//! Panel configuration types and helpers.

mod backend;
mod defaults;
mod dsn;
mod panel;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use backend::*;
pub use defaults::*;
pub use dsn::*;
pub use panel::*;
