//! `panelutils::log` holds the logging helpers shared by the panel binaries.

mod ring;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use ring::*;
