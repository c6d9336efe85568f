//! `panelutils` is a library containing general utilities for the panel core.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod command;
pub mod error;
pub mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
pub use error::*;
pub use log::*;
