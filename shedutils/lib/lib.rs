//! `shedutils` is a library containing general utilities for the shed project.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod command;
pub mod error;
pub mod path;
pub mod retry;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
pub use error::*;
pub use path::*;
pub use retry::*;
