//! Configuration types and helpers.

mod defaults;
mod shed;
mod validate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use shed::*;
