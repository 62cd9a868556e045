//! Disk quotas for layers.
//!
//! A quota-limited layer is a directory with an ext4 filesystem loop mounted over it. The
//! filesystem lives in a fixed-size backing file, so the layer cannot outgrow the file.

mod backing_store;
mod loop_mount;
mod provider;
mod usage;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use backing_store::*;
pub use loop_mount::*;
pub use provider::*;
pub use usage::*;
