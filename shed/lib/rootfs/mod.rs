//! Container root filesystems.
//!
//! The [`CakeOrdinator`] is the entry point: it fetches the image a [`RootfsSpec`] names, then
//! has a [`LayerCreator`] stack a writable container layer on top of it.

mod layer_creator;
mod namespacer;
mod ordinator;
mod spec;
mod volume;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use layer_creator::*;
pub use namespacer::*;
pub use ordinator::*;
pub use spec::*;
pub use volume::*;
