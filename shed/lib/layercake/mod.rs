//! The layer graph.
//!
//! A [`Cake`] is a graph of copy-on-write layers addressed by [`LayerId`]s. The stack used at
//! runtime is built from flat decorators:
//!
//! ```text
//! OvenCleaner          remove() walks up and collects unreferenced parents
//!   NamespacingCake    namespaced layers, with parent links in the LayerIndex
//!     LayerStore       records in SQLite, content in a GraphDriver
//! ```

mod apply;
mod cake;
mod cleaner;
mod db;
mod driver;
mod id;
mod image;
mod index;
mod namespaced;
mod retain;
mod store;
mod vfs;

#[cfg(test)]
pub(crate) mod testing;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use apply::*;
pub use cake::*;
pub use cleaner::*;
pub use db::*;
pub use driver::*;
pub use id::*;
pub use image::*;
pub use index::*;
pub use namespaced::*;
pub use retain::*;
pub use store::*;
pub use vfs::*;
