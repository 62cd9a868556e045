use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::ShedResult;

use super::{ImageRecord, LayerId};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A stream of layer content: a tar archive, optionally gzip compressed.
pub type LayerContent = Box<dyn AsyncRead + Send + Unpin>;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A graph of copy-on-write layers.
///
/// Implemented by [`LayerStore`](super::LayerStore) over a graph driver and by the decorators
/// that wrap it. Decorators override a subset of operations and delegate the rest.
#[async_trait]
pub trait Cake: Send + Sync {
    /// The name of the underlying storage driver.
    fn driver_name(&self) -> String;

    /// Creates `child` on top of `parent`.
    ///
    /// Fails with `NotFound` if `parent` is not in the graph, unless it is the root id.
    async fn create(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()>;

    /// Registers a layer described by `record`, importing `content` if given.
    async fn register(&self, record: ImageRecord, content: Option<LayerContent>) -> ShedResult<()>;

    /// Returns the record for `id`. Fails with `NotFound` when absent.
    async fn get(&self, id: &LayerId) -> ShedResult<ImageRecord>;

    /// Deletes the layer's storage and its record.
    async fn remove(&self, id: &LayerId) -> ShedResult<()>;

    /// Returns the directory holding the layer's content, mounting it if necessary.
    async fn path(&self, id: &LayerId) -> ShedResult<PathBuf>;

    /// Like [`Cake::path`], but backs the layer with a filesystem limited to `quota` bytes.
    async fn quotaed_path(&self, id: &LayerId, quota: u64) -> ShedResult<PathBuf>;

    /// Returns true if no layer declares `id` as its parent.
    async fn is_leaf(&self, id: &LayerId) -> ShedResult<bool>;

    /// Returns every layer without children.
    async fn get_all_leaves(&self) -> ShedResult<Vec<LayerId>>;
}
