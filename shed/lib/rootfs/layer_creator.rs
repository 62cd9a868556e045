use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    fetcher::FetchedImage,
    layercake::{Cake, LayerId},
    ShedResult,
};

use super::{Namespacer, RootfsSpec, VolumeCreator};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Creates container layers on top of fetched images.
#[async_trait]
pub trait LayerCreator: Send + Sync {
    /// Creates the layer for container `id` and returns its root path and environment.
    async fn create(
        &self,
        id: &str,
        parent: &FetchedImage,
        spec: &RootfsSpec,
    ) -> ShedResult<(PathBuf, Vec<String>)>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Creates a writable container layer, namespacing the image first when asked to.
///
/// A create that fails after the container layer exists removes that layer again, so the same id
/// can be created afresh. `cake` should not cascade removals into parent images.
pub struct ContainerLayerCreator {
    cake: Arc<dyn Cake>,
    volume_creator: Arc<dyn VolumeCreator>,
    namespacer: Arc<dyn Namespacer>,
    namespace_lock: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerLayerCreator {
    /// Creates a layer creator over `cake`.
    pub fn new(
        cake: Arc<dyn Cake>,
        volume_creator: Arc<dyn VolumeCreator>,
        namespacer: Arc<dyn Namespacer>,
    ) -> Self {
        Self {
            cake,
            volume_creator,
            namespacer,
            namespace_lock: Mutex::new(()),
        }
    }

    /// Returns the namespaced copy of `image_id`, creating it if it does not exist yet.
    async fn namespace(&self, image_id: LayerId) -> ShedResult<LayerId> {
        let _guard = self.namespace_lock.lock().await;

        let namespaced = LayerId::namespaced(image_id.clone(), self.namespacer.cache_key());
        if self.cake.get(&namespaced).await.is_err() {
            self.cake.create(&namespaced, &image_id).await?;
        } else {
            tracing::debug!(graph_id = namespaced.graph_id(), "reusing namespaced image");
        }

        Ok(namespaced)
    }

    /// Mounts the container layer and creates the image's volumes inside it.
    ///
    /// The quota always applies to the container layer. [`QuotaScope`](super::QuotaScope) only
    /// decides whether the image fetch counts against it too.
    async fn prepare(
        &self,
        container: &LayerId,
        parent: &FetchedImage,
        quota: u64,
    ) -> ShedResult<PathBuf> {
        let root = if quota > 0 {
            self.cake.quotaed_path(container, quota).await?
        } else {
            self.cake.path(container).await?
        };

        for volume in parent.get_volumes() {
            self.volume_creator.create(&root, volume).await?;
        }

        Ok(root)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl LayerCreator for ContainerLayerCreator {
    async fn create(
        &self,
        id: &str,
        parent: &FetchedImage,
        spec: &RootfsSpec,
    ) -> ShedResult<(PathBuf, Vec<String>)> {
        let mut image_id = parent.layer_id();
        if *spec.get_namespaced() {
            image_id = self.namespace(image_id).await?;
        }

        let container = LayerId::container(id);
        self.cake.create(&container, &image_id).await?;

        let root = match self.prepare(&container, parent, *spec.get_quota_size()).await {
            Ok(root) => root,
            Err(err) => {
                if let Err(cleanup) = self.cake.remove(&container).await {
                    tracing::warn!(id, error = %cleanup, "failed to roll back container layer");
                }
                return Err(err);
            }
        };

        tracing::info!(id, parent = %image_id, root = %root.display(), "created container layer");
        Ok((root, parent.get_env().clone()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
