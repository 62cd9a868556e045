use std::{path::PathBuf, sync::Arc};

use tokio::sync::RwLock;
use tracing::Instrument;

use crate::{
    fetcher::RepositoryFetcher,
    layercake::{self, Cake, LayerId, Retainer},
    quota::DiffSizer,
    ShedResult,
};

use super::{LayerCreator, RootfsSpec};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Coordinates fetching, layer creation and removal for one graph.
///
/// Creates share the lock with each other. Destroy and GC take it exclusively, so a layer is
/// never removed while a create might be building on it. There should be one ordinator per
/// graph.
pub struct CakeOrdinator {
    lock: RwLock<()>,
    cake: Arc<dyn Cake>,
    fetcher: Arc<dyn RepositoryFetcher>,
    layer_creator: Arc<dyn LayerCreator>,
    retainer: Arc<dyn Retainer>,
    diff_sizer: DiffSizer,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CakeOrdinator {
    /// Creates an ordinator.
    pub fn new(
        cake: Arc<dyn Cake>,
        fetcher: Arc<dyn RepositoryFetcher>,
        layer_creator: Arc<dyn LayerCreator>,
        retainer: Arc<dyn Retainer>,
    ) -> Self {
        Self {
            lock: RwLock::new(()),
            cake,
            fetcher,
            layer_creator,
            retainer,
            diff_sizer: DiffSizer,
        }
    }

    /// Fetches the image in `spec` and creates container `id` on top of it.
    ///
    /// Returns the container's root path and the image's environment.
    pub async fn create(&self, id: &str, spec: &RootfsSpec) -> ShedResult<(PathBuf, Vec<String>)> {
        let _guard = self.lock.read().await;
        let span = tracing::info_span!("ordinator-create", id, rootfs = %spec.get_rootfs());

        async {
            let image = self
                .fetcher
                .fetch(spec.get_rootfs(), spec.fetcher_quota())
                .await?;
            self.layer_creator.create(id, &image, spec).await
        }
        .instrument(span)
        .await
    }

    /// Pins `id` against removal.
    pub async fn retain(&self, id: &LayerId) {
        let _guard = self.lock.read().await;
        self.retainer.retain(id);
    }

    /// Removes the layer of container `id`, and with it any image layers left unused.
    pub async fn destroy(&self, id: &str) -> ShedResult<()> {
        let _guard = self.lock.write().await;
        let span = tracing::info_span!("ordinator-destroy", id);

        self.cake
            .remove(&LayerId::container(id))
            .instrument(span)
            .await
    }

    /// Removes every leaf that does not belong to a container.
    pub async fn gc(&self) -> ShedResult<()> {
        let _guard = self.lock.write().await;
        let span = tracing::info_span!("ordinator-gc");

        layercake::gc(self.cake.as_ref()).instrument(span).await
    }

    /// Bytes used by the layer of container `id`.
    pub async fn metrics(&self, id: &str) -> ShedResult<u64> {
        let _guard = self.lock.read().await;
        let path = self.cake.path(&LayerId::container(id)).await?;
        self.diff_sizer.bytes_used(&path).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
