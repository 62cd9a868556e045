use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tracing::Instrument;

use crate::{AggregateError, ShedResult};

use super::{Cake, Checker, ImageRecord, LayerContent, LayerId};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A graph decorator whose `remove` also collects parents that become unreferenced.
///
/// Removing a layer walks up its parent chain, deleting each parent that is left without
/// children. Retained layers are never removed.
pub struct OvenCleaner {
    inner: Arc<dyn Cake>,
    retain_check: Arc<dyn Checker>,
    enable_image_cleanup: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OvenCleaner {
    /// Wraps `inner`. With `enable_image_cleanup` off, only the requested layer is removed.
    pub fn new(
        inner: Arc<dyn Cake>,
        retain_check: Arc<dyn Checker>,
        enable_image_cleanup: bool,
    ) -> Self {
        Self {
            inner,
            retain_check,
            enable_image_cleanup,
        }
    }

    async fn remove_chain(&self, id: &LayerId) -> ShedResult<()> {
        let mut current = id.clone();

        loop {
            let graph_id = current.graph_id();
            tracing::info!(id = %current, graph_id, "start");

            if self.retain_check.check(&current) {
                tracing::info!(graph_id, "layer-is-held");
                return Ok(());
            }

            let record = match self.inner.get(&current).await {
                Ok(record) => record,
                Err(err) => {
                    tracing::error!(graph_id, error = %err, "get-image");
                    return Ok(());
                }
            };

            if let Err(err) = self.inner.remove(&current).await {
                tracing::error!(graph_id, error = %err, "remove-image");
                return Err(err);
            }

            if !self.enable_image_cleanup {
                tracing::debug!(graph_id, "stop-image-cleanup-disabled");
                return Ok(());
            }

            let Some(parent) = record.parent_id() else {
                tracing::debug!(graph_id, "stop-image-has-no-parent");
                return Ok(());
            };

            match self.inner.is_leaf(&parent).await {
                Ok(true) => {
                    tracing::debug!(graph_id, parent_id = %parent, "has-parent-leaf");
                    current = parent;
                }
                Ok(false) => {
                    tracing::info!(graph_id, "finish");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(graph_id, error = %err, "is-leaf");
                    return Ok(());
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Removes every leaf of `cake` that does not belong to a container.
///
/// Every leaf is attempted. Failures are collected and returned together.
pub async fn gc(cake: &dyn Cake) -> ShedResult<()> {
    let span = tracing::info_span!("gc");
    async {
        tracing::info!("start");

        let mut errors = AggregateError::new();
        for leaf in cake.get_all_leaves().await? {
            match cake.get(&leaf).await {
                Ok(record) if record.get_container().is_some() => {
                    tracing::debug!(leaf_id = %leaf, "skipping-container-layer");
                    continue;
                }
                _ => {}
            }

            tracing::info!(leaf_id = %leaf, "removing leaf");
            if let Err(err) = cake.remove(&leaf).await {
                tracing::error!(leaf_id = %leaf, error = %err, "failed removing");
                errors.push(err);
            }
        }

        tracing::info!(failures = errors.errors().len(), "finish");
        errors.into_result()
    }
    .instrument(span)
    .await
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Cake for OvenCleaner {
    fn driver_name(&self) -> String {
        self.inner.driver_name()
    }

    async fn create(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()> {
        self.inner.create(child, parent).await
    }

    async fn register(&self, record: ImageRecord, content: Option<LayerContent>) -> ShedResult<()> {
        self.inner.register(record, content).await
    }

    async fn get(&self, id: &LayerId) -> ShedResult<ImageRecord> {
        self.inner.get(id).await
    }

    async fn remove(&self, id: &LayerId) -> ShedResult<()> {
        let span = tracing::info_span!("remove", id = %id, graph_id = id.graph_id());
        self.remove_chain(id).instrument(span).await
    }

    async fn path(&self, id: &LayerId) -> ShedResult<PathBuf> {
        self.inner.path(id).await
    }

    async fn quotaed_path(&self, id: &LayerId, quota: u64) -> ShedResult<PathBuf> {
        self.inner.quotaed_path(id, quota).await
    }

    async fn is_leaf(&self, id: &LayerId) -> ShedResult<bool> {
        self.inner.is_leaf(id).await
    }

    async fn get_all_leaves(&self) -> ShedResult<Vec<LayerId>> {
        self.inner.get_all_leaves().await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
