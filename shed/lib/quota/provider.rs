use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use crate::{layercake::sha_id, ShedResult};

use super::{BackingStoreManager, LoopMounter};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Provides directories whose disk usage is bounded.
#[async_trait]
pub trait QuotaLayerProvider: Send + Sync {
    /// Makes `destination` a directory that can hold at most `quota` bytes.
    ///
    /// Nothing is cleaned up if a step fails; call [`destroy`](Self::destroy) to unwind.
    async fn provide(&self, destination: &Path, quota: u64) -> ShedResult<()>;

    /// Tears down the quota filesystem at `destination`.
    async fn destroy(&self, destination: &Path) -> ShedResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Backs each destination with its own loop-mounted file.
///
/// The backing file is keyed by the sha256 of the destination path, so one path maps to
/// exactly one backing file.
pub struct QuotaLayer {
    backing_store: Arc<dyn BackingStoreManager>,
    loop_mounter: Arc<dyn LoopMounter>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl QuotaLayer {
    /// Creates a provider from its backing store and mounter.
    pub fn new(
        backing_store: Arc<dyn BackingStoreManager>,
        loop_mounter: Arc<dyn LoopMounter>,
    ) -> Self {
        Self {
            backing_store,
            loop_mounter,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The backing store id used for `destination`.
pub fn backing_store_id(destination: &Path) -> String {
    sha_id(&destination.display().to_string())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl QuotaLayerProvider for QuotaLayer {
    async fn provide(&self, destination: &Path, quota: u64) -> ShedResult<()> {
        let id = backing_store_id(destination);
        tracing::debug!(destination = %destination.display(), quota, id, "providing quota layer");

        let backing_file = self.backing_store.create(&id, quota).await?;
        self.loop_mounter.mount_file(&backing_file, destination).await
    }

    async fn destroy(&self, destination: &Path) -> ShedResult<()> {
        let id = backing_store_id(destination);
        tracing::debug!(destination = %destination.display(), id, "destroying quota layer");

        self.loop_mounter.unmount(destination).await?;
        self.backing_store.delete(&id).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
