use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use shedutils::{CommandRunner, CommandSpec};
use tokio::fs;

use crate::{quota::QuotaLayerProvider, ShedResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A native copy-on-write storage driver addressed by graph keys.
#[async_trait]
pub trait GraphDriver: Send + Sync {
    /// The driver's name, used in on-disk layout and diagnostics.
    fn driver_name(&self) -> &str;

    /// Creates storage for `id` on top of `parent`. An empty parent creates a root layer.
    async fn create(&self, id: &str, parent: &str) -> ShedResult<()>;

    /// Returns the directory holding the layer's content.
    async fn get(&self, id: &str, mount_label: &str) -> ShedResult<PathBuf>;

    /// Deletes the layer's storage.
    async fn remove(&self, id: &str) -> ShedResult<()>;

    /// Returns true if storage exists for `id`.
    async fn exists(&self, id: &str) -> bool;

    /// Returns the quota extension if this driver supports it.
    fn as_quota_capable(&self) -> Option<&dyn QuotaCapable> {
        None
    }
}

/// The quota extension of a graph driver.
#[async_trait]
pub trait QuotaCapable: Send + Sync {
    /// Backs the layer's diff directory with a filesystem limited to `quota` bytes, then
    /// returns the layer's path.
    async fn get_quotaed(&self, id: &str, mount_label: &str, quota: u64) -> ShedResult<PathBuf>;

    /// Tears down the quota filesystem and deletes the layer's storage.
    async fn remove_quotaed(&self, id: &str) -> ShedResult<()>;

    /// The directory holding the layer's own changes.
    fn diff_path(&self, id: &str) -> PathBuf;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Adds quota support to any [`GraphDriver`].
///
/// The quota filesystem is mounted at `<root>/<driver>/diff/<id>`.
pub struct QuotaedDriver<D> {
    inner: D,
    root: PathBuf,
    provider: Arc<dyn QuotaLayerProvider>,
    runner: Arc<dyn CommandRunner>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: GraphDriver> QuotaedDriver<D> {
    /// Wraps `inner`, whose storage lives under `root`.
    pub fn new(
        inner: D,
        root: impl Into<PathBuf>,
        provider: Arc<dyn QuotaLayerProvider>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            inner,
            root: root.into(),
            provider,
            runner,
        }
    }

    /// The wrapped driver.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Moves existing content out of the way so the quota filesystem can be mounted over an
    /// empty directory. Returns the staging directory if anything was moved.
    async fn stage_existing(&self, id: &str, diff: &Path) -> ShedResult<Option<PathBuf>> {
        fs::create_dir_all(diff).await?;

        let mut entries = fs::read_dir(diff).await?;
        if entries.next_entry().await?.is_none() {
            return Ok(None);
        }

        let staging = diff.with_file_name(format!("{id}-staging"));
        fs::rename(diff, &staging).await?;
        fs::create_dir(diff).await?;
        Ok(Some(staging))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl<D: GraphDriver> GraphDriver for QuotaedDriver<D> {
    fn driver_name(&self) -> &str {
        self.inner.driver_name()
    }

    async fn create(&self, id: &str, parent: &str) -> ShedResult<()> {
        self.inner.create(id, parent).await
    }

    async fn get(&self, id: &str, mount_label: &str) -> ShedResult<PathBuf> {
        self.inner.get(id, mount_label).await
    }

    async fn remove(&self, id: &str) -> ShedResult<()> {
        self.inner.remove(id).await
    }

    async fn exists(&self, id: &str) -> bool {
        self.inner.exists(id).await
    }

    fn as_quota_capable(&self) -> Option<&dyn QuotaCapable> {
        Some(self)
    }
}

#[async_trait]
impl<D: GraphDriver> QuotaCapable for QuotaedDriver<D> {
    async fn get_quotaed(&self, id: &str, mount_label: &str, quota: u64) -> ShedResult<PathBuf> {
        let diff = self.diff_path(id);
        let staging = self.stage_existing(id, &diff).await?;

        if let Err(err) = self.provider.provide(&diff, quota).await {
            if let Some(staging) = staging {
                fs::remove_dir(&diff).await?;
                fs::rename(&staging, &diff).await?;
            }
            return Err(err);
        }

        if let Some(staging) = staging {
            let copy = CommandSpec::new("cp").args([
                "-a".to_string(),
                format!("{}/.", staging.display()),
                diff.display().to_string(),
            ]);
            self.runner.run(&copy).await?;
            fs::remove_dir_all(&staging).await?;
        }

        self.inner.get(id, mount_label).await
    }

    async fn remove_quotaed(&self, id: &str) -> ShedResult<()> {
        self.provider.destroy(&self.diff_path(id)).await?;
        self.inner.remove(id).await
    }

    fn diff_path(&self, id: &str) -> PathBuf {
        self.root
            .join(self.inner.driver_name())
            .join("diff")
            .join(id)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
