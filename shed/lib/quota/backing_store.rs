use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use shedutils::{CommandRunner, CommandSpec};
use tokio::fs;

use crate::{ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The smallest backing file that will be created. Smaller quotas are rounded up so that the
/// file can still hold a filesystem.
pub const MIN_BACKING_STORE_BYTES: u64 = 1024 * 1024;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Creates and deletes formatted backing files.
#[async_trait]
pub trait BackingStoreManager: Send + Sync {
    /// Creates a backing file of `quota` bytes for `id`, formats it, and returns its path.
    async fn create(&self, id: &str, quota: u64) -> ShedResult<PathBuf>;

    /// Deletes the backing file for `id`. Deleting a missing file succeeds.
    async fn delete(&self, id: &str) -> ShedResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps ext4-formatted backing files in a single directory, one per id.
pub struct BackingStore {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BackingStore {
    /// Creates a store keeping files under `root`.
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    /// The directory holding the backing files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path of the backing file for `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BackingStoreManager for BackingStore {
    async fn create(&self, id: &str, quota: u64) -> ShedResult<PathBuf> {
        let path = self.path_for(id);
        let size = quota.max(MIN_BACKING_STORE_BYTES);

        fs::create_dir_all(&self.root).await?;

        let file = fs::File::create(&path).await?;
        file.set_len(size).await?;
        drop(file);

        let mkfs = CommandSpec::new("mkfs.ext4").args([
            "-F".to_string(),
            "-q".to_string(),
            path.display().to_string(),
        ]);
        if let Err(err) = self.runner.run(&mkfs).await {
            tracing::error!(id, output = err.command_output().unwrap_or_default(), "formatting backing store");
            let _ = fs::remove_file(&path).await;
            return Err(ShedError::from(err).context(format!("formatting backing store {id}")));
        }

        tracing::debug!(id, size, path = %path.display(), "created backing store");
        Ok(path)
    }

    async fn delete(&self, id: &str) -> ShedResult<()> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ShedError::from(err).context(format!("deleting backing store {id}"))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
