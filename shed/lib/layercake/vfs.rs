use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use shedutils::{CommandRunner, CommandSpec};
use tokio::fs;

use crate::{ShedError, ShedResult};

use super::GraphDriver;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name reported by [`VfsDriver`].
pub const VFS_DRIVER_NAME: &str = "vfs";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A graph driver that stores every layer as a full directory copy of its parent.
///
/// Layers live at `<root>/vfs/diff/<id>`. Nothing is mounted, so layers can be removed at any
/// time.
pub struct VfsDriver {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VfsDriver {
    /// Creates a driver storing layers under `root`.
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    fn layer_dir(&self, id: &str) -> PathBuf {
        self.root.join(VFS_DRIVER_NAME).join("diff").join(id)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl GraphDriver for VfsDriver {
    fn driver_name(&self) -> &str {
        VFS_DRIVER_NAME
    }

    async fn create(&self, id: &str, parent: &str) -> ShedResult<()> {
        let dir = self.layer_dir(id);
        if dir.exists() {
            return Err(ShedError::AlreadyExists(format!("layer storage {id}")));
        }

        let parent_dir = if parent.is_empty() {
            None
        } else {
            let parent_dir = self.layer_dir(parent);
            if !parent_dir.exists() {
                return Err(ShedError::NotFound(format!("parent layer storage {parent}")));
            }
            Some(parent_dir)
        };

        fs::create_dir_all(&dir).await?;

        if let Some(parent_dir) = parent_dir {
            let copy = CommandSpec::new("cp").args([
                "-a".to_string(),
                format!("{}/.", parent_dir.display()),
                dir.display().to_string(),
            ]);
            if let Err(err) = self.runner.run(&copy).await {
                let _ = fs::remove_dir_all(&dir).await;
                return Err(err.into());
            }
        }

        tracing::debug!(id, parent, "created vfs layer");
        Ok(())
    }

    async fn get(&self, id: &str, _mount_label: &str) -> ShedResult<PathBuf> {
        let dir = self.layer_dir(id);
        if !dir.exists() {
            return Err(ShedError::NotFound(format!("layer storage {id}")));
        }
        Ok(dir)
    }

    async fn remove(&self, id: &str) -> ShedResult<()> {
        match fs::remove_dir_all(self.layer_dir(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, id: &str) -> bool {
        self.layer_dir(id).exists()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use shedutils::RecordingRunner;
    use tempfile::TempDir;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_create_copies_parent_content() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let runner = Arc::new(RecordingRunner::new());
        let driver = VfsDriver::new(root.path(), runner.clone());

        driver.create("base", "").await?;
        driver.create("child", "base").await?;

        let copies = runner.executed_program("cp");
        assert_eq!(copies.len(), 1);
        assert_eq!(
            copies[0].get_args(),
            &[
                "-a".to_string(),
                format!("{}/.", driver.layer_dir("base").display()),
                driver.layer_dir("child").display().to_string(),
            ]
        );
        assert_eq!(driver.get("child", "").await?, driver.layer_dir("child"));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_create_rejects_missing_parent_and_duplicates() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let driver = VfsDriver::new(root.path(), Arc::new(RecordingRunner::new()));

        assert!(matches!(
            driver.create("child", "missing").await,
            Err(ShedError::NotFound(_))
        ));
        assert!(!driver.exists("child").await);

        driver.create("base", "").await?;
        assert!(matches!(
            driver.create("base", "").await,
            Err(ShedError::AlreadyExists(_))
        ));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_create_cleans_up_when_copy_fails() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let runner = Arc::new(RecordingRunner::new());
        runner.fail("cp", "no space left on device");
        let driver = VfsDriver::new(root.path(), runner);

        driver.create("base", "").await?;
        assert!(driver.create("child", "base").await.is_err());
        assert!(!driver.exists("child").await);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_is_idempotent() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let driver = VfsDriver::new(root.path(), Arc::new(RecordingRunner::new()));

        driver.create("base", "").await?;
        driver.remove("base").await?;
        driver.remove("base").await?;
        assert!(!driver.exists("base").await);
        Ok(())
    }
}
