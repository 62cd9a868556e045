use std::{io::ErrorKind, path::Path};

use async_trait::async_trait;
use shedutils::ShedutilsError;

use crate::{ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Provisions volume directories inside a root filesystem.
#[async_trait]
pub trait VolumeCreator: Send + Sync {
    /// Creates the directory for `volume` under `root`.
    async fn create(&self, root: &Path, volume: &str) -> ShedResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Creates empty directories for volumes.
///
/// Directories are created one component at a time and symlinks inside the root are refused, so
/// an image cannot redirect a volume outside its root filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleVolumeCreator;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl VolumeCreator for SimpleVolumeCreator {
    async fn create(&self, root: &Path, volume: &str) -> ShedResult<()> {
        let path = shedutils::join_under_root(root, volume)?;
        let relative = path.strip_prefix(root).map_err(|_| {
            ShedutilsError::PathValidation(format!("volume {volume} is outside the root"))
        })?;

        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| ShedError::from(e).context(format!("creating volume {volume}")))?;

        let mut current = root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            create_component(&current)
                .await
                .map_err(|e| e.context(format!("creating volume {volume}")))?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Ensures `path` is a real directory, creating it if missing.
async fn create_component(path: &Path) -> ShedResult<()> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err.into()),
    }

    let file_type = tokio::fs::symlink_metadata(path).await?.file_type();
    if file_type.is_symlink() {
        return Err(ShedutilsError::PathValidation(format!(
            "{} is a symlink",
            path.display()
        ))
        .into());
    }
    if !file_type.is_dir() {
        return Err(ShedutilsError::PathValidation(format!(
            "{} is not a directory",
            path.display()
        ))
        .into());
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
