use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;

use crate::{ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reports how much of a quota filesystem is in use.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffSizer;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DiffSizer {
    /// Returns the bytes used on the filesystem mounted at `path`.
    pub async fn bytes_used(&self, path: &Path) -> ShedResult<u64> {
        let path: PathBuf = path.to_path_buf();
        if !tokio::fs::try_exists(&path).await? {
            return Err(ShedError::NotFound(path.display().to_string()).context("get usage"));
        }

        let stat = tokio::task::spawn_blocking(move || statvfs(&path))
            .await?
            .map_err(|e| ShedError::custom(e).context("get usage"))?;

        let used_blocks = stat.blocks().saturating_sub(stat.blocks_free()) as u64;
        Ok(used_blocks * stat.fragment_size() as u64)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
