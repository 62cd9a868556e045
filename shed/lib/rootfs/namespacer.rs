use std::{
    fmt,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use walkdir::WalkDir;

use crate::{ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SETID_BITS: u32 = 0o6000;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Rewrites file ownership so that a tree can be used inside a user namespace.
#[async_trait]
pub trait Namespacer: Send + Sync {
    /// Rewrites the ownership of everything under `path`.
    async fn namespace(&self, path: &Path) -> ShedResult<()>;

    /// Identifies the remapping scheme. Trees namespaced with equal keys are interchangeable.
    fn cache_key(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Maps a contiguous range of ids inside a container to ids on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct IdMapping {
    /// The first id of the range as seen inside the container.
    pub container_id: u32,

    /// The host id that `container_id` maps to.
    pub host_id: u32,

    /// The number of ids in the range.
    pub size: u32,
}

/// Rewrites uids and gids through id mappings with `lchown`.
///
/// Symlinks are changed themselves, never followed. Setuid and setgid bits, which `chown`
/// clears, are put back.
#[derive(Debug, Clone, Default)]
pub struct ChownNamespacer {
    uid_mappings: Vec<IdMapping>,
    gid_mappings: Vec<IdMapping>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IdMapping {
    /// Maps `id` if it falls in this range.
    pub fn map(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        if offset < self.size {
            self.host_id.checked_add(offset)
        } else {
            None
        }
    }
}

impl ChownNamespacer {
    /// Creates a namespacer for the given uid and gid mappings.
    pub fn new(uid_mappings: Vec<IdMapping>, gid_mappings: Vec<IdMapping>) -> Self {
        Self {
            uid_mappings,
            gid_mappings,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps `id` through the first matching range. Ids outside every range are unchanged.
pub fn map_id(mappings: &[IdMapping], id: u32) -> u32 {
    mappings
        .iter()
        .find_map(|mapping| mapping.map(id))
        .unwrap_or(id)
}

fn render_mappings(mappings: &[IdMapping]) -> String {
    mappings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn remap_tree(root: &Path, uids: &[IdMapping], gids: &[IdMapping]) -> ShedResult<usize> {
    let mut changed = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| ShedError::custom(e).context("walking namespaced tree"))?;
        let path: PathBuf = entry.path().to_path_buf();
        let metadata = std::fs::symlink_metadata(&path)?;

        let uid = map_id(uids, metadata.uid());
        let gid = map_id(gids, metadata.gid());
        if uid == metadata.uid() && gid == metadata.gid() {
            continue;
        }

        std::os::unix::fs::lchown(&path, Some(uid), Some(gid))
            .map_err(|e| ShedError::from(e).context(format!("chowning {}", path.display())))?;

        let mode = metadata.mode();
        if !metadata.file_type().is_symlink() && mode & SETID_BITS != 0 {
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }

        changed += 1;
    }

    Ok(changed)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.container_id, self.host_id, self.size)
    }
}

#[async_trait]
impl Namespacer for ChownNamespacer {
    async fn namespace(&self, path: &Path) -> ShedResult<()> {
        let root = path.to_path_buf();
        let uids = self.uid_mappings.clone();
        let gids = self.gid_mappings.clone();

        let changed =
            tokio::task::spawn_blocking(move || remap_tree(&root, &uids, &gids)).await??;

        tracing::info!(path = %path.display(), changed, "namespaced tree");
        Ok(())
    }

    fn cache_key(&self) -> String {
        format!(
            "{}+{}",
            render_mappings(&self.uid_mappings),
            render_mappings(&self.gid_mappings)
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn mapping(container_id: u32, host_id: u32, size: u32) -> IdMapping {
        IdMapping::builder()
            .container_id(container_id)
            .host_id(host_id)
            .size(size)
            .build()
    }

    #[test]
    fn test_map_id_uses_first_matching_range() {
        let mappings = [mapping(0, 100_000, 1), mapping(1, 1, 99_999)];

        assert_eq!(map_id(&mappings, 0), 100_000);
        assert_eq!(map_id(&mappings, 5), 5);
        assert_eq!(map_id(&mappings, 200_000), 200_000);
        assert_eq!(mapping(10, 20, 5).map(14), Some(24));
        assert_eq!(mapping(10, 20, 5).map(15), None);
        assert_eq!(mapping(10, 20, 5).map(9), None);
    }

    #[test]
    fn test_cache_key_renders_both_mappings() {
        let namespacer = ChownNamespacer::new(
            vec![mapping(0, 4_294_967_294, 1), mapping(1, 1, 4_294_967_293)],
            vec![mapping(0, 4_294_967_294, 1)],
        );

        assert_eq!(
            namespacer.cache_key(),
            "0-4294967294-1,1-1-4294967293+0-4294967294-1"
        );
        assert_ne!(namespacer.cache_key(), ChownNamespacer::default().cache_key());
    }

    #[test_log::test(tokio::test)]
    async fn test_unmapped_entries_are_left_alone() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("setuid");
        std::fs::write(&file, b"")?;
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o4755))?;
        std::os::unix::fs::symlink("/nonexistent", dir.path().join("dangling"))?;
        let before = std::fs::metadata(&file)?;

        let far_away = before.uid().wrapping_add(1000);
        ChownNamespacer::new(vec![mapping(far_away, 0, 1)], vec![])
            .namespace(dir.path())
            .await?;

        let after = std::fs::metadata(&file)?;
        assert_eq!(after.uid(), before.uid());
        assert_eq!(after.mode() & 0o7777, 0o4755);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    #[ignore = "requires root"]
    async fn test_namespace_changes_owner_and_keeps_setuid() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("setuid");
        std::fs::write(&file, b"")?;
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o4755))?;

        ChownNamespacer::new(vec![mapping(0, 100, 1)], vec![mapping(0, 100, 1)])
            .namespace(dir.path())
            .await?;

        let metadata = std::fs::metadata(&file)?;
        assert_eq!(metadata.uid(), 100);
        assert_eq!(metadata.gid(), 100);
        assert_eq!(metadata.mode() & 0o4000, 0o4000);
        Ok(())
    }
}
