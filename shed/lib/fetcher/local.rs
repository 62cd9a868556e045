use std::{
    io::{Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use reqwest::Url;
use tracing::Instrument;

use crate::{
    layercake::{Cake, ImageRecord, LayerContent, LayerId},
    ShedError, ShedResult,
};

use super::{FetchedImage, RepositoryFetcher};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Returned when a local rootfs URL has no path and no default rootfs is configured.
pub const MISSING_ROOTFS_MESSAGE: &str =
    "RootFSPath: is a required parameter, since no default rootfs was provided to the server.";

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Derives layer ids for directories.
#[async_trait]
pub trait LayerIdProvider: Send + Sync {
    /// Returns the id of the layer holding the contents of `path`.
    async fn provide_id(&self, path: &Path) -> ShedResult<LayerId>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Identifies a directory by its resolved path and modification time.
///
/// Symlinks are resolved first, so a link and its target share an id. Touching the directory
/// produces a new id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLayerIdProvider;

/// Imports directories from the local filesystem as single root layers.
pub struct Local {
    cake: Arc<dyn Cake>,
    default_rootfs: Option<PathBuf>,
    id_provider: Arc<dyn LayerIdProvider>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Local {
    /// Creates a fetcher. URLs without a path use `default_rootfs`.
    pub fn new(
        cake: Arc<dyn Cake>,
        default_rootfs: Option<PathBuf>,
        id_provider: Arc<dyn LayerIdProvider>,
    ) -> Self {
        Self {
            cake,
            default_rootfs,
            id_provider,
        }
    }

    fn rootfs_path(&self, url: &Url) -> ShedResult<PathBuf> {
        let path = url.path();
        if !path.is_empty() && path != "/" {
            return Ok(PathBuf::from(path));
        }

        self.default_rootfs
            .clone()
            .ok_or_else(|| ShedError::Configuration(MISSING_ROOTFS_MESSAGE.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Packs the directory at `path` into an uncompressed tar stream.
///
/// Symlinks inside the tree are stored as links. A symlinked root is resolved first.
pub async fn archive_directory(path: &Path) -> ShedResult<LayerContent> {
    let root = tokio::fs::canonicalize(path).await?;

    let file = tokio::task::spawn_blocking(move || -> ShedResult<std::fs::File> {
        let mut builder = tar::Builder::new(tempfile::tempfile()?);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &root)?;

        let mut file = builder.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    })
    .await??;

    Ok(Box::new(tokio::fs::File::from_std(file)))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl LayerIdProvider for LocalLayerIdProvider {
    async fn provide_id(&self, path: &Path) -> ShedResult<LayerId> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| ShedError::from(e).context(format!("resolving {}", path.display())))?;
        let modified = tokio::fs::metadata(&resolved).await?.modified()?;

        Ok(LayerId::local_image(resolved, modified))
    }
}

#[async_trait]
impl RepositoryFetcher for Local {
    async fn fetch(&self, url: &Url, quota: u64) -> ShedResult<FetchedImage> {
        let path = self.rootfs_path(url)?;
        let span = tracing::info_span!("local-fetch", path = %path.display(), quota);

        async {
            tracing::info!("start");

            let id = self.id_provider.provide_id(&path).await?;
            let graph_id = id.graph_id();

            if let Ok(record) = self.cake.get(&id).await {
                tracing::info!(graph_id, "using-cache");
                return Ok(FetchedImage::builder()
                    .image_id(graph_id)
                    .env(record.get_env().clone())
                    .volumes(record.get_volumes().clone())
                    .build());
            }

            let content = archive_directory(&path).await?;
            match self
                .cake
                .register(ImageRecord::builder().id(graph_id.clone()).build(), Some(content))
                .await
            {
                Ok(()) => {}
                Err(ShedError::AlreadyExists(_)) => {
                    let record = self.cake.get(&id).await?;
                    tracing::info!(graph_id, "registered-concurrently");
                    return Ok(FetchedImage::builder()
                        .image_id(graph_id)
                        .env(record.get_env().clone())
                        .volumes(record.get_volumes().clone())
                        .build());
                }
                Err(err) => return Err(err),
            }

            tracing::info!(graph_id, "finish");
            Ok(FetchedImage::builder().image_id(graph_id).build())
        }
        .instrument(span)
        .await
    }

    async fn fetch_id(&self, url: &Url) -> ShedResult<LayerId> {
        let path = self.rootfs_path(url)?;
        self.id_provider.provide_id(&path).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use crate::{fetcher::parse_rootfs_url, layercake::testing::FakeCake};

    use super::*;

    /// Derives ids by replacing slashes with underscores.
    struct UnderscoreIds;

    #[async_trait]
    impl LayerIdProvider for UnderscoreIds {
        async fn provide_id(&self, path: &Path) -> ShedResult<LayerId> {
            Ok(LayerId::docker_image(
                path.display().to_string().replace('/', "_"),
            ))
        }
    }

    fn local(fake: &FakeCake, default_rootfs: Option<PathBuf>) -> Local {
        Local::new(Arc::new(fake.clone()), default_rootfs, Arc::new(UnderscoreIds))
    }

    fn set_mtime(path: &Path, time: SystemTime) -> anyhow::Result<()> {
        std::fs::File::open(path)?.set_modified(time)?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_id_provider_is_stable_until_path_or_mtime_changes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::create_dir(&first)?;
        std::fs::create_dir(&second)?;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        set_mtime(&first, mtime)?;
        set_mtime(&second, mtime)?;

        let id = LocalLayerIdProvider.provide_id(&first).await?;
        assert_eq!(id, LocalLayerIdProvider.provide_id(&first).await?);
        assert_ne!(id, LocalLayerIdProvider.provide_id(&second).await?);

        set_mtime(&first, mtime + Duration::from_secs(1))?;
        assert_ne!(id, LocalLayerIdProvider.provide_id(&first).await?);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_id_provider_resolves_symlinks() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("rootfs");
        let link = dir.path().join("link");
        std::fs::create_dir(&target)?;
        std::os::unix::fs::symlink(&target, &link)?;

        assert_eq!(
            LocalLayerIdProvider.provide_id(&link).await?,
            LocalLayerIdProvider.provide_id(&target).await?
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_id_delegates_to_the_id_provider() -> anyhow::Result<()> {
        let id = local(&FakeCake::default(), None)
            .fetch_id(&parse_rootfs_url("/something/something")?)
            .await?;

        assert_eq!(id, LayerId::docker_image("_something_something"));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_reuses_existing_layers() -> anyhow::Result<()> {
        let fake = FakeCake::default();
        fake.insert(
            ImageRecord::builder()
                .id("_foo_bar_baz")
                .env(vec!["A=1".to_string()])
                .build(),
        );

        let image = local(&fake, None)
            .fetch(&parse_rootfs_url("/foo/bar/baz")?, 0)
            .await?;

        assert_eq!(image.get_image_id(), "_foo_bar_baz");
        assert_eq!(image.get_env(), &vec!["A=1".to_string()]);
        assert!(fake.registered().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_path_uses_the_default() -> anyhow::Result<()> {
        let fake = FakeCake::default();
        fake.insert(ImageRecord::builder().id("_the_default_path").build());

        let image = local(&fake, Some(PathBuf::from("/the/default/path")))
            .fetch(&parse_rootfs_url("")?, 0)
            .await?;

        assert_eq!(image.get_image_id(), "_the_default_path");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_path_without_default_is_a_configuration_error() -> anyhow::Result<()> {
        let err = local(&FakeCake::default(), None)
            .fetch(&parse_rootfs_url("")?, 0)
            .await
            .unwrap_err();

        assert!(matches!(err, ShedError::Configuration(_)));
        assert_eq!(err.to_string(), MISSING_ROOTFS_MESSAGE);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_registers_a_root_layer() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(rootfs.join("a/test"))?;
        std::fs::write(rootfs.join("a/test/file"), b"")?;
        let fake = FakeCake::default();

        let image = local(&fake, None)
            .fetch(&parse_rootfs_url(&rootfs.display().to_string())?, 0)
            .await?;

        let expected = rootfs.display().to_string().replace('/', "_");
        assert_eq!(image.get_image_id(), &expected);
        assert_eq!(fake.registered(), vec![expected.clone()]);
        assert_eq!(fake.get(&LayerId::docker_image(expected)).await?.get_parent(), "");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_losing_a_registration_race_is_a_cache_hit() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs)?;
        let expected = rootfs.display().to_string().replace('/', "_");
        let fake = FakeCake::default();
        fake.lose_register_race(
            ImageRecord::builder()
                .id(expected.clone())
                .env(vec!["A=1".to_string()])
                .build(),
        );

        let image = local(&fake, None)
            .fetch(&parse_rootfs_url(&rootfs.display().to_string())?, 0)
            .await?;

        assert_eq!(image.get_image_id(), &expected);
        assert_eq!(image.get_env(), &vec!["A=1".to_string()]);
        assert!(fake.registered().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_missing_directory_fails() -> anyhow::Result<()> {
        let fake = FakeCake::default();
        let fetcher = Local::new(Arc::new(fake.clone()), None, Arc::new(LocalLayerIdProvider));

        assert!(fetcher
            .fetch(&parse_rootfs_url("/does/not/exist/anywhere")?, 0)
            .await
            .is_err());
        assert!(fake.registered().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_archive_directory_contains_the_tree() -> anyhow::Result<()> {
        use tokio::io::AsyncReadExt;

        let dir = TempDir::new()?;
        std::fs::create_dir_all(dir.path().join("a/test"))?;
        std::fs::write(dir.path().join("a/test/file"), b"hello")?;

        let mut content = archive_directory(dir.path()).await?;
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes).await?;

        let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
        let names: Vec<String> = archive
            .entries()?
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|name| name.ends_with("a/test/file")));
        Ok(())
    }
}
