use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use shedutils::{CommandRunner, CommandSpec};
use tokio::sync::Mutex;

use crate::{rootfs::Namespacer, ShedError, ShedResult};

use super::{Cake, ImageRecord, LayerContent, LayerId, LayerIndex};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Adds namespaced layers to a graph.
///
/// A namespaced layer is a full copy of its parent with ownership remapped. The driver stores it
/// as a root layer; the real parent is kept in the [`LayerIndex`] so that [`Cake::get`],
/// [`Cake::is_leaf`] and [`Cake::get_all_leaves`] still see the relationship.
pub struct NamespacingCake {
    inner: Arc<dyn Cake>,
    index: LayerIndex,
    runner: Arc<dyn CommandRunner>,
    namespacer: Arc<dyn Namespacer>,
    layer_quota: u64,
    create_lock: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NamespacingCake {
    /// Wraps `inner`.
    ///
    /// Namespaced layers are backed by a quota filesystem of `layer_quota` bytes, or by plain
    /// storage when it is zero.
    pub fn new(
        inner: Arc<dyn Cake>,
        index: LayerIndex,
        runner: Arc<dyn CommandRunner>,
        namespacer: Arc<dyn Namespacer>,
        layer_quota: u64,
    ) -> Self {
        Self {
            inner,
            index,
            runner,
            namespacer,
            layer_quota,
            create_lock: Mutex::new(()),
        }
    }

    async fn create_namespaced(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()> {
        let child_id = child.graph_id();

        if self.inner.get(child).await.is_ok() {
            if !self.index.is_linked(&child_id).await? {
                self.index.link(&child_id, &parent.graph_id()).await?;
            }
            tracing::debug!(id = %child, graph_id = child_id, "namespaced-layer-exists");
            return Ok(());
        }

        // Fail before creating anything if the parent is missing.
        self.inner.get(parent).await?;

        self.inner.create(child, &LayerId::root()).await?;

        if let Err(err) = self.index.link(&child_id, &parent.graph_id()).await {
            self.rollback(child).await;
            return Err(err);
        }

        if let Err(err) = self.populate(child, parent).await {
            self.rollback(child).await;
            return Err(err);
        }

        tracing::info!(id = %child, graph_id = child_id, parent = %parent, "created namespaced layer");
        Ok(())
    }

    async fn populate(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()> {
        let source = self.inner.path(parent).await?;
        let destination = if self.layer_quota > 0 {
            self.inner.quotaed_path(child, self.layer_quota).await?
        } else {
            self.inner.path(child).await?
        };

        let copy = CommandSpec::new("cp").args([
            "-a".to_string(),
            format!("{}/.", source.display()),
            destination.display().to_string(),
        ]);
        self.runner.run(&copy).await.map_err(|e| {
            ShedError::from(e).context(format!(
                "copying layer {} into namespaced layer {}",
                parent.graph_id(),
                child.graph_id()
            ))
        })?;

        self.namespacer.namespace(&destination).await
    }

    async fn rollback(&self, child: &LayerId) {
        let child_id = child.graph_id();
        if let Err(err) = self.index.unlink(&child_id).await {
            tracing::warn!(graph_id = child_id, error = %err, "failed to unlink partial namespaced layer");
        }
        if let Err(err) = self.inner.remove(child).await {
            tracing::warn!(graph_id = child_id, error = %err, "failed to remove partial namespaced layer");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Cake for NamespacingCake {
    fn driver_name(&self) -> String {
        self.inner.driver_name()
    }

    async fn create(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()> {
        if !child.is_namespaced() {
            return self.inner.create(child, parent).await;
        }

        let _guard = self.create_lock.lock().await;
        self.create_namespaced(child, parent).await
    }

    async fn register(&self, record: ImageRecord, content: Option<LayerContent>) -> ShedResult<()> {
        self.inner.register(record, content).await
    }

    async fn get(&self, id: &LayerId) -> ShedResult<ImageRecord> {
        let record = self.inner.get(id).await?;
        if !record.get_parent().is_empty() {
            return Ok(record);
        }

        match self.index.parent_of(record.get_id()).await? {
            Some(parent) => Ok(record.with_parent(parent)),
            None => Ok(record),
        }
    }

    async fn remove(&self, id: &LayerId) -> ShedResult<()> {
        self.inner.remove(id).await?;
        self.index.unlink(&id.graph_id()).await
    }

    async fn path(&self, id: &LayerId) -> ShedResult<PathBuf> {
        self.inner.path(id).await
    }

    async fn quotaed_path(&self, id: &LayerId, quota: u64) -> ShedResult<PathBuf> {
        self.inner.quotaed_path(id, quota).await
    }

    async fn is_leaf(&self, id: &LayerId) -> ShedResult<bool> {
        if !self.inner.is_leaf(id).await? {
            return Ok(false);
        }
        Ok(!self.index.has_children(&id.graph_id()).await?)
    }

    async fn get_all_leaves(&self) -> ShedResult<Vec<LayerId>> {
        let mut leaves = Vec::new();
        for id in self.inner.get_all_leaves().await? {
            if !self.index.has_children(&id.graph_id()).await? {
                leaves.push(id);
            }
        }
        Ok(leaves)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use shedutils::RecordingRunner;
    use tempfile::TempDir;

    use crate::layercake::{
        init_graph_db,
        testing::{FakeCake, FakeNamespacer},
    };

    use super::*;

    struct Fixture {
        _dir: TempDir,
        fake: FakeCake,
        runner: RecordingRunner,
        namespacer: FakeNamespacer,
        cake: NamespacingCake,
    }

    async fn setup(layer_quota: u64) -> anyhow::Result<Fixture> {
        let dir = TempDir::new()?;
        let index = LayerIndex::new(init_graph_db(dir.path().join("graph.db")).await?);
        let fake = FakeCake::default();
        let runner = RecordingRunner::new();
        let namespacer = FakeNamespacer::default();
        let cake = NamespacingCake::new(
            Arc::new(fake.clone()),
            index,
            Arc::new(runner.clone()),
            Arc::new(namespacer.clone()),
            layer_quota,
        );
        Ok(Fixture {
            _dir: dir,
            fake,
            runner,
            namespacer,
            cake,
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_plain_create_is_delegated() -> anyhow::Result<()> {
        let f = setup(0).await?;
        f.fake.insert_chain(&["parent"]);

        f.cake
            .create(&LayerId::container("c1"), &LayerId::docker_image("parent"))
            .await?;

        assert_eq!(
            f.fake.created(),
            vec![(LayerId::container("c1"), LayerId::docker_image("parent"))]
        );
        assert!(f.runner.executed().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_namespaced_create_copies_then_namespaces() -> anyhow::Result<()> {
        let f = setup(0).await?;
        f.fake.insert_chain(&["parent"]);
        let parent = LayerId::docker_image("parent");
        let child = LayerId::namespaced(parent.clone(), "key");

        f.cake.create(&child, &parent).await?;

        assert_eq!(f.fake.created(), vec![(child.clone(), LayerId::root())]);
        let copies = f.runner.executed_program("cp");
        assert_eq!(copies.len(), 1);
        assert_eq!(
            copies[0].get_args()[1],
            format!("{}/.", FakeCake::path_for("parent").display())
        );
        assert_eq!(
            f.namespacer.namespaced(),
            vec![FakeCake::path_for(&child.graph_id())]
        );

        let record = f.cake.get(&child).await?;
        assert_eq!(record.get_parent(), "parent");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_namespaced_create_is_idempotent() -> anyhow::Result<()> {
        let f = setup(0).await?;
        f.fake.insert_chain(&["parent"]);
        let parent = LayerId::docker_image("parent");
        let child = LayerId::namespaced(parent.clone(), "key");

        f.cake.create(&child, &parent).await?;
        f.cake.create(&child, &parent).await?;

        assert_eq!(f.runner.executed_program("cp").len(), 1);
        assert_eq!(f.namespacer.namespaced().len(), 1);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_namespaced_layer_uses_quota_when_configured() -> anyhow::Result<()> {
        let f = setup(2048).await?;
        f.fake.insert_chain(&["parent"]);
        let parent = LayerId::docker_image("parent");
        let child = LayerId::namespaced(parent.clone(), "key");

        f.cake.create(&child, &parent).await?;

        assert_eq!(f.fake.quotaed(), vec![(child.graph_id(), 2048)]);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_copy_rolls_back() -> anyhow::Result<()> {
        let f = setup(0).await?;
        f.fake.insert_chain(&["parent"]);
        f.runner.fail("cp", "disk full");
        let parent = LayerId::docker_image("parent");
        let child = LayerId::namespaced(parent.clone(), "key");

        let err = f.cake.create(&child, &parent).await.unwrap_err();

        assert!(err.to_string().contains("disk full"));
        assert!(f.namespacer.namespaced().is_empty());
        assert!(!f.fake.contains(&child));
        assert!(f.cake.is_leaf(&parent).await?);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_namespacing_rolls_back() -> anyhow::Result<()> {
        let f = setup(0).await?;
        f.fake.insert_chain(&["parent"]);
        f.namespacer.fail();
        let parent = LayerId::docker_image("parent");
        let child = LayerId::namespaced(parent.clone(), "key");

        assert!(f.cake.create(&child, &parent).await.is_err());
        assert!(!f.fake.contains(&child));
        assert_eq!(f.fake.removed(), vec![child.graph_id()]);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_parent_creates_nothing() -> anyhow::Result<()> {
        let f = setup(0).await?;
        let parent = LayerId::docker_image("missing");
        let child = LayerId::namespaced(parent.clone(), "key");

        assert!(matches!(
            f.cake.create(&child, &parent).await,
            Err(ShedError::NotFound(_))
        ));
        assert!(f.fake.created().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_index_links_affect_leaves() -> anyhow::Result<()> {
        let f = setup(0).await?;
        f.fake.insert_chain(&["parent"]);
        let parent = LayerId::docker_image("parent");
        let child = LayerId::namespaced(parent.clone(), "key");
        f.cake.create(&child, &parent).await?;

        assert!(!f.cake.is_leaf(&parent).await?);
        let leaves = f.cake.get_all_leaves().await?;
        assert_eq!(leaves, vec![LayerId::docker_image(child.graph_id())]);

        f.cake.remove(&child).await?;
        assert!(f.cake.is_leaf(&parent).await?);
        assert_eq!(f.cake.get_all_leaves().await?, vec![parent]);
        Ok(())
    }
}
