use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tokio::sync::OwnedMutexGuard;

use crate::{ShedError, ShedResult};

use super::{apply_layer, Cake, GraphDriver, ImageRecord, LayerContent, LayerId};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The graph itself: layer records in the graph database, layer content in a graph driver.
#[derive(Clone)]
///
/// Registration and removal of the same graph key are serialized, so concurrent registrations
/// of one layer leave exactly one populated layer and report `AlreadyExists` to the rest.
pub struct LayerStore {
    driver: Arc<dyn GraphDriver>,
    db: Pool<Sqlite>,
    locks: Arc<LayerLocks>,
}

/// Per graph key locks. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
struct LayerLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holds the lock for one graph key.
struct LayerGuard {
    locks: Arc<LayerLocks>,
    graph_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerStore {
    /// Creates a store over `driver`, with records kept in `db`.
    pub fn new(driver: Arc<dyn GraphDriver>, db: Pool<Sqlite>) -> Self {
        Self {
            driver,
            db,
            locks: Arc::default(),
        }
    }

    /// The graph driver holding layer content.
    pub fn driver(&self) -> &Arc<dyn GraphDriver> {
        &self.driver
    }

    async fn record(&self, graph_id: &str) -> ShedResult<Option<ImageRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, parent, container, config_json, volumes_json, env_json, created_at
            FROM layers
            WHERE id = ?
            "#,
        )
        .bind(graph_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    async fn insert_record(&self, record: &ImageRecord) -> ShedResult<()> {
        sqlx::query(
            r#"
            INSERT INTO layers (id, parent, container, config_json, volumes_json, env_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.get_id())
        .bind(record.get_parent())
        .bind(record.get_container().clone())
        .bind(serde_json::to_string(record.get_config())?)
        .bind(serde_json::to_string(record.get_volumes())?)
        .bind(serde_json::to_string(record.get_env())?)
        .bind(*record.get_created())
        .execute(&self.db)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                ShedError::AlreadyExists(format!("image {}", record.get_id()))
            } else {
                ShedError::from(e)
            }
        })?;

        Ok(())
    }

    /// Fills storage this call has just created for `record`, then commits the record.
    async fn populate(&self, record: &ImageRecord, content: Option<LayerContent>) -> ShedResult<()> {
        if let Some(content) = content {
            let path = self.driver.get(record.get_id(), "").await?;
            apply_layer(content, &path).await?;
        }

        self.insert_record(record).await
    }
}

impl LayerLocks {
    async fn lock(self: &Arc<Self>, graph_id: &str) -> LayerGuard {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(graph_id.to_string())
            .or_default()
            .clone();

        LayerGuard {
            locks: self.clone(),
            graph_id: graph_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn record_from_row(row: &SqliteRow) -> ShedResult<ImageRecord> {
    let config: serde_json::Value = serde_json::from_str(&row.get::<String, _>("config_json"))?;
    let volumes: Vec<String> = serde_json::from_str(&row.get::<String, _>("volumes_json"))?;
    let env: Vec<String> = serde_json::from_str(&row.get::<String, _>("env_json"))?;
    let created: DateTime<Utc> = row.get("created_at");

    let record = ImageRecord::builder()
        .id(row.get::<String, _>("id"))
        .parent(row.get::<String, _>("parent"))
        .config(config)
        .volumes(volumes)
        .env(env)
        .created(created);

    Ok(match row.get::<Option<String>, _>("container") {
        Some(container) => record.container(container).build(),
        None => record.build(),
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Cake for LayerStore {
    fn driver_name(&self) -> String {
        self.driver.driver_name().to_string()
    }

    async fn create(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()> {
        self.register(ImageRecord::for_child(child, parent), None)
            .await
    }

    async fn register(&self, record: ImageRecord, content: Option<LayerContent>) -> ShedResult<()> {
        let id = record.get_id().clone();
        if id.is_empty() {
            return Err(ShedError::Configuration(
                "cannot register a layer with an empty id".to_string(),
            ));
        }

        let _guard = self.locks.lock(&id).await;

        if self.record(&id).await?.is_some() {
            return Err(ShedError::AlreadyExists(format!("image {id}")));
        }

        if !record.get_parent().is_empty() && self.record(record.get_parent()).await?.is_none() {
            return Err(ShedError::NotFound(format!(
                "parent image {}",
                record.get_parent()
            )));
        }

        if self.driver.exists(&id).await {
            tracing::warn!(id, "removing storage left without a record");
            self.driver.remove(&id).await?;
        }

        self.driver.create(&id, record.get_parent()).await?;

        if let Err(err) = self.populate(&record, content).await {
            if let Err(cleanup) = self.driver.remove(&id).await {
                tracing::warn!(id, error = %cleanup, "failed to clean up partially registered layer");
            }
            return Err(err);
        }

        tracing::debug!(id, parent = record.get_parent(), "registered layer");
        Ok(())
    }

    async fn get(&self, id: &LayerId) -> ShedResult<ImageRecord> {
        let graph_id = id.graph_id();
        self.record(&graph_id)
            .await?
            .ok_or_else(|| ShedError::NotFound(format!("image {graph_id}")))
    }

    async fn remove(&self, id: &LayerId) -> ShedResult<()> {
        let graph_id = id.graph_id();
        let _guard = self.locks.lock(&graph_id).await;

        if self.record(&graph_id).await?.is_none() {
            return Err(ShedError::NotFound(format!("image {graph_id}")));
        }

        match self.driver.as_quota_capable() {
            Some(quota) => quota
                .remove_quotaed(&graph_id)
                .await
                .map_err(|e| e.context(format!("deleting quotaed layer {graph_id}")))?,
            None => self
                .driver
                .remove(&graph_id)
                .await
                .map_err(|e| e.context(format!("deleting layer storage {graph_id}")))?,
        }

        sqlx::query("DELETE FROM layers WHERE id = ?")
            .bind(&graph_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn path(&self, id: &LayerId) -> ShedResult<PathBuf> {
        self.driver.get(&id.graph_id(), "").await
    }

    async fn quotaed_path(&self, id: &LayerId, quota: u64) -> ShedResult<PathBuf> {
        let quota_driver =
            self.driver
                .as_quota_capable()
                .ok_or_else(|| ShedError::QuotaUnsupported {
                    driver: self.driver.driver_name().to_string(),
                })?;

        quota_driver.get_quotaed(&id.graph_id(), "", quota).await
    }

    async fn is_leaf(&self, id: &LayerId) -> ShedResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM layers WHERE parent = ?) AS referenced")
            .bind(id.graph_id())
            .fetch_one(&self.db)
            .await?;

        Ok(!row.get::<bool, _>("referenced"))
    }

    async fn get_all_leaves(&self) -> ShedResult<Vec<LayerId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM layers
            WHERE id NOT IN (SELECT parent FROM layers WHERE parent != '')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LayerId::docker_image(row.get::<String, _>("id")))
            .collect())
    }
}

impl Drop for LayerGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.graph_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.graph_id);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use shedutils::RecordingRunner;
    use tempfile::TempDir;

    use crate::layercake::{init_graph_db, VfsDriver};

    use super::*;

    async fn setup() -> anyhow::Result<(TempDir, LayerStore)> {
        let root = TempDir::new()?;
        let driver = Arc::new(VfsDriver::new(root.path(), Arc::new(RecordingRunner::new())));
        let db = init_graph_db(root.path().join("graph.db")).await?;
        Ok((root, LayerStore::new(driver, db)))
    }

    #[test_log::test(tokio::test)]
    async fn test_create_requires_existing_parent() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;

        let result = store
            .create(&LayerId::container("c1"), &LayerId::docker_image("missing"))
            .await;
        assert!(matches!(result, Err(ShedError::NotFound(_))));

        store
            .create(&LayerId::docker_image("base"), &LayerId::root())
            .await?;
        store
            .create(&LayerId::container("c1"), &LayerId::docker_image("base"))
            .await?;

        let record = store.get(&LayerId::container("c1")).await?;
        assert_eq!(record.get_parent(), "base");
        assert_eq!(record.get_container().as_deref(), Some("c1"));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_register_round_trips_metadata() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;
        let record = ImageRecord::builder()
            .id("top")
            .config(serde_json::json!({"Cmd": ["sh"]}))
            .volumes(vec!["/data".to_string()])
            .env(vec!["PATH=/bin".to_string()])
            .build();

        store.register(record.clone(), None).await?;

        let fetched = store.get(&LayerId::docker_image("top")).await?;
        assert_eq!(fetched.get_volumes(), record.get_volumes());
        assert_eq!(fetched.get_env(), record.get_env());
        assert_eq!(fetched.get_config(), record.get_config());

        assert!(matches!(
            store.register(record, None).await,
            Err(ShedError::AlreadyExists(_))
        ));
        Ok(())
    }

    fn hostname_archive(name: &str) -> anyhow::Result<LayerContent> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(name.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "etc/hostname", name.as_bytes())?;
        Ok(Box::new(std::io::Cursor::new(builder.into_inner()?)))
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_registration_keeps_one_populated_layer() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;
        let record = ImageRecord::builder().id("shared").build();

        let (one, two) = (hostname_archive("one")?, hostname_archive("two")?);

        let (first, second) = tokio::join!(
            store.register(record.clone(), Some(one)),
            store.register(record.clone(), Some(two)),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ShedError::AlreadyExists(_)))));

        let id = LayerId::docker_image("shared");
        store.get(&id).await?;
        assert!(store.driver().exists("shared").await);
        let hostname = tokio::fs::read_to_string(store.path(&id).await?.join("etc/hostname")).await?;
        assert!(hostname == "one" || hostname == "two");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_registration_keeps_existing_storage() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;
        let record = ImageRecord::builder().id("base").build();
        store
            .register(record.clone(), Some(hostname_archive("box")?))
            .await?;

        let result = store.register(record, Some(hostname_archive("other")?)).await;
        assert!(matches!(result, Err(ShedError::AlreadyExists(_))));

        let path = store.path(&LayerId::docker_image("base")).await?;
        assert_eq!(tokio::fs::read_to_string(path.join("etc/hostname")).await?, "box");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_registration_replaces_storage_without_a_record() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;
        store.driver().create("orphan", "").await?;
        let stale = store.driver().get("orphan", "").await?.join("stale");
        tokio::fs::write(&stale, "left over").await?;

        store
            .register(ImageRecord::builder().id("orphan").build(), None)
            .await?;

        assert!(!stale.exists());
        store.get(&LayerId::docker_image("orphan")).await?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_leaves_and_is_leaf() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;
        let base = LayerId::docker_image("base");
        store.create(&base, &LayerId::root()).await?;
        store.create(&LayerId::docker_image("a"), &base).await?;
        store.create(&LayerId::docker_image("b"), &base).await?;

        assert!(!store.is_leaf(&base).await?);
        assert!(store.is_leaf(&LayerId::docker_image("a")).await?);

        let leaves = store.get_all_leaves().await?;
        assert_eq!(leaves.len(), 2);
        assert!(leaves.contains(&LayerId::docker_image("a")));
        assert!(leaves.contains(&LayerId::docker_image("b")));

        store.remove(&LayerId::docker_image("a")).await?;
        store.remove(&LayerId::docker_image("b")).await?;
        assert!(store.is_leaf(&base).await?);
        assert_eq!(store.get_all_leaves().await?, vec![base]);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_missing_layer_is_not_found() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;

        assert!(store
            .remove(&LayerId::docker_image("ghost"))
            .await
            .unwrap_err()
            .is_not_found());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_quotaed_path_requires_quota_capable_driver() -> anyhow::Result<()> {
        let (_root, store) = setup().await?;
        store
            .create(&LayerId::docker_image("base"), &LayerId::root())
            .await?;

        let result = store
            .quotaed_path(&LayerId::docker_image("base"), 1024)
            .await;
        assert!(matches!(
            result,
            Err(ShedError::QuotaUnsupported { driver }) if driver == "vfs"
        ));
        Ok(())
    }
}
