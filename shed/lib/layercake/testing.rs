//! In-memory collaborators for unit tests.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{quota::QuotaLayerProvider, rootfs::Namespacer, ShedError, ShedResult};

use super::{Cake, ImageRecord, LayerContent, LayerId};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A graph kept in memory, recording every mutation.
#[derive(Clone, Default)]
pub struct FakeCake {
    state: Arc<Mutex<FakeCakeState>>,
}

#[derive(Default)]
struct FakeCakeState {
    records: HashMap<String, ImageRecord>,
    created: Vec<(LayerId, LayerId)>,
    registered: Vec<String>,
    removed: Vec<String>,
    quotaed: Vec<(String, u64)>,
    failing_removes: HashSet<String>,
    failing_gets: HashSet<String>,
    racing: HashMap<String, ImageRecord>,
}

/// A quota provider that only records calls.
#[derive(Clone, Default)]
pub struct FakeQuotaProvider {
    state: Arc<Mutex<FakeQuotaState>>,
}

#[derive(Default)]
struct FakeQuotaState {
    provided: Vec<(PathBuf, u64)>,
    destroyed: Vec<PathBuf>,
    fail_provide: bool,
}

/// A namespacer that records the paths it was asked to remap.
#[derive(Clone, Default)]
pub struct FakeNamespacer {
    state: Arc<Mutex<FakeNamespacerState>>,
}

#[derive(Default)]
struct FakeNamespacerState {
    namespaced: Vec<PathBuf>,
    fail: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeCake {
    /// Adds a record without going through `create`.
    pub fn insert(&self, record: ImageRecord) {
        let mut state = self.state.lock().unwrap();
        state.records.insert(record.get_id().clone(), record);
    }

    /// Adds a chain of plain image layers, each the parent of the next.
    pub fn insert_chain(&self, ids: &[&str]) {
        let mut parent = String::new();
        for id in ids {
            self.insert(ImageRecord::builder().id(*id).parent(parent.clone()).build());
            parent = id.to_string();
        }
    }

    /// Makes `remove` fail for the given graph key.
    pub fn fail_remove(&self, graph_id: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .failing_removes
            .insert(graph_id.into());
    }

    /// Makes `get` fail for the given graph key.
    pub fn fail_get(&self, graph_id: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .failing_gets
            .insert(graph_id.into());
    }

    /// Makes the next `register` of `winner`'s key find `winner` already registered by someone else.
    pub fn lose_register_race(&self, winner: ImageRecord) {
        self.state
            .lock()
            .unwrap()
            .racing
            .insert(winner.get_id().clone(), winner);
    }

    /// Graph keys removed so far, in order.
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    /// `(child, parent)` pairs passed to `create`.
    pub fn created(&self) -> Vec<(LayerId, LayerId)> {
        self.state.lock().unwrap().created.clone()
    }

    /// Graph keys passed to `register`.
    pub fn registered(&self) -> Vec<String> {
        self.state.lock().unwrap().registered.clone()
    }

    /// `(graph key, quota)` pairs passed to `quotaed_path`.
    pub fn quotaed(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().quotaed.clone()
    }

    /// Returns true if a record exists for `id`.
    pub fn contains(&self, id: &LayerId) -> bool {
        self.state
            .lock()
            .unwrap()
            .records
            .contains_key(&id.graph_id())
    }

    /// The fake mount path for a graph key.
    pub fn path_for(graph_id: &str) -> PathBuf {
        PathBuf::from("/fake/graph").join(graph_id)
    }
}

impl FakeQuotaProvider {
    /// Makes every `provide` fail.
    pub fn fail_provide(&self) {
        self.state.lock().unwrap().fail_provide = true;
    }

    /// `(path, quota)` pairs passed to `provide`.
    pub fn provided(&self) -> Vec<(PathBuf, u64)> {
        self.state.lock().unwrap().provided.clone()
    }

    /// Paths passed to `destroy`.
    pub fn destroyed(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().destroyed.clone()
    }
}

impl FakeNamespacer {
    /// Makes every `namespace` fail.
    pub fn fail(&self) {
        self.state.lock().unwrap().fail = true;
    }

    /// Paths passed to `namespace`.
    pub fn namespaced(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().namespaced.clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Cake for FakeCake {
    fn driver_name(&self) -> String {
        "fake".to_string()
    }

    async fn create(&self, child: &LayerId, parent: &LayerId) -> ShedResult<()> {
        let record = ImageRecord::for_child(child, parent);
        {
            let mut state = self.state.lock().unwrap();
            state.created.push((child.clone(), parent.clone()));
            if !parent.is_root() && !state.records.contains_key(&parent.graph_id()) {
                return Err(ShedError::NotFound(format!("image {}", parent.graph_id())));
            }
        }
        self.register(record, None).await
    }

    async fn register(&self, record: ImageRecord, _content: Option<LayerContent>) -> ShedResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(winner) = state.racing.remove(record.get_id()) {
            state.records.insert(winner.get_id().clone(), winner);
        }
        if state.records.contains_key(record.get_id()) {
            return Err(ShedError::AlreadyExists(format!("image {}", record.get_id())));
        }
        state.registered.push(record.get_id().clone());
        state.records.insert(record.get_id().clone(), record);
        Ok(())
    }

    async fn get(&self, id: &LayerId) -> ShedResult<ImageRecord> {
        let state = self.state.lock().unwrap();
        let graph_id = id.graph_id();
        if state.failing_gets.contains(&graph_id) {
            return Err(ShedError::custom(anyhow::anyhow!("get failed")));
        }
        state
            .records
            .get(&graph_id)
            .cloned()
            .ok_or_else(|| ShedError::NotFound(format!("image {graph_id}")))
    }

    async fn remove(&self, id: &LayerId) -> ShedResult<()> {
        let mut state = self.state.lock().unwrap();
        let graph_id = id.graph_id();
        if state.failing_removes.contains(&graph_id) {
            return Err(ShedError::custom(anyhow::anyhow!("remove failed: {graph_id}")));
        }
        if state.records.remove(&graph_id).is_none() {
            return Err(ShedError::NotFound(format!("image {graph_id}")));
        }
        state.removed.push(graph_id);
        Ok(())
    }

    async fn path(&self, id: &LayerId) -> ShedResult<PathBuf> {
        self.get(id).await?;
        Ok(Self::path_for(&id.graph_id()))
    }

    async fn quotaed_path(&self, id: &LayerId, quota: u64) -> ShedResult<PathBuf> {
        self.get(id).await?;
        self.state
            .lock()
            .unwrap()
            .quotaed
            .push((id.graph_id(), quota));
        Ok(Self::path_for(&id.graph_id()))
    }

    async fn is_leaf(&self, id: &LayerId) -> ShedResult<bool> {
        let state = self.state.lock().unwrap();
        let graph_id = id.graph_id();
        Ok(!state.records.values().any(|r| r.get_parent() == &graph_id))
    }

    async fn get_all_leaves(&self) -> ShedResult<Vec<LayerId>> {
        let state = self.state.lock().unwrap();
        let parents: HashSet<&String> = state.records.values().map(|r| r.get_parent()).collect();
        let mut leaves: Vec<String> = state
            .records
            .keys()
            .filter(|id| !parents.contains(id))
            .cloned()
            .collect();
        leaves.sort();
        Ok(leaves.into_iter().map(LayerId::docker_image).collect())
    }
}

#[async_trait]
impl QuotaLayerProvider for FakeQuotaProvider {
    async fn provide(&self, destination: &Path, quota: u64) -> ShedResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_provide {
            return Err(ShedError::custom(anyhow::anyhow!("provide failed")));
        }
        state.provided.push((destination.to_path_buf(), quota));
        Ok(())
    }

    async fn destroy(&self, destination: &Path) -> ShedResult<()> {
        self.state
            .lock()
            .unwrap()
            .destroyed
            .push(destination.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl Namespacer for FakeNamespacer {
    async fn namespace(&self, path: &Path) -> ShedResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(ShedError::custom(anyhow::anyhow!("namespace failed")));
        }
        state.namespaced.push(path.to_path_buf());
        Ok(())
    }

    fn cache_key(&self) -> String {
        "fake-cache-key".to_string()
    }
}
