use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use shedutils::Retrier;
use typed_builder::TypedBuilder;

use crate::{fetcher::DEFAULT_REGISTRY_HOST, rootfs::IdMapping, ShedError, ShedResult};

use super::{
    DEFAULT_BACKING_STORE_DIR, DEFAULT_UNMOUNT_ATTEMPTS, DEFAULT_UNMOUNT_DELAY, GRAPH_DB_FILENAME,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The shed configuration, usually read from a TOML file.
///
/// ```toml
/// graph_root = "/var/lib/shed/graph"
/// default_rootfs = "/var/lib/shed/rootfs"
/// persistent_images = ["docker:///busybox"]
///
/// [[uid_mappings]]
/// container_id = 0
/// host_id = 100000
/// size = 65536
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ShedConfig {
    /// The directory holding layer storage and the graph database.
    #[builder(setter(into))]
    pub(super) graph_root: PathBuf,

    /// The directory holding quota backing files. Defaults to `<graph_root>/backing_stores`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) backing_store_root: Option<PathBuf>,

    /// The registry used by rootfs URLs that name no host.
    #[serde(default = "ShedConfig::default_registry_host")]
    #[builder(default = ShedConfig::default_registry_host(), setter(into))]
    pub(super) default_registry_host: String,

    /// The rootfs used when a local rootfs URL names no path.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) default_rootfs: Option<PathBuf>,

    /// Whether removing a layer also removes parents left without children.
    #[serde(default = "ShedConfig::default_enable_image_cleanup")]
    #[builder(default = ShedConfig::default_enable_image_cleanup())]
    pub(super) enable_image_cleanup: bool,

    /// How busy quota filesystems are unmounted.
    #[serde(default)]
    #[builder(default)]
    pub(super) unmount_retry: UnmountRetry,

    /// Uid ranges applied to namespaced layers.
    #[serde(default)]
    #[builder(default)]
    pub(super) uid_mappings: Vec<IdMapping>,

    /// Gid ranges applied to namespaced layers.
    #[serde(default)]
    #[builder(default)]
    pub(super) gid_mappings: Vec<IdMapping>,

    /// The quota in bytes of every namespaced layer, or zero for none.
    #[serde(default)]
    #[builder(default)]
    pub(super) namespaced_layer_quota: u64,

    /// Rootfs URLs whose layers are never garbage collected.
    #[serde(default)]
    #[builder(default)]
    pub(super) persistent_images: Vec<String>,
}

/// Retry policy for unmounting quota filesystems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TypedBuilder, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct UnmountRetry {
    /// The number of attempts.
    #[serde(default = "UnmountRetry::default_max_attempts")]
    #[builder(default = UnmountRetry::default_max_attempts())]
    pub(super) max_attempts: u32,

    /// The pause between attempts in milliseconds.
    #[serde(default = "UnmountRetry::default_delay_ms")]
    #[builder(default = UnmountRetry::default_delay_ms())]
    pub(super) delay_ms: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ShedConfig {
    /// Reads and validates the TOML configuration at `path`.
    pub async fn load(path: impl AsRef<Path>) -> ShedResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ShedError::from(e).context(format!("reading {}", path.display())))?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// The directory holding quota backing files.
    pub fn backing_store_dir(&self) -> PathBuf {
        self.backing_store_root
            .clone()
            .unwrap_or_else(|| self.graph_root.join(DEFAULT_BACKING_STORE_DIR))
    }

    /// The path of the graph database.
    pub fn graph_db_path(&self) -> PathBuf {
        self.graph_root.join(GRAPH_DB_FILENAME)
    }

    fn default_registry_host() -> String {
        DEFAULT_REGISTRY_HOST.to_string()
    }

    fn default_enable_image_cleanup() -> bool {
        true
    }
}

impl UnmountRetry {
    /// The retrier this policy describes.
    pub fn retrier(&self) -> Retrier {
        Retrier::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }

    fn default_max_attempts() -> u32 {
        DEFAULT_UNMOUNT_ATTEMPTS
    }

    fn default_delay_ms() -> u64 {
        DEFAULT_UNMOUNT_DELAY.as_millis() as u64
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for UnmountRetry {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
