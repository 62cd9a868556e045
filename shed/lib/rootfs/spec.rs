use getset::Getters;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a container's disk quota is shared between its layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    /// The image and the container layer share one budget.
    #[default]
    Total,

    /// Only the container layer is limited. The image gets no budget.
    Exclusive,
}

/// What a container's root filesystem is built from.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct RootfsSpec {
    /// The image, as a rootfs URL.
    rootfs: Url,

    /// Whether the image is remapped into the container's user namespace.
    #[builder(default)]
    namespaced: bool,

    /// The disk quota in bytes. Zero means unlimited.
    #[builder(default)]
    quota_size: u64,

    /// How the quota is shared.
    #[builder(default)]
    quota_scope: QuotaScope,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RootfsSpec {
    /// The disk budget passed to the fetcher.
    pub fn fetcher_quota(&self) -> u64 {
        match self.quota_scope {
            QuotaScope::Total => self.quota_size,
            QuotaScope::Exclusive => 0,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
