//! Bringing images into the layer graph.
//!
//! A rootfs URL names either a registry image (`docker://host/repo#tag`) or a directory on the
//! local filesystem (`/path/to/rootfs`, `raw:///path/to/rootfs`). Fetching registers whatever
//! layers the graph is missing and returns the id of the image's top layer.

mod client;
mod composite;
mod image_retainer;
mod local;
mod registry;
mod remote;
mod retryable;

use async_trait::async_trait;
use getset::Getters;
use reqwest::Url;
use typed_builder::TypedBuilder;

use crate::{layercake::LayerId, ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use composite::*;
pub use image_retainer::*;
pub use local::*;
pub use registry::*;
pub use remote::*;
pub use retryable::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The URL scheme of registry images.
pub const DOCKER_SCHEME: &str = "docker";

/// The scheme given to rootfs URLs written as bare paths.
pub const RAW_SCHEME: &str = "raw";

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Fetches images into the layer graph.
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Registers the image at `url` and returns it.
    ///
    /// `quota` is the disk budget available to the image, or zero for none.
    async fn fetch(&self, url: &Url, quota: u64) -> ShedResult<FetchedImage>;

    /// Resolves the id of the image at `url` without registering anything.
    async fn fetch_id(&self, url: &Url) -> ShedResult<LayerId>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An image present in the layer graph.
#[derive(Debug, Clone, Default, PartialEq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct FetchedImage {
    /// The graph key of the image's top layer.
    #[builder(setter(into))]
    image_id: String,

    /// Environment variables declared by the image.
    #[builder(default)]
    env: Vec<String>,

    /// Volumes declared by the image.
    #[builder(default)]
    volumes: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FetchedImage {
    /// The image's top layer as a layer id.
    pub fn layer_id(&self) -> LayerId {
        LayerId::docker_image(self.image_id.clone())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a rootfs URL. Bare paths, including the empty path, get the `raw` scheme.
pub fn parse_rootfs_url(rootfs: &str) -> ShedResult<Url> {
    if rootfs.is_empty() || rootfs.starts_with('/') {
        return Url::parse(&format!("{RAW_SCHEME}://{rootfs}"))
            .map_err(|e| ShedError::InvalidUrl(format!("{rootfs}: {e}")));
    }

    Url::parse(rootfs).map_err(|e| ShedError::InvalidUrl(format!("{rootfs}: {e}")))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
