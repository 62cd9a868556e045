use async_trait::async_trait;
use getset::Getters;
use typed_builder::TypedBuilder;

use crate::{layercake::LayerContent, ShedResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Opens connections to image repositories.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connects to `repository` on the registry at `host`.
    async fn dial(&self, host: &str, repository: &str) -> ShedResult<Box<dyn Conn>>;
}

/// A connection to a single image repository.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Resolves `tag` to its layers, ordered bottom layer first.
    async fn get_manifest(&self, tag: &str) -> ShedResult<Manifest>;

    /// Streams the blob with `digest`.
    async fn get_blob_reader(&self, digest: &str) -> ShedResult<LayerContent>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The layers of an image.
#[derive(Debug, Clone, Default, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Manifest {
    /// Layers ordered bottom layer first. The last layer is the image's top layer.
    layers: Vec<ManifestLayer>,
}

/// One layer of an image, as described by a registry.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ManifestLayer {
    /// The digest of the layer blob.
    #[builder(setter(into))]
    digest: String,

    /// The graph key of the layer.
    #[builder(setter(into))]
    id: String,

    /// The graph key of the layer below. Empty for the bottom layer.
    #[builder(default, setter(into))]
    parent: String,

    /// Image configuration. Only set on the top layer.
    #[builder(default)]
    config: serde_json::Value,

    /// Environment variables declared by the image. Only set on the top layer.
    #[builder(default)]
    env: Vec<String>,

    /// Volumes declared by the image. Only set on the top layer.
    #[builder(default)]
    volumes: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Manifest {
    /// The image's top layer.
    pub fn top_layer(&self) -> Option<&ManifestLayer> {
        self.layers.last()
    }
}
