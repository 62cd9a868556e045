use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::LayerId;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Metadata recorded for every layer in the graph.
///
/// Records are written once when the layer is registered and deleted with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageRecord {
    /// The graph key of the layer.
    #[builder(setter(into))]
    id: String,

    /// The graph key of the parent layer. Empty for root layers.
    #[builder(default, setter(into))]
    parent: String,

    /// The handle of the container that owns this layer, if it is a container layer.
    #[builder(default, setter(strip_option, into))]
    container: Option<String>,

    /// Opaque image configuration.
    #[builder(default)]
    config: serde_json::Value,

    /// Volume paths declared by the image.
    #[builder(default)]
    volumes: Vec<String>,

    /// Environment variables declared by the image, as `KEY=value` pairs.
    #[builder(default)]
    env: Vec<String>,

    /// When the layer was registered.
    #[builder(default = Utc::now())]
    created: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageRecord {
    /// Builds the record for `Create(child, parent)`.
    ///
    /// Container layers carry their handle as the owning-container tag.
    pub fn for_child(child: &LayerId, parent: &LayerId) -> Self {
        ImageRecord {
            id: child.graph_id(),
            parent: parent.graph_id(),
            container: child.container_handle().map(ToString::to_string),
            config: serde_json::Value::Null,
            volumes: Vec::new(),
            env: Vec::new(),
            created: Utc::now(),
        }
    }

    /// Returns the parent as a layer id, or `None` for root layers.
    pub fn parent_id(&self) -> Option<LayerId> {
        if self.parent.is_empty() {
            None
        } else {
            Some(LayerId::docker_image(self.parent.clone()))
        }
    }

    /// Replaces the parent key.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
