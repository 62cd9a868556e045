use std::{
    fmt,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use sha2::{Digest, Sha256};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Identifies a layer in the graph.
///
/// Every variant maps deterministically to a graph key via [`LayerId::graph_id`]. Equal
/// identifiers always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LayerId {
    /// A container's own writable layer, keyed by the hash of the container handle.
    Container(String),

    /// A layer whose id was assigned by a registry. The key is the id itself.
    DockerImage(String),

    /// A directory imported from the local filesystem, keyed by its path and mtime.
    LocalImage {
        /// The resolved absolute path of the directory.
        path: PathBuf,

        /// The directory's modification time.
        modified: SystemTime,
    },

    /// A uid/gid remapped copy of another layer.
    Namespaced {
        /// The layer that was copied.
        inner: Box<LayerId>,

        /// Identifies the remapping scheme.
        cache_key: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerId {
    /// Creates a container id.
    pub fn container(handle: impl Into<String>) -> Self {
        LayerId::Container(handle.into())
    }

    /// Creates a registry image id.
    pub fn docker_image(id: impl Into<String>) -> Self {
        LayerId::DockerImage(id.into())
    }

    /// Creates a local image id.
    pub fn local_image(path: impl AsRef<Path>, modified: SystemTime) -> Self {
        LayerId::LocalImage {
            path: path.as_ref().to_path_buf(),
            modified,
        }
    }

    /// Creates the id of `id` remapped under the scheme named by `cache_key`.
    pub fn namespaced(id: LayerId, cache_key: impl Into<String>) -> Self {
        LayerId::Namespaced {
            inner: Box::new(id),
            cache_key: cache_key.into(),
        }
    }

    /// The id of the root pseudo-parent.
    pub fn root() -> Self {
        LayerId::DockerImage(String::new())
    }

    /// Returns the graph key for this id.
    pub fn graph_id(&self) -> String {
        match self {
            LayerId::Container(handle) => sha_id(handle),
            LayerId::DockerImage(id) => id.clone(),
            LayerId::LocalImage { path, modified } => {
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                sha_id(&format!("{}-{}", path.display(), nanos))
            }
            LayerId::Namespaced { inner, cache_key } => {
                sha_id(&format!("{}@{}", inner.graph_id(), cache_key))
            }
        }
    }

    /// Returns true for the empty registry id that stands for "no parent".
    pub fn is_root(&self) -> bool {
        matches!(self, LayerId::DockerImage(id) if id.is_empty())
    }

    /// Returns true if this is a namespaced id.
    pub fn is_namespaced(&self) -> bool {
        matches!(self, LayerId::Namespaced { .. })
    }

    /// The container handle, if this is a container id.
    pub fn container_handle(&self) -> Option<&str> {
        match self {
            LayerId::Container(handle) => Some(handle),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the lowercase hex sha256 of `value`.
pub(crate) fn sha_id(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerId::Container(handle) => write!(f, "container:{handle}"),
            LayerId::DockerImage(id) => write!(f, "image:{id}"),
            LayerId::LocalImage { path, .. } => write!(f, "local:{}", path.display()),
            LayerId::Namespaced { inner, cache_key } => write!(f, "{inner}@{cache_key}"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
