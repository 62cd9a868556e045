use std::sync::Arc;

use crate::layercake::{LayerId, Retainer};

use super::{parse_rootfs_url, LayerIdProvider, RepositoryFetcher, DOCKER_SCHEME};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Pins images named by rootfs URLs, together with their namespaced copies.
pub struct ImageRetainer {
    graph_retainer: Arc<dyn Retainer>,
    directory_id_provider: Arc<dyn LayerIdProvider>,
    docker_id_fetcher: Arc<dyn RepositoryFetcher>,
    namespace_cache_key: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageRetainer {
    /// Creates a retainer. Namespaced copies are identified by `namespace_cache_key`.
    pub fn new(
        graph_retainer: Arc<dyn Retainer>,
        directory_id_provider: Arc<dyn LayerIdProvider>,
        docker_id_fetcher: Arc<dyn RepositoryFetcher>,
        namespace_cache_key: impl Into<String>,
    ) -> Self {
        Self {
            graph_retainer,
            directory_id_provider,
            docker_id_fetcher,
            namespace_cache_key: namespace_cache_key.into(),
        }
    }

    /// Retains every image in `rootfs_urls`.
    ///
    /// URLs that cannot be parsed or resolved are logged and skipped.
    pub async fn retain(&self, rootfs_urls: &[String]) {
        for rootfs in rootfs_urls {
            let url = match parse_rootfs_url(rootfs) {
                Ok(url) => url,
                Err(err) => {
                    tracing::error!(url = rootfs, error = %err, "parse-url");
                    continue;
                }
            };

            let id = if url.scheme() == DOCKER_SCHEME {
                self.docker_id_fetcher.fetch_id(&url).await
            } else {
                self.directory_id_provider
                    .provide_id(std::path::Path::new(url.path()))
                    .await
            };

            let id = match id {
                Ok(id) => id,
                Err(err) => {
                    tracing::error!(url = rootfs, error = %err, "fetch-image-id");
                    continue;
                }
            };

            tracing::info!(url = rootfs, graph_id = id.graph_id(), "retaining");
            self.graph_retainer.retain(&id);
            self.graph_retainer.retain(&LayerId::namespaced(
                id,
                self.namespace_cache_key.clone(),
            ));
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
