use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::Instrument;

use crate::{
    layercake::{Cake, ImageRecord, LayerId},
    ShedError, ShedResult,
};

use super::{Conn, Dialer, FetchedImage, Manifest, RepositoryFetcher};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DEFAULT_TAG: &str = "latest";
const DEFAULT_NAMESPACE: &str = "library";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Fetches images from a registry, registering only the layers the graph is missing.
pub struct Remote {
    default_host: String,
    dialer: Arc<dyn Dialer>,
    cake: Arc<dyn Cake>,
}

/// Where a registry image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReference {
    /// The registry host, with port if one was given.
    pub host: String,

    /// The repository path, e.g. `library/ubuntu`.
    pub repository: String,

    /// The tag to resolve.
    pub tag: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Remote {
    /// Creates a fetcher. URLs without a host use `default_host`.
    pub fn new(default_host: impl Into<String>, cake: Arc<dyn Cake>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            default_host: default_host.into(),
            dialer,
            cake,
        }
    }

    async fn manifest(&self, url: &Url) -> ShedResult<(Box<dyn Conn>, Manifest)> {
        let reference = RemoteReference::from_url(url, &self.default_host)?;
        let conn = self
            .dialer
            .dial(&reference.host, &reference.repository)
            .await?;

        let manifest = conn.get_manifest(&reference.tag).await.map_err(|e| {
            e.context(format!(
                "get manifest for tag {} on repo {url}",
                reference.tag
            ))
        })?;

        if manifest.get_layers().is_empty() {
            return Err(ShedError::ManifestNotFound(format!(
                "{}:{} has no layers",
                reference.repository, reference.tag
            )));
        }

        Ok((conn, manifest))
    }
}

impl RemoteReference {
    /// Splits a registry URL into host, repository and tag.
    ///
    /// Single-segment repositories get the `library/` namespace and a missing tag means
    /// `latest`.
    pub fn from_url(url: &Url, default_host: &str) -> ShedResult<Self> {
        let host = match url.host_str().filter(|host| !host.is_empty()) {
            Some(host) => match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            None => default_host.to_string(),
        };

        let path = url.path().trim_start_matches('/');
        if path.is_empty() {
            return Err(ShedError::InvalidUrl(format!("{url}: no repository")));
        }

        let repository = if path.contains('/') {
            path.to_string()
        } else {
            format!("{DEFAULT_NAMESPACE}/{path}")
        };

        let tag = url
            .fragment()
            .filter(|tag| !tag.is_empty())
            .unwrap_or(DEFAULT_TAG)
            .to_string();

        Ok(Self {
            host,
            repository,
            tag,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RepositoryFetcher for Remote {
    async fn fetch(&self, url: &Url, quota: u64) -> ShedResult<FetchedImage> {
        let span = tracing::info_span!("remote-fetch", url = %url, quota);

        async {
            tracing::info!("start");
            let (conn, manifest) = self.manifest(url).await?;

            let mut registered = 0;
            for layer in manifest.get_layers() {
                let id = LayerId::docker_image(layer.get_id());
                if self.cake.get(&id).await.is_ok() {
                    tracing::debug!(layer_id = layer.get_id(), "layer-cached");
                    continue;
                }

                let blob = conn.get_blob_reader(layer.get_digest()).await?;
                let record = ImageRecord::builder()
                    .id(layer.get_id())
                    .parent(layer.get_parent())
                    .config(layer.get_config().clone())
                    .env(layer.get_env().clone())
                    .volumes(layer.get_volumes().clone())
                    .build();
                match self.cake.register(record, Some(blob)).await {
                    Ok(()) => registered += 1,
                    Err(ShedError::AlreadyExists(_)) => {
                        tracing::debug!(layer_id = layer.get_id(), "registered-concurrently");
                    }
                    Err(err) => return Err(err),
                }
            }

            let top = manifest
                .top_layer()
                .ok_or_else(|| ShedError::ManifestNotFound(url.to_string()))?;

            tracing::info!(registered, image_id = top.get_id(), "finish");
            Ok(FetchedImage::builder()
                .image_id(top.get_id())
                .env(top.get_env().clone())
                .volumes(top.get_volumes().clone())
                .build())
        }
        .instrument(span)
        .await
    }

    async fn fetch_id(&self, url: &Url) -> ShedResult<LayerId> {
        let (_, manifest) = self.manifest(url).await?;
        let top = manifest
            .top_layer()
            .ok_or_else(|| ShedError::ManifestNotFound(url.to_string()))?;

        Ok(LayerId::docker_image(top.get_id()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
