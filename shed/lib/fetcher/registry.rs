use async_trait::async_trait;
use futures::StreamExt;
use oci_spec::image::{Digest, ImageConfiguration, ImageIndex, ImageManifest, Os, Platform};
use reqwest::{
    header::{ACCEPT, WWW_AUTHENTICATE},
    Client, StatusCode,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::StreamReader;

use crate::{
    layercake::{sha_id, LayerContent},
    ShedError, ShedResult,
};

use super::{Conn, Dialer, Manifest, ManifestLayer};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The registry used when a rootfs URL names no host.
pub const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";

/// Media types accepted when resolving a tag or manifest digest.
const MANIFEST_MIME_TYPES: &[&str] = &[
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
];

/// Media types accepted for image configuration blobs.
const CONFIG_MIME_TYPES: &[&str] = &[
    "application/vnd.docker.container.image.v1+json",
    "application/vnd.oci.image.config.v1+json",
];

/// The annotation key used to identify attestation manifests in an image index.
const REFERENCE_TYPE_ANNOTATION: &str = "vnd.docker.reference.type";

/// Transient request failures are retried this many times.
const MAX_TRANSIENT_RETRIES: u32 = 3;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Dials repositories over the Docker Registry HTTP API v2.
///
/// Registries that answer `/v2/` with a bearer challenge get a pull token for the repository,
/// which is then used for every request on the connection.
#[derive(Debug, Clone)]
pub struct RegistryDialer {
    client: ClientWithMiddleware,
}

/// A connection to one repository on a registry.
#[derive(Debug)]
pub struct RegistryConn {
    client: ClientWithMiddleware,
    base_url: String,
    repository: String,
    token: Option<String>,
}

/// A response from the registry, which could either be successful (`Ok`) or an error (`Error`).
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryResponse<T> {
    /// The registry reported errors.
    Error(RegistryResponseError),

    /// A successful response.
    Ok(T),
}

/// An error response from the registry.
#[derive(Debug, Serialize, Deserialize, Error)]
#[error("{errors}")]
pub struct RegistryResponseError {
    /// The errors returned by the registry.
    errors: serde_json::Value,
}

/// The parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// Where to request tokens.
    pub realm: String,

    /// The service to request tokens for.
    pub service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    #[serde(default)]
    token: String,

    #[serde(default)]
    access_token: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryDialer {
    /// Creates a dialer whose requests are retried on transient failures.
    pub fn new() -> Self {
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(MAX_TRANSIENT_RETRIES);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client }
    }

    async fn fetch_token(&self, challenge: &BearerChallenge, repository: &str) -> ShedResult<String> {
        let scope = format!("repository:{repository}:pull");
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }

        let auth = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json::<AuthToken>()
            .await?;

        if auth.token.is_empty() {
            Ok(auth.access_token)
        } else {
            Ok(auth.token)
        }
    }
}

impl RegistryConn {
    async fn get_json(&self, path: &str, accept: &[&str]) -> ShedResult<serde_json::Value> {
        let mut request = self
            .client
            .get(format!("{}/v2/{}/{}", self.base_url, self.repository, path))
            .header(ACCEPT, accept.join(", "));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.json::<RegistryResponse<serde_json::Value>>().await? {
            RegistryResponse::Ok(value) => Ok(value),
            RegistryResponse::Error(err) => Err(err.into()),
        }
    }

    async fn resolve_manifest(&self, tag: &str) -> ShedResult<ImageManifest> {
        let value = self.get_json(&format!("manifests/{tag}"), MANIFEST_MIME_TYPES).await?;
        if value.get("manifests").is_none() {
            return Ok(serde_json::from_value(value)?);
        }

        let index: ImageIndex = serde_json::from_value(value)?;
        let digest = select_platform_manifest(&index, &Platform::default()).ok_or_else(|| {
            ShedError::ManifestNotFound(format!("{}:{tag}", self.repository))
        })?;

        tracing::debug!(repository = self.repository, tag, %digest, "selected platform manifest");
        let value = self
            .get_json(&format!("manifests/{digest}"), MANIFEST_MIME_TYPES)
            .await?;

        Ok(serde_json::from_value(value)?)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a bearer `WWW-Authenticate` header. Returns `None` for other schemes.
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let (scheme, params) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut rest = params.trim();

    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let after = after.trim_start();
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };

        match key.trim() {
            "realm" => realm = Some(value.to_string()),
            "service" => service = Some(value.to_string()),
            _ => {}
        }

        rest = remaining.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

/// Picks the manifest for `platform` from an index.
///
/// Linux manifests for the platform's architecture win over other operating systems.
/// Attestation manifests are never picked.
pub fn select_platform_manifest(index: &ImageIndex, platform: &Platform) -> Option<Digest> {
    let candidates = || {
        index.manifests().iter().filter(|m| {
            !m.annotations()
                .as_ref()
                .is_some_and(|a| a.contains_key(REFERENCE_TYPE_ANNOTATION))
        })
    };

    candidates()
        .find(|m| {
            m.platform().as_ref().is_some_and(|p| {
                matches!(p.os(), Os::Linux) && p.architecture() == platform.architecture()
            })
        })
        .or_else(|| {
            candidates().find(|m| {
                m.platform()
                    .as_ref()
                    .is_some_and(|p| p.architecture() == platform.architecture())
            })
        })
        .map(|m| m.digest().clone())
}

/// Builds graph layers from blob digests, bottom layer first.
///
/// Layer ids are chain ids: the first is `sha256(digest)`, every later one is
/// `sha256(parent_id + " " + digest)`. Image metadata goes on the top layer.
pub fn chain_layers(
    digests: &[String],
    config: serde_json::Value,
    env: Vec<String>,
    volumes: Vec<String>,
) -> Vec<ManifestLayer> {
    let mut layers = Vec::with_capacity(digests.len());
    let mut parent = String::new();

    for (position, digest) in digests.iter().enumerate() {
        let id = if parent.is_empty() {
            sha_id(digest)
        } else {
            sha_id(&format!("{parent} {digest}"))
        };

        let layer = if position + 1 == digests.len() {
            ManifestLayer::builder()
                .digest(digest.clone())
                .id(id.clone())
                .parent(parent.clone())
                .config(config.clone())
                .env(env.clone())
                .volumes(volumes.clone())
                .build()
        } else {
            ManifestLayer::builder()
                .digest(digest.clone())
                .id(id.clone())
                .parent(parent.clone())
                .build()
        };

        layers.push(layer);
        parent = id;
    }

    layers
}

fn registry_base_url(host: &str) -> String {
    match host {
        "docker.io" | "index.docker.io" => format!("https://{DEFAULT_REGISTRY_HOST}"),
        host if host.starts_with("http://") || host.starts_with("https://") => {
            host.trim_end_matches('/').to_string()
        }
        host => format!("https://{host}"),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for RegistryDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for RegistryDialer {
    async fn dial(&self, host: &str, repository: &str) -> ShedResult<Box<dyn Conn>> {
        let base_url = registry_base_url(host);
        tracing::debug!(base_url, repository, "dialing registry");

        let response = self.client.get(format!("{base_url}/v2/")).send().await?;
        let challenge = if response.status() == StatusCode::UNAUTHORIZED {
            response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_bearer_challenge)
        } else {
            None
        };

        let token = match challenge {
            Some(challenge) => Some(self.fetch_token(&challenge, repository).await?),
            None => None,
        };

        Ok(Box::new(RegistryConn {
            client: self.client.clone(),
            base_url,
            repository: repository.to_string(),
            token,
        }))
    }
}

#[async_trait]
impl Conn for RegistryConn {
    async fn get_manifest(&self, tag: &str) -> ShedResult<Manifest> {
        let manifest = self.resolve_manifest(tag).await?;

        let config_value = self
            .get_json(
                &format!("blobs/{}", manifest.config().digest()),
                CONFIG_MIME_TYPES,
            )
            .await?;
        let config: ImageConfiguration = serde_json::from_value(config_value.clone())?;

        let (env, volumes) = config
            .config()
            .as_ref()
            .map(|c| {
                (
                    c.env().clone().unwrap_or_default(),
                    c.volumes().clone().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        let digests: Vec<String> = manifest
            .layers()
            .iter()
            .map(|layer| layer.digest().to_string())
            .collect();

        tracing::info!(
            repository = self.repository,
            tag,
            layers = digests.len(),
            "fetched manifest"
        );

        Ok(Manifest::builder()
            .layers(chain_layers(&digests, config_value, env, volumes))
            .build())
    }

    async fn get_blob_reader(&self, digest: &str) -> ShedResult<LayerContent> {
        tracing::info!(repository = self.repository, digest, "fetching blob");

        let mut request = self.client.get(format!(
            "{}/v2/{}/blobs/{}",
            self.base_url, self.repository, digest
        ));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        Ok(Box::new(StreamReader::new(stream)))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
