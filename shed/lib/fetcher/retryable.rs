use async_trait::async_trait;
use reqwest::Url;

use crate::{layercake::LayerId, ShedResult};

use super::{FetchedImage, RepositoryFetcher};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many times a fetch is attempted before giving up.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Retries a fetcher immediately, up to [`MAX_FETCH_ATTEMPTS`] times.
pub struct Retryable<F> {
    inner: F,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<F> Retryable<F> {
    /// Wraps `inner`.
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl<F: RepositoryFetcher> RepositoryFetcher for Retryable<F> {
    async fn fetch(&self, url: &Url, quota: u64) -> ShedResult<FetchedImage> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch(url, quota).await {
                Ok(image) => return Ok(image),
                Err(err) => {
                    tracing::error!(error = %err, attempt, of = MAX_FETCH_ATTEMPTS, "failed-to-fetch");
                    if attempt >= MAX_FETCH_ATTEMPTS {
                        return Err(err);
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn fetch_id(&self, url: &Url) -> ShedResult<LayerId> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch_id(url).await {
                Ok(id) => return Ok(id),
                Err(err) => {
                    tracing::error!(error = %err, attempt, of = MAX_FETCH_ATTEMPTS, "failed-to-fetch-id");
                    if attempt >= MAX_FETCH_ATTEMPTS {
                        return Err(err);
                    }
                }
            }
            attempt += 1;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
