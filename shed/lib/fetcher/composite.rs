use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use crate::{layercake::LayerId, ShedResult};

use super::{FetchedImage, RepositoryFetcher, DOCKER_SCHEME};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Sends `docker` URLs to the remote fetcher and everything else to the local one.
pub struct CompositeFetcher {
    remote: Arc<dyn RepositoryFetcher>,
    local: Arc<dyn RepositoryFetcher>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CompositeFetcher {
    /// Creates a dispatcher over the two fetchers.
    pub fn new(remote: Arc<dyn RepositoryFetcher>, local: Arc<dyn RepositoryFetcher>) -> Self {
        Self { remote, local }
    }

    fn fetcher_for(&self, url: &Url) -> &dyn RepositoryFetcher {
        if url.scheme() == DOCKER_SCHEME {
            self.remote.as_ref()
        } else {
            self.local.as_ref()
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RepositoryFetcher for CompositeFetcher {
    async fn fetch(&self, url: &Url, quota: u64) -> ShedResult<FetchedImage> {
        self.fetcher_for(url).fetch(url, quota).await
    }

    async fn fetch_id(&self, url: &Url) -> ShedResult<LayerId> {
        self.fetcher_for(url).fetch_id(url).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
