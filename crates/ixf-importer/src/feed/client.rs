//! HTTP member list client.

use super::cache::FeedCache;
use async_trait::async_trait;
use ixf_common::{IxfError, IxfResult};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Error reported when a LAN has no member list URL.
pub const MISSING_URL: &str = "IX-F import url not specified";

/// Source of raw member list documents.
///
/// Implementations do not interpret the content; every failure is returned
/// as an [`IxfError`] whose message is what gets recorded for the LAN.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches the document and caches it on success.
    async fn fetch(&self, url: &str, timeout: Duration) -> IxfResult<Value>;

    /// Returns the last successfully fetched document.
    fn fetch_cached(&self, url: &str) -> IxfResult<Value>;

    /// Fetches live, falling back to the cached copy if the fetch fails.
    async fn fetch_with_fallback(&self, url: &str, timeout: Duration) -> IxfResult<Value> {
        match self.fetch(url, timeout).await {
            Ok(data) => Ok(data),
            Err(err) => match self.fetch_cached(url) {
                Ok(data) => {
                    warn!(url, error = %err, "Fetch failed, using cached member list");
                    Ok(data)
                }
                Err(_) => Err(err),
            },
        }
    }
}

/// [`FeedSource`] backed by `reqwest`.
pub struct HttpFeedClient {
    client: reqwest::Client,
    cache: FeedCache,
}

impl HttpFeedClient {
    pub fn new(cache: FeedCache) -> IxfResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ixf-importer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IxfError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpFeedClient { client, cache })
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }
}

#[async_trait]
impl FeedSource for HttpFeedClient {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str, timeout: Duration) -> IxfResult<Value> {
        if url.trim().is_empty() {
            return Err(IxfError::feed_unreachable(url, MISSING_URL));
        }

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| IxfError::feed_unreachable(url, e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(IxfError::feed_unreachable(
                url,
                format!("Got HTTP status {}", status.as_u16()),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IxfError::feed_unreachable(url, e.to_string()))?;

        let data: Value = serde_json::from_slice(&body)
            .map_err(|_| IxfError::feed_unparsable("No JSON could be parsed"))?;

        self.cache.remember(url, &data);
        debug!(url, bytes = body.len(), "Fetched member list");
        Ok(data)
    }

    fn fetch_cached(&self, url: &str) -> IxfResult<Value> {
        if url.trim().is_empty() {
            return Err(IxfError::feed_unreachable(url, MISSING_URL));
        }
        self.cache.load(url)
    }
}
