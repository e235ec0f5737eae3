//! In-process member list source for integration tests
//!
//! Serves prepared documents by URL and caches them in memory the way the
//! HTTP client does, so cache and fallback paths can be driven offline.

use async_trait::async_trait;
use ixf_common::{IxfError, IxfResult};
use ixf_importer::{FeedCache, FeedSource, MISSING_URL};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct StaticFeed {
    documents: Mutex<HashMap<String, Result<Value, String>>>,
    cache: FeedCache,
}

#[allow(dead_code)]
impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: impl Into<String>, data: Value) {
        self.documents.lock().insert(url.into(), Ok(data));
    }

    /// Makes `url` fail with `message` as if the server were unreachable.
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        self.documents.lock().insert(url.into(), Err(message.into()));
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch(&self, url: &str, _timeout: Duration) -> IxfResult<Value> {
        if url.trim().is_empty() {
            return Err(IxfError::feed_unreachable(url, MISSING_URL));
        }
        let entry = self.documents.lock().get(url).cloned();
        match entry {
            Some(Ok(data)) => {
                self.cache.remember(url, &data);
                Ok(data)
            }
            Some(Err(message)) => Err(IxfError::feed_unreachable(url, message)),
            None => Err(IxfError::feed_unreachable(url, "Got HTTP status 404")),
        }
    }

    fn fetch_cached(&self, url: &str) -> IxfResult<Value> {
        self.cache.load(url)
    }
}
