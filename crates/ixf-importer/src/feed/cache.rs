//! Member list cache keyed by URL.
//!
//! Entries never expire; a newer successful fetch replaces them. The cache
//! lives in memory and, when a directory is configured, on disk under
//! `<dir>/<sha256(url)>.json` so `--cache` runs work across processes.

use ixf_common::{IxfError, IxfResult};
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct FeedCache {
    dir: Option<PathBuf>,
    entries: RwLock<HashMap<String, Value>>,
}

impl FeedCache {
    /// In-memory only cache.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by files in `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        FeedCache {
            dir: Some(dir.into()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn file_for(&self, url: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Some(dir.join(format!("{}.json", hex::encode(hasher.finalize()))))
    }

    /// Stores a successfully fetched document.
    pub fn store(&self, url: &str, data: &Value) -> IxfResult<()> {
        self.entries.write().insert(url.to_string(), data.clone());

        if let Some(path) = self.file_for(url) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, serde_json::to_vec(data)?)?;
            debug!(url, path = %path.display(), "Cached member list");
        }
        Ok(())
    }

    /// Like [`FeedCache::store`], but a failed disk write only costs the
    /// on-disk copy.
    pub fn remember(&self, url: &str, data: &Value) {
        if let Err(e) = self.store(url, data) {
            warn!(url, error = %e, "Could not write member list cache");
        }
    }

    /// Returns the last stored document for `url`.
    pub fn load(&self, url: &str) -> IxfResult<Value> {
        if let Some(data) = self.entries.read().get(url) {
            return Ok(data.clone());
        }

        let path = self.file_for(url).ok_or_else(|| IxfError::CacheMiss {
            url: url.to_string(),
        })?;

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IxfError::CacheMiss {
                    url: url.to_string(),
                })
            }
            Err(e) => return Err(IxfError::Io(e)),
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(data) => {
                self.entries.write().insert(url.to_string(), data.clone());
                Ok(data)
            }
            Err(e) => {
                warn!(url, error = %e, "Discarding unreadable cache file");
                Err(IxfError::CacheMiss {
                    url: url.to_string(),
                })
            }
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.load(url).is_ok()
    }
}
