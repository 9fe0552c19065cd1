//! Cache-aside memoisation of the expensive pipeline stages.
//!
//! Entries are content addressed and written once: a changed input produces a
//! new key, so nothing is ever invalidated. Concurrent workers may compute the
//! same missing key at the same time; the last write wins, which is harmless
//! because both writers store the same value.

mod dir;
mod keys;
mod memory;
mod redis_store;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use tracing::{debug, warn};

pub use dir::DirStore;
pub use keys::{batch_key, image_hash, layout_hash, region_key};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CacheMode {
    #[value(name = "none")]
    Disabled,
    File,
    Shared,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Disabled => "none",
            CacheMode::File => "file",
            CacheMode::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRegion {
    Boxes,
    ReadText,
    Translate,
}

impl CacheRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRegion::Boxes => "boxes",
            CacheRegion::ReadText => "readText",
            CacheRegion::Translate => "translate",
        }
    }

    pub fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.as_str(), key)
    }
}

/// A key/value store holding one JSON document per key. Single-key atomicity
/// is the store's job; no multi-key semantics are needed.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
}

/// Wraps an optional store. Without one every lookup is a miss and nothing is
/// written, so results are identical either way and only cost differs.
pub struct CacheLayer {
    store: Option<Box<dyn CacheStore>>,
}

impl CacheLayer {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Returns the stored value for `region:key` with `true`, or computes,
    /// stores and returns it with `false`.
    pub fn get_or_compute<T, F>(&self, region: CacheRegion, key: &str, compute: F) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let Some(store) = self.store.as_deref() else {
            return Ok((compute()?, false));
        };
        let full_key = region.full_key(key);
        if let Some(value) = lookup(store, &full_key)? {
            return Ok((value, true));
        }
        let value = compute()?;
        write_back(store, &full_key, &value)?;
        Ok((value, false))
    }

    pub async fn get_or_compute_async<T, F, Fut>(
        &self,
        region: CacheRegion,
        key: &str,
        compute: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(store) = self.store.as_deref() else {
            return Ok((compute().await?, false));
        };
        let full_key = region.full_key(key);
        if let Some(value) = lookup(store, &full_key)? {
            return Ok((value, true));
        }
        let value = compute().await?;
        write_back(store, &full_key, &value)?;
        Ok((value, false))
    }
}

/// Parses a raw stored entry. A corrupt entry is reported and read as a miss.
fn decode_entry(raw: &str, label: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("ignoring corrupt cache entry {}: {}", label, err);
            None
        }
    }
}

fn lookup<T: DeserializeOwned>(store: &dyn CacheStore, full_key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(full_key)? else {
        debug!("cache miss {}", full_key);
        return Ok(None);
    };
    match serde_json::from_value(raw) {
        Ok(value) => {
            debug!("cache hit {}", full_key);
            Ok(Some(value))
        }
        Err(err) => {
            warn!("discarding unreadable cache entry {}: {}", full_key, err);
            Ok(None)
        }
    }
}

fn write_back<T: Serialize>(store: &dyn CacheStore, full_key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_value(value)?;
    store.set(full_key, &json)
}

/// Opens the store for a cache mode. Called once per worker; a connection
/// failure here is fatal for that worker.
pub fn open_cache(mode: CacheMode, url: Option<&str>, cache_dir: &Path) -> Result<CacheLayer> {
    match mode {
        CacheMode::Disabled => Ok(CacheLayer::disabled()),
        CacheMode::File => Ok(CacheLayer::new(Box::new(DirStore::open(cache_dir)?))),
        CacheMode::Shared => {
            let url = url
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("shared cache requires a connection string"))?;
            if url.starts_with("redis://") || url.starts_with("rediss://") {
                return Ok(CacheLayer::new(Box::new(RedisStore::connect(url)?)));
            }
            let dir = url.strip_prefix("file://").unwrap_or(url);
            Ok(CacheLayer::new(Box::new(DirStore::open(Path::new(dir))?)))
        }
    }
}
