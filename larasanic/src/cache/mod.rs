//! Key/value caching.
//!
//! [`CacheStore`] is the storage seam; [`Cache`] wraps a store with typed and
//! `remember`-style helpers; [`CacheManager`] builds stores from `cache.driver`.
//!
//! TTL convention for `put`: `None` uses the store's default TTL and a zero duration
//! keeps the entry forever.

pub mod array;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

pub use array::ArrayCacheStore;
pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::{
    config::{CACHE_DRIVERS, CacheConfig},
    errors::{Error, Result},
};

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove a key, returning whether it existed.
    async fn forget(&self, key: &str) -> Result<bool>;

    async fn flush(&self) -> Result<()>;

    /// Add `by` to the integer at `key`, starting from 0. The entry keeps its TTL.
    async fn increment(&self, key: &str, by: i64) -> Result<i64>;

    async fn decrement(&self, key: &str, by: i64) -> Result<i64> {
        let by = by.checked_neg().ok_or_else(|| overflow(key))?;
        self.increment(key, by).await
    }

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Resolve the effective lifetime of a `put`: `None` for forever.
pub(crate) fn effective_ttl(ttl: Option<Duration>, default: Duration) -> Option<Duration> {
    match ttl {
        None => Some(default).filter(|d| !d.is_zero()),
        Some(d) if d.is_zero() => None,
        Some(d) => Some(d),
    }
}

fn overflow(key: &str) -> Error {
    Error::Internal {
        operation: format!("increment cache key '{key}': integer overflow"),
    }
}

/// `current + by`, failing instead of wrapping.
pub(crate) fn add_checked(key: &str, current: i64, by: i64) -> Result<i64> {
    current.checked_add(by).ok_or_else(|| overflow(key))
}

pub(crate) fn as_integer(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

/// Cache facade over a store.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("store", &self.store.name()).finish()
    }
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(key).await
    }

    pub async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.store.put(key, value, ttl).await
    }

    pub async fn forever(&self, key: &str, value: Value) -> Result<()> {
        self.store.put(key, value, Some(Duration::ZERO)).await
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        self.store.has(key).await
    }

    pub async fn forget(&self, key: &str) -> Result<bool> {
        self.store.forget(key).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    pub async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        self.store.increment(key, by).await
    }

    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64> {
        self.store.decrement(key, by).await
    }

    /// Read and deserialize. A value of the wrong shape counts as a miss.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub async fn put_typed<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::Internal {
            operation: format!("serialize cache value for '{key}': {e}"),
        })?;
        self.store.put(key, value, ttl).await
    }

    /// Return the cached value, or run `producer` and cache its result.
    pub async fn remember<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get_typed::<T>(key).await? {
            return Ok(hit);
        }
        let value = producer().await?;
        self.put_typed(key, &value, ttl).await?;
        Ok(value)
    }

    pub async fn remember_forever<T, F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.remember(key, Some(Duration::ZERO), producer).await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired().await
    }
}

/// Builds and memoizes stores by driver name.
pub struct CacheManager {
    config: CacheConfig,
    directory: PathBuf,
    stores: DashMap<String, Arc<dyn CacheStore>>,
}

impl CacheManager {
    /// `directory` is where the file driver keeps its entries unless `cache.path` is set.
    pub fn new(config: CacheConfig, directory: PathBuf) -> Self {
        let directory = config.path.clone().unwrap_or(directory);
        Self {
            config,
            directory,
            stores: DashMap::new(),
        }
    }

    pub fn default_driver(&self) -> &str {
        &self.config.driver
    }

    /// The store for `driver`, or the configured default driver.
    pub fn store(&self, driver: Option<&str>) -> Result<Arc<dyn CacheStore>> {
        let driver = driver.unwrap_or(&self.config.driver);
        if let Some(store) = self.stores.get(driver) {
            return Ok(store.clone());
        }
        let store = self.create(driver)?;
        self.stores.insert(driver.to_string(), store.clone());
        Ok(store)
    }

    pub fn cache(&self) -> Result<Cache> {
        Ok(Cache::new(self.store(None)?))
    }

    fn create(&self, driver: &str) -> Result<Arc<dyn CacheStore>> {
        let ttl = self.config.ttl;
        match driver {
            "file" => Ok(Arc::new(FileCacheStore::new(self.directory.clone(), ttl)?)),
            "memory" => Ok(Arc::new(MemoryCacheStore::new(self.config.max_capacity, ttl))),
            "array" => Ok(Arc::new(ArrayCacheStore::new(ttl))),
            other => Err(Error::Internal {
                operation: format!(
                    "create cache store: unknown driver '{other}' (expected one of: {})",
                    CACHE_DRIVERS.join(", ")
                ),
            }),
        }
    }
}
