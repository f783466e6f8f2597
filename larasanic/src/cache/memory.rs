use async_trait::async_trait;
use moka::{Expiry, future::Cache};
use serde_json::Value;
use std::time::{Duration, Instant};

use super::{CacheStore, add_checked, as_integer, effective_ttl};
use crate::errors::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Per-entry expiry: each entry lives until its own `expires_at`.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, created_at: Instant) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(updated_at))
    }
}

/// Bounded in-memory cache backed by moka.
///
/// Once `max_capacity` is reached moka evicts entries before their TTL runs out, so this
/// store is unsuitable for data that must outlive pressure, such as revoked token ids.
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Cache<String, Entry>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.entries.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { entries, default_ttl }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = effective_ttl(ttl, self.default_ttl).map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), Entry { value, expires_at }).await;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).await.is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let default_ttl = self.default_ttl;
        let mut outcome = Ok(by);
        let slot = &mut outcome;
        self.entries
            .entry(key.to_string())
            .and_upsert_with(|existing| {
                let next = match existing {
                    Some(current) => {
                        let current = current.into_value();
                        match add_checked(key, as_integer(&current.value), by) {
                            Ok(value) => {
                                *slot = Ok(value);
                                Entry {
                                    value: Value::from(value),
                                    expires_at: current.expires_at,
                                }
                            }
                            Err(e) => {
                                *slot = Err(e);
                                current
                            }
                        }
                    }
                    None => Entry {
                        value: Value::from(by),
                        expires_at: effective_ttl(None, default_ttl).map(|ttl| Instant::now() + ttl),
                    },
                };
                std::future::ready(next)
            })
            .await;
        outcome
    }

    async fn purge_expired(&self) -> Result<usize> {
        let before = self.entries.entry_count();
        self.entries.run_pending_tasks().await;
        Ok(before.saturating_sub(self.entries.entry_count()) as usize)
    }
}
