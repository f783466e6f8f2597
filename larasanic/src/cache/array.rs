use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::{CacheStore, add_checked, as_integer, effective_ttl};
use crate::errors::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache for tests and single-node development.
#[derive(Debug)]
pub struct ArrayCacheStore {
    entries: DashMap<String, Entry>,
    default_ttl: Duration,
}

impl ArrayCacheStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }
}

#[async_trait]
impl CacheStore for ArrayCacheStore {
    fn name(&self) -> &str {
        "array"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = effective_ttl(ttl, self.default_ttl).map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let now = Instant::now();
        let default_expiry = effective_ttl(None, self.default_ttl).map(|ttl| now + ttl);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::from(0),
            expires_at: default_expiry,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: Value::from(0),
                expires_at: default_expiry,
            };
        }
        let value = add_checked(key, as_integer(&entry.value), by)?;
        entry.value = Value::from(value);
        Ok(value)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_forget_flush() {
        let store = ArrayCacheStore::new(Duration::from_secs(60));
        store.put("a", json!({"x": 1}), None).await.unwrap();
        store.put("b", json!("two"), Some(Duration::ZERO)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert!(store.has("b").await.unwrap());
        assert!(store.forget("a").await.unwrap());
        assert!(!store.forget("a").await.unwrap());

        store.flush().await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let store = ArrayCacheStore::new(Duration::from_secs(60));
        store.put("short", json!(1), Some(Duration::from_millis(10))).await.unwrap();
        store.put("long", json!(1), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        store.put("short2", json!(1), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.has("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters() {
        let store = ArrayCacheStore::new(Duration::from_secs(60));
        assert_eq!(store.increment("hits", 1).await.unwrap(), 1);
        assert_eq!(store.increment("hits", 5).await.unwrap(), 6);
        assert_eq!(store.decrement("hits", 2).await.unwrap(), 4);

        store.put("text", json!("10"), None).await.unwrap();
        assert_eq!(store.increment("text", 1).await.unwrap(), 11);

        store.put("min", json!(i64::MIN), None).await.unwrap();
        assert!(store.decrement("min", 1).await.is_err());
        assert_eq!(store.get("min").await.unwrap(), Some(json!(i64::MIN)));
    }
}
