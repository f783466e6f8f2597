use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::{CacheStore, add_checked, as_integer, effective_ttl};
use crate::errors::Result;

const EXTENSION: &str = "cache";

/// On-disk entry. `expires_at` is a unix timestamp, `-1` for entries that never expire.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    value: Value,
    ttl: u64,
    expires_at: i64,
    created_at: i64,
}

impl CacheFile {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        let now = now_ts();
        Self {
            value,
            ttl: ttl.map(|t| t.as_secs()).unwrap_or(0),
            expires_at: ttl.map(|t| now + t.as_secs() as i64).unwrap_or(-1),
            created_at: now,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires_at >= 0 && self.expires_at <= now
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Replace path separators so keys cannot escape the cache directory.
pub fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', ':'], "_")
}

/// One `{key}.cache` JSON file per entry.
///
/// Increments are serialized within the process. Separate processes sharing the directory
/// can still race on the same key.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
    default_ttl: Duration,
    increments: Arc<Mutex<()>>,
}

impl FileCacheStore {
    pub fn new(dir: PathBuf, default_ttl: Duration) -> Result<Self> {
        std::fs::create_dir_all(&dir).with_context(|| format!("create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            default_ttl,
            increments: Arc::default(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", sanitize_key(key)))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheFile>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(anyhow::Error::new(e).context("read cache file").into()),
        };
        let entry: CacheFile = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Discarding unreadable cache file");
                remove_quietly(path).await?;
                return Ok(None);
            }
        };
        if entry.is_expired(now_ts()) {
            remove_quietly(path).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn write_entry(&self, path: &Path, entry: &CacheFile) -> Result<()> {
        let bytes = serde_json::to_vec(entry).context("serialize cache entry")?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("write cache file {}", path.display()))?;
        Ok(())
    }

    async fn cache_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(anyhow::Error::new(e).context("read cache directory").into()),
        };
        while let Some(entry) = entries.next_entry().await.context("read cache directory")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

async fn remove_quietly(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(anyhow::Error::new(e).context("remove cache file").into()),
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_entry(&self.path_for(key)).await?.map(|entry| entry.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheFile::new(value, effective_ttl(ttl, self.default_ttl));
        self.write_entry(&self.path_for(key), &entry).await
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        remove_quietly(&self.path_for(key)).await
    }

    async fn flush(&self) -> Result<()> {
        for path in self.cache_files().await? {
            remove_quietly(&path).await?;
        }
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let _guard = self.increments.lock().await;
        let path = self.path_for(key);
        let mut entry = match self.read_entry(&path).await? {
            Some(entry) => entry,
            None => CacheFile::new(Value::from(0), effective_ttl(None, self.default_ttl)),
        };
        let value = add_checked(key, as_integer(&entry.value), by)?;
        entry.value = Value::from(value);
        self.write_entry(&path, &entry).await?;
        Ok(value)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.cache_files().await? {
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            if exists && self.read_entry(&path).await?.is_none() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileCacheStore {
        FileCacheStore::new(dir.path().to_path_buf(), Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("users:1/profile\\x"), "users_1_profile_x");
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("user:1", json!({"name": "ada"}), None).await.unwrap();
        store.put("forever", json!(1), Some(Duration::ZERO)).await.unwrap();

        let raw: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("user_1.cache")).unwrap()).unwrap();
        assert_eq!(raw["value"], json!({"name": "ada"}));
        assert_eq!(raw["ttl"], 3600);
        assert!(raw["expires_at"].as_i64().unwrap() > raw["created_at"].as_i64().unwrap());

        let forever: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("forever.cache")).unwrap()).unwrap();
        assert_eq!(forever["expires_at"], -1);

        assert_eq!(store.get("user:1").await.unwrap(), Some(json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_expired_entries_removed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stale = json!({"value": 1, "ttl": 1, "expires_at": 1, "created_at": 0});
        std::fs::write(dir.path().join("old.cache"), stale.to_string()).unwrap();
        std::fs::write(dir.path().join("old2.cache"), stale.to_string()).unwrap();
        store.put("fresh", json!(2), None).await.unwrap();

        assert_eq!(store.get("old").await.unwrap(), None);
        assert!(!dir.path().join("old.cache").exists());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.has("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_preserves_expiry() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("n", json!(5), Some(Duration::from_secs(100))).await.unwrap();
        let before: Value = serde_json::from_slice(&std::fs::read(dir.path().join("n.cache")).unwrap()).unwrap();

        assert_eq!(store.increment("n", 2).await.unwrap(), 7);
        assert_eq!(store.decrement("missing", 1).await.unwrap(), -1);

        let after: Value = serde_json::from_slice(&std::fs::read(dir.path().join("n.cache")).unwrap()).unwrap();
        assert_eq!(before["expires_at"], after["expires_at"]);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("hits", 1).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.get("hits").await.unwrap(), Some(json!(20)));

        store.put("max", json!(i64::MAX), None).await.unwrap();
        assert!(store.increment("max", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_flush_only_removes_cache_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("a", json!(1), None).await.unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*").unwrap();

        store.flush().await.unwrap();
        assert!(!store.has("a").await.unwrap());
        assert!(dir.path().join(".gitignore").exists());
    }
}
