use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

use super::{SessionData, SessionStore, is_valid_id, now_ts};
use crate::errors::Result;

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    data: SessionData,
    #[serde(rename = "_created_at")]
    created_at: i64,
    #[serde(rename = "_expire_at")]
    expire_at: Option<i64>,
}

impl SessionFile {
    fn expired(&self, now: i64, max_lifetime: Option<Duration>) -> bool {
        match (self.expire_at, max_lifetime) {
            (Some(expire_at), _) => expire_at < now,
            (None, Some(max)) => self.created_at + (max.as_secs() as i64) < now,
            (None, None) => false,
        }
    }
}

/// One `session_{id}.json` file per session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("create session directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.dir.join(format!("session_{id}.json")))
    }

    async fn load(path: &Path) -> Option<SessionFile> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unreadable session file");
                None
            }
        }
    }
}

async fn remove_quietly(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, id: &str) -> Result<Option<SessionData>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        let Some(file) = Self::load(&path).await else {
            return Ok(None);
        };
        if file.expired(now_ts(), None) {
            remove_quietly(&path).await.context("remove expired session")?;
            return Ok(None);
        }
        Ok(Some(file.data))
    }

    async fn write(&self, id: &str, data: &SessionData, lifetime: Duration) -> Result<()> {
        let Some(path) = self.path_for(id) else {
            warn!("Refusing to write session with invalid id");
            return Ok(());
        };
        let now = now_ts();
        let file = SessionFile {
            data: data.clone(),
            created_at: now,
            expire_at: Some(now + lifetime.as_secs() as i64),
        };
        let bytes = serde_json::to_vec(&file).context("serialize session")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("write session file {}", path.display()))?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        if let Some(path) = self.path_for(id) {
            remove_quietly(&path).await.context("destroy session")?;
        }
        Ok(())
    }

    async fn gc(&self, max_lifetime: Duration) -> Result<usize> {
        let now = now_ts();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await.context("read session directory")?;
        while let Some(entry) = entries.next_entry().await.context("read session directory")? {
            let path = entry.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("session_") && n.ends_with(".json"));
            if !is_session {
                continue;
            }
            let stale = match Self::load(&path).await {
                Some(file) => file.expired(now, Some(max_lifetime)),
                None => true,
            };
            if stale && remove_quietly(&path).await.context("remove stale session")? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.read(id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn data() -> SessionData {
        json!({"user_id": 7}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_expiry_falls_back_to_max_lifetime() {
        let file = SessionFile {
            data: data(),
            created_at: 1_000,
            expire_at: None,
        };
        assert!(!file.expired(1_050, Some(Duration::from_secs(60))));
        assert!(file.expired(1_061, Some(Duration::from_secs(60))));
        assert!(!file.expired(i64::MAX, None));

        let pinned = SessionFile {
            expire_at: Some(1_010),
            ..file
        };
        assert!(pinned.expired(1_011, Some(Duration::from_secs(3600))));
    }

    #[tokio::test]
    async fn test_write_read_destroy() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        store.write("abc123", &data(), Duration::from_secs(60)).await.unwrap();
        assert!(dir.path().join("session_abc123.json").exists());
        assert_eq!(store.read("abc123").await.unwrap(), Some(data()));
        assert!(store.exists("abc123").await.unwrap());

        store.destroy("abc123").await.unwrap();
        assert_eq!(store.read("abc123").await.unwrap(), None);
        store.destroy("abc123").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted_on_read() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        let path = dir.path().join("session_old.json");
        std::fs::write(
            &path,
            json!({"data": {"a": 1}, "_created_at": 0, "_expire_at": 1}).to_string(),
        )
        .unwrap();

        assert_eq!(store.read("old").await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_invalid_ids_never_touch_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions")).unwrap();
        store.write("../escape", &data(), Duration::from_secs(60)).await.unwrap();
        assert!(!dir.path().join("escape.json").exists());
        assert_eq!(store.read("../escape").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_gc_removes_expired_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        store.write("live", &data(), Duration::from_secs(3600)).await.unwrap();
        std::fs::write(
            dir.path().join("session_dead.json"),
            json!({"data": {}, "_created_at": 0, "_expire_at": 1}).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("session_corrupt.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        assert_eq!(store.gc(Duration::from_secs(7200)).await.unwrap(), 2);
        assert!(store.exists("live").await.unwrap());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
