use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::{SessionData, SessionStore};
use crate::errors::Result;

/// In-memory sessions. Data is lost on restart.
#[derive(Debug, Default)]
pub struct ArraySessionStore {
    sessions: DashMap<String, (SessionData, Instant)>,
}

impl ArraySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for ArraySessionStore {
    fn name(&self) -> &str {
        "array"
    }

    async fn read(&self, id: &str) -> Result<Option<SessionData>> {
        let expired = match self.sessions.get(id) {
            None => return Ok(None),
            Some(entry) => {
                let (data, expires_at) = entry.value();
                if *expires_at > Instant::now() {
                    return Ok(Some(data.clone()));
                }
                true
            }
        };
        if expired {
            self.sessions.remove(id);
        }
        Ok(None)
    }

    async fn write(&self, id: &str, data: &SessionData, lifetime: Duration) -> Result<()> {
        self.sessions
            .insert(id.to_string(), (data.clone(), Instant::now() + lifetime));
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn gc(&self, _max_lifetime: Duration) -> Result<usize> {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - self.sessions.len())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.read(id).await?.is_some())
    }
}
