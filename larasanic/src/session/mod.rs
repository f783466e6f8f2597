//! HTTP sessions.
//!
//! A [`SessionStore`] persists session maps by id. Each request gets its own
//! [`SessionManager`], wrapped in a shared [`Session`] handle that the session middleware
//! places in request extensions and saves after the handler has run.
//!
//! Three drivers ship with the framework:
//!
//! - `file`: one JSON file per session under `storage/framework/sessions`
//! - `cookie`: the whole session signed into the cookie itself
//! - `array`: in-process map, for tests

pub mod array;
pub mod cookie;
pub mod file;
pub mod manager;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::{Mutex, MutexGuard};

pub use array::ArraySessionStore;
pub use cookie::CookieSessionStore;
pub use file::FileSessionStore;
pub use manager::SessionManager;

use crate::{
    config::Config,
    errors::{Error, Result},
    support::Paths,
};

pub type SessionData = Map<String, Value>;

/// Length of generated session ids
pub const SESSION_ID_LENGTH: usize = 40;

/// Ids are alphanumeric and at most 128 characters, so they are safe to use in file names.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && id.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn generate_session_id() -> String {
    crate::support::str::random(SESSION_ID_LENGTH)
}

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Load a session. Missing, expired and unreadable sessions are `None`.
    async fn read(&self, id: &str) -> Result<Option<SessionData>>;

    async fn write(&self, id: &str, data: &SessionData, lifetime: Duration) -> Result<()>;

    async fn destroy(&self, id: &str) -> Result<()>;

    /// Remove expired sessions, returning how many were removed.
    async fn gc(&self, max_lifetime: Duration) -> Result<usize>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Whether the cookie carries the session itself rather than its id.
    fn stores_in_cookie(&self) -> bool {
        false
    }

    /// Decode a cookie value into session data. Only used when [`Self::stores_in_cookie`].
    fn decode_cookie(&self, _value: &str) -> Option<SessionData> {
        None
    }

    /// Encode session data into a cookie value. Only used when [`Self::stores_in_cookie`].
    fn encode_cookie(&self, _data: &SessionData) -> Result<String> {
        Err(Error::Internal {
            operation: format!("encode session cookie: {} store keeps sessions server side", self.name()),
        })
    }
}

/// Build the store for `session.driver`.
pub fn create_store(config: &Config, paths: &Paths) -> Result<Arc<dyn SessionStore>> {
    match config.session.driver.as_str() {
        "file" => {
            let dir = config.session.files.clone().unwrap_or_else(|| paths.sessions());
            Ok(Arc::new(FileSessionStore::new(dir)?))
        }
        "cookie" => Ok(Arc::new(CookieSessionStore::new(config.secret("cookie sessions")?)?)),
        "array" => Ok(Arc::new(ArraySessionStore::new())),
        other => Err(Error::Internal {
            operation: format!("create session store: unknown driver '{other}'"),
        }),
    }
}

/// Per-request session handle.
#[derive(Clone)]
pub struct Session(Arc<Mutex<SessionManager>>);

impl Session {
    pub fn new(manager: SessionManager) -> Self {
        Self(Arc::new(Mutex::new(manager)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionManager> {
        self.0.lock().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Session middleware is not installed"))
    }
}

/// Unix time in seconds
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id(&generate_session_id()));
        assert_eq!(generate_session_id().len(), SESSION_ID_LENGTH);
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc/passwd"));
        assert!(!is_valid_id(&"a".repeat(129)));
    }

    #[test]
    fn test_create_store_by_driver() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let mut config = Config::default();

        config.session.driver = "array".into();
        assert_eq!(create_store(&config, &paths).unwrap().name(), "array");

        config.session.driver = "file".into();
        assert_eq!(create_store(&config, &paths).unwrap().name(), "file");
        assert!(paths.sessions().is_dir());

        config.session.driver = "cookie".into();
        assert!(create_store(&config, &paths).is_err());
        config.secret_key = Some("0123456789abcdef0123456789abcdef".into());
        assert!(create_store(&config, &paths).unwrap().stores_in_cookie());

        config.session.driver = "redis".into();
        assert!(create_store(&config, &paths).is_err());
    }
}
