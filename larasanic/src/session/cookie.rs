use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use std::time::Duration;
use tracing::{debug, warn};

use super::{SessionData, SessionStore};
use crate::{
    crypto::{hmac_hex, verify_hmac_hex},
    errors::{Error, Result},
};

/// Browsers drop cookies above this size
pub const MAX_COOKIE_SIZE: usize = 4096;

/// Keeps the whole session in a signed cookie: `base64url(json).hex(hmac)`.
///
/// Nothing is stored server side, so `write`, `destroy` and `gc` have nothing to do; the
/// session middleware sets the value returned by [`SessionStore::encode_cookie`].
#[derive(Clone)]
pub struct CookieSessionStore {
    secret: String,
}

impl std::fmt::Debug for CookieSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSessionStore").finish_non_exhaustive()
    }
}

impl CookieSessionStore {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Internal {
                operation: "create cookie session store: secret_key is required".to_string(),
            });
        }
        Ok(Self {
            secret: secret.to_string(),
        })
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    fn name(&self) -> &str {
        "cookie"
    }

    async fn read(&self, id: &str) -> Result<Option<SessionData>> {
        Ok(self.decode_cookie(id))
    }

    async fn write(&self, _id: &str, _data: &SessionData, _lifetime: Duration) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn gc(&self, _max_lifetime: Duration) -> Result<usize> {
        Ok(0)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.decode_cookie(id).is_some())
    }

    fn stores_in_cookie(&self) -> bool {
        true
    }

    fn decode_cookie(&self, value: &str) -> Option<SessionData> {
        let (payload, signature) = value.rsplit_once('.')?;
        if !verify_hmac_hex(&self.secret, payload.as_bytes(), signature) {
            debug!("Session cookie signature mismatch");
            return None;
        }
        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn encode_cookie(&self, data: &SessionData) -> Result<String> {
        let json = serde_json::to_vec(data).map_err(|e| Error::Internal {
            operation: format!("serialize session cookie: {e}"),
        })?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = hmac_hex(&self.secret, payload.as_bytes());
        let value = format!("{payload}.{signature}");
        if value.len() > MAX_COOKIE_SIZE {
            warn!(size = value.len(), max = MAX_COOKIE_SIZE, "Session too large for cookie storage");
            return Err(Error::BadRequest {
                message: format!("Session data exceeds {MAX_COOKIE_SIZE} bytes"),
            });
        }
        Ok(value)
    }
}
