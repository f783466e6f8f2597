//! Registration, login and token resolution.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    password::{Argon2Params, hash_password_async, verify_password_async},
    provider::{NewUser, User, UserProvider},
    token::{AccessClaims, create_access_token, verify_access_token},
};
use crate::{
    cache::Cache,
    config::AuthConfig,
    errors::{Error, Result},
    http::cookie::{CookieOptions, SameSite, read_cookie, set_cookie},
};

const REVOKED_PREFIX: &str = "auth:revoked:";

/// Fields accepted by [`AuthService::register`].
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterData {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Issues and resolves access tokens for users of a [`UserProvider`].
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserProvider>,
    /// Revoked token ids; revocation is unavailable without a cache
    denylist: Option<Cache>,
    config: AuthConfig,
    secret: String,
    params: Argon2Params,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .field("denylist", &self.denylist.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(users: Arc<dyn UserProvider>, config: AuthConfig, secret: impl Into<String>) -> Self {
        let params = Argon2Params::from(&config.password);
        Self {
            users,
            denylist: None,
            config,
            secret: secret.into(),
            params,
        }
    }

    pub fn with_denylist(mut self, cache: Cache) -> Self {
        self.denylist = Some(cache);
        self
    }

    /// Cache holding revoked token ids, if revocation is enabled.
    pub fn denylist(&self) -> Option<&Cache> {
        self.denylist.as_ref()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn users(&self) -> &Arc<dyn UserProvider> {
        &self.users
    }

    /// Create an account and sign it in.
    #[instrument(skip_all, fields(email = %data.email))]
    pub async fn register(&self, data: RegisterData) -> Result<(User, String)> {
        if self.users.find_by_email(&data.email).await?.is_some() {
            return Err(Error::Conflict {
                message: "The email has already been taken.".to_string(),
            });
        }

        let password_hash = hash_password_async(data.password, self.params).await?;
        let user = self
            .users
            .create(NewUser {
                name: data.name,
                email: data.email,
                password_hash,
            })
            .await?;
        info!(user_id = user.id, "Registered user");

        let token = self.issue_token(&user)?;
        Ok((user, token))
    }

    /// Check credentials and issue a token.
    ///
    /// Unknown emails run a dummy verification so they take as long as wrong passwords.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn attempt(&self, email: &str, password: &str) -> Result<(User, String)> {
        let user = self.users.find_by_email(email).await?;
        let hash = user.as_ref().map(|u| u.password_hash.clone());
        let valid = verify_password_async(password.to_string(), hash).await?;

        match user {
            Some(user) if valid => {
                let token = self.issue_token(&user)?;
                Ok((user, token))
            }
            _ => {
                debug!("Rejected login attempt");
                Err(Error::Unauthenticated {
                    message: Some("Invalid credentials".to_string()),
                })
            }
        }
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        create_access_token(user, &self.secret, self.config.token_lifetime)
    }

    /// Decode a token, rejecting revoked ones.
    pub async fn claims(&self, token: &str) -> Result<AccessClaims> {
        let claims = verify_access_token(token, &self.secret)?;
        if self.is_revoked(&claims.jti).await? {
            return Err(Error::Unauthenticated {
                message: Some("Token has been revoked".to_string()),
            });
        }
        Ok(claims)
    }

    /// Resolve the user a token belongs to.
    pub async fn verify(&self, token: &str) -> Result<User> {
        let claims = self.claims(token).await?;
        self.users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| Error::Unauthenticated {
                message: Some("User no longer exists".to_string()),
            })
    }

    /// The access token carried by a request: the auth cookie first, then a bearer header.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(token) = read_cookie(headers, &self.config.cookie_name).filter(|t| !t.is_empty()) {
            return Some(token);
        }
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    /// `Ok(None)` when the request carries no token; an error when it carries a bad one.
    pub async fn user_from_headers(&self, headers: &HeaderMap) -> Result<Option<User>> {
        match self.token_from_headers(headers) {
            Some(token) => self.verify(&token).await.map(Some),
            None => Ok(None),
        }
    }

    /// Denylist a token until it would have expired anyway.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let claims = match verify_access_token(token, &self.secret) {
            Ok(claims) => claims,
            // Already unusable
            Err(Error::Unauthenticated { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(cache) = &self.denylist else {
            warn!("Token revocation requested but no cache is configured");
            return Ok(());
        };

        let remaining = claims.remaining();
        if remaining.is_zero() {
            return Ok(());
        }
        cache
            .put(&format!("{REVOKED_PREFIX}{}", claims.jti), serde_json::Value::Bool(true), Some(remaining))
            .await?;
        debug!(jti = %claims.jti, "Revoked access token");
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> Result<bool> {
        match &self.denylist {
            Some(cache) => cache.has(&format!("{REVOKED_PREFIX}{jti}")).await,
            None => Ok(false),
        }
    }

    fn cookie_options(&self, max_age: u64) -> CookieOptions {
        CookieOptions {
            http_only: true,
            secure: self.config.cookie_secure,
            same_site: SameSite::Lax,
            max_age: Some(max_age),
            ..Default::default()
        }
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn auth_cookie(&self, token: &str) -> String {
        set_cookie(
            &self.config.cookie_name,
            token,
            &self.cookie_options(self.config.token_lifetime.as_secs()),
        )
    }

    /// `Set-Cookie` value that removes the auth cookie.
    pub fn logout_cookie(&self) -> String {
        set_cookie(&self.config.cookie_name, "", &self.cookie_options(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::provider::InMemoryUserProvider,
        cache::{Cache, array::ArrayCacheStore},
        config::PasswordConfig,
    };
    use axum::http::{HeaderValue, header::COOKIE};
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config() -> AuthConfig {
        AuthConfig {
            password: PasswordConfig {
                argon2_memory_kib: 1024,
                argon2_iterations: 1,
                argon2_parallelism: 1,
            },
            ..Default::default()
        }
    }

    fn service() -> AuthService {
        let cache = Cache::new(Arc::new(ArrayCacheStore::new(Duration::from_secs(60))));
        AuthService::new(Arc::new(InMemoryUserProvider::new()), config(), SECRET).with_denylist(cache)
    }

    fn register_data(email: &str) -> RegisterData {
        RegisterData {
            name: "Ada".into(),
            email: email.into(),
            password: "password123".into(),
        }
    }

    #[tokio::test]
    async fn test_register_then_attempt() {
        let auth = service();
        let (user, token) = auth.register(register_data("ada@example.com")).await.unwrap();
        assert_eq!(auth.verify(&token).await.unwrap().id, user.id);

        let (again, _) = auth.attempt("ada@example.com", "password123").await.unwrap();
        assert_eq!(again.id, user.id);
        assert!(matches!(
            auth.attempt("ada@example.com", "wrong-password").await,
            Err(Error::Unauthenticated { .. })
        ));
        assert!(matches!(
            auth.attempt("nobody@example.com", "password123").await,
            Err(Error::Unauthenticated { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let auth = service();
        auth.register(register_data("ada@example.com")).await.unwrap();
        assert!(matches!(
            auth.register(register_data("ada@example.com")).await,
            Err(Error::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_user_from_cookie_or_bearer() {
        let auth = service();
        let (user, token) = auth.register(register_data("ada@example.com")).await.unwrap();

        let mut headers = HeaderMap::new();
        assert!(auth.user_from_headers(&headers).await.unwrap().is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        assert_eq!(auth.user_from_headers(&headers).await.unwrap().unwrap().id, user.id);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&format!("access_token={token}")).unwrap());
        assert_eq!(auth.user_from_headers(&headers).await.unwrap().unwrap().id, user.id);

        headers.insert(COOKIE, HeaderValue::from_static("access_token=garbage"));
        assert!(auth.user_from_headers(&headers).await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_token_is_rejected() {
        let auth = service();
        let (_, token) = auth.register(register_data("ada@example.com")).await.unwrap();
        auth.revoke(&token).await.unwrap();
        assert!(matches!(auth.verify(&token).await, Err(Error::Unauthenticated { .. })));

        // Revoking garbage is a no-op
        auth.revoke("not.a.token").await.unwrap();
    }

    #[test]
    fn test_cookies() {
        let auth = service();
        let cookie = auth.auth_cookie("abc");
        assert_eq!(cookie, "access_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=2592000");
        assert!(auth.logout_cookie().ends_with("Max-Age=0"));
    }
}
