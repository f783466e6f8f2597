//! Request extractors for the current user.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde_json::{Value, json};
use std::convert::Infallible;

use super::provider::User;
use crate::{AppState, errors::Error};

/// The user of the current request, if any.
///
/// Uses the user stored by the `auth` middleware when present, otherwise resolves the
/// request's token through the auth service. Invalid tokens count as a guest.
#[derive(Debug, Clone, Default)]
pub struct Auth {
    user: Option<User>,
}

impl Auth {
    pub fn new(user: Option<User>) -> Self {
        Self { user }
    }

    pub fn check(&self) -> bool {
        self.user.is_some()
    }

    pub fn guest(&self) -> bool {
        self.user.is_none()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn id(&self) -> Option<u64> {
        self.user.as_ref().map(|u| u.id)
    }

    /// `{"isAuthenticated": bool, "user": {...} | null}` for templates and SPA bootstrapping.
    pub fn user_as_json(&self) -> Value {
        json!({
            "isAuthenticated": self.check(),
            "user": self.user,
        })
    }
}

impl FromRequestParts<AppState> for Auth {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(Auth::new(Some(user.clone())));
        }
        let Some(auth) = state.auth.as_ref() else {
            return Ok(Auth::default());
        };
        let user = match auth.user_from_headers(&parts.headers).await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!(error = %e, "Treating request with unusable token as guest");
                None
            }
        };
        Ok(Auth::new(user))
    }
}

/// An authenticated user; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = Auth::from_request_parts(parts, state).await.unwrap_or_default();
        auth.user.map(AuthUser).ok_or(Error::Unauthenticated { message: None })
    }
}
