//! Double-submit CSRF protection.
//!
//! The cookie holds a random value and the token is its HMAC under the app secret, so a
//! token can be verified without server-side state. A fresh pair is issued on every
//! response and the current token is exposed to handlers through [`CsrfToken`].

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{
        HeaderValue, Method, StatusCode,
        header::{CONTENT_TYPE, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, warn};

use super::Middleware;
use crate::{
    config::CsrfConfig,
    crypto::{generate_csrf_token, verify_csrf_token},
    errors::Error,
    http::cookie::{CookieOptions, SameSite, read_cookie, set_cookie},
    routing::{Blueprint, blueprint_of},
};

/// Largest request body inspected for a form token
const MAX_FORM_BODY: usize = 2 * 1024 * 1024;

/// Form fields that may carry the token
const TOKEN_FIELDS: [&str; 2] = ["_csrf_token", "csrf_token"];

/// The token issued for the current request, for embedding in forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CsrfToken {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CsrfToken>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "CSRF middleware is not installed"))
    }
}

pub struct CsrfMiddleware {
    config: CsrfConfig,
    secret: String,
}

impl CsrfMiddleware {
    pub fn new(config: CsrfConfig, secret: impl Into<String>) -> Self {
        Self {
            config,
            secret: secret.into(),
        }
    }

    /// Whether the request must present a valid token.
    pub fn requires_check(&self, method: &Method, path: &str, blueprint: Blueprint) -> bool {
        let unsafe_method = [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method);
        if !self.config.enabled || !unsafe_method {
            return false;
        }
        match blueprint {
            Blueprint::Api => !self.config.excluded_prefixes.iter().any(|p| path.starts_with(p.as_str())),
            Blueprint::Web => self.config.protect_web,
            Blueprint::Ws => false,
        }
    }

    fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            http_only: false,
            secure: self.config.cookie_secure,
            same_site: SameSite::Strict,
            ..Default::default()
        }
    }

    async fn submitted_token(&self, request: &mut Request) -> Option<String> {
        let from_header = request
            .headers()
            .get(self.config.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if from_header.is_some() {
            return from_header;
        }

        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let is_form = content_type.starts_with("application/x-www-form-urlencoded");
        let is_json = content_type.starts_with("application/json");
        if !is_form && !is_json {
            return None;
        }

        let body = std::mem::take(request.body_mut());
        let bytes = match axum::body::to_bytes(body, MAX_FORM_BODY).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Could not buffer request body for CSRF token");
                return None;
            }
        };
        let token = if is_form {
            token_from_form(&bytes)
        } else {
            token_from_json(&bytes)
        };
        *request.body_mut() = Body::from(bytes);
        token
    }
}

fn token_from_form(bytes: &[u8]) -> Option<String> {
    let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes).ok()?;
    TOKEN_FIELDS
        .iter()
        .find_map(|name| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()))
}

fn token_from_json(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    TOKEN_FIELDS
        .iter()
        .find_map(|name| value.get(name).and_then(Value::as_str).map(str::to_string))
}

#[async_trait]
impl Middleware for CsrfMiddleware {
    fn name(&self) -> &str {
        "csrf"
    }

    async fn handle(&self, mut request: Request, next: Next) -> Response {
        if !self.config.enabled {
            return next.run(request).await;
        }

        let blueprint = blueprint_of(request.extensions());
        let path = request.uri().path().to_string();
        if self.requires_check(request.method(), &path, blueprint) {
            let cookie = read_cookie(request.headers(), &self.config.cookie_name);
            let token = self.submitted_token(&mut request).await;
            let valid = match (&token, &cookie) {
                (Some(token), Some(cookie)) => verify_csrf_token(token, cookie, &self.secret),
                _ => false,
            };
            if !valid {
                warn!(
                    method = %request.method(),
                    path = %path,
                    has_cookie = cookie.is_some(),
                    has_token = token.is_some(),
                    "CSRF token mismatch"
                );
                return Error::CsrfMismatch.into_response();
            }
        }

        let (token, cookie) = generate_csrf_token(&self.secret);
        request.extensions_mut().insert(CsrfToken(token.clone()));

        let mut response = next.run(request).await;
        let set = set_cookie(&self.config.cookie_name, &cookie, &self.cookie_options());
        if let Ok(value) = HeaderValue::from_str(&set) {
            response.headers_mut().append(SET_COOKIE, value);
        }
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(self.config.header_name.as_str()),
            HeaderValue::from_str(&token),
        ) {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::generate_csrf_token, routing::MatchedRoute};
    use axum::{Router, middleware::from_fn, routing::post};
    use axum_test::TestServer;
    use std::{collections::BTreeMap, sync::Arc};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn server(blueprint: Blueprint, protect_web: bool) -> TestServer {
        let config = CsrfConfig {
            protect_web,
            ..Default::default()
        };
        let csrf: Arc<dyn Middleware> = Arc::new(CsrfMiddleware::new(config, SECRET));
        let app = Router::new()
            .route(
                "/api/items",
                post(|token: CsrfToken, body: String| async move { format!("{}|{body}", token.0.len()) }),
            )
            .route("/api/auth/login", post(|| async { "login" }))
            .layer(from_fn(move |request: Request, next: Next| {
                let csrf = csrf.clone();
                async move { csrf.handle(request, next).await }
            }))
            .layer(from_fn(move |mut request: Request, next: Next| async move {
                let path = request.uri().path().to_string();
                request.extensions_mut().insert(MatchedRoute {
                    name: None,
                    key: format!("POST:{path}"),
                    uri: path,
                    blueprint,
                    params: BTreeMap::new(),
                });
                next.run(request).await
            }));
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_api_post_without_token_is_rejected() {
        let response = server(Blueprint::Api, false).post("/api/items").await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["code"], "CSRF_TOKEN_MISMATCH");
    }

    #[tokio::test]
    async fn test_header_token_accepted_and_rotated() {
        let (token, cookie) = generate_csrf_token(SECRET);
        let response = server(Blueprint::Api, false)
            .post("/api/items")
            .add_header("cookie", format!("csrf_token={cookie}"))
            .add_header("x-csrf-token", token.clone())
            .await;
        response.assert_status_ok();

        let issued = response.headers()["x-csrf-token"].to_str().unwrap().to_string();
        assert_ne!(issued, token);
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("csrf_token="));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(!set_cookie.contains("HttpOnly"));
        let new_cookie = set_cookie.trim_start_matches("csrf_token=").split(';').next().unwrap();
        assert!(verify_csrf_token(&issued, new_cookie, SECRET));
    }

    #[tokio::test]
    async fn test_form_token_accepted_and_body_restored() {
        let (token, cookie) = generate_csrf_token(SECRET);
        let body = format!("name=widget&_csrf_token={token}");
        let response = server(Blueprint::Api, false)
            .post("/api/items")
            .add_header("cookie", format!("csrf_token={cookie}"))
            .content_type("application/x-www-form-urlencoded")
            .bytes(body.clone().into())
            .await;
        response.assert_status_ok();
        assert_eq!(response.text(), format!("{}|{body}", token.len()));
    }

    #[tokio::test]
    async fn test_json_token_for_other_cookie_rejected() {
        let (token, _) = generate_csrf_token(SECRET);
        let (_, other_cookie) = generate_csrf_token(SECRET);
        let response = server(Blueprint::Api, false)
            .post("/api/items")
            .add_header("cookie", format!("csrf_token={other_cookie}"))
            .json(&serde_json::json!({"csrf_token": token}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_excluded_prefix_and_web_posts_skip_check() {
        server(Blueprint::Api, false)
            .post("/api/auth/login")
            .await
            .assert_status_ok();
        server(Blueprint::Web, false).post("/api/items").await.assert_status_ok();
        server(Blueprint::Web, true)
            .post("/api/items")
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
