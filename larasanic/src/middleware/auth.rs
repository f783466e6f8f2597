//! `auth` and `guest` route middleware.

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, trace};

use super::Middleware;
use crate::{auth::AuthService, errors::Error, http::ApiResponse};

/// Requires an authenticated user.
///
/// JSON requests without a valid token get a 401 envelope; browser requests are sent to
/// the login page. The resolved user is stored in the request extensions.
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    auth: Arc<AuthService>,
}

impl AuthMiddleware {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }

    fn reject(&self, request: &Request, error: Error) -> Response {
        if crate::http::wants_json(request.headers(), request.uri().path()) {
            return error.into_response();
        }
        ApiResponse::redirect(self.auth.config().login_url.clone(), StatusCode::FOUND).into_response()
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    async fn before_request(&self, request: &mut Request) -> Option<Response> {
        match self.auth.user_from_headers(request.headers()).await {
            Ok(Some(user)) => {
                trace!(user_id = user.id, "Authenticated request");
                request.extensions_mut().insert(user);
                None
            }
            Ok(None) => Some(self.reject(request, Error::Unauthenticated { message: None })),
            Err(e @ Error::Unauthenticated { .. }) => Some(self.reject(request, e)),
            Err(e) => Some(e.into_response()),
        }
    }
}

/// Only lets guests through; authenticated users are redirected home.
#[derive(Debug, Clone)]
pub struct GuestMiddleware {
    auth: Arc<AuthService>,
}

impl GuestMiddleware {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl Middleware for GuestMiddleware {
    fn name(&self) -> &str {
        "guest"
    }

    async fn before_request(&self, request: &mut Request) -> Option<Response> {
        match self.auth.user_from_headers(request.headers()).await {
            Ok(Some(_)) => {
                Some(ApiResponse::redirect(self.auth.config().home_url.clone(), StatusCode::FOUND).into_response())
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Auth failure on guest route, continuing as guest");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AppState,
        auth::{AuthService, InMemoryUserProvider, RegisterData},
        config::{AuthConfig, PasswordConfig},
        middleware::apply_middleware,
    };
    use axum::{Extension, http::header::LOCATION, routing::get};
    use axum_test::TestServer;

    fn service() -> Arc<AuthService> {
        let config = AuthConfig {
            password: PasswordConfig {
                argon2_memory_kib: 1024,
                argon2_iterations: 1,
                argon2_parallelism: 1,
            },
            ..Default::default()
        };
        Arc::new(AuthService::new(
            Arc::new(InMemoryUserProvider::new()),
            config,
            "0123456789abcdef0123456789abcdef",
        ))
    }

    async fn token(auth: &AuthService) -> String {
        let (_, token) = auth
            .register(RegisterData {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        token
    }

    fn server(middleware: Arc<dyn Middleware>) -> TestServer {
        let protected = apply_middleware(
            get(|Extension(user): Extension<crate::auth::User>| async move { user.email }),
            std::slice::from_ref(&middleware),
        );
        let open = apply_middleware(get(|| async { "welcome" }), &[middleware]);
        let app = axum::Router::<AppState>::new()
            .route("/dashboard", protected.clone())
            .route("/api/me", protected)
            .route("/login", open)
            .with_state(crate::test_utils::test_state());
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_auth_rejects_guests() {
        let server = server(Arc::new(AuthMiddleware::new(service())));

        let response = server.get("/api/me").await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let response = server.get("/dashboard").await;
        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header(LOCATION), "/login");
    }

    #[tokio::test]
    async fn test_auth_passes_user_through() {
        let auth = service();
        let token = token(&auth).await;
        let server = server(Arc::new(AuthMiddleware::new(auth)));

        let response = server
            .get("/api/me")
            .authorization_bearer(token)
            .await;
        response.assert_status_ok();
        response.assert_text("ada@example.com");
    }

    #[tokio::test]
    async fn test_guest_redirects_authenticated_users() {
        let auth = service();
        let token = token(&auth).await;
        let server = server(Arc::new(GuestMiddleware::new(auth)));

        server.get("/login").await.assert_text("welcome");

        let response = server.get("/login").authorization_bearer(token).await;
        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header(LOCATION), "/dashboard");

        // A broken token still counts as a guest
        server
            .get("/login")
            .authorization_bearer("garbage")
            .await
            .assert_text("welcome");
    }
}
