use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{HeaderValue, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rand::{prelude::RngExt, rng};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::Middleware;
use crate::{
    config::SessionConfig,
    errors::Error,
    http::cookie::{CookieOptions, SameSite, read_cookie, set_cookie},
    session::{Session, SessionManager, SessionStore},
};

/// Starts a session before the handler and saves it afterwards.
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionMiddleware {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            http_only: true,
            secure: self.config.cookie_secure,
            same_site: SameSite::parse(&self.config.same_site),
            max_age: Some(self.config.lifetime.as_secs()),
            ..Default::default()
        }
    }

    fn lottery_wins(&self) -> bool {
        let [chances, out_of] = self.config.lottery;
        out_of > 0 && rng().random_range(1..=out_of) <= chances
    }

    fn collect_garbage(&self) {
        let store = self.store.clone();
        let lifetime = self.config.lifetime;
        tokio::spawn(async move {
            match store.gc(lifetime).await {
                Ok(removed) if removed > 0 => info!(removed, store = store.name(), "Session garbage collection"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Session garbage collection failed"),
            }
        });
    }
}

#[async_trait]
impl Middleware for SessionMiddleware {
    fn name(&self) -> &str {
        "session"
    }

    async fn handle(&self, mut request: Request, next: Next) -> Response {
        let cookie = read_cookie(request.headers(), &self.config.cookie_name);
        let in_cookie = self.store.stores_in_cookie();

        let manager = if in_cookie {
            let mut manager = SessionManager::new(self.store.clone(), None, self.config.lifetime);
            manager.start_with(cookie.as_deref().and_then(|value| self.store.decode_cookie(value)));
            manager
        } else {
            let mut manager = SessionManager::new(self.store.clone(), cookie, self.config.lifetime);
            if let Err(e) = manager.start().await {
                return e.into_response();
            }
            manager
        };

        let session = Session::new(manager);
        request.extensions_mut().insert(session.clone());

        let mut response = next.run(request).await;

        let cookie_value = {
            let mut manager = session.lock().await;
            if let Err(e) = manager.save().await {
                error!(error = %e, "Failed to save session");
                return Error::Internal {
                    operation: "save session".to_string(),
                }
                .into_response();
            }
            if in_cookie {
                match self.store.encode_cookie(manager.raw()) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        debug!(error = %e, "Session cookie not updated");
                        None
                    }
                }
            } else {
                Some(manager.id().to_string())
            }
        };

        if let Some(value) = cookie_value {
            let cookie = set_cookie(&self.config.cookie_name, &value, &self.cookie_options());
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }

        if self.lottery_wins() {
            self.collect_garbage();
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ArraySessionStore, CookieSessionStore};
    use axum::{Router, middleware::from_fn, routing::get};
    use axum_test::TestServer;
    use serde_json::json;

    fn server(store: Arc<dyn SessionStore>) -> TestServer {
        let middleware: Arc<dyn Middleware> = Arc::new(SessionMiddleware::new(store, SessionConfig::default()));
        let app = Router::new()
            .route(
                "/count",
                get(|session: Session| async move {
                    let mut session = session.lock().await;
                    session.increment("count", 1).to_string()
                }),
            )
            .layer(from_fn(move |request: Request, next: Next| {
                let middleware = middleware.clone();
                async move { middleware.handle(request, next).await }
            }));
        TestServer::new(app).unwrap()
    }

    fn session_cookie(response: &axum_test::TestResponse) -> String {
        let header = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Max-Age=7200"));
        header.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_session_persists_across_requests() {
        let store: Arc<dyn SessionStore> = Arc::new(ArraySessionStore::new());
        let server = server(store);

        let first = server.get("/count").await;
        assert_eq!(first.text(), "1");
        let cookie = session_cookie(&first);
        assert!(cookie.starts_with("framework_session="));

        let second = server.get("/count").add_header("cookie", cookie.clone()).await;
        assert_eq!(second.text(), "2");
        assert_eq!(session_cookie(&second), cookie);
    }

    #[tokio::test]
    async fn test_cookie_driver_carries_data() {
        let store: Arc<dyn SessionStore> =
            Arc::new(CookieSessionStore::new("0123456789abcdef0123456789abcdef").unwrap());
        let server = server(store.clone());

        let first = server.get("/count").await;
        let cookie = session_cookie(&first);
        let value = cookie.trim_start_matches("framework_session=");
        assert_eq!(store.decode_cookie(value).unwrap()["count"], json!(1));

        let second = server.get("/count").add_header("cookie", cookie.clone()).await;
        assert_eq!(second.text(), "2");
    }

    #[tokio::test]
    async fn test_extractor_without_middleware() {
        let app = Router::new().route("/", get(|_session: Session| async { "unreachable" }));
        let server = TestServer::new(app).unwrap();
        server
            .get("/")
            .await
            .assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
