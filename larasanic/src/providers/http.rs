use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::debug;

use super::{Registration, ServiceProvider};
use crate::{
    Application,
    errors::Result,
    http::HttpClient,
    middleware::{
        auth::{AuthMiddleware, GuestMiddleware},
        csrf::CsrfMiddleware,
        rate_limit::{RateLimitMiddleware, SlidingWindowLimiter},
        security_headers::SecurityHeadersMiddleware,
        session::SessionMiddleware,
    },
    run_periodic,
    session::SessionStore,
};

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// The outbound HTTP client, the `auth`/`guest` route middleware and the global stack.
///
/// The global stack is assembled at boot, after the session and auth providers have
/// registered their services.
#[derive(Debug, Default)]
pub struct HttpServiceProvider;

#[async_trait]
impl ServiceProvider for HttpServiceProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        let client = Arc::new(HttpClient::new(&app.config().http_client)?);
        app.container().instance_arc("http_client", client.clone());
        app.state_mut().http_client = Some(client);
        Ok(Registration::Active)
    }

    async fn boot(&self, app: &mut Application) -> Result<()> {
        let config = app.config().clone();

        if let Some(auth) = app.state().auth.clone() {
            let registry = app.route_middleware_mut();
            registry.register("auth", Arc::new(AuthMiddleware::new(auth.clone())));
            registry.register("guest", Arc::new(GuestMiddleware::new(auth)));
        }

        let session_store = app
            .container()
            .try_make::<Arc<dyn SessionStore>>("session.store")
            .map(|store| (*store).clone());

        let global = app.global_middleware_mut();
        global.push(
            "security_headers",
            Arc::new(SecurityHeadersMiddleware::new(&config.security.headers)),
        );
        if let Some(store) = session_store {
            global.push("session", Arc::new(SessionMiddleware::new(store, config.session.clone())));
        }
        if config.security.csrf.enabled {
            let secret = config.secret("csrf protection")?;
            global.push("csrf", Arc::new(CsrfMiddleware::new(config.security.csrf.clone(), secret)));
        }
        if config.compression.enabled {
            global.enable_compression(config.compression.clone());
        }

        if config.security.rate_limit.enabled {
            let limiter = Arc::new(SlidingWindowLimiter::new());
            app.global_middleware_mut().push(
                "rate_limit",
                Arc::new(RateLimitMiddleware::new(config.security.rate_limit.clone(), limiter.clone())),
            );
            app.background_services().spawn("rate-limit-cleanup", move |token| async move {
                run_periodic(token, LIMITER_CLEANUP_INTERVAL, || {
                    let limiter = limiter.clone();
                    async move {
                        let removed = limiter.cleanup();
                        if removed > 0 {
                            debug!(removed, "Dropped idle rate limit windows");
                        }
                    }
                })
                .await;
            });
        }

        debug!(global = ?app.global_middleware().names(), "Global middleware configured");
        Ok(())
    }
}
