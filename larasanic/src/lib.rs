//! # larasanic: a Laravel-style application framework on axum
//!
//! `larasanic` bundles the plumbing a server-rendered web application usually assembles by
//! hand: a service container, service providers, a named-route router with groups and
//! resource controllers, a middleware pipeline, sessions, caching, validation, templates,
//! token auth, WebSockets and a small artisan-style console.
//!
//! ## Bootstrapping
//!
//! An application is built from a [`Config`], given providers, booted, and run:
//!
//! ```ignore
//! let mut app = Application::new(config);
//! for provider in providers::default_providers() {
//!     app.register_provider(provider).await?;
//! }
//! app.router_mut().get("/", home).name("home");
//! app.boot().await?;
//! app.run(shutdown_signal()).await?;
//! ```
//!
//! Providers run in two phases. `register` puts services into the [`container`] and onto
//! [`AppState`]; `boot` runs once every provider has registered, so it can rely on services
//! other providers supplied (the HTTP provider, for instance, wires the session store into
//! the global middleware stack during boot).
//!
//! ## Request flow
//!
//! Each compiled route runs, outermost first:
//!
//! 1. `tower-http` request tracing and CORS, applied to the whole router
//! 2. a guard that enforces parameter constraints and records the [`routing::MatchedRoute`]
//! 3. the global middleware of the route's blueprint (`web`, `api` or `ws`), see
//!    [`middleware::MIDDLEWARE_GROUPS`]
//! 4. the route's named middleware, resolved through [`routing::RouteMiddlewareRegistry`]
//! 5. the handler
//!
//! Errors returned by handlers are [`errors::Error`] values. They render as JSON for API
//! requests and as HTML error pages otherwise.
//!
//! ## Background tasks
//!
//! Providers may start maintenance loops (session GC, expired cache sweeps, rate limiter
//! cleanup). They all watch one [`CancellationToken`] and are awaited when the server shuts
//! down.

pub mod application;
pub mod auth;
pub mod cache;
pub mod config;
pub mod console;
pub mod container;
pub mod crypto;
pub mod errors;
pub mod http;
pub mod middleware;
pub mod pagination;
pub mod providers;
pub mod routing;
pub mod session;
pub mod support;
pub mod telemetry;
pub mod validation;
pub mod view;
pub mod websocket;

#[cfg(test)]
pub mod test_utils;

use bon::Builder;
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

pub use application::Application;
pub use config::Config;
pub use container::Container;
pub use providers::{Registration, ServiceProvider};

use crate::{
    auth::AuthService, cache::Cache, http::HttpClient, routing::UrlGenerator, support::ConfigRepository, view::ViewEngine,
    websocket::WebSocketManager,
};

/// Shared state handed to every handler and middleware.
///
/// Services that a provider may not register are optional. Handlers that need one report an
/// internal error when it is missing.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .container(container)
///     .settings(settings)
///     .url(urls)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub container: Arc<Container>,
    /// Runtime configuration repository, including config merged in by providers
    pub settings: Arc<ConfigRepository>,
    pub url: Arc<UrlGenerator>,
    pub view: Option<Arc<ViewEngine>>,
    pub auth: Option<Arc<AuthService>>,
    pub cache: Option<Cache>,
    pub websocket: Option<Arc<WebSocketManager>>,
    pub http_client: Option<Arc<HttpClient>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("app", &self.config.app.name)
            .field("view", &self.view.is_some())
            .field("auth", &self.auth.is_some())
            .field("cache", &self.cache.is_some())
            .field("websocket", &self.websocket.is_some())
            .field("http_client", &self.http_client.is_some())
            .finish_non_exhaustive()
    }
}

/// Maintenance tasks started by providers.
pub struct BackgroundServices {
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl Default for BackgroundServices {
    fn default() -> Self {
        let shutdown_token = CancellationToken::new();
        Self {
            drop_guard: Some(shutdown_token.clone().drop_guard()),
            background_tasks: Vec::new(),
            shutdown_token,
        }
    }
}

impl std::fmt::Debug for BackgroundServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundServices")
            .field("tasks", &self.background_tasks.len())
            .field("cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl BackgroundServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token every task should watch to know when to stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start a task. `task` receives a child of the shutdown token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Starting background task");
        let token = self.shutdown_token.child_token();
        self.background_tasks.push(tokio::spawn(task(token)));
    }

    pub fn len(&self) -> usize {
        self.background_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.background_tasks.is_empty()
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Run `tick` every `period` until `token` is cancelled. The first tick happens after one period.
pub async fn run_periodic<F, Fut>(token: CancellationToken, period: std::time::Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => tick().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut services = BackgroundServices::new();
        let counter = ticks.clone();
        services.spawn("counter", move |token| async move {
            run_periodic(token, Duration::from_millis(5), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });
        assert_eq!(services.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let token = services.shutdown_token();
        services.shutdown().await;

        assert!(token.is_cancelled());
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_dropping_services_cancels_tasks() {
        let services = BackgroundServices::new();
        let token = services.shutdown_token();
        drop(services);
        assert!(token.is_cancelled());
    }
}
