//! Service providers.
//!
//! A provider contributes services to an [`Application`] in two phases:
//!
//! - [`ServiceProvider::register`] runs as soon as the provider is added. It binds services
//!   into the container and onto [`crate::AppState`], and may decline by returning
//!   [`Registration::Skipped`].
//! - [`ServiceProvider::boot`] runs once every provider has registered, in registration
//!   order. It is the place for work that depends on other providers: adding routes,
//!   wiring middleware, starting background tasks.

pub mod auth;
pub mod cache;
pub mod http;
pub mod routing;
pub mod session;
pub mod view;
pub mod websocket;

pub use auth::AuthServiceProvider;
pub use cache::CacheServiceProvider;
pub use http::HttpServiceProvider;
pub use routing::RoutingServiceProvider;
pub use session::SessionServiceProvider;
pub use view::ViewServiceProvider;
pub use websocket::WebSocketServiceProvider;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use crate::{Application, errors::Result};

/// Outcome of [`ServiceProvider::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Keep the provider and boot it.
    Active,
    /// The provider has nothing to do with this configuration and is dropped.
    Skipped,
}

#[async_trait]
pub trait ServiceProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn register(&self, _app: &mut Application) -> Result<Registration> {
        Ok(Registration::Active)
    }

    async fn boot(&self, _app: &mut Application) -> Result<()> {
        Ok(())
    }

    /// Merge package defaults under `key`. Values already configured win.
    fn merge_config(&self, app: &Application, key: &str, defaults: Value) {
        app.settings().merge(key, defaults);
    }

    /// Offer `source` to be copied to `destination` by [`Application::publish`].
    fn publishes(&self, app: &mut Application, source: PathBuf, destination: PathBuf) {
        app.add_publishable(self.name(), source, destination);
    }
}

/// The framework providers, in the order their dependencies require.
pub fn default_providers() -> Vec<Box<dyn ServiceProvider>> {
    vec![
        Box::new(RoutingServiceProvider),
        Box::new(CacheServiceProvider),
        Box::new(SessionServiceProvider),
        Box::new(ViewServiceProvider),
        Box::new(AuthServiceProvider::default()),
        Box::new(HttpServiceProvider),
        Box::new(WebSocketServiceProvider),
    ]
}
