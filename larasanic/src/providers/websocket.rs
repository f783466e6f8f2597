use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{Registration, ServiceProvider};
use crate::{
    Application,
    errors::Result,
    websocket::{self, WebSocketManager},
};

/// The connection manager and the authenticated WebSocket route.
///
/// Skipped unless `websocket.enabled` is set and an auth service is available.
#[derive(Debug, Default)]
pub struct WebSocketServiceProvider;

#[async_trait]
impl ServiceProvider for WebSocketServiceProvider {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        if !app.config().websocket.enabled {
            return Ok(Registration::Skipped);
        }
        if app.state().auth.is_none() {
            warn!("WebSockets are enabled but no auth service is registered; not mounting the endpoint");
            return Ok(Registration::Skipped);
        }

        let manager = Arc::new(WebSocketManager::new());
        app.container().instance_arc("websocket", manager.clone());
        app.state_mut().websocket = Some(manager);
        Ok(Registration::Active)
    }

    async fn boot(&self, app: &mut Application) -> Result<()> {
        let path = app.config().websocket.path.clone();
        websocket::register_routes(app.router_mut(), &path);
        Ok(())
    }
}
