use async_trait::async_trait;
use tracing::debug;

use super::{Registration, ServiceProvider};
use crate::{Application, errors::Result};

/// Binds the URL generator and serves the public directory when it exists. The router and
/// its resource registrar live on the [`Application`] itself.
#[derive(Debug, Default)]
pub struct RoutingServiceProvider;

#[async_trait]
impl ServiceProvider for RoutingServiceProvider {
    fn name(&self) -> &str {
        "routing"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        let urls = app.urls().clone();
        app.container().instance_arc("url", urls);
        Ok(Registration::Active)
    }

    async fn boot(&self, app: &mut Application) -> Result<()> {
        let public = app.paths().public();
        if public.is_dir() {
            app.router_mut().serve_static(public);
        }

        let routes = app.routes().count();
        debug!(routes, "Routes registered before boot");
        Ok(())
    }
}
