use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{Registration, ServiceProvider};
use crate::{Application, errors::Result, view::ViewEngine};

/// The template engine, with `app_name`, `app_url`, `app_env` and `debug` globals.
#[derive(Debug, Default)]
pub struct ViewServiceProvider;

#[async_trait]
impl ServiceProvider for ViewServiceProvider {
    fn name(&self) -> &str {
        "view"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        let config = app.config().clone();
        let views = ViewEngine::new(&config.view, app.paths().base_path()).with_urls(app.urls().clone());
        views.add_global("app_name", json!(config.app.name));
        views.add_global("app_url", json!(config.app.url));
        views.add_global("app_env", json!(config.app.env));
        views.add_global("debug", json!(config.app.debug));

        let views = Arc::new(views);
        app.container().instance_arc("view", views.clone());
        app.state_mut().view = Some(views);
        Ok(Registration::Active)
    }
}
