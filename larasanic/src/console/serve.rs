use async_trait::async_trait;
use futures::future::BoxFuture;
use std::{future::Future, sync::Mutex};

use super::{Command, Output};
use crate::Application;

/// `serve [--host] [--port]`
pub struct ServeCommand {
    host: Option<String>,
    port: Option<u16>,
    shutdown: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl ServeCommand {
    pub fn new(host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host,
            port,
            shutdown: Mutex::new(None),
        }
    }

    /// Stop serving when `signal` resolves. Without one the server runs until killed.
    pub fn with_shutdown<F>(self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            shutdown: Mutex::new(Some(Box::pin(signal))),
            ..self
        }
    }

    pub fn bind_address(&self, app: &Application) -> String {
        let config = app.config();
        let host = self.host.as_deref().unwrap_or(&config.host);
        format!("{}:{}", host, self.port.unwrap_or(config.port))
    }
}

#[async_trait]
impl Command for ServeCommand {
    fn name(&self) -> &str {
        "serve"
    }

    fn description(&self) -> &str {
        "Start the HTTP server"
    }

    async fn run(&self, app: &mut Application, _out: Output<'_>) -> anyhow::Result<()> {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let bind_addr = self.bind_address(app);
        match shutdown {
            Some(signal) => app.run_on(&bind_addr, signal).await,
            None => app.run_on(&bind_addr, std::future::pending()).await,
        }
    }
}
