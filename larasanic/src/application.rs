//! The application: container, router, middleware and providers, and the server loop.

use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument};

use crate::{
    AppState, BackgroundServices, Config, Container,
    errors::Result,
    middleware::{GlobalMiddleware, cors::cors_layer},
    providers::{Registration, ServiceProvider},
    routing::{RouteCollection, RouteMiddlewareRegistry, Router, UrlGenerator},
    support::{ConfigRepository, Paths},
};

/// A file or directory a provider offers for copying into the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishable {
    pub provider: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

pub struct Application {
    config: Arc<Config>,
    paths: Paths,
    state: AppState,
    router: Router,
    route_middleware: RouteMiddlewareRegistry,
    global_middleware: GlobalMiddleware,
    providers: Vec<Box<dyn ServiceProvider>>,
    booted: bool,
    publishables: Vec<Publishable>,
    bg_services: BackgroundServices,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.config.app.name)
            .field("base_path", &self.paths.base_path())
            .field("providers", &self.provider_names())
            .field("booted", &self.booted)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Create an application rooted at `config.app.base_path`.
    ///
    /// The container starts with `config`, `paths` and `app.name` bound.
    pub fn new(config: Config) -> Self {
        let paths = Paths::new(config.app.base_path.clone());
        let config = Arc::new(config);

        let container = Arc::new(Container::new());
        container.instance_arc("config", config.clone());
        container.instance("paths", paths.clone());
        container.instance("app.name", config.app.name.clone());

        let settings = Arc::new(ConfigRepository::from_config(&config));
        let url = Arc::new(UrlGenerator::new(&config.app.url, config.secret_key.clone()));

        let state = AppState::builder()
            .config(config.clone())
            .container(container)
            .settings(settings)
            .url(url)
            .build();

        Self {
            config,
            paths,
            state,
            router: Router::new(),
            route_middleware: RouteMiddlewareRegistry::new(),
            global_middleware: GlobalMiddleware::new(),
            providers: Vec::new(),
            booted: false,
            publishables: Vec::new(),
            bg_services: BackgroundServices::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.state.container
    }

    pub fn settings(&self) -> &Arc<ConfigRepository> {
        &self.state.settings
    }

    pub fn urls(&self) -> &Arc<UrlGenerator> {
        &self.state.url
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Registered routes, indexes refreshed.
    pub fn routes(&mut self) -> &RouteCollection {
        self.router.routes()
    }

    pub fn route_middleware(&self) -> &RouteMiddlewareRegistry {
        &self.route_middleware
    }

    pub fn route_middleware_mut(&mut self) -> &mut RouteMiddlewareRegistry {
        &mut self.route_middleware
    }

    pub fn global_middleware(&self) -> &GlobalMiddleware {
        &self.global_middleware
    }

    pub fn global_middleware_mut(&mut self) -> &mut GlobalMiddleware {
        &mut self.global_middleware
    }

    pub fn background_services(&mut self) -> &mut BackgroundServices {
        &mut self.bg_services
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    /// Names of the active providers, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn register_provider<P: ServiceProvider>(&mut self, provider: P) -> Result<Registration> {
        self.register_boxed(Box::new(provider)).await
    }

    /// Register a provider. Skipped providers are dropped; active ones are kept for boot,
    /// or booted right away when the application already has been.
    #[instrument(skip_all, fields(provider = provider.name()))]
    pub async fn register_boxed(&mut self, provider: Box<dyn ServiceProvider>) -> Result<Registration> {
        let registration = provider.register(self).await?;
        if registration == Registration::Skipped {
            debug!("Provider skipped");
            return Ok(registration);
        }

        if self.booted {
            provider.boot(self).await?;
            debug!("Provider registered and booted");
        } else {
            debug!("Provider registered");
        }
        self.providers.push(provider);
        Ok(registration)
    }

    /// Boot every registered provider once, in registration order.
    pub async fn boot(&mut self) -> Result<()> {
        if self.booted {
            return Ok(());
        }

        let mut booted = Vec::new();
        // Providers may register further providers while booting
        loop {
            let pending = std::mem::take(&mut self.providers);
            if pending.is_empty() {
                break;
            }
            for provider in pending {
                provider.boot(self).await?;
                debug!(provider = provider.name(), "Provider booted");
                booted.push(provider);
            }
        }

        self.providers = booted;
        self.booted = true;
        info!(providers = self.providers.len(), "Application booted");
        Ok(())
    }

    pub fn add_publishable(&mut self, provider: &str, source: PathBuf, destination: PathBuf) {
        self.publishables.push(Publishable {
            provider: provider.to_string(),
            source,
            destination: self.paths.resolve(&destination),
        });
    }

    pub fn publishables(&self) -> &[Publishable] {
        &self.publishables
    }

    /// Copy publishable files into place. Existing files are kept unless `force` is set.
    /// Returns the files written.
    pub fn publish(&self, provider: Option<&str>, force: bool) -> io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for item in &self.publishables {
            if provider.is_some_and(|p| p != item.provider) {
                continue;
            }
            copy_tree(&item.source, &item.destination, force, &mut written)?;
        }
        Ok(written)
    }

    /// Boot if needed and compile the routes into an axum router with CORS and request
    /// tracing applied.
    pub async fn into_router(&mut self) -> anyhow::Result<axum::Router> {
        self.boot().await?;

        let mut router = self
            .router
            .compile(self.state.clone(), &self.route_middleware, &self.global_middleware)?;

        if self.config.cors_enabled() {
            router = router.layer(cors_layer(&self.config)?);
        }

        Ok(router.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        ))
    }

    /// Serve on the configured `host:port` until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        self.run_on(&bind_addr, shutdown).await
    }

    /// Serve on `bind_addr` until `shutdown` resolves, then stop background tasks.
    pub async fn run_on<F>(&mut self, bind_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.into_router().await?;

        let listener = TcpListener::bind(bind_addr).await?;
        info!(
            "{} listening on http://{}, available at {}",
            self.config.app.name, bind_addr, self.config.app.url
        );

        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Stop background tasks. The application keeps its routes and services.
    pub async fn shutdown(&mut self) {
        info!("Stopping background tasks...");
        std::mem::take(&mut self.bg_services).shutdown().await;
    }
}

fn copy_tree(source: &Path, destination: &Path, force: bool, written: &mut Vec<PathBuf>) -> io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(destination)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_tree(&entry.path(), &destination.join(entry.file_name()), force, written)?;
        }
        return Ok(());
    }

    if destination.exists() && !force {
        return Ok(());
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;
    written.push(destination.to_path_buf());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_application, test_config_in, test_server};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        skip: bool,
    }

    impl Recording {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: log.clone(),
                skip: false,
            }
        }
    }

    #[async_trait]
    impl ServiceProvider for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn register(&self, _app: &mut Application) -> Result<Registration> {
            self.log.lock().unwrap().push(format!("register {}", self.name));
            Ok(if self.skip { Registration::Skipped } else { Registration::Active })
        }

        async fn boot(&self, _app: &mut Application) -> Result<()> {
            self.log.lock().unwrap().push(format!("boot {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_container_starts_with_core_bindings() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(test_config_in(&dir));
        assert_eq!(*app.container().make::<String>("app.name").unwrap(), "Larasanic");
        assert_eq!(app.container().make::<Paths>("paths").unwrap().base_path(), dir.path());
        assert!(app.container().has("config"));
    }

    #[test_log::test(tokio::test)]
    async fn test_providers_boot_once_in_order() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut app = Application::new(test_config_in(&dir));

        app.register_provider(Recording::new("first", &log)).await.unwrap();
        let skipped = Recording {
            skip: true,
            ..Recording::new("skipped", &log)
        };
        assert_eq!(app.register_provider(skipped).await.unwrap(), Registration::Skipped);
        app.register_provider(Recording::new("second", &log)).await.unwrap();

        app.boot().await.unwrap();
        app.boot().await.unwrap();
        app.register_provider(Recording::new("late", &log)).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            [
                "register first",
                "register skipped",
                "register second",
                "boot first",
                "boot second",
                "register late",
                "boot late",
            ]
        );
        assert_eq!(app.provider_names(), ["first", "second", "late"]);
    }

    #[tokio::test]
    async fn test_default_providers_serve_routes() {
        let dir = TempDir::new().unwrap();
        let mut app = test_application(&dir).await;
        app.router_mut().get("/", || async { "home" }).name("home");

        let server = test_server(&mut app).await;
        let response = server.get("/").await;
        response.assert_status_ok();
        response.assert_text("home");
        assert_eq!(response.header("x-frame-options"), "DENY");

        server.get("/missing").await.assert_status(StatusCode::NOT_FOUND);
        assert!(app.routes().has_named_route("auth.login"));
        assert!(!app.routes().has_named_route("websocket"));
    }

    #[tokio::test]
    async fn test_merge_config_and_publish() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("package/config.yaml");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "enabled: true").unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let provider = Recording::new("package", &log);
        let mut app = Application::new(test_config_in(&dir));

        provider.merge_config(&app, "package", json!({ "enabled": false, "level": 3 }));
        app.settings().set("package.enabled", json!(true));
        provider.merge_config(&app, "package", json!({ "enabled": false, "extra": 1 }));
        assert_eq!(app.settings().get("package.enabled"), Some(json!(true)));
        assert_eq!(app.settings().get("package.extra"), Some(json!(1)));

        provider.publishes(&mut app, source.clone(), PathBuf::from("config/package.yaml"));
        let written = app.publish(Some("package"), false).unwrap();
        assert_eq!(written, [dir.path().join("config/package.yaml")]);
        assert!(app.publish(None, false).unwrap().is_empty());
        assert_eq!(app.publish(None, true).unwrap().len(), 1);
    }
}
