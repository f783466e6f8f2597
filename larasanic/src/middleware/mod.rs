//! Request middleware.
//!
//! A [`Middleware`] sees the request before the handler and the response after it. Most
//! implementations only override [`Middleware::before_request`] (to short-circuit) or
//! [`Middleware::after_response`] (to decorate); those that need state from both sides
//! override [`Middleware::handle`].
//!
//! Middleware is applied in two places:
//!
//! - **Globally**, through [`GlobalMiddleware`], filtered per route by the blueprint groups
//!   in [`MIDDLEWARE_GROUPS`].
//! - **Per route**, by name, through the route middleware registry.

pub mod auth;
pub mod compression;
pub mod cors;
pub mod csrf;
pub mod rate_limit;
pub mod security_headers;
pub mod session;

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{HeaderMap, Method, Uri},
    middleware::{Next, from_fn},
    response::Response,
};
use std::{collections::HashMap, sync::Arc};

use crate::{
    AppState,
    config::CompressionConfig,
    errors::Result,
    routing::{Blueprint, MatchedRoute, blueprint_of},
};

/// Parameters passed to a route middleware as `name:arg1,arg2`.
pub type MiddlewareArgs = Vec<String>;

/// Which global middleware runs for each blueprint.
pub const MIDDLEWARE_GROUPS: &[(Blueprint, &[&str])] = &[
    (Blueprint::Web, &["security_headers", "session", "csrf", "compression"]),
    (
        Blueprint::Api,
        &["security_headers", "session", "csrf", "rate_limit", "compression"],
    ),
    (Blueprint::Ws, &["security_headers"]),
];

/// The parts of a request that remain visible after it has been handed to the handler.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub route: Option<MatchedRoute>,
}

impl RequestSnapshot {
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            route: request.extensions().get::<MatchedRoute>().cloned(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn blueprint(&self) -> Blueprint {
        self.route.as_ref().map(|r| r.blueprint).unwrap_or_default()
    }

    pub fn wants_json(&self) -> bool {
        crate::http::wants_json(&self.headers, self.uri.path())
    }
}

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Inspect or modify the request. Returning a response stops the chain.
    async fn before_request(&self, _request: &mut Request) -> Option<Response> {
        None
    }

    async fn after_response(&self, _request: &RequestSnapshot, response: Response) -> Response {
        response
    }

    async fn handle(&self, mut request: Request, next: Next) -> Response {
        if let Some(response) = self.before_request(&mut request).await {
            return response;
        }
        let snapshot = RequestSnapshot::from_request(&request);
        let response = next.run(request).await;
        self.after_response(&snapshot, response).await
    }

    /// A copy of this middleware configured with `name:args` parameters.
    ///
    /// Returns `None` when the middleware takes no parameters.
    fn with_args(&self, _args: &[String]) -> Result<Option<Arc<dyn Middleware>>> {
        Ok(None)
    }
}

/// Wrap `service` so that `middlewares[0]` runs first (outermost).
pub(crate) fn apply_middleware(
    mut service: axum::routing::MethodRouter<AppState>,
    middlewares: &[Arc<dyn Middleware>],
) -> axum::routing::MethodRouter<AppState> {
    // The last layer added is the outermost one
    for middleware in middlewares.iter().rev() {
        let middleware = middleware.clone();
        service = service.layer(from_fn(move |request: Request, next: Next| {
            let middleware = middleware.clone();
            async move { middleware.handle(request, next).await }
        }));
    }
    service
}

/// Ordered stack of global middleware, filtered per request by blueprint group.
#[derive(Clone)]
pub struct GlobalMiddleware {
    entries: Vec<(String, Arc<dyn Middleware>)>,
    groups: HashMap<Blueprint, Vec<String>>,
    compression: Option<CompressionConfig>,
}

impl Default for GlobalMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GlobalMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalMiddleware")
            .field("entries", &self.names())
            .field("groups", &self.groups)
            .field("compression", &self.compression.is_some())
            .finish()
    }
}

impl GlobalMiddleware {
    pub fn new() -> Self {
        let groups = MIDDLEWARE_GROUPS
            .iter()
            .map(|(bp, names)| (*bp, names.iter().map(|n| n.to_string()).collect()))
            .collect();
        Self {
            entries: Vec::new(),
            groups,
            compression: None,
        }
    }

    /// Append a middleware, replacing any existing entry with the same name in place.
    pub fn push(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = middleware,
            None => self.entries.push((name, middleware)),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        let removed_compression = name == "compression" && self.compression.take().is_some();
        before != self.entries.len() || removed_compression
    }

    /// Gzip responses for the blueprints whose group lists `compression`.
    pub fn enable_compression(&mut self, config: CompressionConfig) {
        self.compression = Some(config);
    }

    /// Replace the names allowed for a blueprint.
    pub fn set_group(&mut self, blueprint: Blueprint, names: Vec<String>) {
        self.groups.insert(blueprint, names);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|(n, _)| n.clone()).collect();
        if self.compression.is_some() {
            names.push("compression".to_string());
        }
        names
    }

    pub fn allows(&self, blueprint: Blueprint, name: &str) -> bool {
        self.groups.get(&blueprint).is_some_and(|names| names.iter().any(|n| n == name))
    }

    /// Middleware that applies to routes of `blueprint`, in stack order.
    pub fn for_blueprint(&self, blueprint: Blueprint) -> Vec<Arc<dyn Middleware>> {
        self.entries
            .iter()
            .filter(|(name, _)| self.allows(blueprint, name))
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn compression_for(&self, blueprint: Blueprint) -> Option<&CompressionConfig> {
        self.compression
            .as_ref()
            .filter(|c| c.enabled && self.allows(blueprint, "compression"))
    }

    /// Run the stack for an arbitrary request, skipping entries the request's blueprint
    /// does not list. Used for requests no route matched.
    pub async fn run(&self, request: Request, next: Next) -> Response {
        let blueprint = blueprint_of(request.extensions());
        let chain = self.for_blueprint(blueprint);
        run_chain(&chain, request, next).await
    }
}

async fn run_chain(chain: &[Arc<dyn Middleware>], mut request: Request, next: Next) -> Response {
    let mut snapshots = Vec::with_capacity(chain.len());
    for middleware in chain {
        if let Some(response) = middleware.before_request(&mut request).await {
            return unwind(chain, &snapshots, response).await;
        }
        snapshots.push(RequestSnapshot::from_request(&request));
    }
    let response = next.run(request).await;
    unwind(chain, &snapshots, response).await
}

async fn unwind(chain: &[Arc<dyn Middleware>], snapshots: &[RequestSnapshot], mut response: Response) -> Response {
    for (middleware, snapshot) in chain.iter().zip(snapshots).rev() {
        response = middleware.after_response(snapshot, response).await;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderValue, StatusCode},
        response::IntoResponse,
        routing::get,
    };
    use axum_test::TestServer;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        block: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn before_request(&self, _request: &mut Request) -> Option<Response> {
            self.log.lock().unwrap().push(format!("before:{}", self.name));
            self.block.then(|| StatusCode::FORBIDDEN.into_response())
        }

        async fn after_response(&self, _request: &RequestSnapshot, mut response: Response) -> Response {
            self.log.lock().unwrap().push(format!("after:{}", self.name));
            response
                .headers_mut()
                .append("x-seen", HeaderValue::from_static(self.name));
            response
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, block: bool) -> Arc<dyn Middleware> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            block,
        })
    }

    fn state() -> AppState {
        crate::test_utils::test_state()
    }

    #[tokio::test]
    async fn test_first_listed_runs_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![recorder("a", &log, false), recorder("b", &log, false)];
        let handler_log = log.clone();
        let method_router = apply_middleware(
            get(move || {
                let log = handler_log.clone();
                async move {
                    log.lock().unwrap().push("handler".to_string());
                    "ok"
                }
            }),
            &chain,
        );
        let app = axum::Router::new().route("/", method_router).with_state(state());
        let server = TestServer::new(app).unwrap();

        server.get("/").await.assert_status_ok();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:a", "before:b", "handler", "after:b", "after:a"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler_and_later_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![recorder("a", &log, false), recorder("b", &log, true), recorder("c", &log, false)];
        let method_router = apply_middleware(get(|| async { "unreachable" }), &chain);
        let app = axum::Router::new().route("/", method_router).with_state(state());
        let server = TestServer::new(app).unwrap();

        let response = server.get("/").await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(*log.lock().unwrap(), vec!["before:a", "before:b", "after:a"]);
    }

    #[test]
    fn test_groups_filter_by_blueprint() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = GlobalMiddleware::new();
        stack.push("security_headers", recorder("security_headers", &log, false));
        stack.push("rate_limit", recorder("rate_limit", &log, false));
        stack.push("session", recorder("session", &log, false));
        stack.enable_compression(CompressionConfig::default());

        let names = |bp| {
            stack
                .for_blueprint(bp)
                .iter()
                .map(|m| m.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(Blueprint::Web), vec!["security_headers", "session"]);
        assert_eq!(names(Blueprint::Api), vec!["security_headers", "rate_limit", "session"]);
        assert_eq!(names(Blueprint::Ws), vec!["security_headers"]);
        assert!(stack.compression_for(Blueprint::Web).is_some());
        assert!(stack.compression_for(Blueprint::Ws).is_none());

        stack.push("session", recorder("session2", &log, false));
        assert_eq!(stack.names(), vec!["security_headers", "rate_limit", "session", "compression"]);
    }
}
