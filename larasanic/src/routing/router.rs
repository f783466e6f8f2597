//! Route registration and compilation into an axum router.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode, Uri, header::HOST},
    middleware::{Next, from_fn, from_fn_with_state},
    response::{Html, IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
};
use serde_json::Value;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use tower_http::services::ServeDir;
use tracing::{debug, warn};

use super::{
    Blueprint, MatchedRoute,
    collection::RouteCollection,
    middleware_registry::RouteMiddlewareRegistry,
    registrar::{ResourceHandlers, ResourceOptions, ResourceRegistrar},
    route::{Handler, Route, Segment, normalize_uri, parse_segments},
};
use crate::{
    AppState,
    errors::{Error, Result},
    http::{ApiResponse, error_handler::error_pages},
    middleware::{GlobalMiddleware, apply_middleware, compression::compression_layer},
};

/// Methods registered by [`Router::any`].
pub const ANY_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Attributes shared by every route declared inside a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupAttributes {
    pub prefix: Option<String>,
    pub middleware: Vec<String>,
    /// Route name prefix (Laravel's `as`)
    pub name: Option<String>,
    pub wheres: BTreeMap<String, String>,
    pub domain: Option<String>,
    pub blueprint: Option<Blueprint>,
}

impl GroupAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn name(mut self, prefix: &str) -> Self {
        self.name = Some(prefix.to_string());
        self
    }

    pub fn where_(mut self, param: &str, pattern: &str) -> Self {
        self.wheres.insert(param.to_string(), pattern.to_string());
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn blueprint(mut self, blueprint: Blueprint) -> Self {
        self.blueprint = Some(blueprint);
        self
    }

    /// Nest `inner` inside `self`.
    pub fn merge(&self, inner: &GroupAttributes) -> GroupAttributes {
        let prefix = match (&self.prefix, &inner.prefix) {
            (Some(outer), Some(inner)) => Some(normalize_uri(&format!("{outer}/{inner}"))),
            (outer, inner) => inner.clone().or_else(|| outer.clone()),
        };
        let name = match (&self.name, &inner.name) {
            (Some(outer), Some(inner)) => Some(format!("{outer}{inner}")),
            (outer, inner) => inner.clone().or_else(|| outer.clone()),
        };
        let mut wheres = self.wheres.clone();
        wheres.extend(inner.wheres.clone());

        GroupAttributes {
            prefix,
            middleware: self.middleware.iter().chain(&inner.middleware).cloned().collect(),
            name,
            wheres,
            domain: inner.domain.clone().or_else(|| self.domain.clone()),
            blueprint: inner.blueprint.or(self.blueprint),
        }
    }
}

/// Group attributes waiting for their routes.
#[must_use = "call .group() to declare the routes"]
pub struct PendingGroup<'a> {
    router: &'a mut Router,
    attributes: GroupAttributes,
}

impl PendingGroup<'_> {
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.attributes = self.attributes.prefix(prefix);
        self
    }

    pub fn middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = self.attributes.middleware(names);
        self
    }

    pub fn name(mut self, prefix: &str) -> Self {
        self.attributes = self.attributes.name(prefix);
        self
    }

    pub fn where_(mut self, param: &str, pattern: &str) -> Self {
        self.attributes = self.attributes.where_(param, pattern);
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.attributes = self.attributes.domain(domain);
        self
    }

    pub fn blueprint(mut self, blueprint: Blueprint) -> Self {
        self.attributes = self.attributes.blueprint(blueprint);
        self
    }

    pub fn group(self, routes: impl FnOnce(&mut Router)) {
        self.router.group(self.attributes, routes);
    }
}

/// Laravel-style route declarations.
#[derive(Debug, Default)]
pub struct Router {
    routes: RouteCollection,
    /// Effective attributes of each open group, outermost first
    groups: Vec<GroupAttributes>,
    patterns: BTreeMap<String, String>,
    fallback: Option<Handler>,
    /// Directory whose files are served for requests no route matches
    public_dir: Option<PathBuf>,
    /// Routes were handed out for mutation since the indexes were last rebuilt
    dirty: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `methods`. Open groups and global patterns apply.
    pub fn add_route(&mut self, methods: Vec<Method>, uri: &str, handler: Handler) -> &mut Route {
        let attributes = self.groups.last().cloned().unwrap_or_default();
        let uri = match &attributes.prefix {
            Some(prefix) => format!("{prefix}/{uri}"),
            None => uri.to_string(),
        };

        let mut route = Route::new(methods, &uri, handler);
        route.set_name_prefix(attributes.name.as_deref().unwrap_or_default());
        route.middleware(attributes.middleware.iter().cloned());
        for (param, pattern) in &attributes.wheres {
            route.where_(param, pattern);
        }
        let params: Vec<String> = route.parameter_names().into_iter().map(str::to_string).collect();
        for param in params {
            if route.get_where(&param).is_none()
                && let Some(pattern) = self.patterns.get(&param)
            {
                route.where_(&param, pattern);
            }
        }
        if let Some(domain) = &attributes.domain {
            route.domain(domain);
        }
        if let Some(blueprint) = attributes.blueprint {
            route.blueprint(blueprint);
        }

        let index = self.routes.add(route);
        self.dirty = true;
        self.routes.route_mut(index)
    }

    /// GET (and HEAD)
    pub fn get<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(vec![Method::GET, Method::HEAD], uri, Handler::new(handler))
    }

    pub fn post<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(vec![Method::POST], uri, Handler::new(handler))
    }

    pub fn put<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(vec![Method::PUT], uri, Handler::new(handler))
    }

    pub fn patch<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(vec![Method::PATCH], uri, Handler::new(handler))
    }

    pub fn delete<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(vec![Method::DELETE], uri, Handler::new(handler))
    }

    pub fn options<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(vec![Method::OPTIONS], uri, Handler::new(handler))
    }

    pub fn any<H, T>(&mut self, uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(ANY_METHODS.to_vec(), uri, Handler::new(handler))
    }

    pub fn match_methods<H, T>(&mut self, methods: &[Method], uri: &str, handler: H) -> &mut Route
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.add_route(methods.to_vec(), uri, Handler::new(handler))
    }

    /// Redirect every method on `from` to `to`. Non-redirect statuses become 302.
    pub fn redirect(&mut self, from: &str, to: &str, status: StatusCode) -> &mut Route {
        let action = format!("redirect:{to}");
        let to = to.to_string();
        let handler = move || {
            let to = to.clone();
            async move { ApiResponse::redirect(to, status) }
        };
        self.add_route(ANY_METHODS.to_vec(), from, Handler::new(handler).action(action))
    }

    pub fn permanent_redirect(&mut self, from: &str, to: &str) -> &mut Route {
        self.redirect(from, to, StatusCode::MOVED_PERMANENTLY)
    }

    /// Render `template` with `data` on GET.
    pub fn view(&mut self, uri: &str, template: &str, data: Value) -> &mut Route {
        let action = format!("view:{template}");
        let template = template.to_string();
        let handler = move |State(state): State<AppState>| {
            let template = template.clone();
            let data = data.clone();
            async move { render_view(&state, &template, data).await }
        };
        self.add_route(vec![Method::GET, Method::HEAD], uri, Handler::new(handler).action(action))
    }

    /// Handler for requests no route matches.
    pub fn fallback<H, T>(&mut self, handler: H)
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.fallback = Some(Handler::new(handler));
    }

    /// Serve files under `dir` for requests no route matches, before the fallback runs.
    /// Static files skip the middleware stack.
    pub fn serve_static(&mut self, dir: impl Into<PathBuf>) {
        self.public_dir = Some(dir.into());
    }

    /// Declare routes sharing `attributes`. Nested groups merge with the enclosing ones.
    pub fn group(&mut self, attributes: GroupAttributes, routes: impl FnOnce(&mut Router)) {
        let effective = match self.groups.last() {
            Some(outer) => outer.merge(&attributes),
            None => attributes,
        };
        self.groups.push(effective);
        routes(self);
        self.groups.pop();
    }

    pub fn prefix(&mut self, prefix: &str) -> PendingGroup<'_> {
        PendingGroup {
            router: self,
            attributes: GroupAttributes::new().prefix(prefix),
        }
    }

    pub fn middleware<I, S>(&mut self, names: I) -> PendingGroup<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PendingGroup {
            router: self,
            attributes: GroupAttributes::new().middleware(names),
        }
    }

    pub fn name(&mut self, prefix: &str) -> PendingGroup<'_> {
        PendingGroup {
            router: self,
            attributes: GroupAttributes::new().name(prefix),
        }
    }

    pub fn blueprint(&mut self, blueprint: Blueprint) -> PendingGroup<'_> {
        PendingGroup {
            router: self,
            attributes: GroupAttributes::new().blueprint(blueprint),
        }
    }

    /// Constrain `param` on every route added from now on that does not constrain it itself.
    pub fn pattern(&mut self, param: &str, pattern: &str) {
        self.patterns.insert(param.to_string(), pattern.to_string());
    }

    pub fn patterns<I, K, V>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.patterns
            .extend(patterns.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    pub fn resource(&mut self, name: &str, handlers: ResourceHandlers) {
        ResourceRegistrar::register(self, name, handlers, ResourceOptions::default());
    }

    pub fn resource_with(&mut self, name: &str, handlers: ResourceHandlers, options: ResourceOptions) {
        ResourceRegistrar::register(self, name, handlers, options);
    }

    pub fn api_resource(&mut self, name: &str, handlers: ResourceHandlers) {
        ResourceRegistrar::api_register(self, name, handlers, ResourceOptions::default());
    }

    pub fn api_resource_with(&mut self, name: &str, handlers: ResourceHandlers, options: ResourceOptions) {
        ResourceRegistrar::api_register(self, name, handlers, options);
    }

    fn refresh(&mut self) {
        if self.dirty {
            self.routes.refresh_lookups();
            self.dirty = false;
        }
    }

    /// The registered routes, with indexes brought up to date.
    pub fn routes(&mut self) -> &RouteCollection {
        self.refresh();
        &self.routes
    }

    /// Build the axum router.
    ///
    /// Each route is wrapped, outermost first, in: a guard enforcing `where` constraints
    /// and the domain and recording the [`MatchedRoute`]; gzip compression; the global
    /// middleware of its blueprint; its own route middleware.
    pub fn compile(
        &mut self,
        state: AppState,
        registry: &RouteMiddlewareRegistry,
        global: &GlobalMiddleware,
    ) -> Result<axum::Router> {
        self.refresh();
        state.url.set_routes(&self.routes);

        // axum path -> (method router, methods already taken on that path)
        let mut mounted: BTreeMap<String, (MethodRouter<AppState>, Vec<Method>)> = BTreeMap::new();
        for route in self.routes.get_routes() {
            route.validate().map_err(|e| Error::Internal {
                operation: format!("compile routes: {e}"),
            })?;

            let blueprint = route.get_blueprint();
            let mut chain = global.for_blueprint(blueprint);
            chain.extend(registry.resolve(route.get_middleware())?);
            let guarded = Arc::new(route.clone());

            for path in route.axum_paths() {
                let (router, taken) = mounted.entry(path.clone()).or_default();
                let methods: Vec<Method> = route
                    .methods()
                    .iter()
                    .filter(|m| !taken.contains(m))
                    .cloned()
                    .collect();
                if methods.len() < route.methods().len() {
                    warn!(route = %route.key(), path = %path, "Route shadowed by an earlier route on the same path");
                }
                let Some(filter) = method_filter(&methods)? else {
                    continue;
                };
                taken.extend(methods);

                let mut method_router = apply_middleware(route.handler().method_router(Some(filter)), &chain);
                if let Some(compression) = global.compression_for(blueprint) {
                    method_router = method_router.layer(compression_layer(compression));
                }
                let guard_route = guarded.clone();
                method_router = method_router.layer(from_fn(move |request: Request, next: Next| {
                    let route = guard_route.clone();
                    async move { guard(&route, request, next).await }
                }));

                *router = std::mem::take(router).merge(method_router);
            }
        }

        check_parameter_names(mounted.keys())?;

        let mut app = axum::Router::new();
        for (path, (method_router, _)) in mounted {
            debug!(path = %path, "Mounting route");
            app = app.route(&path, method_router);
        }

        let fallback = match &self.fallback {
            Some(handler) => handler.method_router(None),
            None => axum::routing::any(route_not_found),
        };
        let stack = Arc::new(global.clone());
        let fallback = fallback.layer(from_fn(move |request: Request, next: Next| {
            let stack = stack.clone();
            async move { stack.run(request, next).await }
        }));

        let app = match &self.public_dir {
            Some(dir) => {
                debug!(dir = %dir.display(), "Serving static files");
                app.fallback_service(ServeDir::new(dir).fallback(fallback.with_state::<()>(state.clone())))
            }
            None => app.fallback(fallback),
        };

        Ok(app
            .layer(from_fn_with_state(state.clone(), error_pages))
            .with_state(state))
    }
}

fn method_filter(methods: &[Method]) -> Result<Option<MethodFilter>> {
    let mut filter: Option<MethodFilter> = None;
    for method in methods {
        let single = MethodFilter::try_from(method.clone()).map_err(|e| Error::Internal {
            operation: format!("compile routes: {e}"),
        })?;
        filter = Some(match filter {
            Some(filter) => filter.or(single),
            None => single,
        });
    }
    Ok(filter)
}

/// axum rejects two paths that name the same parameter position differently.
fn check_parameter_names<'a>(paths: impl Iterator<Item = &'a String>) -> Result<()> {
    let parsed: Vec<(&String, Vec<Segment>)> = paths.map(|p| (p, parse_segments(p))).collect();
    for (i, (path_a, a)) in parsed.iter().enumerate() {
        for (path_b, b) in &parsed[i + 1..] {
            for (left, right) in a.iter().zip(b) {
                match (left, right) {
                    (Segment::Static(x), Segment::Static(y)) if x == y => continue,
                    (Segment::Param { name: x, .. }, Segment::Param { name: y, .. }) if x == y => continue,
                    (Segment::Param { name: x, .. }, Segment::Param { name: y, .. }) => {
                        return Err(Error::Internal {
                            operation: format!(
                                "compile routes: {path_a} and {path_b} name the same parameter '{x}' and '{y}'"
                            ),
                        });
                    }
                    _ => break,
                }
            }
        }
    }
    Ok(())
}

async fn guard(route: &Route, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if let Some(domain) = route.get_domain() {
        let host = request
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.split(':').next().unwrap_or(h))
            .unwrap_or_default();
        if !host.eq_ignore_ascii_case(domain) {
            return Error::RouteNotFound { path }.into_response();
        }
    }

    let Some(params) = route.match_path(&path) else {
        return Error::RouteNotFound { path }.into_response();
    };
    request.extensions_mut().insert(MatchedRoute {
        name: route.get_name().map(str::to_string),
        uri: route.uri().to_string(),
        key: route.key(),
        blueprint: route.get_blueprint(),
        params,
    });
    next.run(request).await
}

async fn route_not_found(uri: Uri) -> Error {
    Error::RouteNotFound {
        path: uri.path().to_string(),
    }
}

async fn render_view(state: &AppState, template: &str, data: Value) -> Result<Html<String>> {
    let views = state.view.as_ref().ok_or_else(|| Error::Internal {
        operation: format!("render view '{template}': no view engine configured"),
    })?;
    Ok(Html(views.render(template, data).await?))
}
