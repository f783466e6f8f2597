//! A single route definition and its path matching.

use axum::{
    handler::Handler as AxumHandler,
    http::Method,
    routing::{MethodFilter, MethodRouter},
};
use regex::Regex;
use std::{collections::BTreeMap, fmt, sync::Arc};

use super::Blueprint;
use crate::AppState;

pub const NUMBER_PATTERN: &str = "[0-9]+";
pub const ALPHA_PATTERN: &str = "[a-zA-Z]+";
pub const ALPHA_NUMERIC_PATTERN: &str = "[a-zA-Z0-9]+";
pub const UUID_PATTERN: &str = r"[\da-fA-F]{8}-[\da-fA-F]{4}-[\da-fA-F]{4}-[\da-fA-F]{4}-[\da-fA-F]{12}";

type MethodRouterFactory = Arc<dyn Fn(Option<MethodFilter>) -> MethodRouter<AppState> + Send + Sync>;

/// A type-erased axum handler that can be mounted under any set of methods.
#[derive(Clone)]
pub struct Handler {
    factory: MethodRouterFactory,
    action: Option<String>,
}

impl Handler {
    pub fn new<H, T>(handler: H) -> Self
    where
        H: AxumHandler<T, AppState>,
        T: 'static,
    {
        Self {
            factory: Arc::new(move |filter| match filter {
                Some(filter) => axum::routing::on(filter, handler.clone()),
                None => axum::routing::any(handler.clone()),
            }),
            action: None,
        }
    }

    /// Label the handler for listings, e.g. `PhotoController@index`.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Mount under `filter`, or every method when `None`.
    pub(crate) fn method_router(&self, filter: Option<MethodFilter>) -> MethodRouter<AppState> {
        (self.factory)(filter)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("action", &self.action).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Static(String),
    Param { name: String, optional: bool },
}

#[derive(Debug, Clone)]
pub(crate) struct Constraint {
    pub(crate) pattern: String,
    /// `None` when the pattern does not compile; such a route never matches
    pub(crate) regex: Option<Regex>,
}

impl Constraint {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{pattern})$")).ok(),
        }
    }

    fn is_match(&self, value: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(value))
    }
}

/// Normalize a uri or request path: leading `/`, no trailing `/` except for the root,
/// and no empty segments.
pub fn normalize_uri(uri: &str) -> String {
    let joined = uri.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
    format!("/{joined}")
}

pub(crate) fn parse_segments(uri: &str) -> Vec<Segment> {
    uri.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(inner) => match inner.strip_suffix('?') {
                Some(name) => Segment::Param {
                    name: name.to_string(),
                    optional: true,
                },
                None => Segment::Param {
                    name: inner.to_string(),
                    optional: false,
                },
            },
            None => Segment::Static(segment.to_string()),
        })
        .collect()
}

#[derive(Clone)]
pub struct Route {
    methods: Vec<Method>,
    uri: String,
    segments: Vec<Segment>,
    handler: Handler,
    name: Option<String>,
    name_prefix: String,
    middleware: Vec<String>,
    wheres: BTreeMap<String, Constraint>,
    defaults: BTreeMap<String, String>,
    domain: Option<String>,
    blueprint: Blueprint,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("middleware", &self.middleware)
            .field("blueprint", &self.blueprint)
            .finish_non_exhaustive()
    }
}

impl Route {
    pub fn new(methods: Vec<Method>, uri: &str, handler: Handler) -> Self {
        let uri = normalize_uri(uri);
        Self {
            methods,
            segments: parse_segments(&uri),
            uri,
            handler,
            name: None,
            name_prefix: String::new(),
            middleware: Vec::new(),
            wheres: BTreeMap::new(),
            defaults: BTreeMap::new(),
            domain: None,
            blueprint: Blueprint::default(),
        }
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_middleware(&self) -> &[String] {
        &self.middleware
    }

    pub fn get_domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn get_blueprint(&self) -> Blueprint {
        self.blueprint
    }

    pub fn get_defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    /// Constraint pattern for a parameter, if any.
    pub fn get_where(&self, param: &str) -> Option<&str> {
        self.wheres.get(param).map(|c| c.pattern.as_str())
    }

    pub(crate) fn constraints(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.wheres.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param { name, .. } => Some(name.as_str()),
                Segment::Static(_) => None,
            })
            .collect()
    }

    pub fn optional_parameters(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param { name, optional: true } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn set_name_prefix(&mut self, prefix: &str) {
        self.name_prefix = prefix.to_string();
    }

    /// Name the route. A group's name prefix is prepended.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(format!("{}{name}", self.name_prefix));
        self
    }

    /// Append middleware names, skipping ones already attached.
    pub fn middleware<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.middleware.contains(&name) {
                self.middleware.push(name);
            }
        }
        self
    }

    pub fn without_middleware(&mut self, name: &str) -> &mut Self {
        self.middleware.retain(|m| m != name);
        self
    }

    /// Constrain a parameter to a regex, matched against the whole segment.
    pub fn where_(&mut self, param: &str, pattern: &str) -> &mut Self {
        let constraint = Constraint::new(pattern);
        if constraint.regex.is_none() {
            tracing::warn!(uri = %self.uri, param, pattern, "Invalid route constraint");
        }
        self.wheres.insert(param.to_string(), constraint);
        self
    }

    pub fn where_number(&mut self, param: &str) -> &mut Self {
        self.where_(param, NUMBER_PATTERN)
    }

    pub fn where_alpha(&mut self, param: &str) -> &mut Self {
        self.where_(param, ALPHA_PATTERN)
    }

    pub fn where_alpha_numeric(&mut self, param: &str) -> &mut Self {
        self.where_(param, ALPHA_NUMERIC_PATTERN)
    }

    pub fn where_uuid(&mut self, param: &str) -> &mut Self {
        self.where_(param, UUID_PATTERN)
    }

    /// Constrain a parameter to one of `values`.
    pub fn where_in<I, S>(&mut self, param: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pattern = values
            .into_iter()
            .map(|v| regex::escape(v.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        self.where_(param, &pattern)
    }

    /// Value used for an optional parameter the request leaves out.
    pub fn defaults(&mut self, key: &str, value: &str) -> &mut Self {
        self.defaults.insert(key.to_string(), value.to_string());
        self
    }

    pub fn domain(&mut self, domain: &str) -> &mut Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn prefix(&mut self, prefix: &str) -> &mut Self {
        self.uri = normalize_uri(&format!("{prefix}/{}", self.uri));
        self.segments = parse_segments(&self.uri);
        self
    }

    pub fn blueprint(&mut self, blueprint: Blueprint) -> &mut Self {
        self.blueprint = blueprint;
        self
    }

    /// `METHOD:uri` of the first method.
    pub fn key(&self) -> String {
        let method = self.methods.first().map(Method::as_str).unwrap_or("ANY");
        format!("{method}:{}", self.uri)
    }

    /// `METHOD:uri` for every method.
    pub fn keys(&self) -> Vec<String> {
        self.methods.iter().map(|m| format!("{m}:{}", self.uri)).collect()
    }

    pub fn action_name(&self) -> String {
        self.handler.action.clone().unwrap_or_else(|| "closure".to_string())
    }

    /// HEAD is served by GET routes.
    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method) || (*method == Method::HEAD && self.methods.contains(&Method::GET))
    }

    /// Parameters when `method` and `path` match this route.
    pub fn matches(&self, method: &Method, path: &str) -> Option<BTreeMap<String, String>> {
        if !self.allows_method(method) {
            return None;
        }
        self.match_path(path)
    }

    /// Match the path alone, ignoring the method.
    pub fn match_path(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let normalized = normalize_uri(path);
        let parts: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() > self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match (segment, parts.get(index)) {
                (Segment::Static(expected), Some(actual)) if expected == actual => {}
                (Segment::Static(_), _) => return None,
                (Segment::Param { name, .. }, Some(value)) => {
                    if let Some(constraint) = self.wheres.get(name)
                        && !constraint.is_match(value)
                    {
                        return None;
                    }
                    params.insert(name.clone(), (*value).to_string());
                }
                (Segment::Param { name, optional: true }, None) => {
                    if let Some(default) = self.defaults.get(name) {
                        params.insert(name.clone(), default.clone());
                    }
                }
                (Segment::Param { optional: false, .. }, None) => return None,
            }
        }
        Some(params)
    }

    /// The axum paths this route is mounted on: the full path, plus one shorter path for
    /// each trailing optional parameter.
    pub(crate) fn axum_paths(&self) -> Vec<String> {
        let render = |segments: &[Segment]| {
            let joined = segments
                .iter()
                .map(|s| match s {
                    Segment::Static(s) => s.clone(),
                    Segment::Param { name, .. } => format!("{{{name}}}"),
                })
                .collect::<Vec<_>>()
                .join("/");
            format!("/{joined}")
        };

        let mut paths = vec![render(&self.segments)];
        for (index, segment) in self.segments.iter().enumerate().rev() {
            match segment {
                Segment::Param { optional: true, .. } => paths.push(render(&self.segments[..index])),
                _ => break,
            }
        }
        paths
    }

    /// Problems that would stop the route from being mounted.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let mut seen_optional = false;
        for segment in &self.segments {
            match segment {
                Segment::Param { name, optional } => {
                    if name.is_empty() || name.contains(['{', '}', '*']) {
                        return Err(format!("invalid parameter name '{name}' in {}", self.uri));
                    }
                    if seen_optional && !optional {
                        return Err(format!("optional parameters must be trailing in {}", self.uri));
                    }
                    seen_optional |= optional;
                }
                Segment::Static(s) => {
                    if s.contains(['{', '}']) {
                        return Err(format!("malformed segment '{s}' in {}", self.uri));
                    }
                    if s.starts_with([':', '*']) {
                        return Err(format!(
                            "segment '{s}' in {} uses ':'/'*' syntax; declare parameters as {{name}}",
                            self.uri
                        ));
                    }
                    if seen_optional {
                        return Err(format!("optional parameters must be trailing in {}", self.uri));
                    }
                }
            }
        }
        for (param, constraint) in &self.wheres {
            if constraint.regex.is_none() {
                return Err(format!("invalid constraint '{}' for {param} in {}", constraint.pattern, self.uri));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(uri: &str) -> Route {
        Route::new(vec![Method::GET], uri, Handler::new(|| async { "ok" }))
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_normalize_uri() {
        assert_eq!(normalize_uri(""), "/");
        assert_eq!(normalize_uri("users/"), "/users");
        assert_eq!(normalize_uri("//api//users/{id}/"), "/api/users/{id}");
    }

    #[test]
    fn test_parameters() {
        let route = route("/posts/{post}/comments/{comment?}");
        assert_eq!(route.parameter_names(), vec!["post", "comment"]);
        assert_eq!(route.optional_parameters(), vec!["comment"]);
    }

    #[test]
    fn test_matching_with_constraints_and_defaults() {
        let mut route = route("/users/{id}/{tab?}");
        route.where_number("id").defaults("tab", "profile");

        assert_eq!(
            route.matches(&Method::GET, "/users/42/"),
            Some(params(&[("id", "42"), ("tab", "profile")]))
        );
        assert_eq!(
            route.matches(&Method::HEAD, "/users/42/settings"),
            Some(params(&[("id", "42"), ("tab", "settings")]))
        );
        assert_eq!(route.matches(&Method::GET, "/users/abc"), None);
        assert_eq!(route.matches(&Method::POST, "/users/42"), None);
        assert_eq!(route.matches(&Method::GET, "/users/42/settings/extra"), None);
        assert_eq!(route.matches(&Method::GET, "/users"), None);
    }

    #[test]
    fn test_constraint_is_anchored() {
        let mut route = route("/files/{name}");
        route.where_alpha("name");
        assert!(route.match_path("/files/report").is_some());
        assert!(route.match_path("/files/report1").is_none());

        route.where_in("name", ["a.b", "c"]);
        assert!(route.match_path("/files/a.b").is_some());
        assert!(route.match_path("/files/axb").is_none());
    }

    #[test]
    fn test_fluent_attributes() {
        let mut route = route("photos");
        route.set_name_prefix("admin.");
        route
            .name("photos.index")
            .middleware(["auth", "throttle"])
            .middleware(["auth"])
            .without_middleware("throttle")
            .prefix("admin")
            .blueprint(Blueprint::Api);

        assert_eq!(route.get_name(), Some("admin.photos.index"));
        assert_eq!(route.get_middleware(), ["auth".to_string()]);
        assert_eq!(route.uri(), "/admin/photos");
        assert_eq!(route.key(), "GET:/admin/photos");
        assert_eq!(route.action_name(), "closure");
        assert_eq!(route.get_blueprint(), Blueprint::Api);
    }

    #[test]
    fn test_axum_paths_expand_optional_segments() {
        assert_eq!(route("/posts/{id}").axum_paths(), vec!["/posts/{id}"]);
        assert_eq!(
            route("/posts/{id?}/{slug?}").axum_paths(),
            vec!["/posts/{id}/{slug}", "/posts/{id}", "/posts"]
        );
        assert_eq!(route("/{page?}").axum_paths(), vec!["/{page}", "/"]);
    }

    #[test]
    fn test_validate() {
        assert!(route("/a/{b?}/{c}").validate().is_err());
        assert!(route("/a/{b?}/c").validate().is_err());
        assert!(route("/a/pre{b}").validate().is_err());
        assert!(route("/users/:id").validate().is_err());
        assert!(route("/files/*path").validate().is_err());
        assert!(route("/time/12:30").validate().is_ok());
        let mut bad = route("/a/{b}");
        bad.where_("b", "(unclosed");
        assert!(bad.validate().is_err());
        assert!(route("/a/{b}/{c?}").validate().is_ok());
    }
}
