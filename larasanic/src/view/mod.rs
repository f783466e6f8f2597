//! Server-rendered HTML views.
//!
//! Templates are Jinja-syntax files under `view.directory`, addressed with dotted names:
//! `auth.login` is `auth/login.html`. Rendered output is cached per name and context.

use arc_swap::ArcSwap;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use minijinja::{Environment, ErrorKind};
use moka::future::Cache;
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use crate::{
    config::ViewConfig,
    errors::{Error, Result},
    routing::UrlGenerator,
};

/// Rendered HTML with a status code.
#[derive(Debug, Clone)]
pub struct View {
    html: String,
    status: StatusCode,
}

impl View {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            status: StatusCode::OK,
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

impl IntoResponse for View {
    fn into_response(self) -> Response {
        (self.status, Html(self.html)).into_response()
    }
}

pub struct ViewEngine {
    directory: PathBuf,
    extension: String,
    error_prefix: String,
    env: ArcSwap<Environment<'static>>,
    urls: Option<Arc<UrlGenerator>>,
    globals: ArcSwap<Map<String, Value>>,
    cache: Option<Cache<u64, String>>,
}

impl std::fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEngine")
            .field("directory", &self.directory)
            .field("extension", &self.extension)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

fn template_error(message: impl Into<String>) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, message.into())
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// URLs are attribute-escaped once here so autoescaping leaves slashes alone.
fn safe_url(url: &str) -> minijinja::Value {
    minijinja::Value::from_safe_string(escape_attribute(url))
}

/// Hidden form input carrying a CSRF token.
pub fn csrf_field(token: &str) -> String {
    format!(r#"<input type="hidden" name="_csrf_token" value="{}">"#, escape_attribute(token))
}

fn build_environment(directory: &Path, urls: Option<&Arc<UrlGenerator>>) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_loader(minijinja::path_loader(directory));

    env.add_function("csrf_field", |token: &str| minijinja::Value::from_safe_string(csrf_field(token)));

    if let Some(urls) = urls {
        let to = urls.clone();
        env.add_function("url", move |path: &str| safe_url(&to.to(path, &[], None)));

        let asset = urls.clone();
        env.add_function("asset", move |path: &str| safe_url(&asset.asset(path)));

        let routes = urls.clone();
        env.add_function(
            "route",
            move |name: &str, params: Option<minijinja::Value>| -> std::result::Result<minijinja::Value, minijinja::Error> {
                let mut values = BTreeMap::new();
                if let Some(params) = params {
                    for key in params.try_iter()? {
                        let value = params.get_item(&key)?;
                        values.insert(key.to_string(), value.to_string());
                    }
                }
                routes
                    .route(name, &values, false)
                    .map(|url| safe_url(&url))
                    .map_err(|e| template_error(format!("route('{name}'): {e}")))
            },
        );
    }
    env
}

impl ViewEngine {
    /// Engine for `config.directory`, resolved against `base` when relative.
    pub fn new(config: &ViewConfig, base: &Path) -> Self {
        let directory = if config.directory.is_absolute() {
            config.directory.clone()
        } else {
            base.join(&config.directory)
        };
        let cache = config.cache_enabled.then(|| {
            Cache::builder()
                .max_capacity(config.cache_max_size)
                .time_to_live(config.cache_ttl)
                .build()
        });

        Self {
            env: ArcSwap::from_pointee(build_environment(&directory, None)),
            directory,
            extension: config.extension.clone(),
            error_prefix: config.error_template_prefix.clone(),
            urls: None,
            globals: ArcSwap::from_pointee(Map::new()),
            cache,
        }
    }

    /// Enable the `url`, `route` and `asset` template functions.
    pub fn with_urls(mut self, urls: Arc<UrlGenerator>) -> Self {
        self.env.store(Arc::new(build_environment(&self.directory, Some(&urls))));
        self.urls = Some(urls);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Template path for a dotted view name.
    pub fn template_path(&self, name: &str) -> String {
        if name.ends_with(&self.extension) {
            return name.to_string();
        }
        format!("{}{}", name.replace('.', "/"), self.extension)
    }

    pub fn view_exists(&self, name: &str) -> bool {
        self.directory.join(self.template_path(name)).is_file()
    }

    /// View name used for error pages with this status.
    pub fn error_view(&self, status: StatusCode) -> String {
        format!("{}.{}", self.error_prefix, status.as_u16())
    }

    pub fn add_global(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.globals.rcu(|globals| {
            let mut globals = Map::clone(globals);
            globals.insert(key.clone(), value.clone());
            globals
        });
    }

    pub fn add_globals(&self, values: Map<String, Value>) {
        self.globals.rcu(|globals| {
            let mut globals = Map::clone(globals);
            globals.extend(values.clone());
            globals
        });
    }

    pub fn globals(&self) -> Map<String, Value> {
        Map::clone(&self.globals.load())
    }

    fn merged_context(&self, context: Value) -> Value {
        let mut merged = self.globals();
        match context {
            Value::Object(map) => merged.extend(map),
            Value::Null => {}
            other => {
                merged.insert("data".to_string(), other);
            }
        }
        Value::Object(merged)
    }

    fn cache_key(name: &str, context: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        context.to_string().hash(&mut hasher);
        hasher.finish()
    }

    /// Render a view. The context wins over globals with the same key.
    #[instrument(skip(self, context))]
    pub async fn render(&self, name: &str, context: Value) -> Result<String> {
        let context = self.merged_context(context);
        let key = Self::cache_key(name, &context);
        if let Some(cache) = &self.cache
            && let Some(html) = cache.get(&key).await
        {
            debug!("View cache hit");
            return Ok(html);
        }

        let env = self.env.load_full();
        let path = self.template_path(name);
        let html = tokio::task::spawn_blocking(move || env.get_template(&path)?.render(&context))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("join view render task: {e}"),
            })??;

        if let Some(cache) = &self.cache {
            cache.insert(key, html.clone()).await;
        }
        Ok(html)
    }

    /// Render a view into a response.
    pub async fn make(&self, name: &str, context: Value) -> Result<View> {
        Ok(View::new(self.render(name, context).await?))
    }

    /// Drop rendered output and reload templates from disk.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
        self.env
            .store(Arc::new(build_environment(&self.directory, self.urls.as_ref())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Handler, Route, RouteCollection};
    use axum::http::Method;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, path: &str, contents: &str) {
        let path = dir.path().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn engine(dir: &TempDir, cache_enabled: bool) -> ViewEngine {
        let config = ViewConfig {
            directory: PathBuf::from("views"),
            cache_enabled,
            ..Default::default()
        };
        ViewEngine::new(&config, dir.path())
    }

    #[tokio::test]
    async fn test_render_dotted_name_with_globals() {
        let dir = TempDir::new().unwrap();
        write(&dir, "views/auth/login.html", "{{ app_name }}: {{ title }}");
        let views = engine(&dir, false);
        views.add_global("app_name", json!("Larasanic"));
        views.add_globals(json!({ "title": "global" }).as_object().cloned().unwrap());

        assert!(views.view_exists("auth.login"));
        assert!(!views.view_exists("auth.register"));
        assert_eq!(views.render("auth.login", json!({})).await.unwrap(), "Larasanic: global");
        assert_eq!(
            views.render("auth.login", json!({ "title": "Sign in" })).await.unwrap(),
            "Larasanic: Sign in"
        );
    }

    #[tokio::test]
    async fn test_missing_template_is_an_error() {
        let dir = TempDir::new().unwrap();
        let views = engine(&dir, false);
        assert!(matches!(views.render("nope", json!({})).await, Err(Error::Template(_))));
    }

    #[tokio::test]
    async fn test_render_cache_and_clear() {
        let dir = TempDir::new().unwrap();
        write(&dir, "views/home.html", "v1 {{ n }}");
        let views = engine(&dir, true);
        assert_eq!(views.render("home", json!({ "n": 1 })).await.unwrap(), "v1 1");

        write(&dir, "views/home.html", "v2 {{ n }}");
        assert_eq!(views.render("home", json!({ "n": 1 })).await.unwrap(), "v1 1");

        views.clear_cache();
        assert_eq!(views.render("home", json!({ "n": 1 })).await.unwrap(), "v2 1");
    }

    #[tokio::test]
    async fn test_template_functions() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "views/links.html",
            "{{ url('/about') }} {{ route('users.show', {'id': 5}) }} {{ asset('app.css') }} {{ csrf_field(token) }}",
        );

        let mut routes = RouteCollection::new();
        let mut route = Route::new(vec![Method::GET], "/users/{id}", Handler::new(|| async { "" }));
        route.name("users.show");
        routes.add(route);
        let urls = Arc::new(UrlGenerator::new("http://localhost:8000", None));
        urls.set_routes(&routes);

        let views = engine(&dir, false).with_urls(urls);
        let html = views.render("links", json!({ "token": "a\"b" })).await.unwrap();
        assert_eq!(
            html,
            r#"http://localhost:8000/about /users/5 http://localhost:8000/app.css <input type="hidden" name="_csrf_token" value="a&quot;b">"#
        );
    }

    #[test]
    fn test_error_view_name() {
        let dir = TempDir::new().unwrap();
        let views = engine(&dir, false);
        assert_eq!(views.error_view(StatusCode::NOT_FOUND), "errors.404");
        assert_eq!(views.template_path("errors.404"), "errors/404.html");
    }
}
