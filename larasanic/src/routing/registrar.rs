//! Resource controller routes.
//!
//! | action  | method    | uri                    |
//! |---------|-----------|------------------------|
//! | index   | GET       | `/{name}`              |
//! | create  | GET       | `/{name}/create`       |
//! | store   | POST      | `/{name}`              |
//! | show    | GET       | `/{name}/{param}`      |
//! | edit    | GET       | `/{name}/{param}/edit` |
//! | update  | PUT/PATCH | `/{name}/{param}`      |
//! | destroy | DELETE    | `/{name}/{param}`      |

use axum::http::Method;
use std::collections::HashMap;

use super::{
    route::{Handler, Route},
    router::Router,
};
use crate::AppState;

pub const RESOURCE_ACTIONS: [&str; 7] = ["index", "create", "store", "show", "edit", "update", "destroy"];
pub const API_RESOURCE_ACTIONS: [&str; 5] = ["index", "store", "show", "update", "destroy"];

/// Handlers keyed by resource action.
#[derive(Debug, Clone, Default)]
pub struct ResourceHandlers {
    handlers: HashMap<&'static str, Handler>,
}

macro_rules! resource_action {
    ($($action:ident),*) => {
        $(
            pub fn $action<H, T>(self, handler: H) -> Self
            where
                H: axum::handler::Handler<T, AppState>,
                T: 'static,
            {
                self.action(stringify!($action), Handler::new(handler))
            }
        )*
    };
}

impl ResourceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    resource_action!(index, create, store, show, edit, update, destroy);

    /// Set the handler for an action by name. Unknown actions are ignored.
    pub fn action(mut self, action: &str, handler: Handler) -> Self {
        match RESOURCE_ACTIONS.iter().find(|a| **a == action) {
            Some(&known) => {
                self.handlers.insert(known, handler);
            }
            None => tracing::warn!(action, "Ignoring unknown resource action"),
        }
        self
    }

    pub fn has(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    fn take(&mut self, action: &str) -> Option<Handler> {
        self.handlers.remove(action)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub only: Option<Vec<String>>,
    pub except: Vec<String>,
    pub middleware: Vec<String>,
    /// Route name per action, replacing `{name}.{action}`
    pub names: HashMap<String, String>,
    /// Parameter name, replacing the last segment of the resource name
    pub parameter: Option<String>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    pub fn except<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(mut self, action: &str, name: &str) -> Self {
        self.names.insert(action.to_string(), name.to_string());
        self
    }

    pub fn parameter(mut self, parameter: &str) -> Self {
        self.parameter = Some(parameter.to_string());
        self
    }

    fn includes(&self, action: &str) -> bool {
        let listed = self
            .only
            .as_ref()
            .is_none_or(|only| only.iter().any(|a| a == action));
        listed && !self.except.iter().any(|a| a == action)
    }
}

pub struct ResourceRegistrar;

impl ResourceRegistrar {
    pub fn register(router: &mut Router, name: &str, handlers: ResourceHandlers, options: ResourceOptions) {
        Self::register_actions(router, name, handlers, options, &RESOURCE_ACTIONS);
    }

    /// Like [`ResourceRegistrar::register`] without the HTML form actions.
    pub fn api_register(router: &mut Router, name: &str, handlers: ResourceHandlers, options: ResourceOptions) {
        Self::register_actions(router, name, handlers, options, &API_RESOURCE_ACTIONS);
    }

    fn register_actions(
        router: &mut Router,
        name: &str,
        mut handlers: ResourceHandlers,
        options: ResourceOptions,
        actions: &[&str],
    ) {
        let name = name.trim_matches('/');
        let base = format!("/{name}");
        let parameter = options
            .parameter
            .clone()
            .unwrap_or_else(|| name.rsplit('/').next().unwrap_or(name).to_string());
        let member = format!("{base}/{{{parameter}}}");
        let route_base = name.replace('/', ".");

        for &action in actions {
            if !options.includes(action) {
                continue;
            }
            let Some(handler) = handlers.take(action) else {
                continue;
            };

            let (methods, uri) = match action {
                "index" => (vec![Method::GET, Method::HEAD], base.clone()),
                "create" => (vec![Method::GET, Method::HEAD], format!("{base}/create")),
                "store" => (vec![Method::POST], base.clone()),
                "show" => (vec![Method::GET, Method::HEAD], member.clone()),
                "edit" => (vec![Method::GET, Method::HEAD], format!("{member}/edit")),
                "update" => (vec![Method::PUT, Method::PATCH], member.clone()),
                "destroy" => (vec![Method::DELETE], member.clone()),
                _ => continue,
            };

            let route_name = options
                .names
                .get(action)
                .cloned()
                .unwrap_or_else(|| format!("{route_base}.{action}"));
            let route: &mut Route = router.add_route(methods, &uri, handler);
            route.name(&route_name).middleware(options.middleware.iter().cloned());
        }
    }
}
