//! Laravel-style routing on top of axum.
//!
//! Routes are declared on a [`Router`] with verbs, groups, resource controllers and
//! named middleware, then compiled into an `axum::Router`. Every compiled route carries a
//! guard that enforces `where` constraints, fills in parameter defaults and records the
//! [`MatchedRoute`] in the request extensions.

pub mod collection;
pub mod middleware_registry;
pub mod registrar;
pub mod route;
pub mod router;
pub mod url;

pub use collection::{MatchError, RouteCollection};
pub use middleware_registry::RouteMiddlewareRegistry;
pub use registrar::{ResourceHandlers, ResourceOptions};
pub use route::{Handler, Route};
pub use router::{GroupAttributes, Router};
pub use url::UrlGenerator;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// The route group a route belongs to. Decides which global middleware applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blueprint {
    #[default]
    Web,
    Api,
    Ws,
}

impl Blueprint {
    pub const ALL: [Blueprint; 3] = [Blueprint::Web, Blueprint::Api, Blueprint::Ws];

    pub fn as_str(self) -> &'static str {
        match self {
            Blueprint::Web => "web",
            Blueprint::Api => "api",
            Blueprint::Ws => "ws",
        }
    }
}

impl fmt::Display for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Blueprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "web" => Ok(Blueprint::Web),
            "api" => Ok(Blueprint::Api),
            "ws" | "websocket" => Ok(Blueprint::Ws),
            other => Err(format!("unknown blueprint '{other}'")),
        }
    }
}

/// Identity of the route that matched the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRoute {
    pub name: Option<String>,
    pub uri: String,
    /// `METHOD:uri` of the matched route
    pub key: String,
    pub blueprint: Blueprint,
    /// Path parameters, with defaults filled in for absent optional ones
    pub params: BTreeMap<String, String>,
}

impl MatchedRoute {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for MatchedRoute {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<MatchedRoute>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Route information unavailable"))
    }
}

/// Blueprint of the request's route; unmatched requests count as `web`.
pub fn blueprint_of(extensions: &axum::http::Extensions) -> Blueprint {
    extensions.get::<MatchedRoute>().map(|r| r.blueprint).unwrap_or_default()
}
