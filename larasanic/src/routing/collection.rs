//! Indexed set of routes.

use axum::http::Method;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::route::Route;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    NotFound,
    /// The path matched, but only for these methods
    MethodNotAllowed { allowed: Vec<Method> },
}

/// Routes in insertion order, indexed by name, method and `METHOD:uri`.
#[derive(Debug, Clone, Default)]
pub struct RouteCollection {
    routes: Vec<Route>,
    by_key: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_method: HashMap<Method, Vec<usize>>,
}

impl RouteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route and return its index. A route whose `METHOD:uri` is already present
    /// replaces the earlier one in place.
    pub fn add(&mut self, route: Route) -> usize {
        let existing = route.keys().iter().find_map(|key| self.by_key.get(key).copied());
        let index = match existing {
            Some(index) => {
                self.routes[index] = route;
                index
            }
            None => {
                self.routes.push(route);
                self.routes.len() - 1
            }
        };
        self.refresh_lookups();
        index
    }

    /// Rebuild every index, for routes whose uri or name changed after they were added.
    pub fn refresh_lookups(&mut self) {
        self.rebuild_keys();
        self.refresh_name_lookups();
    }

    fn rebuild_keys(&mut self) {
        self.by_key.clear();
        self.by_method.clear();
        for (index, route) in self.routes.iter().enumerate() {
            for key in route.keys() {
                self.by_key.insert(key, index);
            }
            for method in route.methods() {
                self.by_method.entry(method.clone()).or_default().push(index);
            }
        }
    }

    /// Rebuild the name index after routes were renamed. When two routes share a name
    /// the later one wins.
    pub fn refresh_name_lookups(&mut self) {
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (index, route) in self.routes.iter().enumerate() {
            let Some(name) = route.get_name() else {
                continue;
            };
            if let Some(previous) = by_name.insert(name.to_string(), index)
                && self.by_name.get(name) != Some(&index)
            {
                warn!(
                    name,
                    previous = %self.routes[previous].uri(),
                    uri = %route.uri(),
                    "Route name registered twice, the last registration wins"
                );
            }
        }
        self.by_name = by_name;
    }

    pub fn get(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Route> {
        self.routes.get_mut(index)
    }

    /// The route at an index returned by [`RouteCollection::add`].
    pub(crate) fn route_mut(&mut self, index: usize) -> &mut Route {
        &mut self.routes[index]
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Route> {
        self.by_name.get(name).map(|&i| &self.routes[i])
    }

    pub fn get_by_key(&self, key: &str) -> Option<&Route> {
        self.by_key.get(key).map(|&i| &self.routes[i])
    }

    pub fn has_named_route(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get_by_method(&self, method: &Method) -> Vec<&Route> {
        self.by_method
            .get(method)
            .map(|indices| indices.iter().map(|&i| &self.routes[i]).collect())
            .unwrap_or_default()
    }

    pub fn get_routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Name → uri for every named route.
    pub fn named_uris(&self) -> HashMap<String, String> {
        self.by_name
            .iter()
            .map(|(name, &i)| (name.clone(), self.routes[i].uri().to_string()))
            .collect()
    }

    /// The first route matching `method` and `path`.
    pub fn match_request(&self, method: &Method, path: &str) -> Result<(&Route, BTreeMap<String, String>), MatchError> {
        let mut allowed = Vec::new();
        for route in &self.routes {
            let Some(params) = route.match_path(path) else {
                continue;
            };
            if route.allows_method(method) {
                return Ok((route, params));
            }
            for m in route.methods() {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }

        if allowed.is_empty() {
            Err(MatchError::NotFound)
        } else {
            Err(MatchError::MethodNotAllowed { allowed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::route::Handler;

    fn route(methods: &[Method], uri: &str) -> Route {
        Route::new(methods.to_vec(), uri, Handler::new(|| async { "ok" }))
    }

    fn named(methods: &[Method], uri: &str, name: &str) -> Route {
        let mut route = route(methods, uri);
        route.name(name);
        route
    }

    #[test]
    fn test_add_and_lookup() {
        let mut routes = RouteCollection::new();
        routes.add(named(&[Method::GET, Method::HEAD], "/users", "users.index"));
        routes.add(named(&[Method::POST], "/users", "users.store"));

        assert_eq!(routes.count(), 2);
        assert!(routes.has_named_route("users.store"));
        assert_eq!(routes.get_by_name("users.index").unwrap().uri(), "/users");
        assert_eq!(routes.get_by_method(&Method::POST).len(), 1);
        assert!(routes.get_by_key("HEAD:/users").is_some());
    }

    #[test]
    fn test_same_key_replaces_in_place() {
        let mut routes = RouteCollection::new();
        routes.add(named(&[Method::GET], "/a", "first"));
        routes.add(route(&[Method::GET], "/b"));
        let index = routes.add(named(&[Method::GET], "/a", "second"));

        assert_eq!(index, 0);
        assert_eq!(routes.count(), 2);
        assert!(!routes.has_named_route("first"));
        assert_eq!(routes.get_routes()[0].get_name(), Some("second"));
    }

    #[test_log::test]
    fn test_duplicate_name_last_wins() {
        let mut routes = RouteCollection::new();
        routes.add(named(&[Method::GET], "/a", "home"));
        routes.add(named(&[Method::GET], "/b", "home"));
        assert_eq!(routes.get_by_name("home").unwrap().uri(), "/b");
    }

    #[test]
    fn test_refresh_after_rename() {
        let mut routes = RouteCollection::new();
        let index = routes.add(route(&[Method::GET], "/a"));
        routes.get_mut(index).unwrap().name("alpha");
        assert!(!routes.has_named_route("alpha"));

        routes.refresh_name_lookups();
        assert_eq!(routes.get_by_name("alpha").unwrap().uri(), "/a");
    }

    #[test]
    fn test_match_request() {
        let mut routes = RouteCollection::new();
        routes.add(route(&[Method::GET], "/users/{id}"));
        routes.add(route(&[Method::DELETE], "/users/{id}"));

        let (route, params) = routes.match_request(&Method::GET, "/users/5").unwrap();
        assert_eq!(route.uri(), "/users/{id}");
        assert_eq!(params["id"], "5");

        assert_eq!(
            routes.match_request(&Method::PUT, "/users/5").unwrap_err(),
            MatchError::MethodNotAllowed {
                allowed: vec![Method::GET, Method::DELETE]
            }
        );
        assert_eq!(routes.match_request(&Method::GET, "/nope").unwrap_err(), MatchError::NotFound);
    }
}
