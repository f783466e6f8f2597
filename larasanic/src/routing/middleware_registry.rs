//! Named route middleware, aliases and middleware groups.

use axum::routing::MethodRouter;
use std::{collections::HashMap, sync::Arc};

use crate::{
    AppState,
    errors::{Error, Result},
    middleware::{Middleware, MiddlewareArgs, apply_middleware},
};

/// Deepest alias/group nesting accepted before assuming a cycle.
const MAX_DEPTH: usize = 16;

#[derive(Default, Clone)]
pub struct RouteMiddlewareRegistry {
    middleware: HashMap<String, Arc<dyn Middleware>>,
    aliases: HashMap<String, String>,
    groups: HashMap<String, Vec<String>>,
}

impl std::fmt::Debug for RouteMiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMiddlewareRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Split `throttle:60,1` into the name and its arguments.
pub fn parse_middleware_name(spec: &str) -> (&str, MiddlewareArgs) {
    match spec.split_once(':') {
        Some((name, args)) => (
            name,
            args.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        None => (spec, Vec::new()),
    }
}

impl RouteMiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.middleware.insert(name.into(), middleware);
    }

    /// Make `name` resolve to `target`, which may itself be an alias or group.
    pub fn alias(&mut self, name: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(name.into(), target.into());
    }

    pub fn group<I, S>(&mut self, name: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.insert(name.into(), members.into_iter().map(Into::into).collect());
    }

    pub fn has(&self, name: &str) -> bool {
        let (name, _) = parse_middleware_name(name);
        self.middleware.contains_key(name) || self.aliases.contains_key(name) || self.groups.contains_key(name)
    }

    /// Every registered name, alias and group, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .middleware
            .keys()
            .chain(self.aliases.keys())
            .chain(self.groups.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Expand names into middleware instances, in the order given.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn Middleware>>> {
        let mut resolved = Vec::new();
        for name in names {
            self.resolve_into(name.as_ref(), &mut resolved, 0)?;
        }
        Ok(resolved)
    }

    fn resolve_into(&self, spec: &str, out: &mut Vec<Arc<dyn Middleware>>, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::Internal {
                operation: format!("resolve middleware '{spec}': alias or group nesting too deep"),
            });
        }

        let (name, args) = parse_middleware_name(spec);
        if let Some(members) = self.groups.get(name) {
            for member in members {
                self.resolve_into(member, out, depth + 1)?;
            }
            return Ok(());
        }
        if let Some(target) = self.aliases.get(name) {
            let target = if args.is_empty() {
                target.clone()
            } else {
                format!("{target}:{}", args.join(","))
            };
            return self.resolve_into(&target, out, depth + 1);
        }

        let middleware = self.middleware.get(name).ok_or_else(|| Error::Internal {
            operation: format!("resolve middleware: unknown middleware '{name}'"),
        })?;
        let middleware = if args.is_empty() {
            middleware.clone()
        } else {
            middleware.with_args(&args)?.unwrap_or_else(|| middleware.clone())
        };
        out.push(middleware);
        Ok(())
    }

    /// Wrap a handler so the first listed middleware runs first.
    pub fn wrap_handler<S: AsRef<str>>(
        &self,
        method_router: MethodRouter<AppState>,
        names: &[S],
    ) -> Result<MethodRouter<AppState>> {
        Ok(apply_middleware(method_router, &self.resolve(names)?))
    }
}
