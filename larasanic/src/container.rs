//! Service container.
//!
//! A string-keyed registry of shared services. Bindings come in two flavours:
//!
//! - **Singletons** (`singleton`, `instance`): resolved at most once and shared afterwards.
//! - **Factories** (`bind`): the factory runs on every [`Container::make`].
//!
//! Factories receive the container so they can resolve their own dependencies. Values are
//! stored type-erased and downcast on resolution, so asking for the wrong type is reported
//! as [`ContainerError::TypeMismatch`] instead of panicking.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::{
    any::{Any, type_name},
    fmt::Write as _,
    sync::Arc,
};
use thiserror::Error;

pub type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> Result<Instance, ContainerError> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("No binding registered for '{0}'")]
    NotFound(String),

    #[error("Binding '{key}' does not hold a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Failed to resolve '{key}': {message}")]
    Resolution { key: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Singleton,
    Factory,
}

/// Summary of one binding, as shown by the `container` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub key: String,
    pub kind: BindingKind,
    pub instantiated: bool,
}

enum Binding {
    Singleton { factory: Factory, instance: OnceCell<Instance> },
    Factory(Factory),
}

#[derive(Default)]
pub struct Container {
    bindings: DashMap<String, Arc<Binding>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").field("bindings", &self.bindings.len()).finish()
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: Any + Send + Sync,
    F: Fn(&Container) -> Result<T, ContainerError> + Send + Sync + 'static,
{
    Arc::new(move |container| factory(container).map(|value| Arc::new(value) as Instance))
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lazily-built shared service.
    pub fn singleton<T, F>(&self, key: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        self.bindings.insert(
            key.into(),
            Arc::new(Binding::Singleton {
                factory: erase(factory),
                instance: OnceCell::new(),
            }),
        );
    }

    /// Register an already-built shared service.
    pub fn instance<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.instance_arc(key, Arc::new(value));
    }

    /// Register a shared service that is already behind an `Arc`.
    pub fn instance_arc<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        let key = key.into();
        let instance: Instance = value;
        let cell = OnceCell::with_value(instance.clone());
        let missing = key.clone();
        self.bindings.insert(
            key,
            Arc::new(Binding::Singleton {
                factory: Arc::new(move |_| Err(ContainerError::NotFound(missing.clone()))),
                instance: cell,
            }),
        );
    }

    /// Register a factory that builds a fresh value on every resolution.
    pub fn bind<T, F>(&self, key: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        self.bindings.insert(key.into(), Arc::new(Binding::Factory(erase(factory))));
    }

    /// Resolve a binding as `T`.
    pub fn make<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, ContainerError> {
        // Clone the binding out so the map shard is not locked while factories resolve
        // their own dependencies.
        let binding = self
            .bindings
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContainerError::NotFound(key.to_string()))?;

        let instance = match binding.as_ref() {
            Binding::Singleton { factory, instance } => instance.get_or_try_init(|| factory(self))?.clone(),
            Binding::Factory(factory) => factory(self)?,
        };

        instance.downcast::<T>().map_err(|_| ContainerError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// Resolve a binding, returning `None` when it is missing or of another type.
    pub fn try_make<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.make(key).ok()
    }

    pub fn has(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn forget(&self, key: &str) -> bool {
        self.bindings.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> Vec<BindingInfo> {
        let mut infos: Vec<BindingInfo> = self
            .bindings
            .iter()
            .map(|entry| match entry.value().as_ref() {
                Binding::Singleton { instance, .. } => BindingInfo {
                    key: entry.key().clone(),
                    kind: BindingKind::Singleton,
                    instantiated: instance.get().is_some(),
                },
                Binding::Factory(_) => BindingInfo {
                    key: entry.key().clone(),
                    kind: BindingKind::Factory,
                    instantiated: false,
                },
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Human readable listing of every binding, grouped by kind.
    pub fn list_bindings(&self) -> String {
        let bindings = self.bindings();
        if bindings.is_empty() {
            return "No bindings registered in container.".to_string();
        }

        let mut singletons = Vec::new();
        let mut factories = Vec::new();
        for info in &bindings {
            let mut line = String::new();
            match info.kind {
                BindingKind::Singleton => {
                    let status = if info.instantiated { "✓ instantiated" } else { "○ lazy" };
                    let _ = write!(line, "  {:<30} [{status}]", info.key);
                    singletons.push(line);
                }
                BindingKind::Factory => {
                    let _ = write!(line, "  {:<30} [new instance each call]", info.key);
                    factories.push(line);
                }
            }
        }

        let mut sections = Vec::new();
        if !singletons.is_empty() {
            sections.push(format!("Singletons:\n{}", singletons.join("\n")));
        }
        if !factories.is_empty() {
            sections.push(format!("Factories (bind):\n{}", factories.join("\n")));
        }
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Greeter {
        greeting: String,
    }

    #[test]
    fn test_singleton_built_once() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        container.singleton("greeter", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Greeter {
                greeting: "hello".to_string(),
            })
        });

        assert!(!container.bindings()[0].instantiated);
        let a = container.make::<Greeter>("greeter").unwrap();
        let b = container.make::<Greeter>("greeter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(container.bindings()[0].instantiated);
    }

    #[test]
    fn test_bind_builds_every_time() {
        let container = Container::new();
        container.bind("greeter", |_| {
            Ok(Greeter {
                greeting: "hi".to_string(),
            })
        });
        let a = container.make::<Greeter>("greeter").unwrap();
        let b = container.make::<Greeter>("greeter").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.greeting, "hi");
    }

    #[test]
    fn test_factories_resolve_dependencies() {
        let container = Container::new();
        container.instance("app.name", "Larasanic".to_string());
        container.singleton("greeter", |c| {
            let name = c.make::<String>("app.name")?;
            Ok(Greeter {
                greeting: format!("Welcome to {name}"),
            })
        });
        assert_eq!(container.make::<Greeter>("greeter").unwrap().greeting, "Welcome to Larasanic");
    }

    #[test]
    fn test_missing_and_mismatched() {
        let container = Container::new();
        assert_eq!(
            container.make::<String>("nope").unwrap_err(),
            ContainerError::NotFound("nope".to_string())
        );

        container.instance("port", 8000u16);
        assert!(matches!(
            container.make::<String>("port"),
            Err(ContainerError::TypeMismatch { .. })
        ));
        assert_eq!(*container.make::<u16>("port").unwrap(), 8000);
    }

    #[test]
    fn test_has_and_forget() {
        let container = Container::new();
        container.instance("x", 1u8);
        assert!(container.has("x"));
        assert!(container.forget("x"));
        assert!(!container.has("x"));
        assert!(!container.forget("x"));
    }

    #[test]
    fn test_list_bindings_format() {
        let container = Container::new();
        assert_eq!(container.list_bindings(), "No bindings registered in container.");

        container.instance("config", 1u8);
        container.singleton("cache", |_| Ok(2u8));
        container.bind("request", |_| Ok(3u8));

        let listing = container.list_bindings();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "Singletons:");
        assert!(lines[1].trim_start().starts_with("cache"));
        assert!(lines[1].ends_with("[○ lazy]"));
        assert!(lines[2].trim_start().starts_with("config"));
        assert!(lines[2].ends_with("[✓ instantiated]"));
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "Factories (bind):");
        assert!(lines[5].ends_with("[new instance each call]"));
    }
}
