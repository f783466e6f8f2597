//! Runtime configuration repository with dot-notation access.
//!
//! The typed [`Config`](crate::config::Config) is the source of truth at startup. This
//! repository holds a JSON view of it that code can query by path (`session.cookie_name`)
//! and that service providers can extend with their own package defaults.

use serde_json::{Map, Value};
use std::sync::{PoisonError, RwLock};

use crate::config::Config;

#[derive(Debug, Default)]
pub struct ConfigRepository {
    items: RwLock<Value>,
}

impl ConfigRepository {
    pub fn new(items: Value) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(serde_json::to_value(config).unwrap_or_else(|_| Value::Object(Map::new())))
    }

    /// Look up a dot path. Segments match keys case-insensitively.
    pub fn get(&self, key: &str) -> Option<Value> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = &*items;
        for segment in key.split('.') {
            current = lookup(current, segment)?;
        }
        Some(current.clone())
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Deserialize the value at `key` into `T`.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// True when the key resolves to a non-null value
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Set a runtime override, creating intermediate objects as needed.
    pub fn set(&self, key: &str, value: Value) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let mut current = &mut *items;
        let segments: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        for segment in parents {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let Value::Object(map) = current else { return };
            let existing = map.keys().find(|k| k.eq_ignore_ascii_case(segment)).cloned();
            let name = existing.unwrap_or_else(|| segment.to_lowercase());
            current = map.entry(name).or_insert_with(|| Value::Object(Map::new()));
        }

        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        if let Value::Object(map) = current {
            let existing = map.keys().find(|k| k.eq_ignore_ascii_case(last)).cloned();
            map.insert(existing.unwrap_or_else(|| last.to_lowercase()), value);
        }
    }

    /// Merge package defaults under `key`. Values already present win.
    pub fn merge(&self, key: &str, defaults: Value) {
        let merged = match self.get(key) {
            Some(existing) => merge_preferring(existing, defaults),
            None => defaults,
        };
        self.set(key, merged);
    }

    pub fn all(&self) -> Value {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn lookup<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(segment)
            .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(segment)).map(|(_, v)| v)),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn merge_preferring(existing: Value, defaults: Value) -> Value {
    match (existing, defaults) {
        (Value::Object(mut current), Value::Object(defaults)) => {
            for (k, v) in defaults {
                let merged = match current.remove(&k) {
                    Some(existing) => merge_preferring(existing, v),
                    None => v,
                };
                current.insert(k, merged);
            }
            Value::Object(current)
        }
        (existing, _) => existing,
    }
}
