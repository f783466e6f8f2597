use serde_json::Value;
use std::{sync::Arc, time::Duration};

use super::{SessionData, SessionStore, generate_session_id, is_valid_id, now_ts};
use crate::errors::Result;

const FLASH_NEW: &str = "_flash.new";
const FLASH_OLD: &str = "_flash.old";
const TOKEN: &str = "_token";
const PREVIOUS_URL: &str = "_previous.url";
const LAST_ACTIVITY: &str = "_last_activity";

/// Session state for a single request.
///
/// Keys starting with `_` are framework bookkeeping and hidden from [`SessionManager::all`].
pub struct SessionManager {
    id: String,
    store: Arc<dyn SessionStore>,
    lifetime: Duration,
    attributes: SessionData,
    started: bool,
    dirty: bool,
    persisted: bool,
    destroy_on_save: Option<String>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store.name())
            .field("started", &self.started)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// A manager for `id`, or a fresh id when it is absent or malformed.
    pub fn new(store: Arc<dyn SessionStore>, id: Option<String>, lifetime: Duration) -> Self {
        let id = id.filter(|id| is_valid_id(id)).unwrap_or_else(generate_session_id);
        Self {
            id,
            store,
            lifetime,
            attributes: SessionData::new(),
            started: false,
            dirty: false,
            persisted: false,
            destroy_on_save: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: &str) {
        self.id = if is_valid_id(id) {
            id.to_string()
        } else {
            generate_session_id()
        };
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Load the session from the store and age flash data. Idempotent.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let data = self.store.read(&self.id).await?;
        self.load(data);
        Ok(())
    }

    /// Start from data that was already decoded, as for cookie-backed sessions.
    pub fn start_with(&mut self, data: Option<SessionData>) {
        if !self.started {
            self.load(data);
        }
    }

    fn load(&mut self, data: Option<SessionData>) {
        if let Some(data) = data {
            self.attributes = data;
            self.persisted = true;
        }
        self.age_flash_data();
        self.started = true;
    }

    fn age_flash_data(&mut self) {
        let old = self.flash_keys(FLASH_OLD);
        let new = self.flash_keys(FLASH_NEW);
        for key in old.iter().filter(|k| !new.contains(k)) {
            self.attributes.remove(key);
        }
        if !old.is_empty() || !new.is_empty() {
            self.dirty = true;
        }
        self.attributes.insert(FLASH_OLD.to_string(), Value::from(new));
        self.attributes.insert(FLASH_NEW.to_string(), Value::Array(Vec::new()));
    }

    fn flash_keys(&self, list: &str) -> Vec<String> {
        self.attributes
            .get(list)
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(|k| k.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    fn set_flash_keys(&mut self, list: &str, keys: Vec<String>) {
        self.attributes.insert(list.to_string(), Value::from(keys));
        self.dirty = true;
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Everything except framework bookkeeping keys.
    pub fn all(&self) -> SessionData {
        self.attributes
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Raw data including bookkeeping keys, as written to the store.
    pub fn raw(&self) -> &SessionData {
        &self.attributes
    }

    /// Present and not null.
    pub fn has(&self, key: &str) -> bool {
        self.attributes.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn missing(&self, key: &str) -> bool {
        !self.exists(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn put_many(&mut self, values: SessionData) {
        self.attributes.extend(values);
        self.dirty = true;
    }

    /// Append to the array at `key`, creating it when absent.
    pub fn push(&mut self, key: &str, value: impl Into<Value>) {
        let mut items = match self.attributes.remove(key) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        items.push(value.into());
        self.put(key, Value::Array(items));
    }

    pub fn increment(&mut self, key: &str, by: i64) -> i64 {
        let current = match self.attributes.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        let value = current.saturating_add(by);
        self.put(key, value);
        value
    }

    pub fn decrement(&mut self, key: &str, by: i64) -> i64 {
        self.increment(key, by.saturating_neg())
    }

    pub fn forget<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.attributes.remove(key.as_ref());
        }
        self.dirty = true;
    }

    pub fn pull(&mut self, key: &str) -> Option<Value> {
        let value = self.attributes.remove(key);
        self.dirty = true;
        value
    }

    pub fn flush(&mut self) {
        self.attributes.clear();
        self.dirty = true;
    }

    /// Store a value for this request and the next one.
    pub fn flash(&mut self, key: &str, value: impl Into<Value>) {
        self.put(key, value);
        let mut new = self.flash_keys(FLASH_NEW);
        if !new.iter().any(|k| k == key) {
            new.push(key.to_string());
        }
        self.set_flash_keys(FLASH_NEW, new);
    }

    /// Store a value for this request only.
    pub fn now(&mut self, key: &str, value: impl Into<Value>) {
        self.put(key, value);
        let mut old = self.flash_keys(FLASH_OLD);
        if !old.iter().any(|k| k == key) {
            old.push(key.to_string());
        }
        self.set_flash_keys(FLASH_OLD, old);
    }

    /// Keep every flashed value for another request.
    pub fn reflash(&mut self) {
        let mut new = self.flash_keys(FLASH_NEW);
        for key in self.flash_keys(FLASH_OLD) {
            if !new.contains(&key) {
                new.push(key);
            }
        }
        self.set_flash_keys(FLASH_NEW, new);
    }

    /// Keep the given flashed values for another request.
    pub fn keep<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let old = self.flash_keys(FLASH_OLD);
        let mut new = self.flash_keys(FLASH_NEW);
        for key in keys {
            let key = key.as_ref();
            if old.iter().any(|k| k == key) && !new.iter().any(|k| k == key) {
                new.push(key.to_string());
            }
        }
        self.set_flash_keys(FLASH_NEW, new);
    }

    /// The session CSRF token, generated on first use.
    pub fn token(&mut self) -> String {
        if let Some(token) = self.attributes.get(TOKEN).and_then(Value::as_str) {
            return token.to_string();
        }
        self.regenerate_token()
    }

    pub fn regenerate_token(&mut self) -> String {
        let token = crate::support::str::random(40);
        self.put(TOKEN, token.clone());
        token
    }

    /// Move the session to a new id. The old one is removed on save when `destroy_old`.
    pub fn regenerate(&mut self, destroy_old: bool) -> &str {
        let old = std::mem::replace(&mut self.id, generate_session_id());
        if destroy_old && self.persisted {
            self.destroy_on_save = Some(old);
        }
        self.dirty = true;
        &self.id
    }

    /// Drop all data and move to a new id.
    pub fn invalidate(&mut self) -> &str {
        self.flush();
        self.regenerate(true)
    }

    pub fn previous_url(&self) -> Option<String> {
        self.attributes
            .get(PREVIOUS_URL)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_previous_url(&mut self, url: impl Into<String>) {
        self.put(PREVIOUS_URL, url.into());
    }

    /// Whether [`Self::save`] would write.
    pub fn needs_save(&self) -> bool {
        self.dirty || !self.persisted || self.destroy_on_save.is_some()
    }

    /// Persist changed or new sessions.
    pub async fn save(&mut self) -> Result<()> {
        if !self.needs_save() {
            return Ok(());
        }
        self.attributes.insert(LAST_ACTIVITY.to_string(), Value::from(now_ts()));
        self.store.write(&self.id, &self.attributes, self.lifetime).await?;
        if let Some(old) = self.destroy_on_save.take() {
            self.store.destroy(&old).await?;
        }
        self.dirty = false;
        self.persisted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ArraySessionStore;
    use serde_json::json;

    const LIFETIME: Duration = Duration::from_secs(60);

    async fn started(store: &Arc<dyn SessionStore>, id: Option<String>) -> SessionManager {
        let mut session = SessionManager::new(store.clone(), id, LIFETIME);
        session.start().await.unwrap();
        session
    }

    fn store() -> Arc<dyn SessionStore> {
        Arc::new(ArraySessionStore::new())
    }

    #[tokio::test]
    async fn test_put_get_and_persist() {
        let store = store();
        let mut session = started(&store, None).await;
        session.put("user", "ada");
        session.push("roles", "admin");
        session.push("roles", "editor");
        assert_eq!(session.increment("visits", 2), 2);
        assert_eq!(session.decrement("visits", 1), 1);
        session.save().await.unwrap();

        let reloaded = started(&store, Some(session.id().to_string())).await;
        assert_eq!(reloaded.get("user"), Some(json!("ada")));
        assert_eq!(reloaded.get("roles"), Some(json!(["admin", "editor"])));
        assert_eq!(reloaded.get_or("missing", json!(0)), json!(0));
        assert!(reloaded.raw().contains_key(LAST_ACTIVITY));
        assert!(!reloaded.all().contains_key(LAST_ACTIVITY));
    }

    #[tokio::test]
    async fn test_has_exists_missing_pull() {
        let store = store();
        let mut session = started(&store, None).await;
        session.put("nothing", Value::Null);
        assert!(!session.has("nothing"));
        assert!(session.exists("nothing"));
        assert!(session.missing("other"));

        session.put("code", 42);
        assert_eq!(session.pull("code"), Some(json!(42)));
        assert!(session.missing("code"));

        session.put_many(json!({"a": 1, "b": 2}).as_object().cloned().unwrap());
        session.forget(["a", "b", "nothing"]);
        assert!(session.all().is_empty());
    }

    #[tokio::test]
    async fn test_flash_lives_for_one_more_request() {
        let store = store();
        let mut first = started(&store, None).await;
        first.flash("status", "saved");
        first.now("transient", "here");
        assert_eq!(first.get("status"), Some(json!("saved")));
        first.save().await.unwrap();
        let id = first.id().to_string();

        let mut second = started(&store, Some(id.clone())).await;
        assert_eq!(second.get("status"), Some(json!("saved")));
        assert!(second.missing("transient"));
        second.save().await.unwrap();

        let third = started(&store, Some(id)).await;
        assert!(third.missing("status"));
    }

    #[tokio::test]
    async fn test_reflash_and_keep() {
        let store = store();
        let mut first = started(&store, None).await;
        first.flash("a", 1);
        first.flash("b", 2);
        first.save().await.unwrap();
        let id = first.id().to_string();

        let mut second = started(&store, Some(id.clone())).await;
        second.keep(["a"]);
        second.save().await.unwrap();

        let mut third = started(&store, Some(id.clone())).await;
        assert!(third.exists("a"));
        assert!(third.missing("b"));
        third.reflash();
        third.save().await.unwrap();

        assert!(started(&store, Some(id)).await.exists("a"));
    }

    #[tokio::test]
    async fn test_regenerate_destroys_old_session() {
        let store = store();
        let mut session = started(&store, None).await;
        session.put("user", 1);
        session.save().await.unwrap();
        let old = session.id().to_string();

        let token = session.token();
        assert_eq!(session.token(), token);
        assert_ne!(session.regenerate_token(), token);

        let new = session.regenerate(true).to_string();
        assert_ne!(new, old);
        session.save().await.unwrap();
        assert!(!store.exists(&old).await.unwrap());
        assert!(store.exists(&new).await.unwrap());

        session.invalidate();
        session.save().await.unwrap();
        assert!(!store.exists(&new).await.unwrap());
        assert!(session.missing("user"));
    }

    #[tokio::test]
    async fn test_clean_session_is_not_rewritten() {
        let store = store();
        let mut session = started(&store, None).await;
        assert!(session.needs_save());
        session.save().await.unwrap();

        let mut again = started(&store, Some(session.id().to_string())).await;
        assert!(!again.needs_save());
        again.set_previous_url("/dashboard");
        assert!(again.needs_save());
        assert_eq!(again.previous_url().as_deref(), Some("/dashboard"));
    }

    #[test]
    fn test_invalid_id_replaced() {
        let session = SessionManager::new(store(), Some("../../etc".into()), LIFETIME);
        assert_ne!(session.id(), "../../etc");
        assert_eq!(session.id().len(), crate::session::SESSION_ID_LENGTH);
    }
}
