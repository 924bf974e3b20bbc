//! Session-scoped key/value storage.
//!
//! Values live for the duration of a browser session: they survive the
//! background worker being suspended and restarted but not a full browser
//! restart. Keys are namespaced per consumer as `session:<namespace>:<key>`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Namespaced session storage.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// The backing area shared by all session storage handles of a process.
///
/// Cloning is cheap and every clone sees the same entries, so a handle can
/// be dropped and re-created while the stored values survive.
#[derive(Clone, Default, Debug)]
pub struct SessionArea {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl SessionArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every entry, as a browser restart would.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Reads an entry by its full, namespaced key.
    pub fn raw(&self, global_key: &str) -> Option<Value> {
        self.entries.lock().get(global_key).cloned()
    }

    /// Writes an entry by its full, namespaced key.
    pub fn insert_raw(&self, global_key: impl Into<String>, value: Value) {
        self.entries.lock().insert(global_key.into(), value);
    }
}

/// In-memory [`SessionStorage`] handle for one namespace.
#[derive(Clone, Debug)]
pub struct MemorySessionStorage {
    namespace: String,
    area: SessionArea,
}

impl MemorySessionStorage {
    pub fn new(namespace: impl Into<String>, area: SessionArea) -> Self {
        Self {
            namespace: namespace.into(),
            area,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn global_key(&self, key: &str) -> String {
        global_key(&self.namespace, key)
    }
}

/// Full key under which `key` of `namespace` is stored.
pub fn global_key(namespace: &str, key: &str) -> String {
    format!("session:{namespace}:{key}")
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.area.raw(&self.global_key(key)))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.area.insert_raw(self.global_key(key), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.area.entries.lock().remove(&self.global_key(key));
        Ok(())
    }
}
