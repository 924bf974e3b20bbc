//! Persistent user preferences with defaults.
//!
//! A [`PrefsStore`] only holds values that differ from the defaults;
//! [`Prefs`] layers the defaults on top and offers typed accessors for the
//! Premium keys.

use crate::error::PrefsError;
use crate::license::License;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub const PREMIUM_LICENSE: &str = "premium_license";
pub const PREMIUM_LICENSE_NEXTCHECK: &str = "premium_license_nextcheck";
pub const PREMIUM_USER_ID: &str = "premium_user_id";
pub const PREMIUM_LICENSE_CHECK_URL: &str = "premium_license_check_url";
pub const PREMIUM_LICENSE_ACTIVATION_ORIGIN: &str = "premium_license_activation_origin";

pub const DEFAULT_LICENSE_CHECK_URL: &str = "https://myadblock.licensing.adblockplus.dev/license";
pub const DEFAULT_ACTIVATION_ORIGIN: &str = "https://accounts.adblockplus.org";

/// Backing store for user-modified preferences.
pub trait PrefsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), PrefsError>;
    fn remove(&self, key: &str) -> Result<(), PrefsError>;
}

#[derive(Debug, Default)]
pub struct MemoryPrefsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryPrefsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrefsStore for MemoryPrefsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PrefsError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Prefs kept in a JSON object file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFilePrefsStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFilePrefsStore {
    /// Opens the store at `path`. A missing file is an empty store; an
    /// unreadable one is logged and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring unreadable prefs file {}: {}", path.display(), e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &Map<String, Value>) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PrefsStore for JsonFilePrefsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PrefsError> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

/// Preferences with defaults.
#[derive(Clone)]
pub struct Prefs {
    store: Arc<dyn PrefsStore>,
    defaults: Arc<HashMap<String, Value>>,
}

impl Prefs {
    /// Creates prefs with the Premium defaults.
    pub fn new(store: Arc<dyn PrefsStore>, check_url: &str, activation_origin: &str) -> Self {
        let defaults = HashMap::from([
            (
                PREMIUM_LICENSE.to_string(),
                serde_json::to_value(License::default()).unwrap_or(Value::Null),
            ),
            (PREMIUM_LICENSE_NEXTCHECK.to_string(), Value::from(0)),
            (PREMIUM_USER_ID.to_string(), Value::from("")),
            (PREMIUM_LICENSE_CHECK_URL.to_string(), Value::from(check_url)),
            (
                PREMIUM_LICENSE_ACTIVATION_ORIGIN.to_string(),
                Value::from(activation_origin),
            ),
        ]);

        Self {
            store,
            defaults: Arc::new(defaults),
        }
    }

    /// Creates in-memory prefs with the stock defaults.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryPrefsStore::new()),
            DEFAULT_LICENSE_CHECK_URL,
            DEFAULT_ACTIVATION_ORIGIN,
        )
    }

    /// The stored value, else the default, else `null`.
    pub fn get(&self, key: &str) -> Value {
        self.store
            .get(key)
            .or_else(|| self.defaults.get(key).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), PrefsError> {
        self.store.set(key, value.into())
    }

    /// Restores the default value.
    pub fn reset(&self, key: &str) -> Result<(), PrefsError> {
        self.store.remove(key)
    }

    /// The current license; a malformed stored license reads as the default.
    pub fn license(&self) -> License {
        serde_json::from_value(self.get(PREMIUM_LICENSE)).unwrap_or_else(|e| {
            warn!("Stored Premium license is malformed: {}", e);
            License::default()
        })
    }

    pub fn set_license(&self, license: &License) -> Result<(), PrefsError> {
        self.set(PREMIUM_LICENSE, serde_json::to_value(license)?)
    }

    pub fn next_check(&self) -> u64 {
        self.get(PREMIUM_LICENSE_NEXTCHECK).as_u64().unwrap_or(0)
    }

    pub fn user_id(&self) -> String {
        self.get(PREMIUM_USER_ID).as_str().unwrap_or_default().to_string()
    }

    pub fn check_url(&self) -> String {
        self.get(PREMIUM_LICENSE_CHECK_URL)
            .as_str()
            .unwrap_or(DEFAULT_LICENSE_CHECK_URL)
            .to_string()
    }

    pub fn activation_origin(&self) -> String {
        self.get(PREMIUM_LICENSE_ACTIVATION_ORIGIN)
            .as_str()
            .unwrap_or(DEFAULT_ACTIVATION_ORIGIN)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_and_reset() {
        let prefs = Prefs::in_memory();
        assert_eq!(prefs.next_check(), 0);
        assert_eq!(prefs.user_id(), "");
        assert_eq!(prefs.check_url(), DEFAULT_LICENSE_CHECK_URL);
        assert!(!prefs.license().is_active());

        prefs.set(PREMIUM_USER_ID, "user-1").unwrap();
        assert_eq!(prefs.user_id(), "user-1");

        prefs.reset(PREMIUM_USER_ID).unwrap();
        assert_eq!(prefs.user_id(), "");
    }

    #[test]
    fn malformed_license_reads_as_default() {
        let prefs = Prefs::in_memory();
        prefs.set(PREMIUM_LICENSE, json!("garbage")).unwrap();
        assert_eq!(prefs.license(), License::default());
    }

    #[test]
    fn file_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("prefs.json");

        {
            let store = JsonFilePrefsStore::open(&path).unwrap();
            store.set(PREMIUM_USER_ID, json!("user-1")).unwrap();
            store.set(PREMIUM_LICENSE_NEXTCHECK, json!(1234)).unwrap();
            store.remove(PREMIUM_LICENSE_NEXTCHECK).unwrap();
        }

        let store = JsonFilePrefsStore::open(&path).unwrap();
        assert_eq!(store.get(PREMIUM_USER_ID), Some(json!("user-1")));
        assert_eq!(store.get(PREMIUM_LICENSE_NEXTCHECK), None);
    }

    #[test]
    fn unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFilePrefsStore::open(&path).unwrap();
        assert_eq!(store.get(PREMIUM_USER_ID), None);
    }
}
