//! # Settings Store
//!
//! A flat key → value view over a JSON config file. Keys are dotted paths
//! with `/` separators (`strategy/underlying`, `api/rate_limits/quote`).
//!
//! ## Description
//! Lookups navigate the JSON document on every call, so callers that read a
//! key per scan cycle pick up edits without a restart. A missing key falls
//! back to the caller-supplied default; a key of the wrong type also falls
//! back, with a warning. The only writer is the auth session, which stores
//! refreshed tokens and saves the file back in place.

use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared, hot-reloadable settings.
#[derive(Debug)]
pub struct Settings {
    path: Option<PathBuf>,
    values: RwLock<Value>,
}

impl Settings {
    /// Loads the config file. Failure here is fatal at startup.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let values: Value = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            values: RwLock::new(values),
        })
    }

    /// Builds a settings store from an in-memory document. `save` is a no-op
    /// for stores created this way.
    pub fn from_value(values: Value) -> Self {
        Self {
            path: None,
            values: RwLock::new(values),
        }
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let pointer = format!("/{key}");
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.pointer(&pointer).cloned()
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            None => default.to_string(),
            Some(Value::String(s)) => s,
            Some(other) => {
                warn!("config key {} is not a string (found {}), using default {:?}", key, other, default);
                default.to_string()
            }
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.lookup(key) {
            None => default,
            Some(value) => match value.as_i64() {
                Some(n) => n,
                None => {
                    warn!("config key {} is not an integer (found {}), using default {}", key, value, default);
                    default
                }
            },
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.lookup(key) {
            None => default,
            Some(value) => match value.as_f64() {
                Some(n) => n,
                None => {
                    warn!("config key {} is not a number (found {}), using default {}", key, value, default);
                    default
                }
            },
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            None => default,
            Some(value) => match value.as_bool() {
                Some(b) => b,
                None => {
                    warn!("config key {} is not a boolean (found {}), using default {}", key, value, default);
                    default
                }
            },
        }
    }

    /// Sets a string value, creating intermediate objects along the path.
    pub fn set_str(&self, key: &str, value: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *values;
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            if !node.is_object() {
                *node = Value::Object(serde_json::Map::new());
            }
            let map = node.as_object_mut().unwrap();
            if segments.peek().is_none() {
                map.insert(segment.to_string(), Value::String(value.to_string()));
                return;
            }
            node = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
    }

    /// Rewrites the config file in place (pretty-printed). Used when the
    /// auth token is refreshed.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            warn!("settings store has no backing file, skipping save");
            return Ok(());
        };
        let rendered = {
            let values = self.values.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*values)?
        };
        let mut file = std::fs::File::create(path)?;
        file.write_all(rendered.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Settings {
        Settings::from_value(json!({
            "strategy": {
                "underlying": "NIFTY",
                "quantity": 50,
                "capital": 75000.0,
                "paper_trading": true
            },
            "api": { "rate_limits": { "quote": 15 } }
        }))
    }

    #[test]
    fn nested_lookup() {
        let settings = sample();
        assert_eq!(settings.get_str("strategy/underlying", "BANKNIFTY"), "NIFTY");
        assert_eq!(settings.get_i64("api/rate_limits/quote", 10), 15);
        assert_eq!(settings.get_f64("strategy/capital", 0.0), 75000.0);
        assert!(settings.get_bool("strategy/paper_trading", false));
    }

    #[test]
    fn missing_key_returns_default() {
        let settings = sample();
        assert_eq!(settings.get_str("strategy/exchange", "NFO"), "NFO");
        assert_eq!(settings.get_i64("expiry/max_count", 3), 3);
    }

    #[test]
    fn wrong_type_returns_default() {
        let settings = sample();
        // quantity is a number, not a string
        assert_eq!(settings.get_str("strategy/quantity", "1"), "1");
        assert_eq!(settings.get_i64("strategy/underlying", 7), 7);
    }

    #[test]
    fn integers_read_as_floats() {
        let settings = sample();
        assert_eq!(settings.get_f64("strategy/quantity", 0.0), 50.0);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let settings = sample();
        settings.set_str("auth/access_token", "tok123");
        assert_eq!(settings.get_str("auth/access_token", ""), "tok123");
        // existing subtrees survive
        assert_eq!(settings.get_str("strategy/underlying", ""), "NIFTY");
    }

    #[test]
    fn load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api": {"key": "k"}}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        settings.set_str("auth/access_token", "fresh");
        settings.save().unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.get_str("auth/access_token", ""), "fresh");
        assert_eq!(reloaded.get_str("api/key", ""), "k");
    }

    #[test]
    fn load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse { .. })));
    }
}
