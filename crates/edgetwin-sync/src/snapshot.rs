//! # Config Snapshot
//!
//! The in-memory configuration owned by the synchronizer's host.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment variables (highest, read-only)                         │
//! │     logLevel=warn                                                      │
//! │                                                                         │
//! │  2. Base values (mutable by twin updates, persisted)                   │
//! │     config/app.conf.json, then desired-property writes                 │
//! │                                                                         │
//! │  3. Defaults (lowest)                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Overrides live in a separate map so a remote write can never replace
//! them and a persist never leaks them into the file. Keys starting with
//! `__` are internal metadata and are dropped on load and on persist.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::env::EnvSource;

/// Prefix reserved for internal metadata keys.
pub const METADATA_PREFIX: &str = "__";

/// Returns true for keys that must never reach the config file.
pub fn is_metadata_key(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX)
}

/// Flat configKey → value mapping with environment shadowing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, Value>,
    overrides: BTreeMap<String, Value>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from base values only.
    pub fn from_values(values: Map<String, Value>) -> Self {
        let mut snapshot = Self::default();
        snapshot.merge_base(values);
        snapshot
    }

    /// Layers defaults, then file values, then environment overrides for
    /// every key known after layering.
    pub fn load(defaults: Map<String, Value>, file: Map<String, Value>, env: &dyn EnvSource) -> Self {
        let mut snapshot = Self::from_values(defaults);
        snapshot.merge_base(file);

        let keys: Vec<String> = snapshot.values.keys().cloned().collect();
        snapshot.apply_env_overrides(env, keys.iter().map(String::as_str));
        snapshot
    }

    /// Overlays base values. Metadata keys are ignored.
    pub fn merge_base(&mut self, values: Map<String, Value>) {
        for (key, value) in values {
            if is_metadata_key(&key) {
                debug!(key = %key, "Ignoring metadata key in config");
                continue;
            }
            self.values.insert(key, value);
        }
    }

    /// Records environment overrides for the given keys.
    pub fn apply_env_overrides<'a>(
        &mut self,
        env: &dyn EnvSource,
        keys: impl IntoIterator<Item = &'a str>,
    ) {
        for key in keys {
            if is_metadata_key(key) {
                continue;
            }
            if let Some(raw) = env.var(key) {
                debug!(key = %key, "Overriding config value from environment");
                let value = coerce_env_value(raw, self.values.get(key));
                self.overrides.insert(key.to_string(), value);
            }
        }
    }

    /// Effective value: the override if present, else the base value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.overrides.get(key).or_else(|| self.values.get(key))
    }

    /// Base value, ignoring overrides.
    pub fn base_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Sets a base value. Returns false, leaving everything untouched, when
    /// the key is shadowed by the environment or is a metadata key.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if self.is_overridden(key) || is_metadata_key(key) {
            return false;
        }
        self.values.insert(key.to_string(), value);
        true
    }

    /// Base values as written to the config store.
    pub fn persisted(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(key, _)| !is_metadata_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Base values with overrides applied.
    pub fn effective(&self) -> Map<String, Value> {
        let mut merged = self.persisted();
        for (key, value) in &self.overrides {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.overrides.is_empty()
    }
}

/// Environment values are strings; when the base value is not a string,
/// decode the variable as JSON so `logTimestamp=true` stays a boolean.
fn coerce_env_value(raw: String, base: Option<&Value>) -> Value {
    match base {
        Some(Value::String(_)) | None => Value::String(raw),
        Some(_) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_layering() {
        let defaults = map(json!({ "transport": "mqtt", "logLevel": "debug", "logTimestamp": false }));
        let file = map(json!({ "logLevel": "info", "custom": 3 }));
        let env = MapEnv::new().with("logTimestamp", "true").with("custom", "oops");

        let snapshot = ConfigSnapshot::load(defaults, file, &env);

        assert_eq!(snapshot.get("transport"), Some(&json!("mqtt")));
        assert_eq!(snapshot.get("logLevel"), Some(&json!("info")));
        assert_eq!(snapshot.get("logTimestamp"), Some(&json!(true)));
        // not valid JSON, kept as the raw string
        assert_eq!(snapshot.get("custom"), Some(&json!("oops")));
        assert_eq!(snapshot.base_value("custom"), Some(&json!(3)));
    }

    #[test]
    fn test_overridden_keys_are_never_written() {
        let env = MapEnv::new().with("logLevel", "warn");
        let mut snapshot =
            ConfigSnapshot::load(map(json!({ "logLevel": "debug" })), Map::new(), &env);

        assert!(!snapshot.set("logLevel", json!("error")));
        assert_eq!(snapshot.get("logLevel"), Some(&json!("warn")));
        assert_eq!(snapshot.base_value("logLevel"), Some(&json!("debug")));
    }

    #[test]
    fn test_persisted_excludes_overrides_and_metadata() {
        let env = MapEnv::new().with("logLevel", "warn");
        let mut snapshot = ConfigSnapshot::load(
            map(json!({ "logLevel": "debug", "__filename": "/etc/app.conf.json" })),
            Map::new(),
            &env,
        );
        assert!(!snapshot.set("__filename", json!("/tmp/x")));
        assert!(snapshot.set("transport", json!("amqp")));

        assert_eq!(
            Value::Object(snapshot.persisted()),
            json!({ "logLevel": "debug", "transport": "amqp" })
        );
        assert_eq!(
            Value::Object(snapshot.effective()),
            json!({ "logLevel": "warn", "transport": "amqp" })
        );
    }

    #[test]
    fn test_extra_override_keys() {
        let env = MapEnv::new().with("threshold", "12");
        let mut snapshot = ConfigSnapshot::new();
        snapshot.apply_env_overrides(&env, ["threshold", "missing"]);
        assert!(snapshot.is_overridden("threshold"));
        assert!(!snapshot.is_overridden("missing"));
        assert_eq!(snapshot.get("threshold"), Some(&json!("12")));
    }
}
