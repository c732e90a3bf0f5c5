//! # Environment Overrides
//!
//! Access to process environment variables behind a trait, plus the control
//! flags that change synchronizer behaviour.
//!
//! ## Control Variables
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  IGNORE_TWIN_PROPERTIES  skip priming / first-boot announcement         │
//! │  DISABLE_TWIN_UPDATES    accept no desired-property writes              │
//! │  DISABLE_MESSAGING       suppress outbound output messages              │
//! │                                                                         │
//! │  A flag is set when present and not "", "0" or "false".                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any config key present as an environment variable shadows the file and
//! twin value of that key (see [`ConfigSnapshot`](crate::snapshot::ConfigSnapshot)).

use std::collections::HashMap;

/// Skip the initial sync pass.
pub const IGNORE_TWIN_PROPERTIES: &str = "IGNORE_TWIN_PROPERTIES";

/// Accept no remote writes.
pub const DISABLE_TWIN_UPDATES: &str = "DISABLE_TWIN_UPDATES";

/// Suppress outbound telemetry.
pub const DISABLE_MESSAGING: &str = "DISABLE_MESSAGING";

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, used in tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MapEnv {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Interprets an optional variable value as a flag.
pub fn flag_is_set(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !matches!(v.trim().to_lowercase().as_str(), "" | "0" | "false"),
    }
}

/// Behaviour switches read from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncControls {
    pub ignore_twin_properties: bool,
    pub disable_twin_updates: bool,
    pub disable_messaging: bool,
}

impl SyncControls {
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let flag = |key: &str| flag_is_set(env.var(key).as_deref());

        SyncControls {
            ignore_twin_properties: flag(IGNORE_TWIN_PROPERTIES),
            disable_twin_updates: flag(DISABLE_TWIN_UPDATES),
            disable_messaging: flag(DISABLE_MESSAGING),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values() {
        assert!(!flag_is_set(None));
        assert!(!flag_is_set(Some("")));
        assert!(!flag_is_set(Some("0")));
        assert!(!flag_is_set(Some("FALSE")));
        assert!(flag_is_set(Some("1")));
        assert!(flag_is_set(Some("yes")));
    }

    #[test]
    fn test_controls_from_env() {
        let env = MapEnv::new()
            .with(DISABLE_TWIN_UPDATES, "1")
            .with(DISABLE_MESSAGING, "0");
        let controls = SyncControls::from_env(&env);
        assert!(controls.disable_twin_updates);
        assert!(!controls.disable_messaging);
        assert!(!controls.ignore_twin_properties);
    }

    #[test]
    fn test_map_env_from_iter() {
        let env: MapEnv = [("logLevel", "warn")].into_iter().collect();
        assert_eq!(env.var("logLevel").as_deref(), Some("warn"));
        assert_eq!(env.var("transport"), None);
    }
}
