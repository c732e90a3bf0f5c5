//! # Agent Settings
//!
//! Typed view over the config snapshot, validated once at startup.
//!
//! ## Keys
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key                     default   notes                                │
//! │  ─────────────────────   ───────   ─────────────────────────────────    │
//! │  transport               mqtt      mqtt | amqp | http (else fatal)     │
//! │  logLevel                debug     any EnvFilter directive             │
//! │  logFormat               text      text | json                          │
//! │  logTimestamp            false     bool or "true"/"false"              │
//! │  broadcastIntervalSecs   60        heartbeat silence while healthy      │
//! │  monitorMinTimeoutMs     1000      first retry delay                    │
//! │  monitorMaxTimeoutMs     30000     delay ceiling                        │
//! │  monitorFactor           2         growth per failed attempt            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The config file path defaults to `config/app.conf.json` under the working
//! directory and can be moved with `EDGETWIN_CONFIG`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use edgetwin_core::BackoffPolicy;

use crate::env::EnvSource;
use crate::error::{SyncError, SyncResult};
use crate::snapshot::ConfigSnapshot;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/app.conf.json";

/// Environment variable that relocates the config file.
pub const CONFIG_PATH_VAR: &str = "EDGETWIN_CONFIG";

/// Resolves the config file path.
pub fn config_path(env: &dyn EnvSource) -> PathBuf {
    env.var(CONFIG_PATH_VAR)
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// =============================================================================
// Transport Kind
// =============================================================================

/// Protocol used by the twin transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Mqtt,
    Amqp,
    Http,
}

impl TransportKind {
    pub const NAMES: &'static [&'static str] = &["mqtt", "amqp", "http"];
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Mqtt => write!(f, "mqtt"),
            TransportKind::Amqp => write!(f, "amqp"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mqtt" => Ok(TransportKind::Mqtt),
            "amqp" => Ok(TransportKind::Amqp),
            "http" => Ok(TransportKind::Http),
            other => Err(SyncError::InvalidConfigValue {
                key: "transport".into(),
                reason: format!(
                    "unknown transport '{}'. Valid options: mqtt, amqp, http",
                    other
                ),
            }),
        }
    }
}

// =============================================================================
// Log Format
// =============================================================================

/// Console log layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(SyncError::InvalidConfigValue {
                key: "logFormat".into(),
                reason: format!("unknown log format '{}'. Valid options: text, json", other),
            }),
        }
    }
}

// =============================================================================
// Agent Settings
// =============================================================================

/// Settings the agent needs before any component starts.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub transport: TransportKind,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_timestamp: bool,
    pub broadcast_interval: Duration,
    pub monitor_min_timeout: Duration,
    pub monitor_max_timeout: Duration,
    pub monitor_factor: f64,
}

impl AgentSettings {
    /// Default values, as the lowest config layer.
    pub fn defaults() -> Map<String, Value> {
        match json!({
            "transport": "mqtt",
            "logLevel": "debug",
            "logFormat": "text",
            "logTimestamp": false,
            "broadcastIntervalSecs": 60,
            "monitorMinTimeoutMs": 1000,
            "monitorMaxTimeoutMs": 30000,
            "monitorFactor": 2.0
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Reads and validates settings from the effective snapshot values.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> SyncResult<Self> {
        let settings = AgentSettings {
            transport: read_str(snapshot, "transport", "mqtt")?.parse()?,
            log_level: read_str(snapshot, "logLevel", "debug")?,
            log_format: read_str(snapshot, "logFormat", "text")?.parse()?,
            log_timestamp: read_bool(snapshot, "logTimestamp", false)?,
            broadcast_interval: Duration::from_secs(read_u64(
                snapshot,
                "broadcastIntervalSecs",
                60,
            )?),
            monitor_min_timeout: Duration::from_millis(read_u64(
                snapshot,
                "monitorMinTimeoutMs",
                1000,
            )?),
            monitor_max_timeout: Duration::from_millis(read_u64(
                snapshot,
                "monitorMaxTimeoutMs",
                30_000,
            )?),
            monitor_factor: read_f64(snapshot, "monitorFactor", 2.0)?,
        };

        settings.backoff_policy()?;
        Ok(settings)
    }

    /// Backoff policy for the health monitor.
    pub fn backoff_policy(&self) -> SyncResult<BackoffPolicy> {
        BackoffPolicy::with_factor(
            self.monitor_min_timeout,
            self.monitor_max_timeout,
            self.monitor_factor,
        )
        .map_err(|e| SyncError::InvalidConfigValue {
            key: "monitorMinTimeoutMs".into(),
            reason: e.to_string(),
        })
    }
}

fn invalid(key: &str, expected: &str, found: &Value) -> SyncError {
    SyncError::InvalidConfigValue {
        key: key.to_string(),
        reason: format!("expected {}, got {}", expected, found),
    }
}

fn read_str(snapshot: &ConfigSnapshot, key: &str, default: &str) -> SyncResult<String> {
    match snapshot.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(invalid(key, "a string", other)),
    }
}

fn read_bool(snapshot: &ConfigSnapshot, key: &str, default: bool) -> SyncResult<bool> {
    match snapshot.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            _ => Err(invalid(key, "a boolean", &Value::String(s.clone()))),
        },
        Some(other) => Err(invalid(key, "a boolean", other)),
    }
}

fn read_u64(snapshot: &ConfigSnapshot, key: &str, default: u64) -> SyncResult<u64> {
    match snapshot.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| invalid(key, "a whole number", &Value::Number(n.clone()))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(key, "a whole number", &Value::String(s.clone()))),
        Some(other) => Err(invalid(key, "a whole number", other)),
    }
}

fn read_f64(snapshot: &ConfigSnapshot, key: &str, default: f64) -> SyncResult<f64> {
    match snapshot.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(key, "a number", &Value::Number(n.clone()))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(key, "a number", &Value::String(s.clone()))),
        Some(other) => Err(invalid(key, "a number", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    fn snapshot_with(file: Value, env: MapEnv) -> ConfigSnapshot {
        let file = match file {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ConfigSnapshot::load(AgentSettings::defaults(), file, &env)
    }

    #[test]
    fn test_defaults() {
        let settings = AgentSettings::from_snapshot(&snapshot_with(json!({}), MapEnv::new())).unwrap();
        assert_eq!(settings.transport, TransportKind::Mqtt);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.log_format, LogFormat::Text);
        assert!(!settings.log_timestamp);
        assert_eq!(settings.broadcast_interval, Duration::from_secs(60));
        assert_eq!(settings.monitor_min_timeout, Duration::from_millis(1000));
        assert_eq!(settings.monitor_max_timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn test_file_and_env_layers() {
        let env = MapEnv::new().with("logTimestamp", "true").with("transport", "HTTP");
        let snapshot = snapshot_with(json!({ "transport": "amqp", "logFormat": "json" }), env);
        let settings = AgentSettings::from_snapshot(&snapshot).unwrap();

        assert_eq!(settings.transport, TransportKind::Http);
        assert_eq!(settings.log_format, LogFormat::Json);
        assert!(settings.log_timestamp);
    }

    #[test]
    fn test_unknown_transport_is_fatal() {
        let snapshot = snapshot_with(json!({ "transport": "smoke-signals" }), MapEnv::new());
        let err = AgentSettings::from_snapshot(&snapshot).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, SyncError::InvalidConfigValue { ref key, .. } if key == "transport"));
    }

    #[test]
    fn test_invalid_monitor_bounds() {
        let snapshot = snapshot_with(
            json!({ "monitorMinTimeoutMs": 5000, "monitorMaxTimeoutMs": 100 }),
            MapEnv::new(),
        );
        assert!(AgentSettings::from_snapshot(&snapshot).is_err());
    }

    #[test]
    fn test_config_path() {
        assert_eq!(config_path(&MapEnv::new()), PathBuf::from(DEFAULT_CONFIG_PATH));
        let env = MapEnv::new().with(CONFIG_PATH_VAR, "/data/edge.json");
        assert_eq!(config_path(&env), PathBuf::from("/data/edge.json"));
    }

    #[test]
    fn test_transport_names() {
        for name in TransportKind::NAMES {
            let kind: TransportKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), *name);
        }
    }
}
