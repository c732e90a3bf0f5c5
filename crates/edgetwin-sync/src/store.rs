//! # Config Stores
//!
//! Where the persisted configuration lives.
//!
//! ## File Format
//! ```json
//! {
//!   "logLevel": "info",
//!   "logTimestamp": false,
//!   "transport": "mqtt"
//! }
//! ```
//!
//! A flat JSON object of configKey → value. Writes go to a temporary file in
//! the same directory which is then renamed over the target, so a crash mid
//! write leaves the last good file in place.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::is_metadata_key;

/// Backing storage for the config snapshot.
pub trait ConfigStore: Send + Sync {
    /// Reads the stored mapping. A store with nothing saved yet returns an
    /// empty mapping.
    fn read(&self) -> SyncResult<Map<String, Value>>;

    /// Replaces the stored mapping.
    fn write(&self, values: &Map<String, Value>) -> SyncResult<()>;
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Stores the config as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn read(&self) -> SyncResult<Map<String, Value>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "Config file not found, starting empty");
            return Ok(Map::new());
        }

        info!(path = ?self.path, "Loading config from file");
        let contents = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(values)) => Ok(values),
            Ok(other) => Err(SyncError::ConfigLoadFailed(format!(
                "{} must contain a JSON object, found {}",
                self.path.display(),
                json_kind(&other)
            ))),
            Err(e) => Err(SyncError::ConfigLoadFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write(&self, values: &Map<String, Value>) -> SyncResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| SyncError::Persist(e.to_string()))?;

        let filtered: Map<String, Value> = values
            .iter()
            .filter(|(key, _)| !is_metadata_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut file = NamedTempFile::new_in(&dir).map_err(|e| SyncError::Persist(e.to_string()))?;
        serde_json::to_writer_pretty(&mut file, &filtered)
            .map_err(|e| SyncError::Persist(e.to_string()))?;
        file.write_all(b"\n")
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| SyncError::Persist(e.to_string()))?;
        file.persist(&self.path)?;

        info!(path = ?self.path, keys = filtered.len(), "Config saved");
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new(values: Map<String, Value>) -> Self {
        MemoryStore {
            values: Mutex::new(values),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self) -> SyncResult<Map<String, Value>> {
        Ok(self
            .values
            .lock()
            .map_err(|_| SyncError::ConfigLoadFailed("memory store poisoned".into()))?
            .clone())
    }

    fn write(&self, values: &Map<String, Value>) -> SyncResult<()> {
        let mut stored = self
            .values
            .lock()
            .map_err(|_| SyncError::Persist("memory store poisoned".into()))?;
        *stored = values
            .iter()
            .filter(|(key, _)| !is_metadata_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(())
    }
}
