//! # Remote Twin Contract
//!
//! Wire types and the handle the synchronizer talks to.
//!
//! ## Message Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Twin Wire Format                                 │
//! │                                                                         │
//! │  DESIRED CHANGE (cloud ──► module)                                     │
//! │  ─────────────────────────────────                                     │
//! │  { "Log_Level": "info", "Transport": "amqp", "$version": 5 }           │
//! │                                                                         │
//! │  ACK PATCH (module ──► cloud, one per applied property)                │
//! │  ─────────────────────────────────────────────────────                 │
//! │  { "Log_Level": { "value": "info", "ad": "completed",                  │
//! │                   "ac": 200, "av": 5 } }                               │
//! │                                                                         │
//! │  FIRST-BOOT ANNOUNCEMENT (module ──► cloud)                            │
//! │  ─────────────────────────────────────────                             │
//! │  { "moduleVersion": "0.1.0", "Log_Level": "debug", ... }               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport behind [`RemoteTwin`] is out of scope here; [`LocalTwin`]
//! is an in-memory implementation that feeds desired changes through a
//! channel the way a real transport would.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Key carrying the desired-document version.
pub const VERSION_KEY: &str = "$version";

/// Acknowledgment description for a completed update.
pub const ACK_COMPLETED: &str = "completed";

/// Acknowledgment status code for a completed update.
pub const ACK_OK: u16 = 200;

/// A reported-properties patch.
pub type ReportedPatch = Map<String, Value>;

// =============================================================================
// Twin Snapshot
// =============================================================================

/// Full twin document returned by `fetch()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinSnapshot {
    #[serde(default)]
    pub desired: Map<String, Value>,

    #[serde(default)]
    pub reported: Map<String, Value>,
}

// =============================================================================
// Desired Change Batch
// =============================================================================

/// One desired-properties event: property updates plus a version stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredChangeBatch {
    pub version: u64,
    pub entries: Vec<(String, Value)>,
}

impl DesiredChangeBatch {
    pub fn new(version: u64, entries: Vec<(String, Value)>) -> Self {
        DesiredChangeBatch { version, entries }
    }

    /// Decodes `{<name>: value, ..., "$version": n}`. Other `$` keys are
    /// twin metadata and are dropped.
    pub fn from_json(payload: &Value) -> SyncResult<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| SyncError::InvalidBatch("desired change must be a JSON object".into()))?;

        let version = object
            .get(VERSION_KEY)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                SyncError::InvalidBatch(format!("missing or non-integer '{}'", VERSION_KEY))
            })?;

        let entries = object
            .iter()
            .filter(|(key, _)| !key.starts_with('$'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(DesiredChangeBatch { version, entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Ack Patch
// =============================================================================

/// Status record mirrored back for an applied desired property.
///
/// Field order is part of the wire format: `value, ad, ac, av`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckStatus {
    pub value: Value,
    pub ad: String,
    pub ac: u16,
    pub av: u64,
}

/// Acknowledgment for one property of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AckPatch {
    pub property: String,
    pub status: AckStatus,
}

impl AckPatch {
    /// Builds a `completed` / 200 acknowledgment.
    pub fn completed(property: impl Into<String>, value: Value, version: u64) -> Self {
        AckPatch {
            property: property.into(),
            status: AckStatus {
                value,
                ad: ACK_COMPLETED.to_string(),
                ac: ACK_OK,
                av: version,
            },
        }
    }

    /// `{ "<property>": { value, ad, ac, av } }`
    pub fn to_patch(&self) -> SyncResult<ReportedPatch> {
        let mut patch = Map::new();
        patch.insert(self.property.clone(), serde_json::to_value(&self.status)?);
        Ok(patch)
    }
}

/// Extracts the value from a reported entry, unwrapping ack records.
pub fn reported_value(entry: &Value) -> &Value {
    match entry {
        Value::Object(fields) if fields.contains_key("ac") && fields.contains_key("value") => {
            &fields["value"]
        }
        other => other,
    }
}

// =============================================================================
// Remote Twin Trait
// =============================================================================

/// Handle to the cloud twin and its messaging channel.
#[async_trait]
pub trait RemoteTwin: Send + Sync {
    /// Fetches the full twin document.
    async fn fetch(&self) -> SyncResult<TwinSnapshot>;

    /// Merges a patch into the reported section.
    async fn update_reported(&self, patch: ReportedPatch) -> SyncResult<()>;

    /// Sends a message on a named output.
    async fn send_output_event(&self, output: &str, payload: Value) -> SyncResult<()>;
}

// =============================================================================
// Local Twin
// =============================================================================

/// In-memory twin. Desired changes pushed into it are merged into the
/// desired section and forwarded as batches on the returned receiver.
#[derive(Clone)]
pub struct LocalTwin {
    document: Arc<Mutex<TwinSnapshot>>,
    outputs: Arc<Mutex<Vec<(String, Value)>>>,
    desired_tx: mpsc::Sender<DesiredChangeBatch>,
}

impl LocalTwin {
    /// Creates an empty twin and the receiver its desired changes arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DesiredChangeBatch>) {
        Self::with_snapshot(TwinSnapshot::default(), capacity)
    }

    /// Creates a twin seeded with a document.
    pub fn with_snapshot(
        snapshot: TwinSnapshot,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<DesiredChangeBatch>) {
        let (desired_tx, desired_rx) = mpsc::channel(capacity.max(1));
        let twin = LocalTwin {
            document: Arc::new(Mutex::new(snapshot)),
            outputs: Arc::new(Mutex::new(Vec::new())),
            desired_tx,
        };
        (twin, desired_rx)
    }

    /// Applies a desired patch (without `$version`); bumps the version and
    /// delivers the batch.
    pub async fn push_desired(&self, patch: Map<String, Value>) -> SyncResult<u64> {
        let batch = {
            let mut document = self.lock_document()?;
            let version = document
                .desired
                .get(VERSION_KEY)
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;

            let mut entries = Vec::with_capacity(patch.len());
            for (key, value) in patch {
                if key.starts_with('$') {
                    continue;
                }
                document.desired.insert(key.clone(), value.clone());
                entries.push((key, value));
            }
            document.desired.insert(VERSION_KEY.into(), Value::from(version));
            DesiredChangeBatch::new(version, entries)
        };

        let version = batch.version;
        self.desired_tx
            .send(batch)
            .await
            .map_err(|_| SyncError::ChannelError("desired change receiver dropped".into()))?;
        Ok(version)
    }

    /// Current reported section.
    pub fn reported(&self) -> SyncResult<Map<String, Value>> {
        Ok(self.lock_document()?.reported.clone())
    }

    /// Current desired section.
    pub fn desired(&self) -> SyncResult<Map<String, Value>> {
        Ok(self.lock_document()?.desired.clone())
    }

    /// Messages sent so far, oldest first.
    pub fn sent_events(&self) -> Vec<(String, Value)> {
        self.outputs
            .lock()
            .map(|outputs| outputs.clone())
            .unwrap_or_default()
    }

    fn lock_document(&self) -> SyncResult<std::sync::MutexGuard<'_, TwinSnapshot>> {
        self.document
            .lock()
            .map_err(|_| SyncError::Internal("twin document lock poisoned".into()))
    }
}

#[async_trait]
impl RemoteTwin for LocalTwin {
    async fn fetch(&self) -> SyncResult<TwinSnapshot> {
        self.lock_document()
            .map(|document| document.clone())
            .map_err(|e| SyncError::TwinFetch(e.to_string()))
    }

    async fn update_reported(&self, patch: ReportedPatch) -> SyncResult<()> {
        let mut document = self
            .lock_document()
            .map_err(|e| SyncError::ReportFailed(e.to_string()))?;
        for (key, value) in patch {
            document.reported.insert(key, value);
        }
        Ok(())
    }

    async fn send_output_event(&self, output: &str, payload: Value) -> SyncResult<()> {
        debug!(output = %output, "Local twin received output message");
        self.outputs
            .lock()
            .map_err(|_| SyncError::SendFailed {
                output: output.to_string(),
                reason: "output log lock poisoned".into(),
            })?
            .push((output.to_string(), payload));
        Ok(())
    }
}
