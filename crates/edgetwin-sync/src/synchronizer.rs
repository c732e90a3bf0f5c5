//! # Twin Synchronizer
//!
//! Reconciles the cloud twin's desired properties with the local config
//! snapshot.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Synchronizer Phases                                 │
//! │                                                                         │
//! │                    initialize()                                         │
//! │  Uninitialized ───────────────┬──────────────────┐                     │
//! │                               │                  │                      │
//! │              reported has a   │                  │ reported has no      │
//! │              mapped property  ▼                  ▼ mapped property      │
//! │                          ┌─────────┐       ┌────────────┐              │
//! │                          │ Priming │       │ Announcing │              │
//! │                          └────┬────┘       └─────┬──────┘              │
//! │                               │                  │                      │
//! │                               └───────┬──────────┘                      │
//! │                                       ▼                                 │
//! │                                  ┌────────┐  apply_desired_change()     │
//! │                                  │ Steady │◄──────────────┐             │
//! │                                  └────────┘───────────────┘             │
//! │                                                                         │
//! │  BATCH FLOW (steady):                                                  │
//! │  ────────────────────                                                  │
//! │  1. Resolve each entry in the schema (unmapped → skip)                 │
//! │  2. Skip keys shadowed by the environment                              │
//! │  3. Parse (failure → skip, no ack)                                     │
//! │  4. Write the snapshot, queue an ack with av = batch version           │
//! │  5. Send all acks concurrently, log each result                        │
//! │  6. One PropertiesUpdated notification if anything was applied         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use edgetwin_core::PropertySchema;

use crate::env::SyncControls;
use crate::error::{SyncError, SyncResult};
use crate::snapshot::ConfigSnapshot;
use crate::store::{ConfigStore, MemoryStore};
use crate::twin::{reported_value, AckPatch, DesiredChangeBatch, RemoteTwin};

/// Reported key carrying the module version in the first-boot announcement.
pub const MODULE_VERSION_KEY: &str = "moduleVersion";

// =============================================================================
// Phase & Outcomes
// =============================================================================

/// Where the synchronizer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Uninitialized,
    Priming,
    Announcing,
    Steady,
}

/// How `initialize()` brought the snapshot in line with the twin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialSync {
    /// Previously reported values were loaded into the snapshot.
    Primed { applied: usize },

    /// The full property set was pushed to the twin.
    Announced,

    /// `IGNORE_TWIN_PROPERTIES` was set.
    Skipped,
}

/// Aggregate notification raised once per batch that changed something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertiesUpdated {
    pub version: u64,
    pub properties: Vec<String>,
}

/// Why a batch entry was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unmapped,
    EnvironmentOverride,
    Parse(String),
    UpdatesDisabled,
}

/// A batch entry that was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProperty {
    pub property: String,
    pub reason: SkipReason,
}

/// Per-batch report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub version: u64,
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedProperty>,
    pub failed_acks: Vec<String>,
    pub notified: bool,
}

impl BatchOutcome {
    fn skip(&mut self, property: &str, reason: SkipReason) {
        self.skipped.push(SkippedProperty {
            property: property.to_string(),
            reason,
        });
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives synchronizer notifications.
pub trait TwinEventEmitter: Send + Sync {
    /// Called after every ack of a batch has settled, when at least one
    /// property was applied.
    fn emit_properties_updated(&self, event: &PropertiesUpdated);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl TwinEventEmitter for NoOpEmitter {
    fn emit_properties_updated(&self, _event: &PropertiesUpdated) {}
}

// =============================================================================
// Twin Synchronizer
// =============================================================================

/// Owns the config snapshot and keeps it in line with the twin.
pub struct TwinSynchronizer {
    /// Remote twin handle.
    twin: Arc<dyn RemoteTwin>,

    /// Where `persist()` writes.
    store: Arc<dyn ConfigStore>,

    /// Notification sink.
    emitter: Arc<dyn TwinEventEmitter>,

    /// Remote name → config key table.
    schema: PropertySchema,

    /// Local configuration.
    snapshot: ConfigSnapshot,

    /// Environment switches.
    controls: SyncControls,

    /// Reported in the first-boot announcement.
    module_version: String,

    phase: SyncPhase,
}

impl TwinSynchronizer {
    /// Returns a builder for the given schema.
    pub fn builder(schema: PropertySchema) -> TwinSynchronizerBuilder {
        TwinSynchronizerBuilder::new(schema)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn schema(&self) -> &PropertySchema {
        &self.schema
    }

    /// Fetches the twin and performs the initial sync pass.
    ///
    /// A fetch failure is returned as [`SyncError::TwinFetch`]; the host is
    /// expected to treat it as fatal.
    pub async fn initialize(&mut self) -> SyncResult<InitialSync> {
        let twin = self.twin.fetch().await.map_err(|e| match e {
            SyncError::TwinFetch(_) => e,
            other => SyncError::TwinFetch(other.to_string()),
        })?;

        info!(
            desired = twin.desired.len(),
            reported = twin.reported.len(),
            "Twin fetched"
        );

        if self.controls.ignore_twin_properties {
            info!("IGNORE_TWIN_PROPERTIES set, skipping initial property sync");
            self.phase = SyncPhase::Steady;
            return Ok(InitialSync::Skipped);
        }

        let has_reported = self
            .schema
            .names()
            .any(|name| twin.reported.contains_key(name));

        let outcome = if has_reported {
            self.phase = SyncPhase::Priming;
            let applied = self.prime(&twin.reported);
            info!(applied, "Config primed from reported properties");
            InitialSync::Primed { applied }
        } else {
            self.phase = SyncPhase::Announcing;
            self.announce().await;
            InitialSync::Announced
        };

        self.phase = SyncPhase::Steady;
        Ok(outcome)
    }

    /// Loads previously reported values into the snapshot. Nothing is sent.
    fn prime(&mut self, reported: &Map<String, Value>) -> usize {
        let mut applied = 0;

        for descriptor in self.schema.iter() {
            let Some(entry) = reported.get(&descriptor.remote_name) else {
                continue;
            };

            if self.snapshot.is_overridden(&descriptor.config_key) {
                debug!(
                    property = %descriptor.remote_name,
                    "Skipping priming, key is set by the environment"
                );
                continue;
            }

            match descriptor.parse(reported_value(entry)) {
                Ok(value) => {
                    if self.snapshot.set(&descriptor.config_key, value) {
                        applied += 1;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring reported value"),
            }
        }

        applied
    }

    /// Pushes `moduleVersion` plus every mapped key with a defined value.
    async fn announce(&self) {
        let mut patch = Map::new();
        patch.insert(
            MODULE_VERSION_KEY.to_string(),
            Value::String(self.module_version.clone()),
        );

        for descriptor in self.schema.iter() {
            if let Some(value) = self.snapshot.get(&descriptor.config_key) {
                patch.insert(descriptor.remote_name.clone(), value.clone());
            }
        }

        let keys = patch.len();
        match self.twin.update_reported(patch).await {
            Ok(()) => info!(keys, "Announced initial properties"),
            Err(e) => warn!(error = %e, "Failed to announce initial properties"),
        }
    }

    /// Applies one desired-change batch.
    ///
    /// Per-entry problems are recorded in the returned outcome and never fail
    /// the batch. The only error is calling this before `initialize()`.
    pub async fn apply_desired_change(
        &mut self,
        batch: DesiredChangeBatch,
    ) -> SyncResult<BatchOutcome> {
        if self.phase == SyncPhase::Uninitialized {
            return Err(SyncError::NotInitialized);
        }

        let mut outcome = BatchOutcome {
            version: batch.version,
            ..Default::default()
        };

        if self.controls.disable_twin_updates {
            info!(
                version = batch.version,
                entries = batch.entries.len(),
                "DISABLE_TWIN_UPDATES set, ignoring desired change"
            );
            for (name, _) in &batch.entries {
                outcome.skip(name, SkipReason::UpdatesDisabled);
            }
            return Ok(outcome);
        }

        let mut acks = Vec::new();

        for (name, raw) in batch.entries {
            let Some(descriptor) = self.schema.resolve(&name) else {
                debug!(property = %name, "No descriptor for property, skipping");
                outcome.skip(&name, SkipReason::Unmapped);
                continue;
            };

            if self.snapshot.is_overridden(&descriptor.config_key) {
                info!(
                    property = %name,
                    key = %descriptor.config_key,
                    "Property is set by the environment, skipping"
                );
                outcome.skip(&name, SkipReason::EnvironmentOverride);
                continue;
            }

            let value = match descriptor.parse(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(property = %name, error = %e, "Failed to parse desired value");
                    outcome.skip(&name, SkipReason::Parse(e.to_string()));
                    continue;
                }
            };

            info!(property = %name, version = batch.version, "Applying desired property");
            self.snapshot.set(&descriptor.config_key, value);
            acks.push(AckPatch::completed(name.clone(), raw, batch.version));
            outcome.applied.push(name);
        }

        let twin = &self.twin;
        let results = join_all(acks.iter().map(|ack| async move {
            let patch = ack.to_patch()?;
            twin.update_reported(patch)
                .await
                .map_err(|e| SyncError::Ack {
                    property: ack.property.clone(),
                    reason: e.to_string(),
                })
        }))
        .await;

        for (ack, result) in acks.iter().zip(results) {
            match result {
                Ok(()) => debug!(property = %ack.property, av = ack.status.av, "Acknowledged"),
                Err(e) => {
                    warn!(property = %ack.property, error = %e, "Acknowledgment failed");
                    outcome.failed_acks.push(ack.property.clone());
                }
            }
        }

        if !outcome.applied.is_empty() && self.phase == SyncPhase::Steady {
            self.emitter.emit_properties_updated(&PropertiesUpdated {
                version: outcome.version,
                properties: outcome.applied.clone(),
            });
            outcome.notified = true;
        }

        Ok(outcome)
    }

    /// Writes the snapshot's base values to the config store.
    ///
    /// Failures are logged here; callers may ignore the result.
    pub fn persist(&self) -> SyncResult<()> {
        self.store.write(&self.snapshot.persisted()).map_err(|e| {
            warn!(error = %e, "Failed to persist config");
            e
        })
    }

    /// Applies batches until shutdown, then persists.
    ///
    /// Batches already queued when shutdown arrives are applied first.
    pub async fn run(
        &mut self,
        mut desired_rx: mpsc::Receiver<DesiredChangeBatch>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> SyncResult<()> {
        if self.phase == SyncPhase::Uninitialized {
            return Err(SyncError::NotInitialized);
        }

        info!("Twin synchronizer running");

        loop {
            tokio::select! {
                biased;

                batch = desired_rx.recv() => match batch {
                    Some(batch) => {
                        if let Err(e) = self.apply_desired_change(batch).await {
                            error!(error = %e, "Failed to apply desired change");
                        }
                    }
                    None => {
                        info!("Desired change stream closed");
                        break;
                    }
                },

                _ = shutdown_rx.recv() => {
                    info!("Twin synchronizer received shutdown");
                    break;
                }
            }
        }

        let _ = self.persist();
        info!("Twin synchronizer stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`TwinSynchronizer`].
pub struct TwinSynchronizerBuilder {
    schema: PropertySchema,
    twin: Option<Arc<dyn RemoteTwin>>,
    store: Option<Arc<dyn ConfigStore>>,
    emitter: Option<Arc<dyn TwinEventEmitter>>,
    snapshot: ConfigSnapshot,
    controls: SyncControls,
    module_version: String,
}

impl TwinSynchronizerBuilder {
    pub fn new(schema: PropertySchema) -> Self {
        TwinSynchronizerBuilder {
            schema,
            twin: None,
            store: None,
            emitter: None,
            snapshot: ConfigSnapshot::default(),
            controls: SyncControls::default(),
            module_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Sets the remote twin handle. Required.
    pub fn twin(mut self, twin: Arc<dyn RemoteTwin>) -> Self {
        self.twin = Some(twin);
        self
    }

    /// Sets the config store. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn snapshot(mut self, snapshot: ConfigSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn controls(mut self, controls: SyncControls) -> Self {
        self.controls = controls;
        self
    }

    pub fn module_version(mut self, version: impl Into<String>) -> Self {
        self.module_version = version.into();
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn TwinEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> SyncResult<TwinSynchronizer> {
        let twin = self
            .twin
            .ok_or_else(|| SyncError::InvalidConfig("Remote twin required".into()))?;

        Ok(TwinSynchronizer {
            twin,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::default())),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            schema: self.schema,
            snapshot: self.snapshot,
            controls: self.controls,
            module_version: self.module_version,
            phase: SyncPhase::Uninitialized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use edgetwin_core::ValueParser;

    use std::time::Duration;

    use tempfile::TempDir;

    use crate::env::MapEnv;
    use crate::store::JsonFileStore;
    use crate::twin::{LocalTwin, ReportedPatch, TwinSnapshot};

    // =========================================================================
    // Fakes
    // =========================================================================

    #[derive(Default)]
    struct RecordingTwin {
        snapshot: TwinSnapshot,
        patches: Mutex<Vec<ReportedPatch>>,
        reject_property: Option<String>,
        fail_fetch: bool,
    }

    impl RecordingTwin {
        fn with_reported(reported: Value) -> Self {
            RecordingTwin {
                snapshot: TwinSnapshot {
                    desired: Map::new(),
                    reported: object(reported),
                },
                ..Default::default()
            }
        }

        fn patches(&self) -> Vec<ReportedPatch> {
            self.patches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteTwin for RecordingTwin {
        async fn fetch(&self) -> SyncResult<TwinSnapshot> {
            if self.fail_fetch {
                return Err(SyncError::TwinFetch("connection refused".into()));
            }
            Ok(self.snapshot.clone())
        }

        async fn update_reported(&self, patch: ReportedPatch) -> SyncResult<()> {
            if let Some(ref rejected) = self.reject_property {
                if patch.contains_key(rejected) {
                    return Err(SyncError::ReportFailed("service unavailable".into()));
                }
            }
            self.patches.lock().unwrap().push(patch);
            Ok(())
        }

        async fn send_output_event(&self, _output: &str, _payload: Value) -> SyncResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<PropertiesUpdated>>,
    }

    impl TwinEventEmitter for RecordingEmitter {
        fn emit_properties_updated(&self, event: &PropertiesUpdated) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    /// Takes 10ms per character of the first patched key to settle.
    #[derive(Default)]
    struct SlowTwin {
        patches: Mutex<Vec<ReportedPatch>>,
    }

    #[async_trait]
    impl RemoteTwin for SlowTwin {
        async fn fetch(&self) -> SyncResult<TwinSnapshot> {
            Ok(TwinSnapshot::default())
        }

        async fn update_reported(&self, patch: ReportedPatch) -> SyncResult<()> {
            let delay = patch.keys().next().map(|key| key.len() as u64).unwrap_or(0) * 10;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.patches.lock().unwrap().push(patch);
            Ok(())
        }

        async fn send_output_event(&self, _output: &str, _payload: Value) -> SyncResult<()> {
            Ok(())
        }
    }

    /// Records how many acks had landed when each notification fired.
    struct AckCountingEmitter {
        twin: Arc<SlowTwin>,
        acks_seen: Mutex<Vec<usize>>,
    }

    impl TwinEventEmitter for AckCountingEmitter {
        fn emit_properties_updated(&self, _event: &PropertiesUpdated) {
            let landed = self.twin.patches.lock().unwrap().len();
            self.acks_seen.lock().unwrap().push(landed);
        }
    }

    struct BrokenStore;

    impl ConfigStore for BrokenStore {
        fn read(&self) -> SyncResult<Map<String, Value>> {
            Ok(Map::new())
        }

        fn write(&self, _values: &Map<String, Value>) -> SyncResult<()> {
            Err(SyncError::Persist("read-only file system".into()))
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn schema() -> PropertySchema {
        PropertySchema::builder()
            .map("Log_Level", "logLevel", ValueParser::Passthrough)
            .map("Log_Timestamp", "logTimestamp", ValueParser::Bool)
            .map("Transport", "transport", ValueParser::OneOf(&["mqtt", "amqp", "http"]))
            .build()
            .unwrap()
    }

    fn base_snapshot(env: &MapEnv) -> ConfigSnapshot {
        ConfigSnapshot::load(
            object(json!({ "logLevel": "debug", "logTimestamp": false, "transport": "mqtt" })),
            Map::new(),
            env,
        )
    }

    struct Harness {
        twin: Arc<RecordingTwin>,
        emitter: Arc<RecordingEmitter>,
        store: Arc<MemoryStore>,
        sync: TwinSynchronizer,
    }

    fn harness(twin: RecordingTwin, env: MapEnv) -> Harness {
        let twin = Arc::new(twin);
        let emitter = Arc::new(RecordingEmitter::default());
        let store = Arc::new(MemoryStore::default());
        let sync = TwinSynchronizer::builder(schema())
            .twin(twin.clone())
            .store(store.clone())
            .emitter(emitter.clone())
            .snapshot(base_snapshot(&env))
            .controls(SyncControls::from_env(&env))
            .module_version("1.2.3")
            .build()
            .unwrap();

        Harness {
            twin,
            emitter,
            store,
            sync,
        }
    }

    async fn steady(env: MapEnv) -> Harness {
        let mut h = harness(RecordingTwin::default(), env);
        h.sync.initialize().await.unwrap();
        h.twin.patches.lock().unwrap().clear();
        h
    }

    fn batch(version: u64, entries: Value) -> DesiredChangeBatch {
        let entries = object(entries).into_iter().collect();
        DesiredChangeBatch::new(version, entries)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    #[tokio::test]
    async fn test_fetch_failure_is_fatal() {
        let twin = RecordingTwin {
            fail_fetch: true,
            ..Default::default()
        };
        let mut h = harness(twin, MapEnv::new());

        let err = h.sync.initialize().await.unwrap_err();
        assert!(matches!(err, SyncError::TwinFetch(_)));
        assert!(err.is_fatal());
        assert_eq!(h.sync.phase(), SyncPhase::Uninitialized);
    }

    #[tokio::test]
    async fn test_first_boot_announces_properties() {
        let mut h = harness(RecordingTwin::default(), MapEnv::new());

        assert_eq!(h.sync.initialize().await.unwrap(), InitialSync::Announced);
        assert_eq!(h.sync.phase(), SyncPhase::Steady);

        let patches = h.twin.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(
            Value::Object(patches[0].clone()),
            json!({
                "moduleVersion": "1.2.3",
                "Log_Level": "debug",
                "Log_Timestamp": false,
                "Transport": "mqtt"
            })
        );
        assert!(h.emitter.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_priming_applies_reported_without_acks() {
        let twin = RecordingTwin::with_reported(json!({
            "Log_Level": { "value": "warn", "ad": "completed", "ac": 200, "av": 3 },
            "Transport": "amqp",
            "moduleVersion": "1.0.0"
        }));
        let mut h = harness(twin, MapEnv::new());

        assert_eq!(
            h.sync.initialize().await.unwrap(),
            InitialSync::Primed { applied: 2 }
        );
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("warn")));
        assert_eq!(h.sync.snapshot().get("transport"), Some(&json!("amqp")));
        assert!(h.twin.patches().is_empty());
        assert!(h.emitter.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_priming_respects_environment() {
        let twin = RecordingTwin::with_reported(json!({ "Log_Level": "warn" }));
        let mut h = harness(twin, MapEnv::new().with("logLevel", "error"));

        assert_eq!(
            h.sync.initialize().await.unwrap(),
            InitialSync::Primed { applied: 0 }
        );
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("error")));
        assert_eq!(h.sync.snapshot().base_value("logLevel"), Some(&json!("debug")));
    }

    #[tokio::test]
    async fn test_ignore_twin_properties() {
        let twin = RecordingTwin::with_reported(json!({ "Log_Level": "warn" }));
        let mut h = harness(twin, MapEnv::new().with("IGNORE_TWIN_PROPERTIES", "1"));

        assert_eq!(h.sync.initialize().await.unwrap(), InitialSync::Skipped);
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("debug")));
        assert!(h.twin.patches().is_empty());
        assert_eq!(h.sync.phase(), SyncPhase::Steady);
    }

    #[tokio::test]
    async fn test_apply_before_initialize() {
        let mut h = harness(RecordingTwin::default(), MapEnv::new());
        let err = h
            .sync
            .apply_desired_change(batch(1, json!({ "Log_Level": "info" })))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized));
    }

    // =========================================================================
    // Desired Changes
    // =========================================================================

    #[tokio::test]
    async fn test_single_property_update() {
        let mut h = steady(MapEnv::new()).await;

        let outcome = h
            .sync
            .apply_desired_change(batch(5, json!({ "Log_Level": "info" })))
            .await
            .unwrap();

        assert_eq!(outcome.applied, vec!["Log_Level".to_string()]);
        assert!(outcome.notified);
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("info")));

        let patches = h.twin.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(
            serde_json::to_string(&patches[0]).unwrap(),
            r#"{"Log_Level":{"value":"info","ad":"completed","ac":200,"av":5}}"#
        );

        let events = h.emitter.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![PropertiesUpdated {
                version: 5,
                properties: vec!["Log_Level".into()]
            }]
        );
    }

    #[tokio::test]
    async fn test_unmapped_property_skipped() {
        let mut h = steady(MapEnv::new()).await;

        let outcome = h
            .sync
            .apply_desired_change(batch(6, json!({ "Unknown_X": 1, "Log_Level": "warn" })))
            .await
            .unwrap();

        assert_eq!(outcome.applied, vec!["Log_Level".to_string()]);
        assert_eq!(
            outcome.skipped,
            vec![SkippedProperty {
                property: "Unknown_X".into(),
                reason: SkipReason::Unmapped
            }]
        );
        assert_eq!(h.twin.patches().len(), 1);
        assert!(h.twin.patches()[0].contains_key("Log_Level"));
        assert_eq!(h.emitter.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_skips_without_ack() {
        let mut h = steady(MapEnv::new()).await;

        let outcome = h
            .sync
            .apply_desired_change(batch(
                7,
                json!({ "Log_Timestamp": "sometimes", "Transport": "carrier-pigeon" }),
            ))
            .await
            .unwrap();

        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
        assert!(outcome
            .skipped
            .iter()
            .all(|s| matches!(s.reason, SkipReason::Parse(_))));
        assert!(!outcome.notified);
        assert!(h.twin.patches().is_empty());
        assert_eq!(h.sync.snapshot().get("logTimestamp"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_parsed_value_stored_raw_value_acked() {
        let mut h = steady(MapEnv::new()).await;

        h.sync
            .apply_desired_change(batch(8, json!({ "Log_Timestamp": "true" })))
            .await
            .unwrap();

        assert_eq!(h.sync.snapshot().get("logTimestamp"), Some(&json!(true)));
        assert_eq!(h.twin.patches()[0]["Log_Timestamp"]["value"], json!("true"));
    }

    #[tokio::test]
    async fn test_environment_override_not_touched() {
        let mut h = steady(MapEnv::new().with("logLevel", "error")).await;

        let outcome = h
            .sync
            .apply_desired_change(batch(9, json!({ "Log_Level": "info" })))
            .await
            .unwrap();

        assert_eq!(outcome.skipped[0].reason, SkipReason::EnvironmentOverride);
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("error")));
        assert_eq!(h.sync.snapshot().base_value("logLevel"), Some(&json!("debug")));
        assert!(h.twin.patches().is_empty());
        assert!(!outcome.notified);
    }

    #[tokio::test]
    async fn test_ack_failure_is_isolated() {
        let twin = RecordingTwin {
            reject_property: Some("Log_Level".into()),
            ..Default::default()
        };
        let mut h = harness(twin, MapEnv::new());
        h.sync.initialize().await.unwrap();
        h.twin.patches.lock().unwrap().clear();

        let outcome = h
            .sync
            .apply_desired_change(batch(10, json!({ "Log_Level": "info", "Transport": "http" })))
            .await
            .unwrap();

        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.failed_acks, vec!["Log_Level".to_string()]);
        // the property stays applied even though its ack failed
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("info")));
        assert_eq!(h.twin.patches().len(), 1);
        assert!(h.twin.patches()[0].contains_key("Transport"));
        assert!(outcome.notified);
    }

    #[tokio::test]
    async fn test_reapplying_same_value_acks_again() {
        let mut h = steady(MapEnv::new()).await;

        h.sync
            .apply_desired_change(batch(11, json!({ "Log_Level": "info" })))
            .await
            .unwrap();
        h.sync
            .apply_desired_change(batch(12, json!({ "Log_Level": "info" })))
            .await
            .unwrap();

        let patches = h.twin.patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1]["Log_Level"]["av"], json!(12));
        assert_eq!(h.emitter.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_updates_disabled() {
        let mut h = steady(MapEnv::new().with("DISABLE_TWIN_UPDATES", "true")).await;

        let outcome = h
            .sync
            .apply_desired_change(batch(13, json!({ "Log_Level": "info" })))
            .await
            .unwrap();

        assert_eq!(outcome.skipped[0].reason, SkipReason::UpdatesDisabled);
        assert_eq!(h.sync.snapshot().get("logLevel"), Some(&json!("debug")));
        assert!(h.twin.patches().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_silent() {
        let mut h = steady(MapEnv::new()).await;

        let outcome = h
            .sync
            .apply_desired_change(DesiredChangeBatch::new(14, Vec::new()))
            .await
            .unwrap();

        assert!(!outcome.notified);
        assert!(h.emitter.events.lock().unwrap().is_empty());
    }

    // =========================================================================
    // Persistence & Run Loop
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_notification_follows_every_ack() {
        let twin = Arc::new(SlowTwin::default());
        let emitter = Arc::new(AckCountingEmitter {
            twin: twin.clone(),
            acks_seen: Mutex::default(),
        });
        let mut sync = TwinSynchronizer::builder(schema())
            .twin(twin.clone())
            .emitter(emitter.clone())
            .snapshot(base_snapshot(&MapEnv::new()))
            .build()
            .unwrap();
        sync.initialize().await.unwrap();
        twin.patches.lock().unwrap().clear();

        let started = tokio::time::Instant::now();
        let outcome = sync
            .apply_desired_change(batch(
                20,
                json!({
                    "Log_Level": "info",
                    "Log_Timestamp": true,
                    "Transport": "http",
                    "Unknown_X": 1
                }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.applied.len(), 3);
        assert_eq!(*emitter.acks_seen.lock().unwrap(), vec![3]);
        // acks are in flight together: the slowest one (130ms) bounds the batch
        assert!(started.elapsed() < Duration::from_millis(310));
    }

    #[tokio::test]
    async fn test_file_store_round_trip_drops_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("app.conf.json");
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(
            &path,
            r#"{ "logLevel": "warn", "__filename": "/etc/edgetwin/app.conf.json" }"#,
        )
        .unwrap();

        let store = Arc::new(JsonFileStore::new(path.clone()));
        let snapshot = ConfigSnapshot::load(
            object(json!({ "logLevel": "debug", "logTimestamp": false, "transport": "mqtt" })),
            store.read().unwrap(),
            &MapEnv::new(),
        );
        let twin: Arc<dyn RemoteTwin> = Arc::new(RecordingTwin::default());
        let mut sync = TwinSynchronizer::builder(schema())
            .twin(twin)
            .store(store.clone())
            .snapshot(snapshot)
            .build()
            .unwrap();
        sync.initialize().await.unwrap();

        sync.apply_desired_change(batch(21, json!({ "Transport": "amqp" })))
            .await
            .unwrap();
        sync.persist().unwrap();

        let stored = store.read().unwrap();
        assert_eq!(stored, sync.snapshot().persisted());
        assert_eq!(stored["transport"], json!("amqp"));
        assert_eq!(stored["logLevel"], json!("warn"));
        assert!(stored.keys().all(|key| !key.starts_with("__")));
        assert!(!std::fs::read_to_string(&path).unwrap().contains("__filename"));
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let mut h = steady(MapEnv::new().with("transport", "http")).await;

        h.sync
            .apply_desired_change(batch(15, json!({ "Log_Level": "info" })))
            .await
            .unwrap();
        h.sync.persist().unwrap();

        let stored = h.store.read().unwrap();
        assert_eq!(stored, h.sync.snapshot().persisted());
        assert_eq!(stored["logLevel"], json!("info"));
        assert_eq!(stored["transport"], json!("mqtt"));
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let twin: Arc<dyn RemoteTwin> = Arc::new(RecordingTwin::default());
        let sync = TwinSynchronizer::builder(schema())
            .twin(twin)
            .store(Arc::new(BrokenStore))
            .build()
            .unwrap();

        let err = sync.persist().unwrap_err();
        assert!(matches!(err, SyncError::Persist(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_builder_requires_twin() {
        assert!(TwinSynchronizer::builder(schema()).build().is_err());
    }

    #[tokio::test]
    async fn test_run_applies_queued_batches_then_persists() {
        let (twin, desired_rx) = LocalTwin::new(8);
        let store = Arc::new(MemoryStore::default());
        let mut sync = TwinSynchronizer::builder(schema())
            .twin(Arc::new(twin.clone()))
            .store(store.clone())
            .snapshot(base_snapshot(&MapEnv::new()))
            .build()
            .unwrap();
        sync.initialize().await.unwrap();

        twin.push_desired(object(json!({ "Log_Level": "info" })))
            .await
            .unwrap();
        twin.push_desired(object(json!({ "Transport": "amqp" })))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        shutdown_tx.send(()).await.unwrap();

        sync.run(desired_rx, shutdown_rx).await.unwrap();

        let stored = store.read().unwrap();
        assert_eq!(stored["logLevel"], json!("info"));
        assert_eq!(stored["transport"], json!("amqp"));

        let reported = twin.reported().unwrap();
        assert_eq!(reported["Transport"]["av"], json!(2));
        assert_eq!(reported["moduleVersion"], json!(env!("CARGO_PKG_VERSION")));
    }
}
