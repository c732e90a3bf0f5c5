//! # edgetwin-sync: Twin Synchronization for Edgetwin
//!
//! Keeps a module's local configuration in line with its cloud twin and
//! supervises flapping operations with jittered backoff.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       edgetwin-sync Components                          │
//! │                                                                         │
//! │            desired batches (mpsc)                                       │
//! │  ┌──────────────┐ ─────────────────► ┌──────────────────────────────┐  │
//! │  │  RemoteTwin  │                    │      TwinSynchronizer        │  │
//! │  │  (LocalTwin) │ ◄───────────────── │                              │  │
//! │  └──────┬───────┘   ack patches      │  PropertySchema (core)       │  │
//! │         │                            │  ConfigSnapshot ◄── env      │  │
//! │         │ output events              │  ConfigStore ──► app.conf    │  │
//! │         ▼                            └──────────────┬───────────────┘  │
//! │  ┌──────────────┐                                   │                   │
//! │  │ OutputSender │                     PropertiesUpdated (emitter)      │
//! │  └──────────────┘                                                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  RetryMonitor: sleep(backoff) → operation → on_result → repeat   │  │
//! │  │  MonitorHandle: stop() / state() from any task                   │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`synchronizer`] - `TwinSynchronizer` and its builder
//! - [`monitor`] - `RetryMonitor` scheduling loop
//! - [`twin`] - Remote twin contract, wire types, in-memory twin
//! - [`messaging`] - Outbound messages on named outputs
//! - [`snapshot`] - Config snapshot with environment shadowing
//! - [`store`] - JSON file and in-memory config stores
//! - [`settings`] - Typed agent settings
//! - [`env`] - Environment access and control flags
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use edgetwin_sync::{LocalTwin, TwinSynchronizer};
//!
//! let (twin, desired_rx) = LocalTwin::new(16);
//! let mut sync = TwinSynchronizer::builder(schema)
//!     .twin(Arc::new(twin))
//!     .snapshot(snapshot)
//!     .build()?;
//!
//! sync.initialize().await?;
//! sync.run(desired_rx, shutdown_rx).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod env;
pub mod error;
pub mod messaging;
pub mod monitor;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod synchronizer;
pub mod twin;

// =============================================================================
// Re-exports
// =============================================================================

pub use env::{EnvSource, MapEnv, ProcessEnv, SyncControls};
pub use error::{SyncError, SyncResult};
pub use messaging::{OutputSender, DEFAULT_OUTPUT};
pub use monitor::{
    AttemptContext, MonitorHandle, MonitorOperation, MonitorState, RetryMonitor, TimerState,
};
pub use settings::{config_path, AgentSettings, LogFormat, TransportKind};
pub use snapshot::ConfigSnapshot;
pub use store::{ConfigStore, JsonFileStore, MemoryStore};
pub use synchronizer::{
    BatchOutcome, InitialSync, PropertiesUpdated, SkipReason, SkippedProperty, SyncPhase,
    TwinEventEmitter, TwinSynchronizer, TwinSynchronizerBuilder,
};
pub use twin::{AckPatch, DesiredChangeBatch, LocalTwin, RemoteTwin, TwinSnapshot};
