//! # Sync Error Types
//!
//! Error types for twin synchronization, supervision and config persistence.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │      Twin       │  │     Property            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  TwinFetch  ☠   │  │  Schema (parse/unknown) │ │
//! │  │  InvalidValue ☠ │  │  Ack            │  │                         │ │
//! │  │  ConfigLoad     │  │  ReportFailed   │  │                         │ │
//! │  │  Persist        │  │  SendFailed     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ☠ = fatal: the agent exits. Everything else is logged and absorbed.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use edgetwin_core::{CoreError, SchemaError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all synchronization failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration (builder misuse, bad policy parameters).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A config value is unusable (e.g. unknown transport). Fatal at startup.
    #[error("Invalid value for config key '{key}': {reason}")]
    InvalidConfigValue { key: String, reason: String },

    /// Failed to read the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to write the config file. Prior on-disk state stays valid.
    #[error("Failed to persist config: {0}")]
    Persist(String),

    // =========================================================================
    // Twin Errors
    // =========================================================================
    /// The twin snapshot could not be fetched. Fatal.
    #[error("Failed to fetch twin: {0}")]
    TwinFetch(String),

    /// Acknowledgment for one property failed. The property stays applied.
    #[error("Failed to acknowledge property '{property}': {reason}")]
    Ack { property: String, reason: String },

    /// A reported-properties update was rejected.
    #[error("Failed to update reported properties: {0}")]
    ReportFailed(String),

    /// An outbound message could not be sent.
    #[error("Failed to send message to output '{output}': {reason}")]
    SendFailed { output: String, reason: String },

    /// Desired-change payload is malformed.
    #[error("Invalid desired change: {0}")]
    InvalidBatch(String),

    // =========================================================================
    // Property Errors
    // =========================================================================
    /// Property lookup or parse failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Operation requires `initialize()` first.
    #[error("Twin synchronizer is not initialized")]
    NotInitialized,

    /// Failed to serialize a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Shared state was poisoned by a panicking task.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Schema(schema) => SyncError::Schema(schema),
            other => SyncError::InvalidConfig(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<tempfile::PersistError> for SyncError {
    fn from(err: tempfile::PersistError) -> Self {
        SyncError::Persist(err.error.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the process cannot continue after this error.
    ///
    /// ## Fatal Errors
    /// - Twin fetch failures (no valid operating state without the twin)
    /// - Invalid config values at startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::TwinFetch(_)
                | SyncError::InvalidConfigValue { .. }
                | SyncError::InvalidConfig(_)
        )
    }

    /// Returns true if this error concerns a single property of a batch.
    pub fn is_per_property(&self) -> bool {
        match self {
            SyncError::Ack { .. } => true,
            SyncError::Schema(schema) => schema.is_per_property(),
            _ => false,
        }
    }
}
