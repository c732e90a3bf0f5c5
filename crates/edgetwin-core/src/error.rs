//! # Error Types
//!
//! Domain-specific error types for edgetwin-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  edgetwin-core errors (this file)                                      │
//! │  ├── CoreError     - Schema construction, backoff policy               │
//! │  └── SchemaError   - Per-property lookup and parse failures            │
//! │                                                                         │
//! │  edgetwin-sync errors (separate crate)                                 │
//! │  └── SyncError     - Twin fetch, ack, persist, settings failures       │
//! │                                                                         │
//! │  Flow: SchemaError → (logged, entry skipped) | CoreError → SyncError   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `SchemaError` raised while applying one desired property never
//! propagates past that property. `CoreError` only surfaces at startup.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while building the static parts of the system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backoff policy parameters are inconsistent.
    ///
    /// ## When This Occurs
    /// - `min_timeout` is zero
    /// - `min_timeout` is greater than `max_timeout`
    /// - `factor` is below 1.0 or not finite
    #[error("Invalid backoff policy: {0}")]
    InvalidBackoff(String),

    /// Schema construction error (wraps SchemaError).
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

// =============================================================================
// Schema Error
// =============================================================================

/// Errors produced by the property schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// No descriptor is registered for the remote property name.
    #[error("Property '{0}' is not mapped to a config key")]
    UnknownProperty(String),

    /// The descriptor's parser rejected the raw value.
    #[error("Failed to parse property '{property}': {reason}")]
    Parse { property: String, reason: String },

    /// Two descriptors share the same remote name.
    #[error("Property '{0}' is declared more than once")]
    DuplicateProperty(String),

    /// A descriptor has an empty remote name or config key.
    #[error("Invalid property descriptor: {0}")]
    InvalidDescriptor(String),
}

impl SchemaError {
    /// Returns true if this error concerns a single incoming value and the
    /// rest of a batch can continue.
    pub fn is_per_property(&self) -> bool {
        matches!(
            self,
            SchemaError::UnknownProperty(_) | SchemaError::Parse { .. }
        )
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SchemaError::Parse {
            property: "Log_Timestamp".to_string(),
            reason: "expected a boolean".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to parse property 'Log_Timestamp': expected a boolean"
        );
    }

    #[test]
    fn test_per_property_classification() {
        assert!(SchemaError::UnknownProperty("X".into()).is_per_property());
        assert!(!SchemaError::DuplicateProperty("X".into()).is_per_property());
    }

    #[test]
    fn test_schema_error_converts_to_core_error() {
        let core_err: CoreError = SchemaError::DuplicateProperty("Log_Level".into()).into();
        assert!(matches!(core_err, CoreError::Schema(_)));
        assert!(core_err.to_string().contains("Log_Level"));
    }
}
