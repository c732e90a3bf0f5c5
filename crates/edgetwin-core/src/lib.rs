//! # edgetwin-core: Pure Logic for Edgetwin
//!
//! This crate holds the parts of the edge module that have no I/O: the
//! property schema, the backoff delay math and the alert state machine.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Edgetwin Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/edgetwin-agent (binary)                    │   │
//! │  │    settings ──► logging ──► synchronizer ──► health monitor     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    edgetwin-sync (async)                        │   │
//! │  │   TwinSynchronizer, RetryMonitor, ConfigSnapshot, stores       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ edgetwin-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  schema   │  │  backoff  │  │   alert   │  │   clock   │  │   │
//! │  │   │ Property  │  │  jittered │  │ OK/ALERT  │  │  System/  │  │   │
//! │  │   │ Schema    │  │  delays   │  │ heartbeat │  │  Manual   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO FILESYSTEM                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`schema`] - Remote property name → config key mapping with parsers
//! - [`backoff`] - Jittered exponential delay computation
//! - [`alert`] - Two-state broadcaster with heartbeat throttling
//! - [`clock`] - Time source abstraction
//! - [`error`] - Core error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod alert;
pub mod backoff;
pub mod clock;
pub mod error;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use alert::{AlertLevel, AlertListener, AlertStateMachine, AlertStates, StateChange};
pub use backoff::{BackoffPolicy, DEFAULT_FACTOR};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, SchemaError};
pub use schema::{PropertyDescriptor, PropertySchema, PropertySchemaBuilder, ValueParser};
