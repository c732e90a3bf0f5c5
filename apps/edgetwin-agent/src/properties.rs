//! Desired properties the agent accepts, and what it does when they change.

use tracing::warn;

use edgetwin_core::{PropertySchema, SchemaError, ValueParser};
use edgetwin_sync::{PropertiesUpdated, TransportKind, TwinEventEmitter};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

/// Remote property name → config key table for the agent.
pub fn agent_schema() -> Result<PropertySchema, SchemaError> {
    PropertySchema::builder()
        .map("Log_Level", "logLevel", ValueParser::OneOf(LOG_LEVELS))
        .map("Log_Format", "logFormat", ValueParser::OneOf(LOG_FORMATS))
        .map("Log_Timestamp", "logTimestamp", ValueParser::Bool)
        .map("Transport", "transport", ValueParser::OneOf(TransportKind::NAMES))
        .map("Broadcast_Interval", "broadcastIntervalSecs", ValueParser::Integer)
        .build()
}

/// Settings are read once at startup, so applied changes need a restart.
pub struct RestartNotice;

impl TwinEventEmitter for RestartNotice {
    fn emit_properties_updated(&self, event: &PropertiesUpdated) {
        warn!(
            version = event.version,
            properties = ?event.properties,
            "Properties updated, restart the agent to apply them"
        );
    }
}
