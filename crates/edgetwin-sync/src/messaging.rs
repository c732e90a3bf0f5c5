//! # Outbound Messaging
//!
//! Sends JSON payloads on the module's named outputs.
//!
//! With `DISABLE_MESSAGING` set nothing leaves the module; `send` reports
//! whether the payload went out.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::env::SyncControls;
use crate::error::{SyncError, SyncResult};
use crate::twin::RemoteTwin;

/// Output used when the caller does not name one.
pub const DEFAULT_OUTPUT: &str = "output_messages";

/// Sender for outbound messages.
#[derive(Clone)]
pub struct OutputSender {
    twin: Arc<dyn RemoteTwin>,
    messaging_enabled: bool,
    default_output: String,
}

impl OutputSender {
    pub fn new(twin: Arc<dyn RemoteTwin>, controls: &SyncControls) -> Self {
        OutputSender {
            twin,
            messaging_enabled: !controls.disable_messaging,
            default_output: DEFAULT_OUTPUT.to_string(),
        }
    }

    /// Changes the output used by [`send`](Self::send).
    pub fn with_default_output(mut self, output: impl Into<String>) -> Self {
        self.default_output = output.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.messaging_enabled
    }

    /// Sends to the default output.
    pub async fn send<T: Serialize>(&self, payload: &T) -> SyncResult<bool> {
        let output = self.default_output.clone();
        self.send_to(&output, payload).await
    }

    /// Sends to a named output. Returns `false` when messaging is disabled.
    pub async fn send_to<T: Serialize>(&self, output: &str, payload: &T) -> SyncResult<bool> {
        if !self.messaging_enabled {
            debug!(output = %output, "Messaging disabled, dropping message");
            return Ok(false);
        }

        let payload: Value = serde_json::to_value(payload)?;
        self.twin
            .send_output_event(output, payload)
            .await
            .map_err(|e| {
                warn!(output = %output, error = %e, "Failed to send message");
                match e {
                    SyncError::SendFailed { .. } => e,
                    other => SyncError::SendFailed {
                        output: output.to_string(),
                        reason: other.to_string(),
                    },
                }
            })?;

        debug!(output = %output, "Message sent");
        Ok(true)
    }
}
