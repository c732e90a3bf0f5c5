//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured `logLevel` when set.

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use edgetwin_sync::{AgentSettings, LogFormat};

/// Installs the global subscriber.
pub fn init(settings: &AgentSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_level)
            .map_err(|e| anyhow!("invalid logLevel '{}': {}", settings.log_level, e))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match (settings.log_format, settings.log_timestamp) {
        (LogFormat::Json, true) => builder.json().try_init(),
        (LogFormat::Json, false) => builder.json().without_time().try_init(),
        (LogFormat::Text, true) => builder.compact().try_init(),
        (LogFormat::Text, false) => builder.compact().without_time().try_init(),
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
