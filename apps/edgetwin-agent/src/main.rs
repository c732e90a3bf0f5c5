//! # Edgetwin Agent
//!
//! Host binary wiring the synchronizer, health monitor and outputs to an
//! in-memory twin.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Agent Startup                                    │
//! │                                                                         │
//! │  1. defaults ◄── config/app.conf.json ◄── environment                  │
//! │  2. AgentSettings (unknown transport → exit 1)                          │
//! │  3. tracing subscriber                                                  │
//! │  4. TwinSynchronizer::initialize (fetch failure → exit 1)              │
//! │  5. health monitor, console feed, synchronizer loop                     │
//! │  6. Ctrl+C / SIGTERM → stop monitor → stop sync → persist              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod console;
mod health;
mod logging;
mod properties;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use edgetwin_sync::{
    config_path, AgentSettings, ConfigSnapshot, ConfigStore, JsonFileStore, LocalTwin,
    OutputSender, ProcessEnv, RemoteTwin, SyncControls, TwinSynchronizer,
};

use crate::health::HealthMonitor;
use crate::properties::{agent_schema, RestartNotice};

/// Desired batches buffered between the twin and the synchronizer.
const DESIRED_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = ProcessEnv;
    let schema = agent_schema()?;

    // Load configuration
    let store = Arc::new(JsonFileStore::new(config_path(&env)));
    let file = store.read().context("failed to read config file")?;
    let mut snapshot = ConfigSnapshot::load(AgentSettings::defaults(), file, &env);
    snapshot.apply_env_overrides(&env, schema.config_keys());
    let settings = AgentSettings::from_snapshot(&snapshot).context("invalid configuration")?;

    logging::init(&settings)?;
    info!(
        transport = %settings.transport,
        config = ?store.path(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting edgetwin agent"
    );

    let controls = SyncControls::from_env(&env);
    let (twin, desired_rx) = LocalTwin::new(DESIRED_QUEUE);
    let remote: Arc<dyn RemoteTwin> = Arc::new(twin.clone());

    let mut sync = TwinSynchronizer::builder(schema)
        .twin(remote.clone())
        .store(store)
        .snapshot(snapshot)
        .controls(controls)
        .module_version(env!("CARGO_PKG_VERSION"))
        .emitter(Arc::new(RestartNotice))
        .build()?;

    match sync.initialize().await {
        Ok(initial) => info!(?initial, "Twin synchronized"),
        Err(e) => {
            error!(error = %e, "Failed to initialize twin");
            return Err(e.into());
        }
    }

    let sender = OutputSender::new(remote.clone(), &controls);
    let health = HealthMonitor::start(remote, &settings, sender)?;
    let console = tokio::spawn(console::feed_desired(twin));

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let sync_task = tokio::spawn(async move { sync.run(desired_rx, shutdown_rx).await });

    shutdown_signal().await;

    health.shutdown().await;
    if shutdown_tx.send(()).await.is_err() {
        warn!("Synchronizer already stopped");
    }
    sync_task.await??;
    console.abort();

    info!("Agent shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
