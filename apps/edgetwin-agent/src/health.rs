//! # Twin Health Monitor
//!
//! Probes the twin on a backoff timer and reports OK/ALERT transitions as
//! output messages.
//!
//! ```text
//! RetryMonitor ──probe──► TwinProbe (fetch)
//!      │
//!      └─ on_result ──► AlertStateMachine ──► ChangeForwarder ──mpsc──► OutputSender
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use edgetwin_core::{AlertLevel, AlertListener, AlertStateMachine, AlertStates, StateChange};
use edgetwin_sync::{
    AgentSettings, AttemptContext, MonitorHandle, MonitorOperation, OutputSender, RemoteTwin,
    RetryMonitor, SyncResult,
};

/// Buffered alert changes waiting to be sent.
const CHANGE_QUEUE: usize = 32;

/// Healthy when the twin can be fetched.
pub struct TwinProbe {
    twin: Arc<dyn RemoteTwin>,
}

impl TwinProbe {
    pub fn new(twin: Arc<dyn RemoteTwin>) -> Self {
        TwinProbe { twin }
    }
}

#[async_trait]
impl MonitorOperation for TwinProbe {
    async fn run(&mut self, context: AttemptContext) -> bool {
        match self.twin.fetch().await {
            Ok(_) => true,
            Err(e) => {
                warn!(attempt = context.attempt, error = %e, "Twin probe failed");
                false
            }
        }
    }
}

/// Hands broadcast changes to the sender task.
pub struct ChangeForwarder {
    tx: mpsc::Sender<StateChange<AlertLevel>>,
}

impl AlertListener<AlertLevel> for ChangeForwarder {
    fn before_change(&self, new_state: &AlertLevel, prev_state: Option<&AlertLevel>) {
        debug!(state = %new_state, prev = ?prev_state, "Health state observed");
    }

    fn on_change(&self, change: &StateChange<AlertLevel>) {
        if let Err(e) = self.tx.try_send(change.clone()) {
            warn!(error = %e, "Dropping health change");
        }
    }
}

/// Running health monitor.
pub struct HealthMonitor {
    monitor: MonitorHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Starts the probe loop and the change sender.
    pub fn start(
        twin: Arc<dyn RemoteTwin>,
        settings: &AgentSettings,
        sender: OutputSender,
    ) -> SyncResult<Self> {
        let (tx, mut rx) = mpsc::channel(CHANGE_QUEUE);

        let mut machine = AlertStateMachine::new(settings.broadcast_interval, AlertStates::default());
        machine.subscribe(Arc::new(ChangeForwarder { tx }));

        let monitor = RetryMonitor::new(settings.backoff_policy()?, TwinProbe::new(twin)).on_result(
            move |healthy, context| {
                let details = attempt_details(context);
                if healthy {
                    machine.state_ok(details);
                } else {
                    machine.state_alert(details);
                }
            },
        );
        let handle = monitor.handle();
        let probe_task = monitor.perform();

        let send_task = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                info!(state = %change.state, "Health state changed");
                if let Err(e) = sender.send(&change).await {
                    warn!(error = %e, "Failed to send health change");
                }
            }
        });

        Ok(HealthMonitor {
            monitor: handle,
            tasks: vec![probe_task, send_task],
        })
    }

    /// Stops probing and waits for pending changes to be sent.
    pub async fn shutdown(self) {
        self.monitor.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Health task ended abnormally");
            }
        }
    }
}

fn attempt_details(context: &AttemptContext) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("attempt".into(), Value::from(context.attempt));
    let timeout_ms = u64::try_from(context.timeout.as_millis()).unwrap_or(u64::MAX);
    details.insert("timeoutMs".into(), Value::from(timeout_ms));
    details
}
