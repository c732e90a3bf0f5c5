//! # Retry Monitor
//!
//! Re-evaluates an operation on a self-adjusting timer and reports every
//! result, noticing when a failing operation starts succeeding again.
//!
//! ## Scheduling Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       RetryMonitor Loop                                 │
//! │                                                                         │
//! │   ┌──────────┐  delay = jitter · min · factor^attempt (≤ max)         │
//! │   │ stopped? │──yes──► exit                                            │
//! │   └────┬─────┘                                                         │
//! │        │ no                                                            │
//! │        ▼                                                                │
//! │   ┌──────────┐   stop()    ┌───────────┐                               │
//! │   │ Pending  │────────────►│ Cancelled │──► exit                       │
//! │   │ (sleep)  │             └───────────┘                               │
//! │   └────┬─────┘                                                         │
//! │        │ timer fired                                                   │
//! │        ▼                                                                │
//! │   attempt += 1                                                         │
//! │   result = operation({attempt, timeout})                               │
//! │   false → true ?  success_count += 1, attempt = 0                      │
//! │   on_result(result, context)                                           │
//! │        │                                                                │
//! │        └──────────────► back to top                                    │
//! │                                                                         │
//! │  At most one timer or operation is in flight per monitor.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `stop()` may be called from anywhere, including from inside the
//! `on_result` callback, through a [`MonitorHandle`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use edgetwin_core::BackoffPolicy;

/// What the operation is told about the attempt it is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based attempt number since the last recovery.
    pub attempt: u32,

    /// Delay that preceded this attempt.
    pub timeout: Duration,
}

/// State of the monitor's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    /// No timer armed.
    #[default]
    Idle,
    /// Waiting for the next attempt.
    Pending,
    /// Stopped; no timer will be armed again.
    Cancelled,
}

/// Snapshot of a monitor's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorState {
    pub attempt: u32,
    pub success_count: u64,
    pub last_result: bool,
    pub stopped: bool,
    pub timer: TimerState,
}

impl Default for MonitorState {
    fn default() -> Self {
        MonitorState {
            attempt: 0,
            success_count: 0,
            // a first success is not a recovery
            last_result: true,
            stopped: false,
            timer: TimerState::Idle,
        }
    }
}

// =============================================================================
// Operation Trait
// =============================================================================

/// The supervised operation.
#[async_trait]
pub trait MonitorOperation: Send + 'static {
    /// Runs one attempt. `true` means healthy.
    async fn run(&mut self, context: AttemptContext) -> bool;
}

#[async_trait]
impl<F> MonitorOperation for F
where
    F: FnMut(AttemptContext) -> bool + Send + 'static,
{
    async fn run(&mut self, context: AttemptContext) -> bool {
        (self)(context)
    }
}

type ResultCallback = Box<dyn FnMut(bool, &AttemptContext) + Send>;

// =============================================================================
// Monitor Handle
// =============================================================================

struct Shared {
    state: Mutex<MonitorState>,
    stop_tx: watch::Sender<bool>,
}

/// Cloneable control handle for a [`RetryMonitor`].
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
}

impl MonitorHandle {
    /// Stops the monitor. A pending timer is cancelled; an operation already
    /// running finishes and its result is still reported. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = match self.shared.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.timer = TimerState::Cancelled;
        }

        self.shared.stop_tx.send_replace(true);
        info!("Retry monitor stopped");
    }

    /// Current bookkeeping.
    pub fn state(&self) -> MonitorState {
        match self.shared.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }
}

// =============================================================================
// Retry Monitor
// =============================================================================

/// Supervised retry scheduler.
pub struct RetryMonitor {
    policy: BackoffPolicy,
    operation: Box<dyn MonitorOperation>,
    on_result: Option<ResultCallback>,
    handle: MonitorHandle,
}

impl RetryMonitor {
    pub fn new(policy: BackoffPolicy, operation: impl MonitorOperation) -> Self {
        let (stop_tx, _) = watch::channel(false);
        RetryMonitor {
            policy,
            operation: Box::new(operation),
            on_result: None,
            handle: MonitorHandle {
                shared: Arc::new(Shared {
                    state: Mutex::new(MonitorState::default()),
                    stop_tx,
                }),
            },
        }
    }

    /// Sets the callback invoked after every attempt.
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnMut(bool, &AttemptContext) + Send + 'static,
    {
        self.on_result = Some(Box::new(callback));
        self
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Spawns the scheduling loop. The returned task finishes after `stop()`.
    pub fn perform(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs the scheduling loop on the current task until stopped.
    pub async fn run(mut self) {
        let shared = self.handle.shared.clone();
        let mut stop_rx = shared.stop_tx.subscribe();

        info!(
            min = ?self.policy.min_timeout(),
            max = ?self.policy.max_timeout(),
            factor = self.policy.factor(),
            "Retry monitor started"
        );

        loop {
            let delay = {
                let mut state = lock(&shared);
                if state.stopped {
                    break;
                }
                state.timer = TimerState::Pending;
                self.policy.next_delay(state.attempt)
            };

            debug!(?delay, "Next attempt scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => {}
            }

            let context = {
                let mut state = lock(&shared);
                if state.stopped {
                    break;
                }
                state.timer = TimerState::Idle;
                state.attempt += 1;
                AttemptContext {
                    attempt: state.attempt,
                    timeout: delay,
                }
            };

            let result = self.operation.run(context).await;

            {
                let mut state = lock(&shared);
                if result && !state.last_result {
                    state.success_count += 1;
                    info!(
                        attempts = state.attempt,
                        recoveries = state.success_count,
                        "Operation recovered"
                    );
                    state.attempt = 0;
                }
                state.last_result = result;
            }

            debug!(attempt = context.attempt, result, "Attempt finished");

            if let Some(callback) = self.on_result.as_mut() {
                callback(result, &context);
            }
        }

        debug!("Retry monitor loop exited");
    }
}

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, MonitorState> {
    match shared.state.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    }
}
