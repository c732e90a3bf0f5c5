//! # Alert State Machine
//!
//! Two-state (OK / ALERT) broadcaster with heartbeat throttling.
//!
//! ## Broadcast Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      When does `change` fire?                           │
//! │                                                                         │
//! │  new != prev, prev known      ──► BROADCAST (genuine transition)       │
//! │  never broadcast before       ──► record time, stay silent             │
//! │  new == ALERT, no transition  ──► silent (no alert flooding)           │
//! │  new == OK,    no transition  ──► BROADCAST if                          │
//! │                                   now - last_broadcast > interval      │
//! │                                   (heartbeat while healthy)            │
//! │                                                                         │
//! │  Example (interval = 60s):                                             │
//! │    t=0   state_ok     → silent (first observation)                     │
//! │    t=1   state_alert  → change { ALERT, prev: OK }                     │
//! │    t=2   state_alert  → silent                                          │
//! │    t=3   state_ok     → change { OK, prev: ALERT }                     │
//! │    t=70  state_ok     → change { OK, prev: OK }  (heartbeat)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State tracking and broadcasting are decoupled: `before_change` fires and
//! the current state is recorded on every call, whatever the policy decides.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};

// =============================================================================
// State Tokens
// =============================================================================

/// Default state tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Ok,
    Alert,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Ok => write!(f, "OK"),
            AlertLevel::Alert => write!(f, "ALERT"),
        }
    }
}

/// The two tokens a machine moves between.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertStates<S> {
    pub ok: S,
    pub alert: S,
}

impl Default for AlertStates<AlertLevel> {
    fn default() -> Self {
        AlertStates {
            ok: AlertLevel::Ok,
            alert: AlertLevel::Alert,
        }
    }
}

// =============================================================================
// Change Event
// =============================================================================

/// Payload of a `change` broadcast: `{state, prevState, ...details}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange<S> {
    pub state: S,

    #[serde(rename = "prevState")]
    pub prev_state: Option<S>,

    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Observer for state machine notifications.
pub trait AlertListener<S>: Send + Sync {
    /// Called on every state request, before the state is recorded.
    fn before_change(&self, _new_state: &S, _prev_state: Option<&S>) {}

    /// Called when the broadcast policy lets a change through.
    fn on_change(&self, change: &StateChange<S>);
}

// =============================================================================
// State Machine
// =============================================================================

/// OK/ALERT broadcaster.
pub struct AlertStateMachine<S, C = SystemClock> {
    states: AlertStates<S>,
    broadcast_interval: Duration,
    clock: C,
    current: Option<S>,
    last_broadcast: Option<DateTime<Utc>>,
    listeners: Vec<Arc<dyn AlertListener<S>>>,
}

impl<S> AlertStateMachine<S, SystemClock>
where
    S: Clone + PartialEq + 'static,
{
    /// Creates a machine driven by the system clock.
    pub fn new(broadcast_interval: Duration, states: AlertStates<S>) -> Self {
        Self::with_clock(broadcast_interval, states, SystemClock)
    }
}

impl<S, C> AlertStateMachine<S, C>
where
    S: Clone + PartialEq + 'static,
    C: Clock,
{
    /// Creates a machine driven by the given clock.
    pub fn with_clock(broadcast_interval: Duration, states: AlertStates<S>, clock: C) -> Self {
        AlertStateMachine {
            states,
            broadcast_interval,
            clock,
            current: None,
            last_broadcast: None,
            listeners: Vec::new(),
        }
    }

    /// Registers an observer.
    pub fn subscribe(&mut self, listener: Arc<dyn AlertListener<S>>) {
        self.listeners.push(listener);
    }

    /// Requests a transition to OK. Returns the broadcast event, if any.
    pub fn state_ok(&mut self, details: Map<String, Value>) -> Option<StateChange<S>> {
        let new_state = self.states.ok.clone();
        let prev_state = self.current.clone();
        self.state_change(new_state, prev_state, details)
    }

    /// Requests a transition to ALERT. Returns the broadcast event, if any.
    pub fn state_alert(&mut self, details: Map<String, Value>) -> Option<StateChange<S>> {
        let new_state = self.states.alert.clone();
        let prev_state = self.current.clone();
        self.state_change(new_state, prev_state, details)
    }

    pub fn current_state(&self) -> Option<&S> {
        self.current.as_ref()
    }

    pub fn last_broadcast_time(&self) -> Option<DateTime<Utc>> {
        self.last_broadcast
    }

    pub fn broadcast_interval(&self) -> Duration {
        self.broadcast_interval
    }

    fn state_change(
        &mut self,
        new_state: S,
        prev_state: Option<S>,
        details: Map<String, Value>,
    ) -> Option<StateChange<S>> {
        for listener in &self.listeners {
            listener.before_change(&new_state, prev_state.as_ref());
        }
        self.current = Some(new_state.clone());

        if !self.should_broadcast(&new_state, prev_state.as_ref()) {
            return None;
        }

        self.last_broadcast = Some(self.clock.now());
        let change = StateChange {
            state: new_state,
            prev_state,
            details,
        };
        for listener in &self.listeners {
            listener.on_change(&change);
        }
        Some(change)
    }

    fn should_broadcast(&mut self, new_state: &S, prev_state: Option<&S>) -> bool {
        if let Some(prev) = prev_state {
            if prev != new_state {
                return true;
            }
        }

        let last = match self.last_broadcast {
            Some(last) => last,
            None => {
                self.last_broadcast = Some(self.clock.now());
                return false;
            }
        };

        if *new_state == self.states.alert {
            return false;
        }

        let silence = (self.clock.now() - last).to_std().unwrap_or_default();
        silence > self.broadcast_interval
    }
}
