//! # Jittered Exponential Backoff
//!
//! Delay computation for supervised retries.
//!
//! ## Formula
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   delay = min( round( U[1,2) × min_timeout × factor^attempt ),         │
//! │                max_timeout )                                           │
//! │                                                                         │
//! │   min_timeout = 100ms, max_timeout = 500ms, factor = 2                 │
//! │   ───────────────────────────────────────────────────                  │
//! │   attempt 0:  100ms .. 200ms                                            │
//! │   attempt 1:  200ms .. 400ms                                            │
//! │   attempt 2:  400ms .. 500ms (clamped)                                  │
//! │   attempt 3+: 500ms                                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The jitter multiplier is drawn uniformly from `[1, 2)` so independent
//! instances never retry in lockstep. Because the multiplier and the factor
//! are both at least 1, every delay lies in `[min_timeout, max_timeout]`.
//! Timeouts have millisecond granularity.

use std::time::Duration;

use rand::Rng;

use crate::error::{CoreError, CoreResult};

/// Growth factor used when none is configured.
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Validated backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    min_ms: u64,
    max_ms: u64,
    factor: f64,
}

impl BackoffPolicy {
    /// Creates a policy with the default factor of 2.
    pub fn new(min_timeout: Duration, max_timeout: Duration) -> CoreResult<Self> {
        Self::with_factor(min_timeout, max_timeout, DEFAULT_FACTOR)
    }

    /// Creates a policy with an explicit growth factor.
    pub fn with_factor(
        min_timeout: Duration,
        max_timeout: Duration,
        factor: f64,
    ) -> CoreResult<Self> {
        let min_ms = u64::try_from(min_timeout.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(max_timeout.as_millis()).unwrap_or(u64::MAX);

        if min_ms == 0 {
            return Err(CoreError::InvalidBackoff(
                "min_timeout must be at least 1ms".into(),
            ));
        }
        if min_ms > max_ms {
            return Err(CoreError::InvalidBackoff(format!(
                "min_timeout ({}ms) exceeds max_timeout ({}ms)",
                min_ms, max_ms
            )));
        }
        if !factor.is_finite() || factor < 1.0 {
            return Err(CoreError::InvalidBackoff(format!(
                "factor must be a finite number >= 1, got {}",
                factor
            )));
        }

        Ok(BackoffPolicy {
            min_ms,
            max_ms,
            factor,
        })
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Computes the delay for `attempt` with an explicit jitter multiplier.
    ///
    /// `jitter` is clamped into `[1, 2]`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = if jitter.is_nan() { 1.0 } else { jitter.clamp(1.0, 2.0) };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = (jitter * self.min_ms as f64 * self.factor.powi(exponent)).round();

        let max = self.max_ms as f64;
        let millis = if raw.is_finite() { raw.min(max) } else { max };

        Duration::from_millis((millis as u64).clamp(self.min_ms, self.max_ms))
    }

    /// Computes the delay for `attempt` with a fresh random jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(1.0..2.0);
        self.delay_with_jitter(attempt, jitter)
    }
}
