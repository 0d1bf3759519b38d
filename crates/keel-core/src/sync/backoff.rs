//! Retry backoff policy
//!
//! Exponential growth with full jitter. The jitter spreads reconnecting
//! devices out after a server outage instead of letting them stampede in
//! lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule for retryable sync failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay before the first retry (ms)
    pub initial_delay_ms: u64,
    /// Ceiling on any single delay (ms)
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt
    pub factor: f64,
    /// Attempts before an operation is marked permanently failed
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            factor: 2.0,
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), jittered.
    ///
    /// The returned delay is drawn uniformly from [0, cap] where cap is the
    /// exponential schedule clamped to `max_delay_ms`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let cap = self.cap_for(attempt);
        if cap == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=cap)
    }

    /// Whether another attempt is allowed after `attempts` tries
    #[must_use]
    pub const fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    fn cap_for(&self, attempt: u32) -> u64 {
        let exp = self.factor.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let raw = (self.initial_delay_ms as f64) * exp;
        if raw >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            raw as u64
        }
    }
}
