//! Per-breaker call statistics
//!
//! Counters are plain fields: the owning breaker mutates them while holding
//! its lock, and readers receive a cloned snapshot.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Recent call history for one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    /// Admitted calls that succeeded
    pub success_count: u64,
    /// Admitted calls that failed (classified failures only)
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Admitted calls whose outcome was recorded
    pub total_requests: u64,
    /// Calls turned away by the admit phase
    pub rejected_requests: u64,
    /// Wall-clock time of the last recorded failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the last recorded success
    pub last_success_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the last state change
    pub state_changed_time: DateTime<Utc>,
    /// Monotonic twin of `last_failure_time`, used for the recovery timeout
    #[serde(skip)]
    pub(crate) last_failure_at: Option<Instant>,
}

impl Default for BreakerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerStats {
    /// Zeroed statistics
    #[must_use]
    pub fn new() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_requests: 0,
            rejected_requests: 0,
            last_failure_time: None,
            last_success_time: None,
            state_changed_time: Utc::now(),
            last_failure_at: None,
        }
    }

    /// Record a successful call
    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.last_success_time = Some(Utc::now());
        self.total_requests += 1;
    }

    /// Record a failed call
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.last_failure_time = Some(Utc::now());
        self.last_failure_at = Some(Instant::now());
        self.total_requests += 1;
    }

    /// Record a call rejected by the admit phase
    pub fn record_rejected(&mut self) {
        self.rejected_requests += 1;
    }

    /// Clear both consecutive counters
    pub fn reset_consecutive(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    /// Zero every counter and call timestamp
    ///
    /// `state_changed_time` is kept: only a real transition moves it.
    pub fn reset(&mut self) {
        *self = Self {
            state_changed_time: self.state_changed_time,
            ..Self::new()
        };
    }

    /// Fraction of recorded calls that failed; `0.0` before any call
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_requests as f64
    }

    pub(crate) fn mark_state_changed(&mut self) {
        self.state_changed_time = Utc::now();
    }
}
