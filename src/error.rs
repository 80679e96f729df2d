//! Error types for circuit-guard

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::failsafe::CircuitState;

/// Result type alias for circuit-guard
pub type Result<T> = std::result::Result<T, Error>;

/// circuit-guard errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A breaker with this name is already registered
    #[error("Circuit breaker '{0}' already registered")]
    AlreadyRegistered(String),

    /// Call rejected by an open (or saturated half-open) circuit
    #[error(transparent)]
    CircuitOpen(#[from] BreakerOpen),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the admit phase turned a call away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RejectReason {
    /// The circuit is open and the recovery timeout has not elapsed
    Open,
    /// Every probe slot of the half-open circuit is taken
    ProbeLimit {
        /// Configured probe capacity
        max_calls: u32,
    },
}

/// Breaker-open signal returned instead of running the wrapped call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerOpen {
    /// Breaker name
    pub name: String,
    /// State observed at admission
    pub state: CircuitState,
    /// Rejection reason
    pub reason: RejectReason,
}

impl fmt::Display for BreakerOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            RejectReason::Open => write!(
                f,
                "Circuit breaker '{}' is {}: service unavailable until the recovery timeout elapses",
                self.name, self.state
            ),
            RejectReason::ProbeLimit { max_calls } => write!(
                f,
                "Circuit breaker '{}' is {}: maximum probe calls ({max_calls}) already in progress",
                self.name, self.state
            ),
        }
    }
}

impl std::error::Error for BreakerOpen {}

/// Outcome of a guarded call that did not succeed
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker refused to run the call
    #[error(transparent)]
    Rejected(BreakerOpen),

    /// The wrapped call failed; the error is passed through unchanged
    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    /// Whether the breaker rejected the call without running it
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The breaker-open signal, if this was a rejection
    pub fn rejection(&self) -> Option<&BreakerOpen> {
        match self {
            Self::Rejected(open) => Some(open),
            Self::Failed(_) => None,
        }
    }

    /// The wrapped call's error, if the call ran and failed
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Rejected(_) => None,
            Self::Failed(e) => Some(e),
        }
    }
}

impl<E> From<BreakerOpen> for CallError<E> {
    fn from(open: BreakerOpen) -> Self {
        Self::Rejected(open)
    }
}
