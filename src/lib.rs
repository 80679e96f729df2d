//! circuit-guard
//!
//! Concurrency-safe circuit breakers for calls to unreliable collaborators.
//!
//! # Features
//!
//! - **State machine**: closed, open and half-open with lazy recovery probing
//! - **Guarded calls**: scoped permits, direct `call`/`call_async`, and function wrappers
//! - **Threads and tasks**: one lock per breaker with blocking and cooperative entry points
//! - **Registry**: shared, name-keyed breakers with a lazily created process-wide instance
//! - **Observability**: structured `tracing` logs, state observers, serializable snapshots

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod failsafe;

pub use error::{BreakerOpen, CallError, Error, RejectReason, Result};
pub use failsafe::{BreakerRegistry, CircuitBreaker, CircuitState};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
