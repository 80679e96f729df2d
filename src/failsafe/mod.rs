//! Failsafe mechanisms: circuit breakers, failure classification, observers, registry

mod circuit_breaker;
mod classifier;
mod observer;
mod permit;
mod registry;
mod stats;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitState, GuardedFuture, StateInfo,
};
pub use classifier::FailureClassifier;
pub use observer::{BreakerObserver, CallbackObserver};
pub use permit::CallPermit;
pub use registry::{BreakerRegistry, breaker, global};
pub use stats::BreakerStats;
