//! State-change observers

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use super::CircuitState;

/// Receives a breaker's state transitions
///
/// Called after the breaker lock is released, once per real transition.
/// A panicking observer is caught and logged; it never reaches the caller.
pub trait BreakerObserver: Send + Sync {
    /// The circuit opened
    fn on_open(&self, _name: &str) {}

    /// The circuit closed
    fn on_close(&self, _name: &str) {}

    /// The circuit started probing for recovery
    fn on_half_open(&self, _name: &str) {}
}

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer assembled from optional closures
#[derive(Clone, Default)]
pub struct CallbackObserver {
    on_open: Option<Callback>,
    on_close: Option<Callback>,
    on_half_open: Option<Callback>,
}

impl CallbackObserver {
    /// Observer with no callbacks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the open callback
    #[must_use]
    pub fn on_open(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Set the close callback
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Set the half-open callback
    #[must_use]
    pub fn on_half_open(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_half_open = Some(Arc::new(f));
        self
    }
}

impl BreakerObserver for CallbackObserver {
    fn on_open(&self, name: &str) {
        if let Some(f) = &self.on_open {
            f(name);
        }
    }

    fn on_close(&self, name: &str) {
        if let Some(f) = &self.on_close {
            f(name);
        }
    }

    fn on_half_open(&self, name: &str) {
        if let Some(f) = &self.on_half_open {
            f(name);
        }
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}

/// Deliver a transition into `state` to every observer
pub(crate) fn notify(observers: &[Arc<dyn BreakerObserver>], name: &str, state: CircuitState) {
    for observer in observers {
        let outcome = catch_unwind(AssertUnwindSafe(|| match state {
            CircuitState::Open => observer.on_open(name),
            CircuitState::Closed => observer.on_close(name),
            CircuitState::HalfOpen => observer.on_half_open(name),
        }));

        if let Err(panic) = outcome {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(breaker = %name, state = %state, error = %message, "Circuit breaker observer panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_callbacks_route_by_state() {
        let opens = Arc::new(AtomicU32::new(0));
        let closes = Arc::new(AtomicU32::new(0));
        let o = Arc::clone(&opens);
        let c = Arc::clone(&closes);
        let observer: Arc<dyn BreakerObserver> = Arc::new(
            CallbackObserver::new()
                .on_open(move |_| {
                    o.fetch_add(1, Ordering::SeqCst);
                })
                .on_close(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
        );

        notify(&[Arc::clone(&observer)], "svc", CircuitState::Open);
        notify(&[Arc::clone(&observer)], "svc", CircuitState::HalfOpen);
        notify(&[observer], "svc", CircuitState::Closed);

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let reached = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&reached);
        let observers: Vec<Arc<dyn BreakerObserver>> = vec![
            Arc::new(CallbackObserver::new().on_open(|_| panic!("alert sink down"))),
            Arc::new(CallbackObserver::new().on_open(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            })),
        ];

        notify(&observers, "svc", CircuitState::Open);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
