//! Named circuit breaker registry
//!
//! A registry owns `Arc` handles to breakers so every caller looking up the
//! same name shares one instance. The map lock is separate from each
//! breaker's own lock and is never held while observers run.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::info;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerBuilder, StateInfo};
use crate::config::{CircuitBreakerConfig, Config};
use crate::{Error, Result};

/// Name-keyed collection of shared circuit breakers
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

static GLOBAL: LazyLock<BreakerRegistry> = LazyLock::new(BreakerRegistry::new);

/// Process-wide registry, created on first use and never torn down
///
/// Tests that need isolation should construct their own [`BreakerRegistry`].
pub fn global() -> &'static BreakerRegistry {
    &GLOBAL
}

/// Get or create a breaker in the process-wide registry
pub fn breaker(name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
    global().get_or_create(name, config)
}

impl BreakerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding every breaker named in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let registry = Self::new();
        for (name, breaker_config) in &config.breakers {
            registry.register(CircuitBreaker::new(name, breaker_config))?;
        }
        Ok(registry)
    }

    /// Add a breaker; fails if the name is taken
    pub fn register(&self, breaker: CircuitBreaker) -> Result<Arc<CircuitBreaker>> {
        let mut breakers = self.breakers.write();
        if breakers.contains_key(breaker.name()) {
            return Err(Error::AlreadyRegistered(breaker.name().to_string()));
        }

        let name = breaker.name().to_string();
        let breaker = Arc::new(breaker);
        breakers.insert(name.clone(), Arc::clone(&breaker));
        info!(breaker = %name, "Registered circuit breaker");
        Ok(breaker)
    }

    /// Get a breaker by name
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Return the existing breaker or create one from `config`
    ///
    /// The first caller's configuration wins; later configurations for an
    /// existing name are ignored.
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.get_or_insert_with(name, |builder| builder.config(config))
    }

    /// Return the existing breaker or build one named `name`
    ///
    /// `configure` only runs when the name is absent. It receives a builder
    /// already carrying `name`, so the key and the breaker name always agree.
    pub fn get_or_insert_with<F>(&self, name: &str, configure: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce(CircuitBreakerBuilder) -> CircuitBreakerBuilder,
    {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self.breakers.write();
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }

        let breaker = Arc::new(configure(CircuitBreaker::builder(name)).build());
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        info!(breaker = %name, "Created circuit breaker");
        breaker
    }

    /// Remove a breaker; returns whether it was present
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.breakers.write().remove(name).is_some();
        if removed {
            info!(breaker = %name, "Removed circuit breaker");
        }
        removed
    }

    /// Handles to every registered breaker
    pub fn get_all(&self) -> BTreeMap<String, Arc<CircuitBreaker>> {
        self.breakers.read().clone()
    }

    /// Names of every registered breaker, sorted
    pub fn list_names(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }

    /// State snapshot of every registered breaker
    ///
    /// Holds the read lock throughout. `state_info` takes only the
    /// breaker's own lock and runs no callbacks.
    pub fn summary(&self) -> Vec<StateInfo> {
        self.breakers.read().values().map(|b| b.state_info()).collect()
    }

    /// Reset every registered breaker to closed
    ///
    /// Works on the handles present when it starts: a reset may fire
    /// observers, and those are free to register or remove breakers. A
    /// breaker registered while this runs may be left untouched.
    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
        info!("Reset all circuit breakers");
    }

    /// Remove every breaker
    pub fn clear(&self) {
        self.breakers.write().clear();
        info!("Cleared all circuit breakers from registry");
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breakers are registered
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Clone the handles so observers never run under the map lock
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.read().values().cloned().collect()
    }
}
