//! Configuration management

use std::{collections::BTreeMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Named circuit breakers to pre-register
    pub breakers: BTreeMap<String, CircuitBreakerConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (overridden by `RUST_LOG`)
    pub level: String,
    /// Output format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes to close
    pub success_threshold: u32,
    /// Probe calls admitted concurrently while half-open
    pub half_open_max_calls: u32,
    /// Record a call abandoned mid-flight (dropped future, panic) as a failure
    pub count_cancellation_as_failure: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_calls: 1,
            count_cancellation_as_failure: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Check that the thresholds describe a breaker that can both open and close
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".to_string()));
        }
        if self.success_threshold == 0 {
            return Err(Error::Config("success_threshold must be at least 1".to_string()));
        }
        if self.half_open_max_calls == 0 {
            return Err(Error::Config(
                "half_open_max_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from an optional YAML file and `CIRCUIT_GUARD_` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CIRCUIT_GUARD_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every configured breaker
    pub fn validate(&self) -> Result<()> {
        for (name, breaker) in &self.breakers {
            breaker
                .validate()
                .map_err(|e| Error::Config(format!("breaker '{name}': {e}")))?;
        }
        Ok(())
    }
}
