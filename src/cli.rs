//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::{Error, Result};

/// Inspect and exercise configured circuit breakers
#[derive(Parser, Debug)]
#[command(name = "circuit-guard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CIRCUIT_GUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CIRCUIT_GUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CIRCUIT_GUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate the configuration
    Validate,

    /// Print the state of every configured breaker
    Summary {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Drive a breaker through a sequence of call outcomes
    Simulate {
        /// Breaker name (taken from the config, or created with defaults)
        #[arg(short, long)]
        name: String,

        /// Outcomes: `s` success, `f` failure, `w` wait out the recovery timeout, `r` reset
        #[arg(short, long)]
        outcomes: String,
    },
}

/// Output formats for `summary`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable table
    Table,
    /// JSON
    Json,
    /// YAML
    Yaml,
}

/// One simulated step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStep {
    /// A call that succeeds
    Success,
    /// A call that fails
    Failure,
    /// Sleep for the breaker's recovery timeout
    Wait,
    /// Manual reset
    Reset,
}

/// Parse a simulation script such as `"ffwss"`; whitespace is ignored
pub fn parse_outcomes(script: &str) -> Result<Vec<SimStep>> {
    script
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c.to_ascii_lowercase() {
            's' => Ok(SimStep::Success),
            'f' => Ok(SimStep::Failure),
            'w' => Ok(SimStep::Wait),
            'r' => Ok(SimStep::Reset),
            other => Err(Error::Config(format!(
                "Unknown outcome '{other}' (expected s, f, w or r)"
            ))),
        })
        .collect()
}
