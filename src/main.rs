//! circuit-guard - inspect and exercise configured circuit breakers

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use circuit_guard::{
    BreakerRegistry, CallError,
    cli::{Cli, Command, OutputFormat, SimStep, parse_outcomes},
    config::{CircuitBreakerConfig, Config},
    failsafe::StateInfo,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::Validate => run_validate(&cli),
        Command::Summary { format } => run_summary(&cli, *format),
        Command::Simulate { name, outcomes } => run_simulate(&cli, name, outcomes).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    Config::load(cli.config.as_deref()).context("Failed to load configuration")
}

fn run_validate(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    println!("✅ Configuration valid ({} breakers)", config.breakers.len());
    for (name, breaker) in &config.breakers {
        println!(
            "   {name}: failure_threshold={} recovery_timeout={:?} success_threshold={} half_open_max_calls={}",
            breaker.failure_threshold,
            breaker.recovery_timeout,
            breaker.success_threshold,
            breaker.half_open_max_calls,
        );
    }
    Ok(())
}

fn run_summary(cli: &Cli, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let registry = BreakerRegistry::from_config(&config)?;
    let summary = registry.summary();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&summary)?),
        OutputFormat::Table => print_table(&summary),
    }
    Ok(())
}

fn print_table(summary: &[StateInfo]) {
    if summary.is_empty() {
        println!("No circuit breakers configured.");
        return;
    }

    println!(
        "{:<24} {:<10} {:>9} {:>9} {:>9} {:>9}",
        "NAME", "STATE", "SUCCESS", "FAILURE", "REJECTED", "RATE"
    );
    for info in summary {
        println!(
            "{:<24} {:<10} {:>9} {:>9} {:>9} {:>8.1}%",
            info.name,
            info.state.to_string(),
            info.stats.success_count,
            info.stats.failure_count,
            info.stats.rejected_requests,
            info.failure_rate * 100.0
        );
    }
}

#[derive(Debug, thiserror::Error)]
#[error("simulated failure")]
struct SimulatedFailure;

async fn run_simulate(cli: &Cli, name: &str, outcomes: &str) -> anyhow::Result<()> {
    let steps = parse_outcomes(outcomes)?;
    let config = load_config(cli)?;
    let registry = BreakerRegistry::from_config(&config)?;
    let breaker = registry.get_or_create(name, &CircuitBreakerConfig::default());

    for (index, step) in steps.iter().enumerate() {
        let label = match step {
            SimStep::Success | SimStep::Failure => {
                let fail = *step == SimStep::Failure;
                let result = breaker
                    .call_async(async move {
                        if fail { Err(SimulatedFailure) } else { Ok(()) }
                    })
                    .await;
                match result {
                    Ok(()) => "success".to_string(),
                    Err(CallError::Failed(e)) => format!("failed ({e})"),
                    Err(CallError::Rejected(open)) => format!("rejected ({open})"),
                }
            }
            SimStep::Wait => {
                let timeout = breaker.config().recovery_timeout;
                tokio::time::sleep(timeout).await;
                format!("waited {timeout:?}")
            }
            SimStep::Reset => {
                breaker.reset();
                "reset".to_string()
            }
        };
        println!("{:>3}. {label:<60} -> {}", index + 1, breaker.state());
    }

    println!();
    println!("{}", breaker.status_message());
    println!("{}", serde_json::to_string_pretty(&breaker.stats())?);
    Ok(())
}
