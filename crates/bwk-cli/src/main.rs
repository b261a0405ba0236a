use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bwk_config::Config;
use bwk_core::{init_logging, CallError, Resilience, RetryConfig, RetryPolicy};
use bwk_types::HealthReport;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bwk", about = "Bulwark - resilience layer for outbound dependency calls", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a simulated flaky dependency through breaker, retries and fallback
    Simulate(SimulateArgs),
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args)]
struct SimulateArgs {
    /// Dependency name to protect
    #[arg(long, default_value = "search")]
    dependency: String,

    /// Number of calls to make
    #[arg(long, default_value_t = 20)]
    calls: u32,

    /// Probability that a single attempt fails (0.0 - 1.0)
    #[arg(long, default_value_t = 0.5)]
    failure_rate: f64,

    /// Override the configured retry count
    #[arg(long)]
    max_retries: Option<u32>,

    /// Override the configured backoff factor (seconds)
    #[arg(long)]
    backoff_factor: Option<f64>,

    /// Override the configured maximum backoff delay (seconds)
    #[arg(long)]
    max_delay: Option<f64>,

    /// Pause between calls, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Do not register a fallback; failures surface as errors
    #[arg(long)]
    no_fallback: bool,

    /// Print the final health report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default)]
struct Tally {
    served: u32,
    degraded: u32,
    failed: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Simulate(args) => simulate(config, args).await?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

async fn simulate(config: Config, args: SimulateArgs) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        bail!(
            "--failure-rate must be between 0.0 and 1.0, got {}",
            args.failure_rate
        );
    }

    let mut retry = RetryConfig::from(&config);
    if let Some(max_retries) = args.max_retries {
        retry.max_retries = max_retries;
    }
    if let Some(factor) = args.backoff_factor {
        if !factor.is_finite() || factor < 0.0 {
            bail!("--backoff-factor must be a non-negative number, got {factor}");
        }
        retry.backoff_factor = factor;
    }
    if let Some(max_delay) = args.max_delay {
        retry.max_delay = Duration::try_from_secs_f64(max_delay)
            .context("--max-delay must be a non-negative number of seconds")?;
    }

    let resilience = Resilience::new(config);
    let breaker = resilience.breaker(&args.dependency).await;
    info!(
        dependency = %args.dependency,
        failure_threshold = breaker.config().failure_threshold,
        success_threshold = breaker.config().success_threshold,
        recovery_timeout_secs = breaker.config().recovery_timeout.as_secs_f64(),
        max_retries = retry.max_retries,
        "Starting simulation"
    );

    let degraded = Arc::new(AtomicU32::new(0));
    if !args.no_fallback {
        let degraded = Arc::clone(&degraded);
        resilience
            .register_fallback(args.dependency.clone(), move |_: &CallError<io::Error>| {
                degraded.fetch_add(1, Ordering::Relaxed);
                Vec::<String>::new()
            })
            .await;
    }

    let policy = RetryPolicy::<io::Error>::transient_only(retry);
    let attempts = AtomicU32::new(0);
    let mut tally = Tally::default();

    let run = async {
        for call in 0..args.calls {
            let outcome = resilience
                .call_with(&args.dependency, policy.clone(), || {
                    flaky_attempt(&attempts, args.failure_rate)
                })
                .await;
            match outcome {
                Ok(results) if !results.is_empty() => tally.served += 1,
                Ok(_) => {}
                Err(e) => {
                    tally.failed += 1;
                    warn!(call, error = %e, "Call failed");
                }
            }
            if args.interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
            }
        }
    };

    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, abandoning remaining calls"),
    }
    tally.degraded = degraded.load(Ordering::Relaxed);

    let report = resilience.health().await;
    info!(
        served = tally.served,
        degraded = tally.degraded,
        failed = tally.failed,
        attempts = attempts.load(Ordering::Relaxed),
        healthy = report.healthy,
        "Simulation finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&tally, attempts.load(Ordering::Relaxed), &report);
    }
    Ok(())
}

/// One attempt against the pretend dependency. Failures are timeouts, so they retry.
async fn flaky_attempt(attempts: &AtomicU32, failure_rate: f64) -> io::Result<Vec<String>> {
    let n = attempts.fetch_add(1, Ordering::Relaxed);
    if rand::thread_rng().gen_bool(failure_rate) {
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("attempt {n} timed out"),
        ))
    } else {
        Ok(vec![format!("result-{n}")])
    }
}

fn print_report(tally: &Tally, attempts: u32, report: &HealthReport) {
    println!(
        "served: {}  degraded: {}  failed: {}  attempts: {}",
        tally.served, tally.degraded, tally.failed, attempts
    );
    println!();
    println!(
        "{:<20} {:<10} {:>9} {:>10} {:>10}",
        "DEPENDENCY", "STATE", "FAILURES", "THRESHOLD", "RECOVERY"
    );
    for b in &report.breakers {
        println!(
            "{:<20} {:<10} {:>9} {:>10} {:>9.1}s",
            b.name,
            b.state.to_string(),
            b.failure_count,
            b.failure_threshold,
            b.recovery_timeout
        );
    }
    println!();
    if report.healthy {
        println!("healthy");
    } else {
        println!("unhealthy: open circuits: {}", report.open_circuits.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn simulate_args_parse() {
        let cli = Cli::try_parse_from([
            "bwk",
            "simulate",
            "--dependency",
            "llm",
            "--calls",
            "5",
            "--failure-rate",
            "1.0",
            "--max-retries",
            "0",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.dependency, "llm");
                assert_eq!(args.calls, 5);
                assert_eq!(args.failure_rate, 1.0);
                assert_eq!(args.max_retries, Some(0));
                assert!(args.json);
                assert!(!args.no_fallback);
            }
            Commands::Config => panic!("expected simulate"),
        }
    }

    #[tokio::test]
    async fn flaky_attempt_respects_extremes() {
        let attempts = AtomicU32::new(0);
        assert!(flaky_attempt(&attempts, 0.0).await.is_ok());
        let err = flaky_attempt(&attempts, 1.0).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_with_total_outage_opens_breaker() {
        let config = Config {
            failure_threshold: 2,
            ..Config::default()
        };
        let args = SimulateArgs {
            dependency: "search".to_string(),
            calls: 3,
            failure_rate: 1.0,
            max_retries: Some(0),
            backoff_factor: None,
            max_delay: None,
            interval_ms: 0,
            no_fallback: false,
            json: true,
        };
        assert!(simulate(config, args).await.is_ok());
    }

    #[tokio::test]
    async fn simulate_rejects_bad_failure_rate() {
        let args = SimulateArgs {
            dependency: "search".to_string(),
            calls: 1,
            failure_rate: 1.5,
            max_retries: None,
            backoff_factor: None,
            max_delay: None,
            interval_ms: 0,
            no_fallback: true,
            json: false,
        };
        assert!(simulate(Config::default(), args).await.is_err());
    }
}
