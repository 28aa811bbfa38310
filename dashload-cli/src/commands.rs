//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use dashload_core::probe::StepPolicy;
use dashload_core::{DashloadConfig, SimTime, StrategyKind};
use dashload_sim::{
    ProbeSimulation, Scenario, StreamingReport, StreamingSimulation, SweepSimulation,
    pathload_testbed,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one adaptive streaming session
    Stream {
        /// Adaptation strategy: throughput, smoothed, buffer or extension
        #[arg(short, long)]
        strategy: Option<String>,
        /// Session length in simulated seconds
        #[arg(short, long)]
        duration_secs: Option<u64>,
        /// Cross-traffic scenario on the streaming path
        #[arg(long, default_value = "steady")]
        scenario: Scenario,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every strategy on the same scenario
    Compare {
        /// Session length in simulated seconds
        #[arg(short, long)]
        duration_secs: Option<u64>,
        /// Cross-traffic scenario on the streaming path
        #[arg(long, default_value = "steady")]
        scenario: Scenario,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate available bandwidth with self-loading periodic streams
    Pathload {
        /// How the gap increment evolves between rounds
        #[arg(long, value_enum, default_value = "fixed")]
        step: StepArg,
        /// Rounds before giving up
        #[arg(long)]
        max_rounds: Option<u32>,
        /// Competing load on the 10 Mbps bottleneck
        #[arg(long, default_value = "4.0")]
        competing_mbps: f64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sweep offered rates with trains of packet pairs
    Topp {
        /// Tracking ratio below which the path stops following the offered rate
        #[arg(long)]
        turning_ratio: Option<f64>,
        /// Competing load on the 10 Mbps bottleneck
        #[arg(long, default_value = "4.0")]
        competing_mbps: f64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Gap increment policy as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StepArg {
    Fixed,
    Halving,
}

impl From<StepArg> for StepPolicy {
    fn from(step: StepArg) -> Self {
        match step {
            StepArg::Fixed => StepPolicy::Fixed,
            StepArg::Halving => StepPolicy::Halving,
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stream {
            strategy,
            duration_secs,
            scenario,
            config,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(strategy) = strategy {
                config.streaming.strategy = strategy;
            }
            set_duration(&mut config, duration_secs);
            run_stream(config, scenario, json).await
        }
        Commands::Compare {
            duration_secs,
            scenario,
            config,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            set_duration(&mut config, duration_secs);
            run_compare(config, scenario, json).await
        }
        Commands::Pathload {
            step,
            max_rounds,
            competing_mbps,
            json,
        } => {
            let mut config = testbed_config(competing_mbps);
            config.probe.step_policy = step.into();
            if let Some(rounds) = max_rounds {
                config.probe.max_rounds = rounds;
            }
            run_pathload(config, json).await
        }
        Commands::Topp {
            turning_ratio,
            competing_mbps,
            json,
        } => {
            let mut config = testbed_config(competing_mbps);
            if turning_ratio.is_some() {
                config.probe.turning_point_ratio = turning_ratio;
            }
            run_topp(config, json).await
        }
    }
}

/// Loads the configuration file if given, then applies environment overrides.
///
/// # Errors
/// - File cannot be read or parsed
fn load_config(path: Option<&Path>) -> anyhow::Result<DashloadConfig> {
    let mut config = match path {
        Some(path) => DashloadConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DashloadConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn testbed_config(competing_mbps: f64) -> DashloadConfig {
    let competing_bps = (competing_mbps.max(0.0) * 1_000_000.0) as u64;
    let mut config = pathload_testbed(competing_bps);
    config.apply_env();
    config
}

fn set_duration(config: &mut DashloadConfig, duration_secs: Option<u64>) {
    if let Some(secs) = duration_secs {
        config.streaming.stop_ms = config.streaming.start_ms + secs * 1_000;
    }
}

/// Runs one streaming session on a blocking task.
///
/// # Errors
/// - Configuration rejected or simulation aborted
async fn run_stream(config: DashloadConfig, scenario: Scenario, json: bool) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || simulate_stream(&config, scenario))
        .await
        .context("Streaming session task failed")??;

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("Scenario: {} ({})", scenario, scenario.description());
        print!("{}", report.summary());
    }
    Ok(())
}

/// Runs every strategy concurrently, one blocking task per session.
///
/// # Errors
/// - Configuration rejected or any simulation aborted
async fn run_compare(config: DashloadConfig, scenario: Scenario, json: bool) -> anyhow::Result<()> {
    let handles: Vec<_> = StrategyKind::ALL
        .into_iter()
        .map(|kind| {
            let mut config = config.clone();
            config.streaming.strategy = kind.as_str().to_string();
            tokio::task::spawn_blocking(move || simulate_stream(&config, scenario))
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await.context("Streaming session task failed")??);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("Scenario: {} ({})", scenario, scenario.description());
    println!(
        "{:<12} {:>7} {:>14} {:>17} {:>9} {:>7}",
        "Strategy", "Chunks", "Bitrate (kbps)", "Throughput (kbps)", "Switches", "Stalls"
    );
    println!("{:-<71}", "");
    for report in &reports {
        println!(
            "{:<12} {:>7} {:>14.0} {:>17.0} {:>9} {:>7}",
            report.strategy,
            report.chunks_completed(),
            report.mean_bitrate_bps() / 1_000.0,
            report.mean_throughput_bps() / 1_000.0,
            report.switch_count,
            report.stall_count
        );
    }
    Ok(())
}

fn simulate_stream(config: &DashloadConfig, scenario: Scenario) -> anyhow::Result<StreamingReport> {
    let horizon = SimTime::from_millis(config.streaming.stop_ms);
    let report = StreamingSimulation::new(config)?
        .with_cross_traffic(scenario.cross_traffic(horizon))
        .run()?;
    Ok(report)
}

/// Runs the SLoPS probe.
///
/// # Errors
/// - Probe parameters rejected or simulation aborted
async fn run_pathload(config: DashloadConfig, json: bool) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || ProbeSimulation::new(&config)?.run())
        .await
        .context("Probe task failed")??;

    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.summary());
    }
    Ok(())
}

/// Runs the TOPP rate sweep.
///
/// # Errors
/// - Sweep rates rejected or simulation aborted
async fn run_topp(config: DashloadConfig, json: bool) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || SweepSimulation::new(&config)?.run())
        .await
        .context("Sweep task failed")??;

    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.summary());
    }
    Ok(())
}
