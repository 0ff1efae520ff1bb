//! CFST Automation - Scheduler Daemon
//!
//! Runs the probe → backup → transform → publish pipeline once
//! (`--run-once`) or on a fixed interval until interrupted. A failed cycle
//! is logged and the schedule continues; only Ctrl-C stops the loop.

#![forbid(unsafe_code)]

use anyhow::Result;
use cfst_common::{CfstConfig, GitCli, LogConfig, Pipeline, Prober, init_logging, load_config};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cfstd")]
#[command(
    author,
    version,
    about = "CFST automation scheduler - periodic speed tests published to git"
)]
struct Cli {
    /// Path to the configuration file (cfst.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one cycle and exit
    #[arg(long)]
    run_once: bool,

    /// Print the cycle report as JSON (with --run-once)
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn interval_duration(config: &CfstConfig) -> Duration {
    Duration::from_secs(config.schedule_interval_hours * 3600)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guard = init_logging(&log_config)?;

    let config = load_config(cli.config.as_deref())?;
    for warning in config.validate() {
        warn!("{warning}");
    }

    let pipeline = Pipeline::new(&config, Prober::from_config(&config), GitCli);

    if cli.run_once {
        let report = pipeline.run_cycle().await;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        return Ok(if report.success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    info!(
        interval_hours = config.schedule_interval_hours,
        "Starting CFST automation scheduler; press Ctrl-C to stop"
    );

    let interval = interval_duration(&config);
    loop {
        pipeline.run_cycle().await;

        let next_run = Local::now()
            + chrono::Duration::hours(config.schedule_interval_hours as i64);
        info!(next_run = %next_run.format("%Y-%m-%d %H:%M:%S"), "Next cycle scheduled");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Scheduler stopped by user");
                break;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
