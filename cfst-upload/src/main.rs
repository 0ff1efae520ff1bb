//! CFST Automation - One-Shot Upload CLI
//!
//! Publishes the current results file to the configured git remote and
//! maps the outcome to the process exit code: 0 on success (including a
//! clean tree), 1 on a missing results file or upload failure.

#![forbid(unsafe_code)]

use anyhow::Result;
use cfst_common::{
    GitCli, LogConfig, PublishClient, PublishOutcome, init_logging, load_config,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cfst-upload")]
#[command(
    author,
    version,
    about = "Upload CFST results to the configured git remote"
)]
struct Cli {
    /// Path to the configuration file (cfst.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
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

    let results_path = config.results_path();
    let size = match std::fs::metadata(&results_path) {
        Ok(meta) => meta.len(),
        Err(_) => {
            error!(
                path = %results_path.display(),
                "Results file not found; nothing to upload"
            );
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        path = %results_path.display(),
        size_bytes = size,
        "Found results file"
    );

    let client = PublishClient::new(&config, GitCli);
    let outcome = match client.publish().await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "Upload failed");
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "ok": false, "error": err.to_string() })
                );
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    match outcome {
        PublishOutcome::NoChanges => info!("No changes to upload"),
        PublishOutcome::Published {
            attempts,
            upstream_configured,
        } => info!(attempts, upstream_configured, "Upload completed"),
    }

    if cli.json {
        let label = match outcome {
            PublishOutcome::NoChanges => "no_changes",
            PublishOutcome::Published { .. } => "published",
        };
        println!("{}", serde_json::json!({ "ok": true, "outcome": label }));
    }

    Ok(ExitCode::SUCCESS)
}
