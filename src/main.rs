use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use pin_scheduler::config;
use pin_scheduler::orchestrator::{Orchestrator, RunOptions};
use pin_scheduler::rows;
use pin_scheduler::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Optional YAML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the trigger endpoints
    Serve {
        /// Listen address (defaults to BIND_ADDR or 0.0.0.0:8080)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one scheduled batch and print the JSON report
    RunOnce {
        /// Fetch and validate the next batch without sending anything
        #[arg(long)]
        dry_run: bool,
        /// Seconds between two pins (overrides DEFAULT_DELAY)
        #[arg(long)]
        delay: Option<f64>,
    },
    /// Validate a local CSV file and print the validation report
    Preview {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;

    match args.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind_addr.clone());
            server::serve(&bind, AppState::from_config(&cfg)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::RunOnce { dry_run, delay } => {
            let orchestrator = Orchestrator::from_config(&cfg)?;
            let delay = delay.map(config::delay_from_secs).transpose()?;
            let response = orchestrator
                .run_scheduled(RunOptions { dry_run, delay })
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.report.needs_attention() {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Preview { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let validated = rows::decode(&bytes)?;
            info!(
                rows_total = validated.rows_total,
                rows_valid = validated.rows_valid(),
                "validated local file"
            );
            println!("{}", serde_json::to_string_pretty(&validated)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
