// ABOUTME: Entry point for the coven-conductor binary.
// ABOUTME: Loads config, connects to the agent backend, runs the console, and tears down on exit.

mod console;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use coven_conductor::{Conductor, Config};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "coven-conductor")]
#[command(about = "Drive one agent backend across many projects, each with its own tool server")]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "COVEN_CONDUCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Project to open on startup
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// Write logs to a file instead of stderr
    #[arg(long, env = "COVEN_CONDUCTOR_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log to ~/.config/coven/conductor/conductor.log instead of stderr
    #[arg(long, conflicts_with = "log_file")]
    log_to_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.log_file.is_some() || cli.log_to_file {
        logging::init_file(cli.log_file.as_deref());
    } else {
        logging::init_stderr();
    }

    let config = Config::load(cli.config).context("Failed to load configuration")?;
    let conductor = Conductor::new(config).context("Failed to set up conductor")?;

    if conductor.config().backend.auto_connect {
        match conductor.connect().await {
            Ok(outcome) if outcome.is_degraded() => {
                eprintln!("Warning: agent backend answered but rejected the liveness probe");
            }
            Ok(_) => info!(url = %conductor.config().backend.url, "Connected"),
            Err(e) => {
                warn!(error = %e, "Could not connect to agent backend");
                eprintln!("Warning: {}. Use `reconnect` once the backend is up.", e);
            }
        }
    }

    if let Some(project) = &cli.project {
        let project = std::env::current_dir()
            .map(|cwd| cwd.join(project))
            .unwrap_or_else(|_| project.clone());
        match conductor.switch_project(&project).await {
            Ok(project) => println!("Opened {}", project.directory.display()),
            Err(e) => eprintln!("Error: {:#}", anyhow::Error::from(e)),
        }
    }

    let result = console::run(&conductor).await;

    conductor
        .shutdown()
        .await
        .context("Shutdown left tool servers behind")?;
    result
}
