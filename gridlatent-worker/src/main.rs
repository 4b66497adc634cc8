//! Gridlatent
//!
//! Command line front end for DRMAA latent workers.
//!
//! Architecture:
//! - Configuration: worker settings from `GRIDLATENT_*` environment
//!   variables, with a few command line overrides
//! - Session: one scheduler session for the whole process
//! - Commands: run a worker through a full substantiate/insubstantiate
//!   cycle, or submit, terminate and inspect single jobs

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Commands, handle_command};
use gridlatent_worker::{Backend, Config};

#[derive(Parser)]
#[command(name = "gridlatent")]
#[command(about = "Latent build workers on a DRMAA-style grid scheduler", long_about = None)]
struct Cli {
    /// Scheduler backend (memory or grid-engine)
    #[arg(long, env = "GRIDLATENT_BACKEND")]
    backend: Option<Backend>,

    /// Contact string of an existing scheduler session to attach to
    #[arg(long, env = "GRIDLATENT_SESSION_CONTACT")]
    contact: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gridlatent=info,gridlatent_worker=info,gridlatent_client=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if cli.contact.is_some() {
        config.session_contact = cli.contact;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        "Loaded configuration: worker={}, backend={}, pool_size={}",
        config.worker_name, config.backend, config.pool_size
    );

    handle_command(cli.command, &config).await
}
