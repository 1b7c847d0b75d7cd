//! # Shoplane — E-commerce Automation Engine
//!
//! Executes store automations: scheduled trigger runs, abandoned-cart
//! recovery, and the cron-driven batch tick behind an HMAC-guarded HTTP
//! endpoint.
//!
//! Usage:
//!   shoplane serve                  # Start the gateway (default port 9080)
//!   shoplane tick                   # Run one batch tick and exit
//!   shoplane --config ./dev.toml serve

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shoplane_channels::SmtpMailer;
use shoplane_core::config::ShoplaneConfig;
use shoplane_engine::BatchDriver;
use shoplane_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "shoplane",
    version,
    about = "🛒 Shoplane — e-commerce automation engine"
)]
struct Cli {
    /// Config file (default: ~/.shoplane/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway and wait for cron ticks
    Serve,
    /// Run one batch tick and print the summary
    Tick,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "shoplane=debug,tower_http=debug"
    } else {
        "shoplane=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => ShoplaneConfig::load_from(path)?,
        None => ShoplaneConfig::load()?,
    };

    let db_path = config.database.resolved_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    tracing::info!("💾 Database: {}", db_path.display());

    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    let driver = BatchDriver::new(store, mailer, config.cron.clone());

    match cli.command {
        Command::Serve => shoplane_gateway::start(&config, driver).await?,
        Command::Tick => {
            let summary = driver.run_tick().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
