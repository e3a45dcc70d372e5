// Infra Provisioner - HTTP Server
// Runs the workflow engine against the in-memory cloud
// Run with: cargo run --bin provisioner-server

//! # Provisioner Server Binary
//!
//! Starts the workflow client and serves the JSON API in front of it.
//!
//! ## Startup Order
//!
//! ```text
//! main()
//!   ↓ loads
//! ProvisionerConfig (defaults → file → PROVISIONER__* env vars)
//!   ↓ builds
//! EngineSettings + InMemoryCloud + InMemoryExecutionStorage
//!   ↓ wraps in
//! WorkflowClient
//!   ↓ served by
//! HttpServer (Axum)
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### anyhow in Binaries
//! The library reports typed `ProvisionerError`s. The binary only needs to
//! print them and exit, so `main` returns `anyhow::Result` and adds context
//! with `.context(...)` on the way out.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use infra_provisioner::{
    EngineSettings, HttpServerBuilder, InMemoryCloud, InMemoryExecutionStorage, ProvisionerConfig,
    WorkflowClient,
};

#[derive(Parser)]
#[command(name = "provisioner-server")]
#[command(about = "Infra Provisioner - workflow engine and HTTP API")]
#[command(version)]
struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "PROVISIONER_CONFIG")]
    config: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let dotenv_result = dotenv();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = dotenv_result {
        warn!("No .env file loaded: {}", e);
    }

    info!("🚀 Starting Infra Provisioner...");
    info!("=====================================");

    let config = ProvisionerConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let settings = EngineSettings::from_config(&config).context("invalid workflow settings")?;

    info!("Region: {}", config.cloud.region);
    info!(
        "Retry policy: {} attempts, initial {:?}, coefficient {}",
        settings.retry_policy.max_attempts,
        settings.retry_policy.initial_interval,
        settings.retry_policy.backoff_coefficient
    );
    info!(
        "Polling every {:?} for up to {:?}, approval window {:?}",
        settings.poll_interval, settings.poll_deadline, settings.approval_timeout
    );

    let cloud = InMemoryCloud::new(config.cloud.clone());
    let client = WorkflowClient::new(
        Arc::new(cloud),
        Arc::new(InMemoryExecutionStorage::new()),
        settings,
    );

    let mut builder = HttpServerBuilder::new().with_settings(&config.server);
    if let Some(port) = cli.port {
        builder = builder.with_port(port);
    }

    builder
        .build(client)
        .run()
        .await
        .map_err(|e| anyhow!("server error: {}", e))?;

    Ok(())
}
