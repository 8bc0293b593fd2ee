//! Lustra Kernel
//!
//! Admin command line for the marketing site's blog.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lustra_kernel::Config;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        hosted = config.backend_url.is_some(),
        image_host = config.image_host.is_some(),
        "Configuration loaded"
    );

    cli::run(&config, cli.command).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lustra_kernel=info,lustra=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
