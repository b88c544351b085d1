//! nft-scout - Resilient NFT Marketplace Data Acquisition
//!
//! Builds composite collection records from a rate-limited marketplace API.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use nft_scout::adapters::cli::{self, CliApp, DEFAULT_CONFIG_PATH};
use nft_scout::config::{expand_path, load_config, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    let config = resolve_config(&app.config)?;
    init_logging(app.verbose, app.debug, &config.logging.level)?;

    tracing::debug!(config = %app.config, "Configuration loaded");
    cli::execute(app, config).await
}

/// Load the config file; a missing default file means built-in defaults
fn resolve_config(raw: &str) -> Result<Config> {
    let path = expand_path(raw);

    if raw == DEFAULT_CONFIG_PATH && !path.exists() {
        let config = Config::default();
        config.validate().context("Built-in defaults are invalid")?;
        return Ok(config);
    }

    load_config(&path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Flags win, then RUST_LOG, then the configured level
fn init_logging(verbose: bool, debug: bool, configured: &str) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialise logging: {}", e))?;
    Ok(())
}
