//! CLI Command Handlers
//!
//! Implementation of all CLI commands for nft-scout.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::marketplace::MarketplaceClient;
use crate::adapters::sink::{LogSink, SnapshotSink};
use crate::application::{AggregatorConfig, CollectionAggregator, RequestCoalescer};
use crate::config::{expand_path, Config};
use crate::domain::{
    CircuitBreaker, CircuitBreakerConfig, CompositeRecord, RateLimitConfig, RateLimiter, RetryPolicy,
};
use crate::ports::RecordSink;

/// Configuration file used when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// nft-scout - NFT collection data from marketplace APIs
#[derive(Parser, Debug)]
#[command(
    name = "nft-scout",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Resilient NFT marketplace data acquisition",
    long_about = "nft-scout builds a composite view of an NFT collection from seven marketplace \
                  endpoints, with per-endpoint rate limiting, request coalescing, retries and \
                  a circuit breaker in front of the upstream API."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the composite record for one collection
    Fetch(FetchCmd),

    /// Build composite records for several collections concurrently
    Batch(BatchCmd),

    /// Validate and print the effective configuration
    Config,
}

/// Output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Fetch one collection
#[derive(Parser, Debug)]
pub struct FetchCmd {
    /// Contract address (0x + 40 hex) or 64-hex token UID
    #[arg(value_name = "ADDRESS")]
    pub address: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write a JSON snapshot of the record to this directory
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<String>,
}

/// Fetch many collections
#[derive(Parser, Debug)]
pub struct BatchCmd {
    /// Contract addresses; duplicates share upstream calls
    #[arg(value_name = "ADDRESS", required = true)]
    pub addresses: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write JSON snapshots of the records to this directory
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<String>,
}

/// Execute the parsed command against a loaded configuration
pub async fn execute(app: CliApp, config: Config) -> Result<()> {
    match app.command {
        Command::Fetch(cmd) => fetch_command(cmd, &config).await,
        Command::Batch(cmd) => batch_command(cmd, &config).await,
        Command::Config => config_command(&config),
    }
}

/// Wire the client, resilience policies and caches from configuration
pub fn build_aggregator(config: &Config) -> Result<CollectionAggregator> {
    let client = MarketplaceClient::with_config(config.marketplace_config())
        .context("Failed to create marketplace client")?;

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&config.rate_limit)));
    let breaker = Arc::new(CircuitBreaker::with_config(
        "marketplace",
        CircuitBreakerConfig::from(&config.circuit_breaker),
    ));
    let coalescer = Arc::new(RequestCoalescer::new(
        limiter,
        breaker,
        RetryPolicy::from(&config.retry),
    ));

    Ok(CollectionAggregator::new(Arc::new(client), coalescer, AggregatorConfig::from(config))
        .with_sink(Arc::new(LogSink)))
}

fn snapshot_sink(flag: Option<&str>, config: &Config) -> Option<SnapshotSink> {
    flag.map(expand_path)
        .or_else(|| config.output.snapshot_path())
        .map(SnapshotSink::new)
}

/// The one-shot CLI exits right after printing, so snapshots are awaited
/// here instead of being left to the aggregator's background publishing
async fn write_snapshot(sink: &SnapshotSink, record: &Arc<CompositeRecord>) {
    match sink.publish(Arc::clone(record)).await {
        Ok(()) => tracing::info!(path = %sink.path_for(&record.address).display(), "Snapshot written"),
        Err(e) => tracing::warn!(error = %e, "Failed to write snapshot"),
    }
}

async fn fetch_command(cmd: FetchCmd, config: &Config) -> Result<()> {
    let aggregator = build_aggregator(config)?;
    let snapshots = snapshot_sink(cmd.snapshot_dir.as_deref(), config);

    let record = aggregator
        .analyze(&cmd.address)
        .await
        .with_context(|| format!("Cannot analyze '{}'", cmd.address))?;

    if let Some(sink) = &snapshots {
        write_snapshot(sink, &record).await;
    }

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record.as_ref())?),
        OutputFormat::Text => print!("{}", render_text(&record)),
    }
    Ok(())
}

async fn batch_command(cmd: BatchCmd, config: &Config) -> Result<()> {
    let aggregator = build_aggregator(config)?;
    let snapshots = snapshot_sink(cmd.snapshot_dir.as_deref(), config);

    let handles: Vec<_> = cmd
        .addresses
        .iter()
        .cloned()
        .map(|raw| {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                let result = aggregator.analyze(&raw).await;
                (raw, result)
            })
        })
        .collect();

    let mut records = Vec::new();
    let mut rejected = 0usize;
    for handle in handles {
        let (raw, result) = handle.await.context("Aggregation task failed")?;
        match result {
            Ok(record) => {
                if let Some(sink) = &snapshots {
                    write_snapshot(sink, &record).await;
                }
                records.push(record);
            }
            Err(e) => {
                rejected += 1;
                eprintln!("✗ {}: {}", raw, e);
            }
        }
    }

    match cmd.format {
        OutputFormat::Json => {
            let plain: Vec<&CompositeRecord> = records.iter().map(|r| r.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&plain)?);
        }
        OutputFormat::Text => {
            for record in &records {
                println!("{}", render_text(record));
            }
            let status = aggregator.status();
            println!(
                "{} collection(s), {} rejected, {} cached payload(s), circuit {}",
                records.len(),
                rejected,
                status.payloads.live_entries,
                status.breaker.state.description()
            );
        }
    }
    Ok(())
}

fn config_command(config: &Config) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    let rendered = toml::to_string_pretty(&config.redacted()).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Human-readable summary of a composite record
pub fn render_text(record: &CompositeRecord) -> String {
    let mut out = String::new();
    let collection = record.collection.as_ref();

    let name = collection
        .and_then(|c| c.name.as_deref())
        .unwrap_or("<unknown collection>");
    let _ = match collection.and_then(|c| c.symbol.as_deref()) {
        Some(symbol) => writeln!(out, "{} ({})", name, symbol),
        None => writeln!(out, "{}", name),
    };
    let _ = writeln!(out, "  Address:     {}", record.address);

    if let Some(info) = collection {
        let supply = info
            .total_supply
            .map_or_else(|| "?".to_string(), |s| s.to_string());
        let mutability = if info.is_immutable() { "immutable" } else { "mutable" };
        let _ = writeln!(out, "  Supply:      {} ({})", supply, mutability);
    }

    if let Some(stats) = &record.stats {
        let _ = writeln!(out, "  Floor:       {}", fmt_opt(stats.floor_price));
        let _ = writeln!(out, "  Volume 24h:  {}", fmt_opt(stats.volume_24h));
    }
    if let Some(holders) = record.holder_count() {
        let _ = writeln!(out, "  Holders:     {}", holders);
    }

    let _ = writeln!(
        out,
        "  Activity:    {} sales, {} offers, {} events",
        record.sales.len(),
        record.offers.len(),
        record.events.len()
    );
    if let Some(traits) = &record.traits {
        let _ = writeln!(out, "  Traits:      {} types", traits.len());
    }
    let _ = writeln!(out, "  Fetched:     {}", record.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"));

    for failure in &record.partial_failures {
        let _ = writeln!(out, "  ⚠ {}: {}", failure.resource, failure.reason);
    }
    out
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::domain::{CollectionInfo, CollectionStats, ContractAddress, SubPayload, SubResource};

    #[test]
    fn test_parse_fetch() {
        let app = CliApp::try_parse_from([
            "nft-scout",
            "fetch",
            "0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d",
            "--format",
            "json",
            "--debug",
        ])
        .unwrap();

        assert!(app.debug);
        assert_eq!(app.config, DEFAULT_CONFIG_PATH);
        match app.command {
            Command::Fetch(cmd) => {
                assert_eq!(cmd.format, OutputFormat::Json);
                assert!(cmd.snapshot_dir.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_batch_requires_addresses() {
        assert!(CliApp::try_parse_from(["nft-scout", "batch"]).is_err());

        let app = CliApp::try_parse_from(["nft-scout", "-c", "/tmp/scout.toml", "batch", "a", "b"]).unwrap();
        assert_eq!(app.config, "/tmp/scout.toml");
        match app.command {
            Command::Batch(cmd) => assert_eq!(cmd.addresses, vec!["a", "b"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_render_text() {
        let address = ContractAddress::parse("0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d").unwrap();
        let mut record = CompositeRecord::empty(address, Utc::now());
        record.apply(SubPayload::Collection(CollectionInfo {
            name: Some("Bored Ape Yacht Club".into()),
            symbol: Some("BAYC".into()),
            total_supply: Some(10_000),
            ..Default::default()
        }));
        record.apply(SubPayload::Stats(CollectionStats {
            floor_price: Some(12.5),
            ..Default::default()
        }));
        record.record_failure(SubResource::Owners, "Request timed out after 8s");

        let text = render_text(&record);
        assert!(text.starts_with("Bored Ape Yacht Club (BAYC)"));
        assert!(text.contains("10000 (immutable)"));
        assert!(text.contains("12.5000"));
        assert!(text.contains("owners: Request timed out"));
    }

    #[test]
    fn test_build_aggregator_from_defaults() {
        let aggregator = build_aggregator(&Config::default()).unwrap();
        assert_eq!(aggregator.status().in_flight, 0);
    }
}
