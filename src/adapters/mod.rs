//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits and supporting
//! infrastructure:
//! - Marketplace: REST client for the NFT marketplace API
//! - Cache: Thread-safe TTL cache for payloads and composite records
//! - Sink: Downstream record consumers (log summaries, JSON snapshots)
//! - CLI: Command-line interface handlers

pub mod cache;
pub mod cli;
pub mod marketplace;
pub mod sink;

pub use cache::TtlCache;
pub use cli::CliApp;
pub use marketplace::{MarketplaceClient, MarketplaceConfig};
pub use sink::{LogSink, SnapshotSink};
