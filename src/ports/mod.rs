//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement:
//! - Marketplace data provider (collection, stats, sales, offers, owners, events, traits)
//! - Downstream record sinks (scoring, write-behind persistence)
//! - Scriptable test doubles for both

pub mod marketplace;
pub mod mocks;
pub mod sink;

pub use marketplace::{FetchError, FetchFailure, Fetched, MarketplacePort, RateLimitSnapshot};
pub use sink::{RecordSink, SinkError};
