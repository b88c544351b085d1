//! nft-scout - Resilient NFT Marketplace Data Acquisition
//!
//! Builds composite collection records from a rate-limited marketplace API.
//!
//! # Modules
//!
//! - `domain`: Addresses, composite records and the resilience policies
//!   (RateLimiter, CircuitBreaker, RetryPolicy)
//! - `ports`: Trait abstractions (MarketplacePort, RecordSink) and test doubles
//! - `adapters`: External implementations (marketplace client, TTL cache, sinks, CLI)
//! - `application`: Request coalescer, timeout orchestrator, aggregator
//! - `config`: Configuration loading and validation

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
