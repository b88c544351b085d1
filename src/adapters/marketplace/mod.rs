//! Marketplace Adapter
//!
//! REST client implementing `MarketplacePort`, plus body and header decoding.

mod client;
pub mod response;

pub use client::{MarketplaceClient, MarketplaceConfig, API_KEY_HEADER};
