//! In-process caching.
//!
//! Holds composite records and decoded sub-resource payloads for the
//! lifetime of the process. Nothing is persisted.

mod ttl_cache;

pub use ttl_cache::{CacheEntry, CacheStats, TtlCache};
