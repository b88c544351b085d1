//! TTL Cache
//!
//! Generic key/value store where every entry carries its own expiry.
//! Expired entries are never returned: lookups evict them lazily, so no
//! background sweeper is needed. The map is guarded by one internal mutex,
//! which is never held across an await point.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Cache entry with expiry tracking
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry expiring `ttl` after `now`
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    /// Check if entry is still visible at `now`
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Get time remaining before expiry
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        if self.is_live_at(now) {
            Some(self.expires_at - now)
        } else {
            None
        }
    }
}

/// Thread-safe TTL cache
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Default TTL when none is configured (5 minutes)
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Create a new cache with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    /// Create a new cache with a custom default TTL
    pub fn with_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a live value, evicting it if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live_at(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value with an explicit TTL
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub fn set_at(&self, key: K, value: V, ttl: Duration, now: Instant) {
        self.entries().insert(key, CacheEntry::new(value, ttl, now));
    }

    /// Insert a value with the cache's default TTL
    pub fn insert(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Remove an entry regardless of expiry
    pub fn evict(&self, key: &K) -> Option<V> {
        self.entries().remove(key).map(|e| e.value)
    }

    /// Check if a live entry exists
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Time left on a live entry
    pub fn time_remaining(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        self.entries().get(key).and_then(|e| e.time_remaining(now))
    }

    /// Remove all expired entries
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        before - entries.len()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Get the number of entries (including expired, not yet evicted)
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries();
        let total = entries.len();
        let live = entries.values().filter(|e| e.is_live_at(now)).count();

        CacheStats {
            total_entries: total,
            live_entries: live,
            expired_entries: total - live,
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub expired_entries: usize,
}
