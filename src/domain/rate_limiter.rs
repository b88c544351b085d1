//! Per-Endpoint Rate Limiter
//!
//! Tracks one fixed window per logical endpoint key. The local window is a
//! best-effort prediction; after every upstream response the state is
//! overwritten from the provider's rate-limit headers, which are
//! authoritative.
//!
//! `acquire` never blocks. When the window is exhausted it returns the wait
//! until the window resets and the caller sleeps and asks again.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::ports::RateLimitSnapshot;

/// Default permits per window
pub const DEFAULT_WINDOW_CAPACITY: u32 = 2;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);

/// Capacity and length of one endpoint's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub capacity: u32,
    pub window: Duration,
}

impl Default for WindowLimit {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Limiter configuration: a default window plus per-endpoint overrides
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub default_limit: WindowLimit,
    pub overrides: HashMap<String, WindowLimit>,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            default_limit: WindowLimit { capacity, window },
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, endpoint: impl Into<String>, limit: WindowLimit) -> Self {
        self.overrides.insert(endpoint.into(), limit);
        self
    }

    /// Window that applies to an endpoint
    pub fn limit_for(&self, endpoint: &str) -> WindowLimit {
        self.overrides
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

/// Live limit state for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimitState {
    pub remaining: u32,
    pub window_reset_at: Instant,
    pub last_request_at: Option<Instant>,
}

impl EndpointLimitState {
    fn fresh(limit: WindowLimit, now: Instant) -> Self {
        Self {
            remaining: limit.capacity,
            window_reset_at: now + limit.window,
            last_request_at: None,
        }
    }
}

/// Proof that a request may be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    pub endpoint: String,
    /// Permits left in the window after this one
    pub remaining: u32,
}

/// Thread-safe per-endpoint rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    endpoints: Mutex<HashMap<String, EndpointLimitState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn endpoints(&self) -> MutexGuard<'_, HashMap<String, EndpointLimitState>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a permit, or learn how long to wait for one
    pub fn acquire(&self, endpoint: &str) -> Result<Permit, Duration> {
        self.acquire_at(endpoint, Instant::now())
    }

    pub fn acquire_at(&self, endpoint: &str, now: Instant) -> Result<Permit, Duration> {
        let limit = self.config.limit_for(endpoint);
        let mut endpoints = self.endpoints();
        let state = endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointLimitState::fresh(limit, now));

        if now > state.window_reset_at {
            state.remaining = limit.capacity;
            state.window_reset_at = now + limit.window;
        }

        if state.remaining == 0 {
            return Err(state.window_reset_at.saturating_duration_since(now));
        }

        state.remaining -= 1;
        state.last_request_at = Some(now);

        Ok(Permit {
            endpoint: endpoint.to_string(),
            remaining: state.remaining,
        })
    }

    /// Reconcile local state with the upstream's rate-limit headers
    pub fn update_from_response(&self, endpoint: &str, snapshot: &RateLimitSnapshot) {
        self.update_from_response_at(endpoint, snapshot, Instant::now());
    }

    pub fn update_from_response_at(
        &self,
        endpoint: &str,
        snapshot: &RateLimitSnapshot,
        now: Instant,
    ) {
        if snapshot.is_empty() {
            return;
        }

        let limit = self.config.limit_for(endpoint);
        let mut endpoints = self.endpoints();
        let state = endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointLimitState::fresh(limit, now));

        if let Some(remaining) = snapshot.remaining {
            state.remaining = remaining;
        }
        if let Some(reset_after) = snapshot.reset_after {
            state.window_reset_at = now + reset_after;
        }

        tracing::debug!(
            endpoint,
            remaining = state.remaining,
            reset_in_ms = state.window_reset_at.saturating_duration_since(now).as_millis() as u64,
            "Rate limit reconciled from upstream headers"
        );
    }

    /// Block an endpoint until `retry_after` has passed (upstream answered 429)
    pub fn throttle(&self, endpoint: &str, retry_after: Duration) {
        self.update_from_response(
            endpoint,
            &RateLimitSnapshot {
                remaining: Some(0),
                reset_after: Some(retry_after),
            },
        );
    }

    /// Current state for an endpoint, if it has been used
    pub fn state(&self, endpoint: &str) -> Option<EndpointLimitState> {
        self.endpoints().get(endpoint).copied()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
