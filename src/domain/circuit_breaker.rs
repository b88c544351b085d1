//! Circuit Breaker
//!
//! Upstream protection that stops dispatching requests to a failing
//! marketplace API for a cooldown period.
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failure_count >= threshold
//! Open     → HalfOpen: reset_timeout elapsed (evaluated lazily in before_call)
//! HalfOpen → Closed:   trial call succeeds
//! HalfOpen → Open:     trial call fails (timer restarts)
//! ```
//!
//! A "failure" is a terminal outcome: non-retryable, or retries exhausted.
//! Transient errors absorbed by the retry policy are never reported here.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default consecutive failures before the circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown before a trial call is allowed
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests pass through
    Closed,
    /// Upstream assumed down, requests fail fast
    Open,
    /// One trial request is allowed through
    HalfOpen,
}

impl CircuitState {
    /// Returns a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed - requests flowing",
            CircuitState::Open => "OPEN - upstream suspended",
            CircuitState::HalfOpen => "Half-open - probing upstream",
        }
    }
}

/// How a call got past the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, ordinary traffic
    Closed,
    /// The single trial call of a half-open circuit
    Trial,
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

/// Point-in-time view for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Time until a trial call is allowed, if open
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Thread-safe circuit breaker guarding one upstream dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom settings
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a call may be dispatched now
    pub fn before_call(&self) -> bool {
        self.admit().is_some()
    }

    pub fn before_call_at(&self, now: Instant) -> bool {
        self.admit_at(now).is_some()
    }

    /// Like [`before_call`](Self::before_call), but says whether the caller
    /// now holds the half-open trial
    pub fn admit(&self) -> Option<Admission> {
        self.admit_at(Instant::now())
    }

    pub fn admit_at(&self, now: Instant) -> Option<Admission> {
        let mut inner = self.inner();
        match inner.state {
            CircuitState::Closed => Some(Admission::Closed),
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map_or(true, |t| now.saturating_duration_since(t) >= self.config.reset_timeout);
                if cooled_down {
                    tracing::info!(breaker = %self.name, "Circuit half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
        }
    }

    /// Record a successful call
    pub fn on_success(&self) {
        let mut inner = self.inner();
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    /// Record a terminal failure
    pub fn on_failure(&self) {
        self.on_failure_at(Instant::now());
    }

    pub fn on_failure_at(&self, now: Instant) {
        let mut inner = self.inner();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.trial_in_flight = false;

        let trip = inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold;

        if trip {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "CIRCUIT OPEN: suspending upstream calls for {:?}",
                    self.config.reset_timeout
                );
            }
            inner.state = CircuitState::Open;
            inner.failure_count = inner.failure_count.max(self.config.failure_threshold);
            inner.last_failure_at = Some(now);
        }
    }

    /// Current state (without lazily advancing Open → HalfOpen)
    pub fn state(&self) -> CircuitState {
        self.inner().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner().failure_count
    }

    /// Get detailed state for monitoring
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let inner = self.inner();
        let retry_in_ms = match (inner.state, inner.last_failure_at) {
            (CircuitState::Open, Some(t)) => Some(
                self.config
                    .reset_timeout
                    .saturating_sub(now.saturating_duration_since(t))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            retry_in_ms,
        }
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self) {
        let mut inner = self.inner();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_breaker() -> CircuitBreaker {
        CircuitBreaker::with_config(
            "marketplace",
            CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn test_new_breaker_is_closed() {
        let breaker = CircuitBreaker::new("marketplace");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.before_call());
        assert_eq!(breaker.name(), "marketplace");
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = create_test_breaker();
        let now = Instant::now();

        breaker.on_failure_at(now);
        breaker.on_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.before_call_at(now));

        breaker.on_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.before_call_at(now + Duration::from_secs(9)));
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let breaker = create_test_breaker();
        let now = Instant::now();
        for _ in 0..3 {
            breaker.on_failure_at(now);
        }

        let later = now + Duration::from_secs(10);
        assert!(breaker.before_call_at(later));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.before_call_at(later));
        assert!(!breaker.before_call_at(later + Duration::from_secs(60)));
    }

    #[test]
    fn test_admission_kinds() {
        let breaker = create_test_breaker();
        let now = Instant::now();
        assert_eq!(breaker.admit_at(now), Some(Admission::Closed));

        for _ in 0..3 {
            breaker.on_failure_at(now);
        }
        assert_eq!(breaker.admit_at(now), None);

        let later = now + Duration::from_secs(10);
        assert_eq!(breaker.admit_at(later), Some(Admission::Trial));
        assert_eq!(breaker.admit_at(later), None);
    }

    #[test]
    fn test_trial_success_closes() {
        let breaker = create_test_breaker();
        let now = Instant::now();
        for _ in 0..3 {
            breaker.on_failure_at(now);
        }
        assert!(breaker.before_call_at(now + Duration::from_secs(11)));

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.before_call_at(now + Duration::from_secs(11)));
    }

    #[test]
    fn test_trial_failure_reopens_and_restarts_timer() {
        let breaker = create_test_breaker();
        let now = Instant::now();
        for _ in 0..3 {
            breaker.on_failure_at(now);
        }

        let trial_at = now + Duration::from_secs(10);
        assert!(breaker.before_call_at(trial_at));
        breaker.on_failure_at(trial_at);

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.failure_count() >= 3);
        assert!(!breaker.before_call_at(trial_at + Duration::from_secs(9)));
        assert!(breaker.before_call_at(trial_at + Duration::from_secs(10)));
    }

    #[test]
    fn test_success_resets_count_while_closed() {
        let breaker = create_test_breaker();
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let breaker = create_test_breaker();
        for _ in 0..3 {
            breaker.on_failure();
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_threshold, 3);
        assert!(snapshot.retry_in_ms.unwrap() <= 10_000);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.snapshot().retry_in_ms.is_none());
    }

    #[test]
    fn test_state_description() {
        assert!(CircuitState::Open.description().contains("OPEN"));
    }
}
