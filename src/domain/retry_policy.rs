//! Retry Policy
//!
//! Classifies sub-fetch failures and computes how long to wait before the
//! next attempt.
//!
//! Rules, in priority order:
//! 1. 4xx other than 429 -> surface immediately
//! 2. 429 -> wait for `Retry-After` (or a default)
//! 3. network error or 5xx -> exponential backoff with jitter, capped
//! 4. anything else -> surface immediately
//!
//! Jitter is drawn from `[0, min(max_jitter, base * 2^attempt))`. Bounding it
//! by the un-jittered delay keeps the delay ranges of consecutive attempts
//! disjoint, so backoff never shrinks from one attempt to the next.

use std::time::Duration;

use rand::Rng;

use crate::ports::FetchError;

/// Default total attempts per request (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Backoff cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Upper bound of the jitter range
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);

/// Wait used for a 429 without a `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Surface the error to the caller
    NonRetryable,
    /// Retry once the upstream-specified delay has passed
    RetryAfter(Duration),
    /// Retry after exponential backoff
    Backoff,
}

/// Retry configuration and delay calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Classify a failure
    pub fn classify(&self, error: &FetchError) -> RetryDecision {
        match error {
            FetchError::UpstreamClient { .. } => RetryDecision::NonRetryable,
            FetchError::RateLimited { retry_after } => {
                RetryDecision::RetryAfter(retry_after.unwrap_or(self.default_retry_after))
            }
            FetchError::UpstreamServer { .. } | FetchError::Network(_) => RetryDecision::Backoff,
            _ => RetryDecision::NonRetryable,
        }
    }

    /// Backoff delay for a zero-based attempt index
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.exponential(attempt);
        let jitter_bound = exponential.min(self.max_jitter).as_millis() as u64;
        let jitter = if jitter_bound > 0 {
            rand::thread_rng().gen_range(0..jitter_bound)
        } else {
            0
        };

        (exponential + Duration::from_millis(jitter)).min(self.max_delay)
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt fits in the budget after `retries_done` retries
    pub fn has_budget(&self, retries_done: u32) -> bool {
        retries_done.saturating_add(1) < self.max_attempts
    }

    /// Delay before the next attempt, or `None` if the error is terminal
    pub fn next_delay(&self, error: &FetchError, retries_done: u32) -> Option<Duration> {
        if !self.has_budget(retries_done) {
            return None;
        }
        match self.classify(error) {
            RetryDecision::NonRetryable => None,
            RetryDecision::RetryAfter(delay) => Some(delay),
            RetryDecision::Backoff => Some(self.backoff_delay(retries_done)),
        }
    }
}
