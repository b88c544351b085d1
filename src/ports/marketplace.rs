use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ContractAddress, SubPayload, SubResource};

/// Errors a marketplace sub-fetch can end with
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Malformed request input (e.g. an unusable API URL); never retried
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP 429 from the upstream
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx from the upstream
    #[error("Upstream server error {status}: {message}")]
    UpstreamServer { status: u16, message: String },

    /// Connection or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 4xx other than 429
    #[error("Upstream client error {status}: {message}")]
    UpstreamClient { status: u16, message: String },

    /// Circuit breaker refused the call
    #[error("Circuit open for endpoint '{0}'")]
    CircuitOpen(String),

    /// The caller stopped waiting
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Build the error for a non-success HTTP status
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        match status {
            429 => FetchError::RateLimited { retry_after },
            400..=499 => FetchError::UpstreamClient {
                status,
                message: message.into(),
            },
            _ => FetchError::UpstreamServer {
                status,
                message: message.into(),
            },
        }
    }

    /// Short label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidInput(_) => "invalid_input",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::UpstreamServer { .. } => "upstream_server_error",
            FetchError::Network(_) => "network_error",
            FetchError::UpstreamClient { .. } => "upstream_client_error",
            FetchError::CircuitOpen(_) => "circuit_open",
            FetchError::Timeout(_) => "timeout",
            FetchError::Decode(_) => "decode_error",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::from_status(status.as_u16(), None, err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Rate-limit metadata reported by the upstream on a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    /// Requests left in the current upstream window
    pub remaining: Option<u32>,
    /// Time until the upstream window resets
    pub reset_after: Option<Duration>,
}

impl RateLimitSnapshot {
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.reset_after.is_none()
    }
}

/// A failed upstream attempt plus any rate-limit metadata the response carried
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub error: FetchError,
    pub rate_limit: RateLimitSnapshot,
}

impl FetchFailure {
    pub fn with_rate_limit(mut self, rate_limit: RateLimitSnapshot) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

impl From<FetchError> for FetchFailure {
    fn from(error: FetchError) -> Self {
        Self {
            error,
            rate_limit: RateLimitSnapshot::default(),
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(err: reqwest::Error) -> Self {
        FetchError::from(err).into()
    }
}

/// A successful upstream result plus the rate-limit metadata that came with it
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub rate_limit: RateLimitSnapshot,
}

impl<T> Fetched<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            rate_limit: RateLimitSnapshot::default(),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitSnapshot) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Marketplace data provider port
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketplacePort: Send + Sync {
    /// Fetch and decode one sub-resource for a collection
    async fn fetch(
        &self,
        resource: SubResource,
        address: &ContractAddress,
    ) -> Result<Fetched<SubPayload>, FetchFailure>;
}
