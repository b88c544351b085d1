//! Marketplace API Client
//!
//! HTTP client for the NFT marketplace REST API. One GET per sub-resource:
//!
//! ```text
//! {api_url}/collections/{address}            collection metadata
//! {api_url}/collections/{address}/{resource} stats, sales, offers, owners, events, traits
//! ```
//!
//! The client performs exactly one attempt per call. Queueing, rate limiting,
//! retries and circuit breaking happen in the application layer.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, Url};
use serde_json::Value;

use crate::domain::{ContractAddress, SubPayload, SubResource};
use crate::ports::{FetchError, FetchFailure, Fetched, MarketplacePort};
use super::response::{decode_payload, error_message, parse_rate_limit, parse_retry_after};

/// Header carrying the marketplace API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Marketplace client configuration
#[derive(Clone)]
pub struct MarketplaceConfig {
    /// Base URL of the marketplace API
    pub api_url: String,
    /// API key, sent on every request when present
    pub api_key: Option<String>,
    /// Per-request transport timeout
    pub timeout: Duration,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.marketplace.example/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for MarketplaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketplaceConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Marketplace REST client
#[derive(Debug, Clone)]
pub struct MarketplaceClient {
    config: MarketplaceConfig,
    http: Client,
}

impl MarketplaceClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(MarketplaceConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: MarketplaceConfig) -> Result<Self, FetchError> {
        Url::parse(&config.api_url).map_err(|e| {
            FetchError::InvalidInput(format!("Invalid marketplace URL '{}': {}", config.api_url, e))
        })?;

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// URL for one sub-resource of a collection
    pub fn resource_url(&self, resource: SubResource, address: &ContractAddress) -> String {
        let base = self.config.api_url.trim_end_matches('/');
        match resource {
            SubResource::Collection => format!("{}/collections/{}", base, address),
            other => format!("{}/collections/{}/{}", base, address, other),
        }
    }

    /// Turn a response into a payload or the matching fetch error. Rate-limit
    /// headers ride along either way.
    async fn handle_response(
        &self,
        resource: SubResource,
        response: Response,
    ) -> Result<Fetched<SubPayload>, FetchFailure> {
        let status = response.status();
        let now_epoch = Utc::now().timestamp().max(0) as u64;
        let rate_limit = parse_rate_limit(response.headers(), now_epoch);
        let failed = |error: FetchError| FetchFailure::from(error).with_rate_limit(rate_limit);

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(failed(FetchError::from_status(
                status.as_u16(),
                retry_after,
                error_message(&body),
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| failed(FetchError::from(e)))?;
        let payload = decode_payload(resource, body).map_err(failed)?;

        Ok(Fetched::new(payload).with_rate_limit(rate_limit))
    }
}

#[async_trait]
impl MarketplacePort for MarketplaceClient {
    async fn fetch(
        &self,
        resource: SubResource,
        address: &ContractAddress,
    ) -> Result<Fetched<SubPayload>, FetchFailure> {
        let url = self.resource_url(resource, address);
        tracing::trace!(%url, "Marketplace request");

        let mut req = self.http.get(&url).header(ACCEPT, "application/json");
        if let Some(ref api_key) = self.config.api_key {
            req = req.header(API_KEY_HEADER, api_key);
        }

        let response = req.send().await?;
        self.handle_response(resource, response).await
    }
}
