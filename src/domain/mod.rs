//! Domain Layer - Core types and resilience logic for nft-scout
//!
//! This module contains pure domain types and policy state machines with no
//! network dependencies. All external interactions happen through the ports
//! layer.
//!
//! ## Resilience Modules
//!
//! - `rate_limiter`: Per-endpoint windows reconciled from upstream headers
//! - `circuit_breaker`: Suspend traffic to a failing upstream
//! - `retry_policy`: Failure classification and jittered backoff

pub mod address;
pub mod circuit_breaker;
pub mod composite;
pub mod rate_limiter;
pub mod retry_policy;

pub use address::{AddressError, AddressKind, ContractAddress};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use composite::{
    ActivityEvent, CollectionInfo, CollectionStats, CompositeRecord, Offer, Owner, PartialFailure,
    Sale, SubPayload, SubResource, TraitDistribution,
};
pub use rate_limiter::{EndpointLimitState, Permit, RateLimitConfig, RateLimiter, WindowLimit};
pub use retry_policy::{RetryDecision, RetryPolicy};
