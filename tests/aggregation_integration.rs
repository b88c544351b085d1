//! Aggregation Integration Tests
//!
//! Integration tests that verify the acquisition pipeline works end to end:
//! 1. Aggregator -> Coalescer -> MarketplacePort fan-out and deduplication
//! 2. Partial failures, retries and the circuit breaker
//! 3. Timeouts whose late results still land in the cache
//! 4. Rate-limit headers throttling later dispatches
//!
//! All tests are deterministic (no real network calls, paused clock) and use
//! the scriptable MockMarketplace.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use nft_scout::application::{
    AggregatorConfig, AggregatorError, CollectionAggregator, RequestCoalescer,
};
use nft_scout::domain::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ContractAddress, RateLimitConfig,
    RateLimiter, RetryPolicy, SubPayload, SubResource,
};
use nft_scout::ports::mocks::{MockMarketplace, RecordingSink};
use nft_scout::ports::{FetchError, RateLimitSnapshot};

// ============================================================================
// Test Fixtures
// ============================================================================

const BAYC: &str = "0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d";
const AZUKI: &str = "0xed5af388653567af2f388e6224dc7c4b3241c544";

struct Harness {
    mock: MockMarketplace,
    breaker: Arc<CircuitBreaker>,
    aggregator: CollectionAggregator,
}

fn harness_with(
    mock: MockMarketplace,
    retry: RetryPolicy,
    failure_threshold: u32,
    sub_fetch_timeout: Duration,
) -> Harness {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
        100,
        Duration::from_millis(1000),
    )));
    let breaker = Arc::new(CircuitBreaker::with_config(
        "marketplace",
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::from_secs(30),
        },
    ));
    let coalescer = Arc::new(RequestCoalescer::new(limiter, Arc::clone(&breaker), retry));
    let config = AggregatorConfig {
        sub_fetch_timeout,
        ..AggregatorConfig::default()
    };
    let aggregator = CollectionAggregator::new(Arc::new(mock.clone()), coalescer, config);

    Harness {
        mock,
        breaker,
        aggregator,
    }
}

fn harness(mock: MockMarketplace) -> Harness {
    harness_with(mock, RetryPolicy::default(), 5, Duration::from_secs(30))
}

fn address(raw: &str) -> ContractAddress {
    ContractAddress::parse(raw).unwrap()
}

fn fur_traits() -> SubPayload {
    let mut values = BTreeMap::new();
    values.insert("Gold".to_string(), 46);
    let mut traits = BTreeMap::new();
    traits.insert("Fur".to_string(), values);
    SubPayload::Traits(traits)
}

// ============================================================================
// Fan-out and Coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_upstream_calls() {
    let mock = SubResource::ALL
        .into_iter()
        .fold(MockMarketplace::healthy(), |mock, resource| {
            mock.with_delay(resource, Duration::from_millis(50))
        });
    let h = harness(mock);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let aggregator = h.aggregator.clone();
        handles.push(tokio::spawn(async move {
            aggregator.get_composite(&address(BAYC)).await
        }));
    }

    for handle in handles {
        let record = handle.await.unwrap();
        assert!(!record.is_degraded());
    }

    for resource in SubResource::ALL {
        assert_eq!(h.mock.call_count(resource), 1, "{} fetched more than once", resource);
    }
}

#[tokio::test(start_paused = true)]
async fn test_distinct_collections_fetch_independently() {
    let h = harness(MockMarketplace::healthy());

    let bayc_addr = address(BAYC);
    let azuki_addr = address(AZUKI);
    let (bayc, azuki) = tokio::join!(
        h.aggregator.get_composite(&bayc_addr),
        h.aggregator.get_composite(&azuki_addr),
    );

    assert_eq!(bayc.address, address(BAYC));
    assert_eq!(azuki.address, address(AZUKI));
    assert_eq!(h.mock.total_calls(), 14);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_address_never_reaches_upstream() {
    let h = harness(MockMarketplace::healthy());

    let result = h.aggregator.analyze("0x1234").await;
    assert!(matches!(result, Err(AggregatorError::InvalidInput(_))));
    assert_eq!(h.mock.total_calls(), 0);
}

// ============================================================================
// Partial Failures, Retries and the Circuit Breaker
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_degraded_record_expires_early_and_reuses_payloads() {
    let mock = MockMarketplace::healthy().with_response(
        SubResource::Stats,
        Err(FetchError::UpstreamClient {
            status: 404,
            message: "stats unavailable".into(),
        }),
    );
    let h = harness(mock);
    let bayc = address(BAYC);

    let first = h.aggregator.get_composite(&bayc).await;
    assert_eq!(first.failed_resources(), vec![SubResource::Stats]);
    assert!(first.stats.is_none());

    // still cached inside partial_ttl
    let again = h.aggregator.get_composite(&bayc).await;
    assert!(Arc::ptr_eq(&first, &again));

    sleep(AggregatorConfig::default().partial_ttl + Duration::from_secs(1)).await;
    let rebuilt = h.aggregator.get_composite(&bayc).await;

    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(h.mock.call_count(SubResource::Stats), 2);
    assert_eq!(h.mock.call_count(SubResource::Collection), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_recover_within_budget() {
    let server_error = FetchError::UpstreamServer {
        status: 503,
        message: "maintenance".into(),
    };
    let mock = MockMarketplace::healthy().with_script(
        SubResource::Sales,
        vec![Err(server_error.clone()), Err(server_error)],
    );
    let h = harness(mock);

    let record = h.aggregator.get_composite(&address(BAYC)).await;

    assert!(!record.is_degraded());
    assert_eq!(h.mock.call_count(SubResource::Sales), 3);
    assert_eq!(h.breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_and_fails_fast() {
    let h = harness_with(
        MockMarketplace::failing(FetchError::UpstreamServer {
            status: 500,
            message: "internal error".into(),
        }),
        RetryPolicy::no_retry(),
        3,
        Duration::from_secs(30),
    );

    let record = h.aggregator.get_composite(&address(BAYC)).await;

    assert_eq!(record.partial_failures.len(), 7);
    assert_eq!(h.breaker.state(), CircuitState::Open);
    assert_eq!(h.mock.total_calls(), 3);
    assert!(record
        .partial_failures
        .iter()
        .any(|f| f.reason.contains("Circuit open")));

    // a different collection is refused without touching the upstream
    let other = h.aggregator.get_composite(&address(AZUKI)).await;
    assert_eq!(other.partial_failures.len(), 7);
    assert_eq!(h.mock.total_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_recloses_circuit() {
    let server_error = FetchError::UpstreamServer {
        status: 500,
        message: "internal error".into(),
    };
    let failing = [SubResource::Collection, SubResource::Stats, SubResource::Sales];
    let mock = SubResource::ALL
        .into_iter()
        .fold(MockMarketplace::healthy(), |mock, resource| {
            if failing.contains(&resource) {
                mock.with_script(resource, vec![Err(server_error.clone())])
                    .with_delay(resource, Duration::from_millis(5))
            } else {
                mock.with_delay(resource, Duration::from_millis(10))
            }
        });
    let h = harness_with(mock, RetryPolicy::no_retry(), 3, Duration::from_secs(30));

    // three failures open the circuit; slower successes admitted earlier do not close it
    let first = h.aggregator.get_composite(&address(BAYC)).await;
    assert_eq!(first.failed_resources(), failing.to_vec());
    assert_eq!(h.breaker.state(), CircuitState::Open);

    // after the cooldown exactly one sub-fetch goes out as the trial
    sleep(Duration::from_secs(30)).await;
    let azuki = address(AZUKI);
    let during_trial = h.aggregator.get_composite(&azuki).await;
    assert_eq!(during_trial.partial_failures.len(), 6);
    assert!(during_trial
        .partial_failures
        .iter()
        .all(|f| f.reason.contains("Circuit open")));
    assert_eq!(h.mock.total_calls(), 8);
    assert_eq!(h.breaker.state(), CircuitState::Closed);

    // the trial's payload is reused, the rest are fetched now that the circuit is closed
    let recovered = h.aggregator.refresh(&azuki).await;
    assert!(!recovered.is_degraded());
    assert_eq!(h.mock.total_calls(), 14);
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_late_result_lands_in_cache_after_timeout() {
    let mock = MockMarketplace::healthy()
        .with_response(SubResource::Traits, Ok(fur_traits()))
        .with_delay(SubResource::Traits, Duration::from_millis(500));
    let h = harness_with(mock, RetryPolicy::default(), 5, Duration::from_millis(100));
    let bayc = address(BAYC);

    let started = Instant::now();
    let degraded = h.aggregator.get_composite(&bayc).await;

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(degraded.failed_resources(), vec![SubResource::Traits]);
    assert!(degraded.partial_failures[0].reason.contains("timed out"));

    sleep(Duration::from_millis(500)).await;
    let fresh = h.aggregator.refresh(&bayc).await;

    assert!(!fresh.is_degraded());
    assert_eq!(fresh.traits.as_ref().unwrap()["Fur"]["Gold"], 46);
    assert_eq!(h.mock.call_count(SubResource::Traits), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_result_replaces_degraded_record_without_refresh() {
    let mock = MockMarketplace::healthy()
        .with_response(SubResource::Traits, Ok(fur_traits()))
        .with_delay(SubResource::Traits, Duration::from_millis(500));
    let h = harness_with(mock, RetryPolicy::default(), 5, Duration::from_millis(100));
    let bayc = address(BAYC);

    let degraded = h.aggregator.get_composite(&bayc).await;
    assert_eq!(degraded.failed_resources(), vec![SubResource::Traits]);

    // still inside partial_ttl, but the traits payload has landed
    sleep(Duration::from_millis(500)).await;
    let rebuilt = h.aggregator.get_composite(&bayc).await;

    assert!(!rebuilt.is_degraded());
    assert_eq!(rebuilt.traits.as_ref().unwrap()["Fur"]["Gold"], 46);
    assert_eq!(h.mock.total_calls(), 7);

    let cached = h.aggregator.get_composite(&bayc).await;
    assert!(Arc::ptr_eq(&rebuilt, &cached));
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_exhausted_header_delays_next_dispatch() {
    let mock = MockMarketplace::healthy().with_rate_limit(
        SubResource::Owners,
        RateLimitSnapshot {
            remaining: Some(0),
            reset_after: Some(Duration::from_secs(5)),
        },
    );
    let h = harness(mock);

    h.aggregator.get_composite(&address(BAYC)).await;

    let started = Instant::now();
    let record = h.aggregator.get_composite(&address(AZUKI)).await;

    assert!(!record.is_degraded());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.mock.call_count(SubResource::Owners), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_header_on_server_error_holds_retry() {
    let mock = MockMarketplace::healthy()
        .with_script(
            SubResource::Owners,
            vec![Err(FetchError::UpstreamServer {
                status: 503,
                message: "maintenance".into(),
            })],
        )
        .with_rate_limit(
            SubResource::Owners,
            RateLimitSnapshot {
                remaining: Some(0),
                reset_after: Some(Duration::from_secs(5)),
            },
        );
    let h = harness(mock);

    let started = Instant::now();
    let record = h.aggregator.get_composite(&address(BAYC)).await;

    assert!(!record.is_degraded());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.mock.call_count(SubResource::Owners), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_response_is_retried_after_delay() {
    let mock = MockMarketplace::healthy().with_script(
        SubResource::Offers,
        vec![Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        })],
    );
    let h = harness(mock);

    let started = Instant::now();
    let record = h.aggregator.get_composite(&address(BAYC)).await;

    assert!(!record.is_degraded());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(h.mock.call_count(SubResource::Offers), 2);
}

// ============================================================================
// Downstream Sink
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sink_receives_each_built_record() {
    let sink = RecordingSink::new();
    let h = harness(MockMarketplace::healthy());
    let aggregator = h.aggregator.clone().with_sink(Arc::new(sink.clone()));

    let record = aggregator.get_composite(&address(BAYC)).await;
    let _cached = aggregator.get_composite(&address(BAYC)).await;

    sleep(Duration::from_millis(1)).await;

    let published = sink.records();
    assert_eq!(published.len(), 1);
    assert!(Arc::ptr_eq(&published[0], &record));
}
