//! Collection Aggregator
//!
//! Builds one `CompositeRecord` per collection by fanning out the seven
//! marketplace sub-fetches concurrently. Each sub-fetch goes through the
//! sub-resource cache, the request coalescer and the timeout orchestrator.
//! A failing sub-fetch degrades to its default and is listed in
//! `partial_failures`; only a malformed top-level address is a hard error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::adapters::cache::{CacheStats, TtlCache};
use crate::domain::{
    AddressError, CircuitBreakerSnapshot, CompositeRecord, ContractAddress, SubPayload, SubResource,
};
use crate::ports::{FetchError, MarketplacePort, RecordSink};
use super::coalescer::{operation, RequestCoalescer};
use super::timeout::with_timeout;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] AddressError),
}

/// Aggregator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Lifetime of a complete composite record
    pub composite_ttl: Duration,
    /// Lifetime of a record with partial failures
    pub partial_ttl: Duration,
    /// Lifetime of an individual sub-resource payload
    pub resource_ttl: Duration,
    /// Deadline per sub-fetch
    pub sub_fetch_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            composite_ttl: Duration::from_secs(300),
            partial_ttl: Duration::from_secs(30),
            resource_ttl: Duration::from_secs(120),
            sub_fetch_timeout: Duration::from_secs(8),
        }
    }
}

/// Status snapshot of the aggregator
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStatus {
    pub records: CacheStats,
    pub payloads: CacheStats,
    pub in_flight: usize,
    pub breaker: CircuitBreakerSnapshot,
}

/// Fans out sub-fetches and merges them into composite records
#[derive(Clone)]
pub struct CollectionAggregator {
    port: Arc<dyn MarketplacePort>,
    coalescer: Arc<RequestCoalescer<SubPayload>>,
    records: Arc<TtlCache<ContractAddress, Arc<CompositeRecord>>>,
    payloads: Arc<TtlCache<String, SubPayload>>,
    sink: Option<Arc<dyn RecordSink>>,
    config: AggregatorConfig,
}

impl CollectionAggregator {
    pub fn new(
        port: Arc<dyn MarketplacePort>,
        coalescer: Arc<RequestCoalescer<SubPayload>>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            port,
            coalescer,
            records: Arc::new(TtlCache::with_ttl(config.composite_ttl)),
            payloads: Arc::new(TtlCache::with_ttl(config.resource_ttl)),
            sink: None,
            config,
        }
    }

    /// Builder method to hand finished records to a downstream sink
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Validate a raw address, then build its composite
    pub async fn analyze(&self, raw: &str) -> Result<Arc<CompositeRecord>, AggregatorError> {
        let address = ContractAddress::parse(raw)?;
        Ok(self.get_composite(&address).await)
    }

    /// Composite record for a collection, from cache or freshly aggregated
    pub async fn get_composite(&self, address: &ContractAddress) -> Arc<CompositeRecord> {
        if let Some(record) = self.records.get(address) {
            if !self.has_recovered(&record) {
                tracing::debug!(address = %address.short(), "Composite cache hit");
                return record;
            }
            tracing::debug!(
                address = %address.short(),
                "Late sub-resource landed, rebuilding degraded composite"
            );
        }

        let (collection, stats, sales, offers, owners, events, traits) = tokio::join!(
            self.bounded_fetch(SubResource::Collection, address),
            self.bounded_fetch(SubResource::Stats, address),
            self.bounded_fetch(SubResource::Sales, address),
            self.bounded_fetch(SubResource::Offers, address),
            self.bounded_fetch(SubResource::Owners, address),
            self.bounded_fetch(SubResource::Events, address),
            self.bounded_fetch(SubResource::Traits, address),
        );

        let mut record = CompositeRecord::empty(address.clone(), Utc::now());
        let results = [
            (SubResource::Collection, collection),
            (SubResource::Stats, stats),
            (SubResource::Sales, sales),
            (SubResource::Offers, offers),
            (SubResource::Owners, owners),
            (SubResource::Events, events),
            (SubResource::Traits, traits),
        ];
        for (resource, result) in results {
            merge(&mut record, resource, result);
        }

        let record = Arc::new(record);
        let ttl = if record.is_degraded() {
            self.config.partial_ttl
        } else {
            self.config.composite_ttl
        };
        self.records.set(address.clone(), Arc::clone(&record), ttl);

        tracing::info!(
            address = %address.short(),
            degraded = record.is_degraded(),
            failures = record.partial_failures.len(),
            ttl_secs = ttl.as_secs(),
            "Composite record built"
        );

        self.publish(&record);
        record
    }

    /// Drop the cached composite so the next call re-aggregates; sub-resource
    /// payloads that are still live are reused
    pub fn invalidate(&self, address: &ContractAddress) -> bool {
        self.records.evict(address).is_some()
    }

    /// Re-aggregate, ignoring any cached composite
    pub async fn refresh(&self, address: &ContractAddress) -> Arc<CompositeRecord> {
        self.invalidate(address);
        self.get_composite(address).await
    }

    /// Remove expired entries from both caches
    pub fn purge_expired(&self) -> usize {
        self.records.purge_expired() + self.payloads.purge_expired()
    }

    pub fn status(&self) -> AggregatorStatus {
        AggregatorStatus {
            records: self.records.stats(),
            payloads: self.payloads.stats(),
            in_flight: self.coalescer.in_flight_count(),
            breaker: self.coalescer.breaker().snapshot(),
        }
    }

    /// A degraded record is stale once any of its failed sub-resources has a
    /// live payload, e.g. a fetch that finished after its deadline
    fn has_recovered(&self, record: &CompositeRecord) -> bool {
        record
            .failed_resources()
            .into_iter()
            .any(|resource| self.payloads.contains(&resource.coalescing_key(&record.address)))
    }

    async fn bounded_fetch(
        &self,
        resource: SubResource,
        address: &ContractAddress,
    ) -> Result<SubPayload, FetchError> {
        let deadline = self.config.sub_fetch_timeout;
        with_timeout(
            self.clone().fetch_resource(resource, address.clone()),
            deadline,
            Err(FetchError::Timeout(deadline)),
        )
        .await
    }

    /// Cache → coalescer → cache write. Runs detached under the timeout, so
    /// the write still happens when the caller has stopped waiting.
    async fn fetch_resource(
        self,
        resource: SubResource,
        address: ContractAddress,
    ) -> Result<SubPayload, FetchError> {
        let key = resource.coalescing_key(&address);
        if let Some(payload) = self.payloads.get(&key) {
            return Ok(payload);
        }

        let port = Arc::clone(&self.port);
        let op = operation(move || {
            let port = Arc::clone(&port);
            let address = address.clone();
            async move { port.fetch(resource, &address).await }
        });

        let payload = self
            .coalescer
            .submit(resource.endpoint_key(), key.clone(), op)
            .await?;
        self.payloads.set(key, payload.clone(), self.config.resource_ttl);
        Ok(payload)
    }

    fn publish(&self, record: &Arc<CompositeRecord>) {
        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let record = Arc::clone(record);
            tokio::spawn(async move {
                if let Err(e) = sink.publish(record).await {
                    tracing::warn!(error = %e, "Record sink rejected composite");
                }
            });
        }
    }
}

fn merge(record: &mut CompositeRecord, resource: SubResource, result: Result<SubPayload, FetchError>) {
    match result {
        Ok(payload) if payload.resource() == resource => record.apply(payload),
        Ok(payload) => record.record_failure(
            resource,
            format!("unexpected {} payload", payload.resource()),
        ),
        Err(error) => {
            tracing::debug!(
                address = %record.address.short(),
                resource = %resource,
                kind = error.kind(),
                "Sub-fetch degraded"
            );
            record.record_failure(resource, error.to_string());
        }
    }
}
