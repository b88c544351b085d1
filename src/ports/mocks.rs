//! Test doubles for the marketplace and sink ports.
//!
//! `MockMarketplace` records every call and answers from scripted responses,
//! optionally after a delay, so coalescing, retry and timeout behaviour can be
//! exercised without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CompositeRecord, ContractAddress, SubPayload, SubResource};
use super::marketplace::{FetchError, FetchFailure, Fetched, MarketplacePort, RateLimitSnapshot};
use super::sink::{RecordSink, SinkError};

type Scripted = Result<SubPayload, FetchError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<(SubResource, ContractAddress)>,
    scripts: HashMap<SubResource, VecDeque<Scripted>>,
    defaults: HashMap<SubResource, Scripted>,
    delays: HashMap<SubResource, Duration>,
    rate_limits: HashMap<SubResource, RateLimitSnapshot>,
}

/// Mock marketplace that records calls and replays configured responses
#[derive(Debug, Clone, Default)]
pub struct MockMarketplace {
    state: Arc<Mutex<MockState>>,
}

impl MockMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the standing response for a resource
    pub fn with_response(self, resource: SubResource, response: Scripted) -> Self {
        lock(&self.state).defaults.insert(resource, response);
        self
    }

    /// Builder method to queue one-shot responses, consumed before the standing one
    pub fn with_script(self, resource: SubResource, responses: Vec<Scripted>) -> Self {
        lock(&self.state)
            .scripts
            .entry(resource)
            .or_default()
            .extend(responses);
        self
    }

    /// Builder method to delay every answer for a resource
    pub fn with_delay(self, resource: SubResource, delay: Duration) -> Self {
        lock(&self.state).delays.insert(resource, delay);
        self
    }

    /// Builder method to attach rate-limit metadata to every answer, errors included
    pub fn with_rate_limit(self, resource: SubResource, snapshot: RateLimitSnapshot) -> Self {
        lock(&self.state).rate_limits.insert(resource, snapshot);
        self
    }

    /// Answer every resource successfully with empty-but-valid payloads
    pub fn healthy() -> Self {
        SubResource::ALL
            .into_iter()
            .fold(Self::new(), |mock, resource| {
                mock.with_response(resource, Ok(empty_payload(resource)))
            })
    }

    /// Fail every resource with the same error
    pub fn failing(error: FetchError) -> Self {
        SubResource::ALL
            .into_iter()
            .fold(Self::new(), |mock, resource| {
                mock.with_response(resource, Err(error.clone()))
            })
    }

    /// Number of calls made for a resource
    pub fn call_count(&self, resource: SubResource) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(r, _)| *r == resource)
            .count()
    }

    /// Number of calls made across all resources
    pub fn total_calls(&self) -> usize {
        lock(&self.state).calls.len()
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<(SubResource, ContractAddress)> {
        lock(&self.state).calls.clone()
    }
}

/// A valid, empty payload for a resource
pub fn empty_payload(resource: SubResource) -> SubPayload {
    match resource {
        SubResource::Collection => SubPayload::Collection(Default::default()),
        SubResource::Stats => SubPayload::Stats(Default::default()),
        SubResource::Sales => SubPayload::Sales(Vec::new()),
        SubResource::Offers => SubPayload::Offers(Vec::new()),
        SubResource::Owners => SubPayload::Owners(Vec::new()),
        SubResource::Events => SubPayload::Events(Vec::new()),
        SubResource::Traits => SubPayload::Traits(Default::default()),
    }
}

#[async_trait]
impl MarketplacePort for MockMarketplace {
    async fn fetch(
        &self,
        resource: SubResource,
        address: &ContractAddress,
    ) -> Result<Fetched<SubPayload>, FetchFailure> {
        let (delay, response, rate_limit) = {
            let mut state = lock(&self.state);
            state.calls.push((resource, address.clone()));
            let scripted = state.scripts.get_mut(&resource).and_then(|q| q.pop_front());
            let response = scripted
                .or_else(|| state.defaults.get(&resource).cloned())
                .unwrap_or_else(|| {
                    Err(FetchError::UpstreamClient {
                        status: 404,
                        message: "No response configured".into(),
                    })
                });
            (
                state.delays.get(&resource).copied(),
                response,
                state.rate_limits.get(&resource).copied().unwrap_or_default(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        response
            .map(|value| Fetched::new(value).with_rate_limit(rate_limit))
            .map_err(|error| FetchFailure::from(error).with_rate_limit(rate_limit))
    }
}

/// Sink that keeps every published record
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<Arc<CompositeRecord>>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Arc<CompositeRecord>> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn publish(&self, record: Arc<CompositeRecord>) -> Result<(), SinkError> {
        lock(&self.records).push(record);
        Ok(())
    }
}
