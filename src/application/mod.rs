//! Application Layer
//!
//! Request orchestration on top of the domain policies: the per-endpoint
//! coalescing queue, the timeout orchestrator, and the collection aggregator.

pub mod aggregator;
pub mod coalescer;
pub mod timeout;

pub use aggregator::{AggregatorConfig, AggregatorError, AggregatorStatus, CollectionAggregator};
pub use coalescer::{operation, BoxFuture, Operation, QueuedRequest, RequestCoalescer};
pub use timeout::with_timeout;
