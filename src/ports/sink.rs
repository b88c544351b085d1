use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::CompositeRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Downstream consumer of finished composite records (scoring, write-behind
/// storage, report ledgers). Publishing never blocks the aggregation path.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish(&self, record: Arc<CompositeRecord>) -> Result<(), SinkError>;
}
