use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::CompositeRecord;
use crate::ports::{RecordSink, SinkError};

/// Sink that emits a one-line summary per record through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn publish(&self, record: Arc<CompositeRecord>) -> Result<(), SinkError> {
        let name = record
            .collection
            .as_ref()
            .and_then(|c| c.base_name())
            .unwrap_or("<unknown>");
        let floor = record.stats.as_ref().and_then(|s| s.floor_price);

        if record.is_degraded() {
            tracing::warn!(
                address = %record.address.short(),
                name,
                failed = ?record.failed_resources(),
                "Composite record published (degraded)"
            );
        } else {
            tracing::info!(
                address = %record.address.short(),
                name,
                floor = ?floor,
                holders = ?record.holder_count(),
                sales = record.sales.len(),
                "Composite record published"
            );
        }
        Ok(())
    }
}
