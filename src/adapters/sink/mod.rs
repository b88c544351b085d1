//! Record sinks
//!
//! Downstream consumers of finished composite records.

mod log_sink;
mod snapshot;

pub use log_sink::LogSink;
pub use snapshot::SnapshotSink;
