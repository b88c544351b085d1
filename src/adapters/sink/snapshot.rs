//! Snapshot Sink
//!
//! Write-behind persistence of finished composite records. Each record is
//! written as pretty JSON to `<dir>/<address>.json`, replacing the previous
//! snapshot for that collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CompositeRecord, ContractAddress};
use crate::ports::{RecordSink, SinkError};

/// Sink persisting the latest record per collection to a directory
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file for a collection
    pub fn path_for(&self, address: &ContractAddress) -> PathBuf {
        self.dir.join(format!("{}.json", address))
    }

    /// Read back the stored snapshot, if any
    pub async fn load(&self, address: &ContractAddress) -> Result<Option<CompositeRecord>, SinkError> {
        let path = self.path_for(address);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::Unavailable(format!("{}: {}", path.display(), e))),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SinkError::Rejected(format!("corrupted snapshot {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl RecordSink for SnapshotSink {
    async fn publish(&self, record: Arc<CompositeRecord>) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", self.dir.display(), e)))?;

        let content = serde_json::to_string_pretty(record.as_ref())
            .map_err(|e| SinkError::Rejected(e.to_string()))?;

        let path = self.path_for(&record.address);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "Snapshot written");
        Ok(())
    }
}
