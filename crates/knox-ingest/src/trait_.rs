//! Ingestor trait: submit a batch, poll its job, read the watermarks.

use crate::{IngestBatch, IngestCursors, IngestJob};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("ingest error: {0}")]
    Other(String),
    #[error("empty batch")]
    EmptyBatch,
}

/// Accepts event batches for asynchronous storage.
///
/// `get_status` returns `Ok(None)` for an unknown job id; the API maps that to 404.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Queue `batch`; returns the job id.
    async fn submit(&self, batch: IngestBatch) -> Result<String, IngestError>;

    async fn get_status(&self, job_id: &str) -> Result<Option<IngestJob>, IngestError>;

    /// Current watermarks. Only reflects batches that were stored.
    async fn cursors(&self) -> IngestCursors;
}
