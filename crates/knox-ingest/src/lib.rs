//! Ingestion for the Knox store: a queue and one worker that folds event
//! batches into count maps, writes them through the store router and owns the
//! flow / syslog / alert watermarks.

mod batch;
mod queue;
mod trait_;

pub use batch::{IngestBatch, IngestCursors, IngestJob, JobStatus, SourceRecord};
pub use queue::{apply_batch, Applied, QueueIngestor, MAX_FINISHED_JOBS};
pub use trait_::{IngestError, Ingestor};
