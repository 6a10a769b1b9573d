//! Queue-backed ingestor: one unbounded channel, one worker, job state in a map.

use crate::batch::fold_events;
use crate::{IngestBatch, IngestCursors, IngestError, IngestJob, Ingestor, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use knox_store::{StoreRouter, SummaryAccumulator};
use knox_types::{StoreError, SysSummaryTimeCount};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outcome of storing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Distinct dimension tuples written.
    pub tuples: usize,
    /// Highest source id in the batch, if it carries ids.
    pub max_id: Option<u64>,
}

/// Fold `batch` and write it through `store` in one backend call.
pub async fn apply_batch(store: &StoreRouter, batch: &IngestBatch) -> Result<Applied, StoreError> {
    match batch {
        IngestBatch::Flows { records } => {
            let (counts, max_id) = fold_events(records);
            store.upsert_network_logs(&counts).await?;
            Ok(Applied {
                tuples: counts.len(),
                max_id,
            })
        }
        IngestBatch::SystemLogs { records } | IngestBatch::Alerts { records } => {
            let (counts, max_id) = fold_events(records);
            store.upsert_system_logs(&counts).await?;
            Ok(Applied {
                tuples: counts.len(),
                max_id,
            })
        }
        IngestBatch::Summaries { records } => {
            let mut acc = SummaryAccumulator::new();
            for r in records {
                acc.add(
                    r.summary.clone(),
                    SysSummaryTimeCount::new(r.count, r.updated_time),
                );
            }
            let tuples = acc.flush(store).await?;
            Ok(Applied {
                tuples,
                max_id: None,
            })
        }
    }
}

type JobMap = Arc<RwLock<HashMap<String, IngestJob>>>;

/// Finished jobs kept for status lookups; older ones are dropped first.
pub const MAX_FINISHED_JOBS: usize = 1024;

/// Serialized writer: every batch goes through a single worker task, so
/// watermarks advance in submission order.
pub struct QueueIngestor {
    jobs: JobMap,
    cursors: Arc<RwLock<IngestCursors>>,
    tx: mpsc::UnboundedSender<(String, IngestBatch)>,
}

impl QueueIngestor {
    /// Spawn the worker on the current tokio runtime.
    pub fn new(store: Arc<StoreRouter>) -> Self {
        Self::with_cursors(store, IngestCursors::default())
    }

    /// Resume from previously persisted watermarks.
    pub fn with_cursors(store: Arc<StoreRouter>, start: IngestCursors) -> Self {
        Self::with_options(store, start, MAX_FINISHED_JOBS)
    }

    /// Like [`with_cursors`](Self::with_cursors), keeping at most `max_finished`
    /// done or failed jobs in the status map.
    pub fn with_options(store: Arc<StoreRouter>, start: IngestCursors, max_finished: usize) -> Self {
        let jobs: JobMap = Arc::new(RwLock::new(HashMap::new()));
        let cursors = Arc::new(RwLock::new(start));
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, IngestBatch)>();

        let jobs_clone = Arc::clone(&jobs);
        let cursors_clone = Arc::clone(&cursors);
        tokio::spawn(async move {
            let mut finished: VecDeque<String> = VecDeque::new();
            while let Some((job_id, batch)) = rx.recv().await {
                set_status(&jobs_clone, &job_id, JobStatus::Running).await;

                let result = apply_batch(&store, &batch).await;
                let (status, summary) = match &result {
                    Ok(applied) => {
                        let mut c = cursors_clone.write().await;
                        if let Some(max_id) = applied.max_id {
                            c.advance(&batch, max_id);
                        }
                        tracing::debug!(
                            job_id = %job_id,
                            kind = batch.kind(),
                            tuples = applied.tuples,
                            "batch stored"
                        );
                        (
                            JobStatus::Done,
                            serde_json::json!({
                                "records": batch.len(),
                                "tuples": applied.tuples,
                                "cursors": *c,
                            }),
                        )
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, kind = batch.kind(), error = %e, "batch failed");
                        (JobStatus::Failed, serde_json::json!({ "error": e.to_string() }))
                    }
                };
                let mut guard = jobs_clone.write().await;
                if let Some(job) = guard.get_mut(&job_id) {
                    job.status = status;
                    job.updated_at = Utc::now().to_rfc3339();
                    job.result_summary = Some(summary);
                }
                finished.push_back(job_id);
                while finished.len() > max_finished {
                    if let Some(old) = finished.pop_front() {
                        guard.remove(&old);
                    }
                }
            }
        });

        Self { jobs, cursors, tx }
    }
}

async fn set_status(jobs: &JobMap, job_id: &str, status: JobStatus) {
    let mut guard = jobs.write().await;
    if let Some(job) = guard.get_mut(job_id) {
        job.status = status;
        job.updated_at = Utc::now().to_rfc3339();
    }
}

#[async_trait]
impl Ingestor for QueueIngestor {
    async fn submit(&self, batch: IngestBatch) -> Result<String, IngestError> {
        if batch.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let job = IngestJob {
            job_id: job_id.clone(),
            kind: batch.kind().to_string(),
            status: JobStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
            result_summary: None,
        };
        {
            let mut guard = self.jobs.write().await;
            guard.insert(job_id.clone(), job);
        }
        self.tx
            .send((job_id.clone(), batch))
            .map_err(|_| IngestError::Other("worker channel closed".to_string()))?;
        tracing::info!(job_id = %job_id, "ingest job submitted");
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<IngestJob>, IngestError> {
        let guard = self.jobs.read().await;
        Ok(guard.get(job_id).cloned())
    }

    async fn cursors(&self) -> IngestCursors {
        *self.cursors.read().await
    }
}
