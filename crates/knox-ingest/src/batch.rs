//! Batches accepted by the ingestor, the cursor watermarks they advance, and job records.

use knox_types::{CiliumLog, KubeArmorLog, SummaryRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// One raw event with the source-side id used for watermarking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord<E> {
    pub id: u64,
    #[serde(flatten)]
    pub event: E,
}

/// A batch of raw observations pulled from one upstream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestBatch {
    /// Network flows; advances `last_flow_id`.
    Flows { records: Vec<SourceRecord<CiliumLog>> },
    /// System events; advances `last_syslog_id`.
    SystemLogs { records: Vec<SourceRecord<KubeArmorLog>> },
    /// Policy alerts, stored with system events; advances `last_alert_id`.
    Alerts { records: Vec<SourceRecord<KubeArmorLog>> },
    /// Pre-aggregated summary observations. No watermark.
    Summaries { records: Vec<SummaryRecord> },
}

impl IngestBatch {
    pub fn len(&self) -> usize {
        match self {
            IngestBatch::Flows { records } => records.len(),
            IngestBatch::SystemLogs { records } | IngestBatch::Alerts { records } => records.len(),
            IngestBatch::Summaries { records } => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngestBatch::Flows { .. } => "flows",
            IngestBatch::SystemLogs { .. } => "system_logs",
            IngestBatch::Alerts { .. } => "alerts",
            IngestBatch::Summaries { .. } => "summaries",
        }
    }
}

/// Fold events into a dimension -> observed-count map, plus the highest id seen.
pub(crate) fn fold_events<E: Clone + Eq + Hash>(
    records: &[SourceRecord<E>],
) -> (HashMap<E, u32>, Option<u64>) {
    let mut counts: HashMap<E, u32> = HashMap::new();
    let mut max_id = None;
    for r in records {
        let c = counts.entry(r.event.clone()).or_insert(0);
        *c = c.saturating_add(1);
        max_id = max_id.max(Some(r.id));
    }
    (counts, max_id)
}

/// Ingestion progress: the last source id persisted per stream.
///
/// Read as the lower bound of the next pull; advanced only after a batch is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCursors {
    pub last_flow_id: u64,
    pub last_syslog_id: u64,
    pub last_alert_id: u64,
}

impl IngestCursors {
    /// Advance the watermark `batch` feeds to `max_id`. Never moves backwards.
    pub(crate) fn advance(&mut self, batch: &IngestBatch, max_id: u64) {
        let slot = match batch {
            IngestBatch::Flows { .. } => &mut self.last_flow_id,
            IngestBatch::SystemLogs { .. } => &mut self.last_syslog_id,
            IngestBatch::Alerts { .. } => &mut self.last_alert_id,
            IngestBatch::Summaries { .. } => return,
        };
        *slot = (*slot).max(max_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub job_id: String,
    pub kind: String,
    pub status: JobStatus,
    pub created_at: String,
    pub updated_at: String,
    pub result_summary: Option<serde_json::Value>,
}
