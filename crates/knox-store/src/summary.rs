//! In-memory folding of summary observations before they reach the store.

use crate::StoreRouter;
use knox_types::{StoreError, SummaryMap, SysSummaryTimeCount, SystemSummary};

/// Folds summary observations by tuple so a flush writes each tuple once.
///
/// Pending observations survive a failed flush and go out with the next one.
#[derive(Debug, Default)]
pub struct SummaryAccumulator {
    pending: SummaryMap,
}

impl SummaryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One observation of `summary` at `updated_time`.
    pub fn record(&mut self, summary: SystemSummary, updated_time: i64) {
        self.add(summary, SysSummaryTimeCount::new(1, updated_time));
    }

    pub fn add(&mut self, summary: SystemSummary, delta: SysSummaryTimeCount) {
        self.pending
            .entry(summary)
            .and_modify(|tc| tc.absorb(delta))
            .or_insert(delta);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &SummaryMap {
        &self.pending
    }

    /// Write pending tuples through `store`. Returns the number of tuples written.
    pub async fn flush(&mut self, store: &StoreRouter) -> Result<usize, StoreError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        store.upsert_system_summaries(&self.pending).await?;
        let n = self.pending.len();
        self.pending.clear();
        Ok(n)
    }
}
