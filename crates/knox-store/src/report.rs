//! Outcome reports for schema setup and bulk policy writes.

use knox_types::{PolicyKey, Table};
use serde::Serialize;

/// Per-table result of [`crate::StoreRouter::ensure_schema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaReport {
    pub created: Vec<Table>,
    pub failed: Vec<(Table, String)>,
    /// Set when no backend is configured and nothing was attempted.
    pub skipped: bool,
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        !self.skipped && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ItemOutcome {
    Written { key: PolicyKey },
    Failed { key: PolicyKey, error: String },
}

impl ItemOutcome {
    pub fn key(&self) -> &PolicyKey {
        match self {
            ItemOutcome::Written { key } | ItemOutcome::Failed { key, .. } => key,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, ItemOutcome::Written { .. })
    }
}

/// Per-item result of a best-effort bulk policy write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl WriteReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.written()
    }

    pub fn is_ok(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PolicyKey, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            ItemOutcome::Failed { key, error } => Some((key, error.as_str())),
            ItemOutcome::Written { .. } => None,
        })
    }
}
