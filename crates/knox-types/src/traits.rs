//! Storage backend contract and error types.

use crate::{
    CiliumLog, EventPage, EventQuery, KubeArmorLog, NetworkPolicy, PodFilter, PolicyFilter,
    PolicyKey, PolicyKind, PolicyYaml, SummaryMap, SummaryRecord, SystemPolicy, SystemSummary,
    WorkloadFileSets, WorkloadProcessFileSet,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Every table a backend manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    NetworkPolicy,
    SystemPolicy,
    WorkloadProcessFileSet,
    SystemLogs,
    NetworkLogs,
    PolicyYaml,
    SystemSummary,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::NetworkPolicy,
        Table::SystemPolicy,
        Table::WorkloadProcessFileSet,
        Table::SystemLogs,
        Table::NetworkLogs,
        Table::PolicyYaml,
        Table::SystemSummary,
    ];

    /// Tables dropped by a network-only clear.
    pub const NETWORK: [Table; 2] = [Table::NetworkPolicy, Table::NetworkLogs];

    pub fn name(self) -> &'static str {
        match self {
            Table::NetworkPolicy => "network_policy",
            Table::SystemPolicy => "system_policy",
            Table::WorkloadProcessFileSet => "work_load_process_file_set",
            Table::SystemLogs => "system_logs",
            Table::NetworkLogs => "network_logs",
            Table::PolicyYaml => "policy_yaml",
            Table::SystemSummary => "system_summary",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One relational engine. Implementations are self-contained: each owns its
/// dialect, pooling and transaction discipline.
///
/// Upserts (`upsert_*`) must be atomic per dimension tuple: concurrent callers
/// incrementing the same tuple never produce two rows or lose an increment.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Driver name as it appears in configuration (`mysql`, `sqlite3`).
    fn driver_name(&self) -> &'static str;

    /// Create one table if absent. Re-running on an existing table is a no-op.
    async fn create_table(&self, table: Table) -> Result<(), BackendError>;

    /// Delete every row of one table.
    async fn clear_table(&self, table: Table) -> Result<(), BackendError>;

    async fn get_network_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<NetworkPolicy>, BackendError>;

    /// Insert one document. An existing document with the same key is a `Conflict`.
    async fn insert_network_policy(&self, policy: &NetworkPolicy) -> Result<(), BackendError>;

    /// Replace the content of the document with the same key; `NotFound` if absent.
    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), BackendError>;

    async fn get_system_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<SystemPolicy>, BackendError>;

    async fn insert_system_policy(&self, policy: &SystemPolicy) -> Result<(), BackendError>;

    async fn update_system_policy(&self, policy: &SystemPolicy) -> Result<(), BackendError>;

    /// Mark `outdated` as outdated (pointing at `latest`) and `latest` as latest, in one transaction.
    async fn supersede_policy(
        &self,
        kind: PolicyKind,
        outdated: &PolicyKey,
        latest: &PolicyKey,
    ) -> Result<(), BackendError>;

    /// File sets whose key matches the non-empty fields of `filter`.
    async fn get_workload_file_sets(
        &self,
        filter: &WorkloadProcessFileSet,
    ) -> Result<WorkloadFileSets, BackendError>;

    /// Append `files` to the set for `key`, creating it (with a generated policy name) if absent.
    async fn insert_workload_file_set(
        &self,
        key: &WorkloadProcessFileSet,
        files: &[String],
        now: i64,
    ) -> Result<(), BackendError>;

    /// Delete sets matching `filter` last updated at or before `cutoff`. Returns rows removed.
    async fn clear_workload_file_sets(
        &self,
        filter: &WorkloadProcessFileSet,
        cutoff: i64,
    ) -> Result<u64, BackendError>;

    async fn upsert_system_logs(
        &self,
        logs: &HashMap<KubeArmorLog, u32>,
        updated_time: i64,
    ) -> Result<(), BackendError>;

    async fn get_system_logs(
        &self,
        query: &EventQuery<KubeArmorLog>,
    ) -> Result<EventPage<KubeArmorLog>, BackendError>;

    async fn upsert_network_logs(
        &self,
        logs: &HashMap<CiliumLog, u32>,
        updated_time: i64,
    ) -> Result<(), BackendError>;

    async fn get_network_logs(
        &self,
        query: &EventQuery<CiliumLog>,
    ) -> Result<EventPage<CiliumLog>, BackendError>;

    async fn get_pod_names(&self, filter: &PodFilter) -> Result<Vec<String>, BackendError>;

    async fn get_policy_yamls(&self, policy_type: &str) -> Result<Vec<PolicyYaml>, BackendError>;

    async fn upsert_policy_yamls(&self, policies: &[PolicyYaml]) -> Result<(), BackendError>;

    async fn upsert_system_summaries(&self, summaries: &SummaryMap) -> Result<(), BackendError>;

    async fn get_system_summaries(
        &self,
        filter: &SystemSummary,
    ) -> Result<Vec<SummaryRecord>, BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no db driver configured")]
    NoBackend,
    #[error(transparent)]
    Backend(#[from] BackendError),
}
