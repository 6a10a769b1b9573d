//! StoreRouter: the single entry point callers use to reach the configured backend.

use crate::report::{ItemOutcome, SchemaReport, WriteReport};
use chrono::Utc;
use knox_types::{
    Backend, BackendError, CiliumLog, DbConfig, EventPage, EventQuery, KubeArmorLog,
    NetworkPolicy, PodFilter, PolicyDocument, PolicyFilter, PolicyKey, PolicyKind, PolicyYaml,
    StoreError, SummaryMap, SummaryRecord, SystemPolicy, SystemSummary, Table, WorkloadFileSets,
    WorkloadProcessFileSet, matches_selector,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Routes store operations to the backend chosen at startup.
///
/// Without a backend, reads return empty results and the write operations
/// that need persistence fail with [`StoreError::NoBackend`].
#[derive(Clone)]
pub struct StoreRouter {
    backend: Option<Arc<dyn Backend>>,
}

impl std::fmt::Debug for StoreRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRouter")
            .field("driver", &self.driver_name())
            .finish()
    }
}

fn logged<T>(op: &'static str, result: Result<T, BackendError>) -> Result<T, StoreError> {
    result.map_err(|e| {
        tracing::error!(op, error = %e, "backend call failed");
        StoreError::from(e)
    })
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl StoreRouter {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self { backend }
    }

    /// Router with no backend; reads are empty and writes fail.
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }

    /// Open the backend named in `cfg`. An unknown driver yields an unconfigured router.
    pub async fn connect(cfg: &DbConfig) -> Result<Self, StoreError> {
        let backend = knox_db::open_backend(cfg).await?;
        if backend.is_none() {
            tracing::warn!("no db driver configured; reads return empty, writes fail");
        }
        Ok(Self::new(backend))
    }

    pub fn driver_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.driver_name())
    }

    fn require(&self, op: &'static str) -> Result<&Arc<dyn Backend>, StoreError> {
        self.backend.as_ref().ok_or_else(|| {
            tracing::warn!(op, "no db driver configured");
            StoreError::NoBackend
        })
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    /// Create every table if absent. Each table is attempted independently;
    /// failures are logged and reported, never fatal.
    pub async fn ensure_schema(&self) -> SchemaReport {
        let Some(backend) = &self.backend else {
            tracing::warn!("no db driver configured, skipping schema setup");
            return SchemaReport {
                skipped: true,
                ..SchemaReport::default()
            };
        };
        let mut report = SchemaReport::default();
        for table in Table::ALL {
            match backend.create_table(table).await {
                Ok(()) => report.created.push(table),
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "failed to create table");
                    report.failed.push((table, e.to_string()));
                }
            }
        }
        tracing::info!(
            driver = backend.driver_name(),
            created = report.created.len(),
            failed = report.failed.len(),
            "schema ready"
        );
        report
    }

    /// Delete all rows of every table. Failures are logged only.
    pub async fn clear_tables(&self) {
        self.clear(&Table::ALL).await
    }

    /// Delete all rows of the network policy and network log tables.
    pub async fn clear_network_tables(&self) {
        self.clear(&Table::NETWORK).await
    }

    async fn clear(&self, tables: &[Table]) {
        let Some(backend) = &self.backend else {
            tracing::warn!("no db driver configured, nothing to clear");
            return;
        };
        for &table in tables {
            if let Err(e) = backend.clear_table(table).await {
                tracing::error!(table = %table, error = %e, "failed to clear table");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Policies
    // -----------------------------------------------------------------------

    pub async fn get_network_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<NetworkPolicy>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_network_policies", b.get_network_policies(filter).await),
            None => Ok(Vec::new()),
        }
    }

    /// Policies matching `filter` whose `matchLabels` contain every pair in `selector`.
    pub async fn get_network_policies_by_selector(
        &self,
        filter: &PolicyFilter,
        selector: &HashMap<String, String>,
    ) -> Result<Vec<NetworkPolicy>, StoreError> {
        Ok(select(self.get_network_policies(filter).await?, selector))
    }

    pub async fn get_system_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<SystemPolicy>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_system_policies", b.get_system_policies(filter).await),
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_system_policies_by_selector(
        &self,
        filter: &PolicyFilter,
        selector: &HashMap<String, String>,
    ) -> Result<Vec<SystemPolicy>, StoreError> {
        Ok(select(self.get_system_policies(filter).await?, selector))
    }

    pub async fn insert_network_policies(&self, policies: &[NetworkPolicy]) -> WriteReport {
        self.write_each("insert_network_policies", policies, |b, p| async move {
            b.insert_network_policy(p).await
        })
        .await
    }

    pub async fn insert_system_policies(&self, policies: &[SystemPolicy]) -> WriteReport {
        self.write_each("insert_system_policies", policies, |b, p| async move {
            b.insert_system_policy(p).await
        })
        .await
    }

    /// Replace the content of the stored policy with the same key.
    pub async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError> {
        let b = self.require("update_network_policy")?;
        logged("update_network_policy", b.update_network_policy(policy).await)
    }

    pub async fn update_network_policies(&self, policies: &[NetworkPolicy]) -> WriteReport {
        self.write_each("update_network_policies", policies, |b, p| async move {
            b.update_network_policy(p).await
        })
        .await
    }

    pub async fn update_system_policy(&self, policy: &SystemPolicy) -> Result<(), StoreError> {
        let b = self.require("update_system_policy")?;
        logged("update_system_policy", b.update_system_policy(policy).await)
    }

    pub async fn update_system_policies(&self, policies: &[SystemPolicy]) -> WriteReport {
        self.write_each("update_system_policies", policies, |b, p| async move {
            b.update_system_policy(p).await
        })
        .await
    }

    /// Mark `outdated` as replaced by `latest`. Without a backend this is a logged no-op.
    pub async fn supersede_policy(
        &self,
        kind: PolicyKind,
        outdated: &PolicyKey,
        latest: &PolicyKey,
    ) -> Result<(), StoreError> {
        let Some(b) = &self.backend else {
            tracing::warn!(outdated = %outdated, latest = %latest, "no db driver configured, supersede skipped");
            return Ok(());
        };
        logged(
            "supersede_policy",
            b.supersede_policy(kind, outdated, latest).await,
        )?;
        tracing::info!(?kind, outdated = %outdated, latest = %latest, "policy superseded");
        Ok(())
    }

    async fn write_each<'a, P, F, Fut>(
        &self,
        op: &'static str,
        policies: &'a [P],
        write: F,
    ) -> WriteReport
    where
        P: PolicyDocument,
        F: Fn(Arc<dyn Backend>, &'a P) -> Fut,
        Fut: Future<Output = Result<(), BackendError>>,
    {
        let mut report = WriteReport::default();
        for policy in policies {
            let key = policy.key();
            let result = match &self.backend {
                Some(b) => write(Arc::clone(b), policy).await.map_err(StoreError::from),
                None => Err(StoreError::NoBackend),
            };
            match result {
                Ok(()) => report.outcomes.push(ItemOutcome::Written { key }),
                Err(e) => {
                    tracing::error!(op, key = %key, error = %e, "policy write failed");
                    report.outcomes.push(ItemOutcome::Failed {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    // -----------------------------------------------------------------------
    // Workload process file sets
    // -----------------------------------------------------------------------

    /// File sets and generated policy names for keys matching `filter`. Absence is empty.
    pub async fn get_workload_file_set(
        &self,
        filter: &WorkloadProcessFileSet,
    ) -> Result<WorkloadFileSets, StoreError> {
        match &self.backend {
            Some(b) => logged("get_workload_file_set", b.get_workload_file_sets(filter).await),
            None => Ok(WorkloadFileSets::default()),
        }
    }

    pub async fn insert_workload_file_set(
        &self,
        key: &WorkloadProcessFileSet,
        files: &[String],
    ) -> Result<(), StoreError> {
        let b = self.require("insert_workload_file_set")?;
        logged(
            "insert_workload_file_set",
            b.insert_workload_file_set(key, files, now()).await,
        )
    }

    /// Purge sets matching `filter` that have not been updated within `older_than`.
    pub async fn clear_workload_file_set(
        &self,
        filter: &WorkloadProcessFileSet,
        older_than: Duration,
    ) -> Result<u64, StoreError> {
        let b = self.require("clear_workload_file_set")?;
        let age = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now().saturating_sub(age);
        let removed = logged(
            "clear_workload_file_set",
            b.clear_workload_file_sets(filter, cutoff).await,
        )?;
        tracing::debug!(removed, cutoff, "cleared workload file sets");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Policy blobs
    // -----------------------------------------------------------------------

    pub async fn get_policy_yamls(&self, policy_type: &str) -> Result<Vec<PolicyYaml>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_policy_yamls", b.get_policy_yamls(policy_type).await),
            None => Ok(Vec::new()),
        }
    }

    pub async fn upsert_policy_yamls(&self, policies: &[PolicyYaml]) -> Result<(), StoreError> {
        let b = self.require("upsert_policy_yamls")?;
        logged("upsert_policy_yamls", b.upsert_policy_yamls(policies).await)
    }

    // -----------------------------------------------------------------------
    // Telemetry
    // -----------------------------------------------------------------------

    /// Add each observed count to its event's stored counter, inserting new events.
    pub async fn upsert_system_logs(
        &self,
        logs: &HashMap<KubeArmorLog, u32>,
    ) -> Result<(), StoreError> {
        let b = self.require("upsert_system_logs")?;
        logged("upsert_system_logs", b.upsert_system_logs(logs, now()).await)
    }

    pub async fn get_system_logs(
        &self,
        query: &EventQuery<KubeArmorLog>,
    ) -> Result<EventPage<KubeArmorLog>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_system_logs", b.get_system_logs(query).await),
            None => Ok(EventPage::default()),
        }
    }

    pub async fn upsert_network_logs(
        &self,
        logs: &HashMap<CiliumLog, u32>,
    ) -> Result<(), StoreError> {
        let b = self.require("upsert_network_logs")?;
        logged("upsert_network_logs", b.upsert_network_logs(logs, now()).await)
    }

    pub async fn get_network_logs(
        &self,
        query: &EventQuery<CiliumLog>,
    ) -> Result<EventPage<CiliumLog>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_network_logs", b.get_network_logs(query).await),
            None => Ok(EventPage::default()),
        }
    }

    pub async fn get_pod_names(&self, filter: &PodFilter) -> Result<Vec<String>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_pod_names", b.get_pod_names(filter).await),
            None => Ok(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Summaries
    // -----------------------------------------------------------------------

    pub async fn upsert_system_summaries(&self, summaries: &SummaryMap) -> Result<(), StoreError> {
        let b = self.require("upsert_system_summaries")?;
        logged(
            "upsert_system_summaries",
            b.upsert_system_summaries(summaries).await,
        )
    }

    pub async fn get_system_summaries(
        &self,
        filter: &SystemSummary,
    ) -> Result<Vec<SummaryRecord>, StoreError> {
        match &self.backend {
            Some(b) => logged("get_system_summaries", b.get_system_summaries(filter).await),
            None => Ok(Vec::new()),
        }
    }
}

fn select<P: PolicyDocument>(policies: Vec<P>, selector: &HashMap<String, String>) -> Vec<P> {
    policies
        .into_iter()
        .filter(|p| matches_selector(&p.selector().match_labels, selector))
        .collect()
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use knox_db::SqliteBackend;
    use knox_types::{
        EventKind, NetworkPolicySpec, Page, PolicyMetadata, PolicyStatus, Selector,
        SysSummaryTimeCount, SystemPolicySpec,
    };
    use std::collections::BTreeMap;

    async fn sqlite_router() -> StoreRouter {
        let backend: Arc<dyn Backend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let router = StoreRouter::new(Some(backend));
        assert!(router.ensure_schema().await.is_complete());
        router
    }

    fn policy(name: &str, labels: &[(&str, &str)]) -> NetworkPolicy {
        NetworkPolicy {
            api_version: "v1".to_string(),
            kind: "KnoxNetworkPolicy".to_string(),
            flow_ids: vec![],
            metadata: PolicyMetadata {
                name: name.to_string(),
                namespace: "ns1".to_string(),
                cluster_name: "c1".to_string(),
                policy_type: "egress".to_string(),
                rule: String::new(),
                status: PolicyStatus::Latest,
            },
            outdated: String::new(),
            spec: NetworkPolicySpec {
                selector: Selector {
                    match_labels: labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
                ..Default::default()
            },
            generated_time: 0,
        }
    }

    fn system_policy(name: &str, labels: &[(&str, &str)]) -> SystemPolicy {
        SystemPolicy {
            api_version: "v1".to_string(),
            kind: "KubeArmorPolicy".to_string(),
            metadata: PolicyMetadata {
                name: name.to_string(),
                namespace: "ns1".to_string(),
                cluster_name: "c1".to_string(),
                policy_type: "system".to_string(),
                rule: "process".to_string(),
                status: PolicyStatus::Latest,
            },
            outdated: String::new(),
            spec: SystemPolicySpec {
                selector: Selector {
                    match_labels: labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
                action: "Block".to_string(),
                ..Default::default()
            },
            generated_time: 0,
        }
    }

    fn status(s: PolicyStatus) -> PolicyFilter {
        PolicyFilter {
            status: Some(s),
            ..Default::default()
        }
    }

    fn summary(source: &str) -> SystemSummary {
        SystemSummary {
            cluster_name: "c1".to_string(),
            namespace_name: "ns1".to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unconfigured_reads_are_empty() {
        let router = StoreRouter::unconfigured();
        assert!(router
            .get_network_policies(&PolicyFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(router
            .get_workload_file_set(&WorkloadProcessFileSet::default())
            .await
            .unwrap()
            .is_empty());
        let page = router
            .get_system_logs(&EventQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.events.is_empty());
        assert!(router
            .get_pod_names(&PodFilter::new(EventKind::Network))
            .await
            .unwrap()
            .is_empty());
        assert!(router.get_policy_yamls("network").await.unwrap().is_empty());
        assert!(router.ensure_schema().await.skipped);
    }

    #[tokio::test]
    async fn unconfigured_writes_fail_with_no_backend() {
        let router = StoreRouter::unconfigured();
        let key = WorkloadProcessFileSet::default();
        let err = router
            .insert_workload_file_set(&key, &["/etc/a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoBackend));
        assert_eq!(err.to_string(), "no db driver configured");
        assert!(matches!(
            router
                .clear_workload_file_set(&key, Duration::from_secs(60))
                .await,
            Err(StoreError::NoBackend)
        ));
        assert!(matches!(
            router.upsert_system_logs(&HashMap::new()).await,
            Err(StoreError::NoBackend)
        ));
        assert!(matches!(
            router.upsert_network_logs(&HashMap::new()).await,
            Err(StoreError::NoBackend)
        ));
        assert!(matches!(
            router.upsert_system_summaries(&SummaryMap::new()).await,
            Err(StoreError::NoBackend)
        ));

        let report = router.insert_network_policies(&[policy("p1", &[])]).await;
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn supersede_scenario() {
        let router = sqlite_router().await;
        let report = router
            .insert_network_policies(&[policy("p1", &[]), policy("p2", &[])])
            .await;
        assert!(report.is_ok());

        router
            .supersede_policy(
                PolicyKind::Network,
                &PolicyKey::new("c1", "ns1", "p1"),
                &PolicyKey::new("c1", "ns1", "p2"),
            )
            .await
            .unwrap();

        let latest = router
            .get_network_policies(&status(PolicyStatus::Latest))
            .await
            .unwrap();
        let names: Vec<_> = latest.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["p2"]);

        let outdated = router
            .get_network_policies(&status(PolicyStatus::Outdated))
            .await
            .unwrap();
        let names: Vec<_> = outdated.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["p1"]);
    }

    #[tokio::test]
    async fn system_supersede_scenario() {
        let router = sqlite_router().await;
        let report = router
            .insert_system_policies(&[system_policy("s1", &[]), system_policy("s2", &[])])
            .await;
        assert!(report.is_ok());

        router
            .supersede_policy(
                PolicyKind::System,
                &PolicyKey::new("c1", "ns1", "s1"),
                &PolicyKey::new("c1", "ns1", "s2"),
            )
            .await
            .unwrap();

        let latest = router
            .get_system_policies(&status(PolicyStatus::Latest))
            .await
            .unwrap();
        let names: Vec<_> = latest.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["s2"]);

        let outdated = router
            .get_system_policies(&status(PolicyStatus::Outdated))
            .await
            .unwrap();
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[0].metadata.name, "s1");
        assert_eq!(outdated[0].outdated, "s2");

        // Network table is untouched by a system supersede.
        assert!(router
            .get_network_policies(&PolicyFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn system_selector_keeps_only_full_matches() {
        let router = sqlite_router().await;
        router
            .insert_system_policies(&[
                system_policy("web", &[("app", "web"), ("tier", "front")]),
                system_policy("web-back", &[("app", "web"), ("tier", "back")]),
                system_policy("db", &[("app", "db")]),
            ])
            .await;

        let sel = HashMap::from([
            ("app".to_string(), "web".to_string()),
            ("tier".to_string(), "back".to_string()),
        ]);
        let got = router
            .get_system_policies_by_selector(&PolicyFilter::default(), &sel)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].metadata.name, "web-back");

        let sel = HashMap::from([("app".to_string(), "web".to_string())]);
        let got = router
            .get_system_policies_by_selector(&status(PolicyStatus::Latest), &sel)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn summary_count_saturates_at_i64_max() {
        let router = sqlite_router().await;
        let mut m = SummaryMap::new();
        m.insert(summary("/bin/sh"), SysSummaryTimeCount::new(u64::MAX, 10));
        router.upsert_system_summaries(&m).await.unwrap();
        router.upsert_system_summaries(&m).await.unwrap();

        let rows = router
            .get_system_summaries(&SystemSummary::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, i64::MAX as u64);
    }

    #[tokio::test]
    async fn selector_keeps_only_full_matches() {
        let router = sqlite_router().await;
        router
            .insert_network_policies(&[
                policy("web", &[("app", "web"), ("tier", "front")]),
                policy("db", &[("app", "db")]),
                policy("bare", &[]),
            ])
            .await;

        let sel = HashMap::from([("app".to_string(), "web".to_string())]);
        let got = router
            .get_network_policies_by_selector(&PolicyFilter::default(), &sel)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].metadata.name, "web");

        let all = router
            .get_network_policies_by_selector(&PolicyFilter::default(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn bulk_insert_reports_duplicates_and_continues() {
        let router = sqlite_router().await;
        let report = router
            .insert_network_policies(&[policy("p1", &[]), policy("p1", &[]), policy("p2", &[])])
            .await;
        assert_eq!(report.written(), 2);
        assert_eq!(report.failed(), 1);
        let (key, _) = report.failures().next().unwrap();
        assert_eq!(key, &PolicyKey::new("c1", "ns1", "p1"));
    }

    #[tokio::test]
    async fn bulk_update_reports_missing_keys() {
        let router = sqlite_router().await;
        router.insert_network_policies(&[policy("p1", &[])]).await;
        let mut changed = policy("p1", &[("app", "web")]);
        changed.spec.action = "deny".to_string();
        let report = router
            .update_network_policies(&[changed, policy("ghost", &[])])
            .await;
        assert_eq!(report.written(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.outcomes[1].is_written());

        let got = router
            .get_network_policies(&PolicyFilter::default())
            .await
            .unwrap();
        assert_eq!(got[0].spec.action, "deny");
    }

    #[tokio::test]
    async fn summaries_accumulate_per_tuple() {
        let router = sqlite_router().await;
        for _ in 0..4 {
            let mut m = SummaryMap::new();
            m.insert(summary("/bin/sh"), SysSummaryTimeCount::new(1, 10));
            router.upsert_system_summaries(&m).await.unwrap();
        }
        let mut m = SummaryMap::new();
        for src in ["/bin/a", "/bin/b", "/bin/c"] {
            m.insert(summary(src), SysSummaryTimeCount::new(1, 10));
        }
        router.upsert_system_summaries(&m).await.unwrap();

        let rows = router
            .get_system_summaries(&SystemSummary::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        for row in rows {
            let expected = if row.summary.source == "/bin/sh" { 4 } else { 1 };
            assert_eq!(row.count, expected, "{}", row.summary.source);
        }
    }

    #[tokio::test]
    async fn event_total_ignores_page() {
        let router = sqlite_router().await;
        let logs: HashMap<CiliumLog, u32> = (0..5)
            .map(|i| {
                (
                    CiliumLog {
                        cluster_name: "c1".to_string(),
                        source_namespace: "ns1".to_string(),
                        source_pod_name: "client".to_string(),
                        l4_destination_port: 8000 + i,
                        ..Default::default()
                    },
                    1,
                )
            })
            .collect();
        router.upsert_network_logs(&logs).await.unwrap();

        let page = router
            .get_network_logs(&EventQuery::new(
                CiliumLog::default(),
                Page {
                    offset: 0,
                    limit: Some(2),
                },
            ))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.events.len(), 2);

        let pods = router
            .get_pod_names(&PodFilter::new(EventKind::Network))
            .await
            .unwrap();
        assert_eq!(pods, vec!["client".to_string()]);
    }

    #[tokio::test]
    async fn clear_network_tables_leaves_system_data() {
        let router = sqlite_router().await;
        router.insert_network_policies(&[policy("p1", &[])]).await;
        let mut m = SummaryMap::new();
        m.insert(summary("/bin/sh"), SysSummaryTimeCount::new(1, 10));
        router.upsert_system_summaries(&m).await.unwrap();

        router.clear_network_tables().await;
        assert!(router
            .get_network_policies(&PolicyFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            router
                .get_system_summaries(&SystemSummary::default())
                .await
                .unwrap()
                .len(),
            1
        );

        router.clear_tables().await;
        assert!(router
            .get_system_summaries(&SystemSummary::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn file_set_purge_respects_age() {
        let router = sqlite_router().await;
        let key = WorkloadProcessFileSet {
            cluster_name: "c1".to_string(),
            namespace: "ns1".to_string(),
            container_name: "web".to_string(),
            labels: "app=web".to_string(),
            set_type: "process".to_string(),
            ..Default::default()
        };
        router
            .insert_workload_file_set(&key, &["/bin/sh".to_string()])
            .await
            .unwrap();

        let removed = router
            .clear_workload_file_set(&key, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        let removed = router
            .clear_workload_file_set(&key, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn policy_yamls_round_trip() {
        let router = sqlite_router().await;
        let doc = PolicyYaml {
            policy_type: "system".to_string(),
            kind: "KubeArmorPolicy".to_string(),
            name: "ksp-1".to_string(),
            namespace: "ns1".to_string(),
            cluster: "c1".to_string(),
            labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
            policy_yaml: "apiVersion: security.kubearmor.com/v1".to_string(),
            updated_time: 42,
        };
        router
            .upsert_policy_yamls(std::slice::from_ref(&doc))
            .await
            .unwrap();
        assert_eq!(router.get_policy_yamls("system").await.unwrap(), vec![doc]);
    }
}
