//! MySQL backend (sqlx connection pool).

use crate::sql::{self, PolicyRow, DIM_HASH};
use async_trait::async_trait;
use knox_types::{
    Backend, BackendError, CiliumLog, Column, ColumnType, DbConfig, Dimensions, EventPage,
    EventQuery, KubeArmorLog, LogRecord, NetworkPolicy, Page, PodFilter, PolicyFilter, PolicyKey,
    PolicyKind, PolicyStatus, PolicyYaml, SqlValue, SummaryMap, SummaryRecord, SystemPolicy,
    SystemSummary, Table, WorkloadFileSets, WorkloadProcessFileSet,
};
use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{MySql, Row};
use std::collections::HashMap;

/// Text type for policy key columns; keeps the composite unique index inside InnoDB's limit.
const KEY_TY: &str = "VARCHAR(190)";

pub struct MysqlBackend {
    pool: MySqlPool,
}

impl MysqlBackend {
    pub async fn connect(cfg: &DbConfig) -> Result<Self, BackendError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .connect(&cfg.mysql_url())
            .await
            .map_err(db_err)?;
        tracing::info!(host = %cfg.host, port = cfg.port, database = %cfg.database, "connected to mysql");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn upsert_tuples<T: Dimensions>(
        &self,
        rows: Vec<(&T, i64, i64)>,
    ) -> Result<(), BackendError> {
        if rows.is_empty() {
            return Ok(());
        }
        let stmt = format!(
            "{} ON DUPLICATE KEY UPDATE count = {}, \
             updated_time = GREATEST(updated_time, VALUES(updated_time))",
            sql::dimension_insert::<T>(),
            sql::saturating_count_sum("VALUES(count)")
        );
        let rows = sql::ordered_upsert_values(rows);
        match self.upsert_rows(&stmt, &rows).await {
            Err(e) if is_deadlock(&e) => {
                tracing::warn!(table = T::TABLE.name(), rows = rows.len(), "upsert deadlocked, retrying once");
                self.upsert_rows(&stmt, &rows).await.map_err(db_err)
            }
            other => other.map_err(db_err),
        }
    }

    async fn upsert_rows(&self, stmt: &str, rows: &[Vec<SqlValue>]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            bind(sqlx::query(stmt), row).execute(&mut *tx).await?;
        }
        tx.commit().await
    }

    async fn select_tuples<T: Dimensions>(
        &self,
        filter: &T,
        page: &Page,
    ) -> Result<(Vec<(T, u64, i64)>, u32), BackendError> {
        let (where_sql, params) = sql::dimension_where(filter);
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let total = query_count(&mut conn, &sql::dimension_count::<T>(&where_sql), &params).await?;
        let rows = query_rows(
            &mut conn,
            &sql::dimension_select::<T>(&where_sql, page),
            &params,
            &sql::dimension_row_columns::<T>(),
        )
        .await?
        .into_iter()
        .map(sql::split_dimension_row::<T>)
        .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, sql::total_from_count(total)))
    }

    async fn event_page<T: Dimensions>(
        &self,
        query: &EventQuery<T>,
    ) -> Result<EventPage<T>, BackendError> {
        let (rows, total) = self.select_tuples(&query.filter, &query.page).await?;
        let events = rows
            .into_iter()
            .map(|(event, count, updated_time)| LogRecord {
                event,
                count,
                updated_time,
            })
            .collect();
        Ok(EventPage { events, total })
    }

    async fn get_policy_rows(
        &self,
        table: Table,
        filter: &PolicyFilter,
    ) -> Result<Vec<PolicyRow>, BackendError> {
        let (where_sql, params) = sql::policy_where(filter);
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        query_rows(
            &mut conn,
            &sql::policy_select(table, &where_sql),
            &params,
            sql::POLICY_COLUMNS,
        )
        .await?
        .into_iter()
        .map(PolicyRow::from_values)
        .collect()
    }

    async fn insert_policy_row(&self, table: Table, row: PolicyRow) -> Result<(), BackendError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        execute(&mut conn, &sql::policy_insert(table), &row.insert_values()).await?;
        Ok(())
    }

    async fn update_policy_row(&self, table: Table, row: PolicyRow) -> Result<(), BackendError> {
        let key = row.key();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        require_policy(&mut tx, table, &key).await?;
        execute(&mut tx, &sql::policy_update(table), &row.update_values()).await?;
        tx.commit().await.map_err(db_err)
    }

    /// One attempt at the read-merge-write of a file set.
    async fn merge_file_set(
        &self,
        key: &WorkloadProcessFileSet,
        files: &[String],
        now: i64,
    ) -> Result<(), BackendError> {
        let lookup = format!("{} FOR UPDATE", sql::file_set_lookup());
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let existing = query_rows(
            &mut tx,
            &lookup,
            &[SqlValue::Text(key.dim_hash())],
            &[Column::int("id"), Column::text("file_set")],
        )
        .await?;
        match existing.into_iter().next().as_deref() {
            Some([SqlValue::Int(id), SqlValue::Text(raw)]) => {
                let mut merged = sql::decode_files(raw)?;
                sql::merge_files(&mut merged, files);
                execute(
                    &mut tx,
                    &sql::file_set_update(),
                    &[
                        SqlValue::Text(sql::encode_files(&merged)?),
                        SqlValue::Int(now),
                        SqlValue::Int(*id),
                    ],
                )
                .await?;
            }
            _ => {
                let mut initial = Vec::new();
                sql::merge_files(&mut initial, files);
                execute(
                    &mut tx,
                    &sql::file_set_insert(),
                    &sql::file_set_insert_values(
                        key,
                        sql::generate_policy_name(&key.set_type),
                        sql::encode_files(&initial)?,
                        now,
                    ),
                )
                .await?;
            }
        }
        tx.commit().await.map_err(db_err)
    }
}

/// InnoDB reports a deadlock victim with SQLSTATE 40001 (error 1213).
fn is_deadlock(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("40001"))
}

fn db_err(e: sqlx::Error) -> BackendError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            BackendError::Conflict(e.to_string())
        }
        _ => BackendError::Io(e.to_string()),
    }
}

fn bind<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for v in params {
        query = match v {
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Int(i) => query.bind(*i),
        };
    }
    query
}

fn read_row(row: &MySqlRow, cols: &[Column]) -> Result<Vec<SqlValue>, BackendError> {
    cols.iter()
        .enumerate()
        .map(|(i, c)| match c.ty {
            ColumnType::Text => row.try_get::<String, _>(i).map(SqlValue::Text),
            ColumnType::Int => row.try_get::<i64, _>(i).map(SqlValue::Int),
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BackendError::Decode(e.to_string()))
}

async fn query_rows(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[SqlValue],
    cols: &[Column],
) -> Result<Vec<Vec<SqlValue>>, BackendError> {
    let rows = bind(sqlx::query(sql), params)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
    rows.iter().map(|row| read_row(row, cols)).collect()
}

async fn query_count(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<i64, BackendError> {
    let row = bind(sqlx::query(sql), params)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;
    row.try_get::<i64, _>(0)
        .map_err(|e| BackendError::Decode(e.to_string()))
}

async fn execute(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<u64, BackendError> {
    let result = bind(sqlx::query(sql), params)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected())
}

/// Lock the row for `key` or fail with `NotFound`.
///
/// MySQL reports changed rather than matched rows from UPDATE, so existence
/// is checked explicitly instead of through `rows_affected`.
async fn require_policy(
    conn: &mut MySqlConnection,
    table: Table,
    key: &PolicyKey,
) -> Result<(), BackendError> {
    let stmt = format!("{} FOR UPDATE", sql::policy_exists(table));
    if query_count(conn, &stmt, &sql::key_values(key)).await? == 0 {
        return Err(BackendError::NotFound(format!("{} {}", table, key)));
    }
    Ok(())
}

fn policy_table(kind: PolicyKind) -> Table {
    match kind {
        PolicyKind::Network => Table::NetworkPolicy,
        PolicyKind::System => Table::SystemPolicy,
    }
}

fn dimension_table<T: Dimensions>() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,\n    {},\n    \
         {} CHAR(64) NOT NULL,\n    count BIGINT NOT NULL DEFAULT 0,\n    \
         updated_time BIGINT NOT NULL DEFAULT 0,\n    UNIQUE KEY uniq_{} ({})\n\
         ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        T::TABLE.name(),
        sql::dimension_column_defs(T::COLUMNS, "TEXT", "BIGINT"),
        DIM_HASH,
        DIM_HASH,
        DIM_HASH
    )
}

fn create_table_sql(table: Table) -> String {
    match table {
        Table::NetworkPolicy | Table::SystemPolicy => format!(
            r#"CREATE TABLE IF NOT EXISTS {name} (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    api_version VARCHAR(64) NOT NULL DEFAULT '',
    kind VARCHAR(64) NOT NULL DEFAULT '',
    flow_ids TEXT NOT NULL,
    name {key} NOT NULL,
    cluster_name {key} NOT NULL,
    namespace {key} NOT NULL,
    policy_type VARCHAR(64) NOT NULL DEFAULT '',
    rule TEXT NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'latest',
    outdated {key} NOT NULL DEFAULT '',
    spec LONGTEXT NOT NULL,
    generated_time BIGINT NOT NULL DEFAULT 0,
    UNIQUE KEY uniq_policy_key (cluster_name, namespace, name)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
            name = table.name(),
            key = KEY_TY
        ),
        Table::WorkloadProcessFileSet => format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,\n    \
             policy_name {} NOT NULL,\n    {},\n    {} CHAR(64) NOT NULL,\n    \
             file_set LONGTEXT NOT NULL,\n    created_time BIGINT NOT NULL DEFAULT 0,\n    \
             updated_time BIGINT NOT NULL DEFAULT 0,\n    UNIQUE KEY uniq_{} ({})\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            table.name(),
            KEY_TY,
            sql::dimension_column_defs(WorkloadProcessFileSet::COLUMNS, "TEXT", "BIGINT"),
            DIM_HASH,
            DIM_HASH,
            DIM_HASH
        ),
        Table::SystemLogs => dimension_table::<KubeArmorLog>(),
        Table::NetworkLogs => dimension_table::<CiliumLog>(),
        Table::SystemSummary => dimension_table::<SystemSummary>(),
        Table::PolicyYaml => format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    policy_type VARCHAR(64) NOT NULL,
    kind VARCHAR(64) NOT NULL DEFAULT '',
    name VARCHAR(128) NOT NULL,
    namespace VARCHAR(128) NOT NULL,
    cluster VARCHAR(128) NOT NULL,
    labels TEXT NOT NULL,
    policy_yaml LONGTEXT NOT NULL,
    updated_time BIGINT NOT NULL DEFAULT 0,
    UNIQUE KEY uniq_policy_yaml (policy_type, cluster, namespace, name)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
            table.name()
        ),
    }
}

#[async_trait]
impl Backend for MysqlBackend {
    fn driver_name(&self) -> &'static str {
        "mysql"
    }

    async fn create_table(&self, table: Table) -> Result<(), BackendError> {
        let ddl = create_table_sql(table);
        sqlx::raw_sql(&ddl)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn clear_table(&self, table: Table) -> Result<(), BackendError> {
        let stmt = format!("DELETE FROM {}", table.name());
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        execute(&mut conn, &stmt, &[]).await?;
        Ok(())
    }

    async fn get_network_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<NetworkPolicy>, BackendError> {
        self.get_policy_rows(Table::NetworkPolicy, filter)
            .await?
            .into_iter()
            .map(PolicyRow::into_network)
            .collect()
    }

    async fn insert_network_policy(&self, policy: &NetworkPolicy) -> Result<(), BackendError> {
        self.insert_policy_row(Table::NetworkPolicy, PolicyRow::from_network(policy)?)
            .await
    }

    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), BackendError> {
        self.update_policy_row(Table::NetworkPolicy, PolicyRow::from_network(policy)?)
            .await
    }

    async fn get_system_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<SystemPolicy>, BackendError> {
        self.get_policy_rows(Table::SystemPolicy, filter)
            .await?
            .into_iter()
            .map(PolicyRow::into_system)
            .collect()
    }

    async fn insert_system_policy(&self, policy: &SystemPolicy) -> Result<(), BackendError> {
        self.insert_policy_row(Table::SystemPolicy, PolicyRow::from_system(policy)?)
            .await
    }

    async fn update_system_policy(&self, policy: &SystemPolicy) -> Result<(), BackendError> {
        self.update_policy_row(Table::SystemPolicy, PolicyRow::from_system(policy)?)
            .await
    }

    async fn supersede_policy(
        &self,
        kind: PolicyKind,
        outdated: &PolicyKey,
        latest: &PolicyKey,
    ) -> Result<(), BackendError> {
        let table = policy_table(kind);
        let set_status = sql::policy_set_status(table);
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        require_policy(&mut tx, table, outdated).await?;
        require_policy(&mut tx, table, latest).await?;
        execute(
            &mut tx,
            &set_status,
            &sql::status_values(PolicyStatus::Outdated, &latest.name, outdated),
        )
        .await?;
        execute(
            &mut tx,
            &set_status,
            &sql::status_values(PolicyStatus::Latest, "", latest),
        )
        .await?;
        tx.commit().await.map_err(db_err)
    }

    async fn get_workload_file_sets(
        &self,
        filter: &WorkloadProcessFileSet,
    ) -> Result<WorkloadFileSets, BackendError> {
        let (where_sql, params) = sql::dimension_where(filter);
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = query_rows(
            &mut conn,
            &sql::file_set_select(&where_sql),
            &params,
            &sql::file_set_row_columns(),
        )
        .await?;

        let mut out = WorkloadFileSets::default();
        for row in rows {
            let (key, policy_name, files) = sql::split_file_set_row(row)?;
            out.names.insert(key.clone(), policy_name);
            out.files.insert(key, files);
        }
        Ok(out)
    }

    async fn insert_workload_file_set(
        &self,
        key: &WorkloadProcessFileSet,
        files: &[String],
        now: i64,
    ) -> Result<(), BackendError> {
        // A concurrent writer may create the row between our lookup and insert;
        // the retry then takes the merge path.
        match self.merge_file_set(key, files, now).await {
            Err(BackendError::Conflict(_)) => self.merge_file_set(key, files, now).await,
            other => other,
        }
    }

    async fn clear_workload_file_sets(
        &self,
        filter: &WorkloadProcessFileSet,
        cutoff: i64,
    ) -> Result<u64, BackendError> {
        let (where_sql, mut params) = sql::dimension_where(filter);
        params.push(SqlValue::Int(cutoff));
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        execute(&mut conn, &sql::file_set_clear(&where_sql), &params).await
    }

    async fn upsert_system_logs(
        &self,
        logs: &HashMap<KubeArmorLog, u32>,
        updated_time: i64,
    ) -> Result<(), BackendError> {
        self.upsert_tuples(
            logs.iter()
                .map(|(log, count)| (log, i64::from(*count), updated_time))
                .collect(),
        )
        .await
    }

    async fn get_system_logs(
        &self,
        query: &EventQuery<KubeArmorLog>,
    ) -> Result<EventPage<KubeArmorLog>, BackendError> {
        self.event_page(query).await
    }

    async fn upsert_network_logs(
        &self,
        logs: &HashMap<CiliumLog, u32>,
        updated_time: i64,
    ) -> Result<(), BackendError> {
        self.upsert_tuples(
            logs.iter()
                .map(|(log, count)| (log, i64::from(*count), updated_time))
                .collect(),
        )
        .await
    }

    async fn get_network_logs(
        &self,
        query: &EventQuery<CiliumLog>,
    ) -> Result<EventPage<CiliumLog>, BackendError> {
        self.event_page(query).await
    }

    async fn get_pod_names(&self, filter: &PodFilter) -> Result<Vec<String>, BackendError> {
        let (select, params) = sql::pod_names_query(filter);
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = query_rows(&mut conn, &select, &params, &[Column::text("pod")]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(s)) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn get_policy_yamls(&self, policy_type: &str) -> Result<Vec<PolicyYaml>, BackendError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        query_rows(
            &mut conn,
            &sql::policy_yaml_select(),
            &[SqlValue::Text(policy_type.to_string())],
            sql::POLICY_YAML_COLUMNS,
        )
        .await?
        .into_iter()
        .map(sql::policy_yaml_from_values)
        .collect()
    }

    async fn upsert_policy_yamls(&self, policies: &[PolicyYaml]) -> Result<(), BackendError> {
        let stmt = format!(
            "{} ON DUPLICATE KEY UPDATE kind = VALUES(kind), labels = VALUES(labels), \
             policy_yaml = VALUES(policy_yaml), updated_time = VALUES(updated_time)",
            sql::policy_yaml_insert()
        );
        let rows = policies
            .iter()
            .map(sql::policy_yaml_values)
            .collect::<Result<Vec<_>, _>>()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for values in &rows {
            execute(&mut tx, &stmt, values).await?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn upsert_system_summaries(&self, summaries: &SummaryMap) -> Result<(), BackendError> {
        self.upsert_tuples(
            summaries
                .iter()
                .map(|(s, tc)| {
                    (
                        s,
                        i64::try_from(tc.count).unwrap_or(i64::MAX),
                        tc.updated_time,
                    )
                })
                .collect(),
        )
        .await
    }

    async fn get_system_summaries(
        &self,
        filter: &SystemSummary,
    ) -> Result<Vec<SummaryRecord>, BackendError> {
        let (rows, _) = self.select_tuples(filter, &Page::default()).await?;
        Ok(rows
            .into_iter()
            .map(|(summary, count, updated_time)| SummaryRecord {
                summary,
                count,
                updated_time,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knox_types::{PolicyMetadata, SysSummaryTimeCount};

    #[test]
    fn dimension_tables_carry_unique_hash() {
        for ddl in [
            create_table_sql(Table::SystemLogs),
            create_table_sql(Table::NetworkLogs),
            create_table_sql(Table::SystemSummary),
            create_table_sql(Table::WorkloadProcessFileSet),
        ] {
            assert!(ddl.contains("dim_hash CHAR(64) NOT NULL"));
            assert!(ddl.contains("UNIQUE KEY uniq_dim_hash (dim_hash)"));
        }
    }

    #[test]
    fn policy_tables_are_keyed_by_cluster_namespace_name() {
        let ddl = create_table_sql(Table::SystemPolicy);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS system_policy"));
        assert!(ddl.contains("UNIQUE KEY uniq_policy_key (cluster_name, namespace, name)"));
    }

    #[test]
    fn integer_dimensions_are_bigint() {
        let ddl = create_table_sql(Table::SystemSummary);
        assert!(ddl.contains("cluster_id BIGINT NOT NULL DEFAULT 0"));
        assert!(ddl.contains("podname TEXT NOT NULL"));
    }

    /// Connects to `KNOX_TEST_MYSQL_URL` when set; the live tests return early otherwise.
    async fn live_backend() -> Option<MysqlBackend> {
        let url = std::env::var("KNOX_TEST_MYSQL_URL").ok()?;
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .unwrap();
        let b = MysqlBackend::from_pool(pool);
        for table in Table::ALL {
            b.create_table(table).await.unwrap();
            b.clear_table(table).await.unwrap();
        }
        Some(b)
    }

    fn network_policy(name: &str) -> NetworkPolicy {
        NetworkPolicy {
            api_version: "v1".to_string(),
            kind: "KnoxNetworkPolicy".to_string(),
            flow_ids: vec![1],
            metadata: PolicyMetadata {
                name: name.to_string(),
                namespace: "ns1".to_string(),
                cluster_name: "c1".to_string(),
                policy_type: "egress".to_string(),
                rule: String::new(),
                status: PolicyStatus::Latest,
            },
            outdated: String::new(),
            spec: Default::default(),
            generated_time: 0,
        }
    }

    // One function so the shared tables are not raced by parallel tests.
    #[tokio::test]
    async fn live_upsert_supersede_and_pagination() {
        let Some(b) = live_backend().await else {
            return;
        };

        let summary = SystemSummary {
            cluster_name: "c1".to_string(),
            source: "/bin/sh".to_string(),
            ..Default::default()
        };
        let mut m = SummaryMap::new();
        m.insert(summary.clone(), SysSummaryTimeCount::new(3, 20));
        b.upsert_system_summaries(&m).await.unwrap();
        m.insert(summary.clone(), SysSummaryTimeCount::new(2, 10));
        b.upsert_system_summaries(&m).await.unwrap();
        let rows = b.get_system_summaries(&SystemSummary::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 5);
        assert_eq!(rows[0].updated_time, 20);

        m.insert(summary, SysSummaryTimeCount::new(u64::MAX, 30));
        b.upsert_system_summaries(&m).await.unwrap();
        let rows = b.get_system_summaries(&SystemSummary::default()).await.unwrap();
        assert_eq!(rows[0].count, i64::MAX as u64);

        b.insert_network_policy(&network_policy("p1")).await.unwrap();
        b.insert_network_policy(&network_policy("p2")).await.unwrap();
        let old = PolicyKey::new("c1", "ns1", "p1");
        let new = PolicyKey::new("c1", "ns1", "p2");
        b.supersede_policy(PolicyKind::Network, &old, &new).await.unwrap();
        let ghost = PolicyKey::new("c1", "ns1", "ghost");
        let err = b
            .supersede_policy(PolicyKind::Network, &new, &ghost)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
        let outdated = b
            .get_network_policies(&PolicyFilter {
                status: Some(PolicyStatus::Outdated),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[0].metadata.name, "p1");
        assert_eq!(outdated[0].outdated, "p2");

        let logs: HashMap<CiliumLog, u32> = (0..5)
            .map(|i| {
                (
                    CiliumLog {
                        cluster_name: "c1".to_string(),
                        source_pod_name: "client".to_string(),
                        l4_destination_port: 8000 + i,
                        ..Default::default()
                    },
                    1,
                )
            })
            .collect();
        b.upsert_network_logs(&logs, 1).await.unwrap();
        let page = b
            .get_network_logs(&EventQuery::new(
                CiliumLog::default(),
                Page {
                    offset: 3,
                    limit: Some(10),
                },
            ))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.events.len(), 2);

        for table in Table::ALL {
            b.clear_table(table).await.unwrap();
        }
    }
}
