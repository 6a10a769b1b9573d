//! SQLite backend (rusqlite, single connection behind a mutex).

use crate::sql::{self, PolicyRow, DIM_HASH};
use async_trait::async_trait;
use knox_types::{
    Backend, BackendError, CiliumLog, Column, ColumnType, Dimensions, EventPage, EventQuery,
    KubeArmorLog, LogRecord, NetworkPolicy, Page, PodFilter, PolicyFilter, PolicyKey, PolicyKind,
    PolicyStatus, PolicyYaml, SqlValue, SummaryMap, SummaryRecord, SystemPolicy, SystemSummary,
    Table, WorkloadFileSets, WorkloadProcessFileSet,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// SQLite-backed store. All statements run on one connection, so every
/// closure passed to `with_conn` observes a consistent snapshot.
pub struct SqliteBackend {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(30)).map_err(db_err)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Connection) -> Result<T, BackendError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BackendError::Io(format!("failed to acquire lock: {}", e)))?;
        f(&conn)
    }

    fn upsert_tuples<T: Dimensions>(&self, rows: Vec<(&T, i64, i64)>) -> Result<(), BackendError> {
        if rows.is_empty() {
            return Ok(());
        }
        let stmt_sql = format!(
            "{} ON CONFLICT({}) DO UPDATE SET count = {}, \
             updated_time = MAX(updated_time, excluded.updated_time)",
            sql::dimension_insert::<T>(),
            DIM_HASH,
            sql::saturating_count_sum("excluded.count")
        );
        let rows = sql::ordered_upsert_values(rows);
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            {
                let mut stmt = tx.prepare(&stmt_sql).map_err(db_err)?;
                for row in &rows {
                    let values = bind(row);
                    stmt.execute(params_from_iter(values.iter())).map_err(db_err)?;
                }
            }
            tx.commit().map_err(db_err)
        })
    }

    fn select_tuples<T: Dimensions>(
        &self,
        filter: &T,
        page: &Page,
    ) -> Result<(Vec<(T, u64, i64)>, u32), BackendError> {
        let (where_sql, params) = sql::dimension_where(filter);
        let select = sql::dimension_select::<T>(&where_sql, page);
        let count = sql::dimension_count::<T>(&where_sql);
        let cols = sql::dimension_row_columns::<T>();
        self.with_conn(|conn| {
            let total = query_count(conn, &count, &params)?;
            let rows = query_rows(conn, &select, &params, &cols)?
                .into_iter()
                .map(sql::split_dimension_row::<T>)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, sql::total_from_count(total)))
        })
    }

    fn event_page<T: Dimensions>(&self, query: &EventQuery<T>) -> Result<EventPage<T>, BackendError> {
        let (rows, total) = self.select_tuples(&query.filter, &query.page)?;
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

    fn get_policy_rows(&self, table: Table, filter: &PolicyFilter) -> Result<Vec<PolicyRow>, BackendError> {
        let (where_sql, params) = sql::policy_where(filter);
        let select = sql::policy_select(table, &where_sql);
        self.with_conn(|conn| {
            query_rows(conn, &select, &params, sql::POLICY_COLUMNS)?
                .into_iter()
                .map(PolicyRow::from_values)
                .collect()
        })
    }

    fn insert_policy_row(&self, table: Table, row: PolicyRow) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            execute(conn, &sql::policy_insert(table), &row.insert_values())?;
            Ok(())
        })
    }

    fn update_policy_row(&self, table: Table, row: PolicyRow) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            let n = execute(conn, &sql::policy_update(table), &row.update_values())?;
            if n == 0 {
                return Err(BackendError::NotFound(format!("{} {}", table, row.key())));
            }
            Ok(())
        })
    }
}

fn db_err(e: rusqlite::Error) -> BackendError {
    match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            BackendError::Conflict(e.to_string())
        }
        other => BackendError::Io(other.to_string()),
    }
}

fn bind(values: &[SqlValue]) -> Vec<Value> {
    values
        .iter()
        .map(|v| match v {
            SqlValue::Text(s) => Value::Text(s.clone()),
            SqlValue::Int(i) => Value::Integer(*i),
        })
        .collect()
}

fn read_row(row: &rusqlite::Row, cols: &[Column]) -> rusqlite::Result<Vec<SqlValue>> {
    cols.iter()
        .enumerate()
        .map(|(i, c)| match c.ty {
            ColumnType::Text => row.get::<_, String>(i).map(SqlValue::Text),
            ColumnType::Int => row.get::<_, i64>(i).map(SqlValue::Int),
        })
        .collect()
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    cols: &[Column],
) -> Result<Vec<Vec<SqlValue>>, BackendError> {
    let values = bind(params);
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| read_row(row, cols))
        .map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

fn query_count(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<i64, BackendError> {
    let values = bind(params);
    conn.query_row(sql, params_from_iter(values.iter()), |row| row.get(0))
        .map_err(db_err)
}

fn execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<usize, BackendError> {
    let values = bind(params);
    conn.execute(sql, params_from_iter(values.iter()))
        .map_err(db_err)
}

fn policy_table(kind: PolicyKind) -> Table {
    match kind {
        PolicyKind::Network => Table::NetworkPolicy,
        PolicyKind::System => Table::SystemPolicy,
    }
}

fn dimension_table<T: Dimensions>() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    {},\n    \
         {} TEXT NOT NULL UNIQUE,\n    count INTEGER NOT NULL DEFAULT 0,\n    \
         updated_time INTEGER NOT NULL DEFAULT 0\n)",
        T::TABLE.name(),
        sql::dimension_column_defs(T::COLUMNS, "TEXT", "INTEGER"),
        DIM_HASH
    )
}

fn create_table_sql(table: Table) -> String {
    match table {
        Table::NetworkPolicy | Table::SystemPolicy => format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_version TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL DEFAULT '',
    flow_ids TEXT NOT NULL DEFAULT '[]',
    name TEXT NOT NULL,
    cluster_name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    policy_type TEXT NOT NULL DEFAULT '',
    rule TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'latest',
    outdated TEXT NOT NULL DEFAULT '',
    spec TEXT NOT NULL DEFAULT '{{}}',
    generated_time INTEGER NOT NULL DEFAULT 0,
    UNIQUE (cluster_name, namespace, name)
)"#,
            table.name()
        ),
        Table::WorkloadProcessFileSet => format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
             policy_name TEXT NOT NULL,\n    {},\n    {} TEXT NOT NULL UNIQUE,\n    \
             file_set TEXT NOT NULL DEFAULT '[]',\n    created_time INTEGER NOT NULL DEFAULT 0,\n    \
             updated_time INTEGER NOT NULL DEFAULT 0\n)",
            table.name(),
            sql::dimension_column_defs(WorkloadProcessFileSet::COLUMNS, "TEXT", "INTEGER"),
            DIM_HASH
        ),
        Table::SystemLogs => dimension_table::<KubeArmorLog>(),
        Table::NetworkLogs => dimension_table::<CiliumLog>(),
        Table::SystemSummary => dimension_table::<SystemSummary>(),
        Table::PolicyYaml => format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    policy_type TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    cluster TEXT NOT NULL,
    labels TEXT NOT NULL DEFAULT '{{}}',
    policy_yaml TEXT NOT NULL,
    updated_time INTEGER NOT NULL DEFAULT 0,
    UNIQUE (policy_type, cluster, namespace, name)
)"#,
            table.name()
        ),
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn driver_name(&self) -> &'static str {
        "sqlite3"
    }

    async fn create_table(&self, table: Table) -> Result<(), BackendError> {
        let ddl = create_table_sql(table);
        self.with_conn(|conn| conn.execute_batch(&ddl).map_err(db_err))
    }

    async fn clear_table(&self, table: Table) -> Result<(), BackendError> {
        let stmt = format!("DELETE FROM {}", table.name());
        self.with_conn(|conn| {
            execute(conn, &stmt, &[])?;
            Ok(())
        })
    }

    async fn get_network_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<NetworkPolicy>, BackendError> {
        self.get_policy_rows(Table::NetworkPolicy, filter)?
            .into_iter()
            .map(PolicyRow::into_network)
            .collect()
    }

    async fn insert_network_policy(&self, policy: &NetworkPolicy) -> Result<(), BackendError> {
        self.insert_policy_row(Table::NetworkPolicy, PolicyRow::from_network(policy)?)
    }

    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), BackendError> {
        self.update_policy_row(Table::NetworkPolicy, PolicyRow::from_network(policy)?)
    }

    async fn get_system_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<SystemPolicy>, BackendError> {
        self.get_policy_rows(Table::SystemPolicy, filter)?
            .into_iter()
            .map(PolicyRow::into_system)
            .collect()
    }

    async fn insert_system_policy(&self, policy: &SystemPolicy) -> Result<(), BackendError> {
        self.insert_policy_row(Table::SystemPolicy, PolicyRow::from_system(policy)?)
    }

    async fn update_system_policy(&self, policy: &SystemPolicy) -> Result<(), BackendError> {
        self.update_policy_row(Table::SystemPolicy, PolicyRow::from_system(policy)?)
    }

    async fn supersede_policy(
        &self,
        kind: PolicyKind,
        outdated: &PolicyKey,
        latest: &PolicyKey,
    ) -> Result<(), BackendError> {
        let table = policy_table(kind);
        let set_status = sql::policy_set_status(table);
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            let n = execute(
                &tx,
                &set_status,
                &sql::status_values(PolicyStatus::Outdated, &latest.name, outdated),
            )?;
            if n == 0 {
                return Err(BackendError::NotFound(format!("{} {}", table, outdated)));
            }
            let n = execute(
                &tx,
                &set_status,
                &sql::status_values(PolicyStatus::Latest, "", latest),
            )?;
            if n == 0 {
                return Err(BackendError::NotFound(format!("{} {}", table, latest)));
            }
            tx.commit().map_err(db_err)
        })
    }

    async fn get_workload_file_sets(
        &self,
        filter: &WorkloadProcessFileSet,
    ) -> Result<WorkloadFileSets, BackendError> {
        let (where_sql, params) = sql::dimension_where(filter);
        let select = sql::file_set_select(&where_sql);
        let cols = sql::file_set_row_columns();
        let rows = self.with_conn(|conn| query_rows(conn, &select, &params, &cols))?;

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
        let hash = key.dim_hash();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            let existing = query_rows(
                &tx,
                &sql::file_set_lookup(),
                &[SqlValue::Text(hash)],
                &[Column::int("id"), Column::text("file_set")],
            )?;
            match existing.into_iter().next().as_deref() {
                Some([SqlValue::Int(id), SqlValue::Text(raw)]) => {
                    let mut merged = sql::decode_files(raw)?;
                    sql::merge_files(&mut merged, files);
                    execute(
                        &tx,
                        &sql::file_set_update(),
                        &[
                            SqlValue::Text(sql::encode_files(&merged)?),
                            SqlValue::Int(now),
                            SqlValue::Int(*id),
                        ],
                    )?;
                }
                _ => {
                    let mut initial = Vec::new();
                    sql::merge_files(&mut initial, files);
                    execute(
                        &tx,
                        &sql::file_set_insert(),
                        &sql::file_set_insert_values(
                            key,
                            sql::generate_policy_name(&key.set_type),
                            sql::encode_files(&initial)?,
                            now,
                        ),
                    )?;
                }
            }
            tx.commit().map_err(db_err)
        })
    }

    async fn clear_workload_file_sets(
        &self,
        filter: &WorkloadProcessFileSet,
        cutoff: i64,
    ) -> Result<u64, BackendError> {
        let (where_sql, mut params) = sql::dimension_where(filter);
        params.push(SqlValue::Int(cutoff));
        let stmt = sql::file_set_clear(&where_sql);
        self.with_conn(|conn| Ok(execute(conn, &stmt, &params)? as u64))
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
    }

    async fn get_system_logs(
        &self,
        query: &EventQuery<KubeArmorLog>,
    ) -> Result<EventPage<KubeArmorLog>, BackendError> {
        self.event_page(query)
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
    }

    async fn get_network_logs(
        &self,
        query: &EventQuery<CiliumLog>,
    ) -> Result<EventPage<CiliumLog>, BackendError> {
        self.event_page(query)
    }

    async fn get_pod_names(&self, filter: &PodFilter) -> Result<Vec<String>, BackendError> {
        let (select, params) = sql::pod_names_query(filter);
        let rows = self.with_conn(|conn| query_rows(conn, &select, &params, &[Column::text("pod")]))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(s)) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn get_policy_yamls(&self, policy_type: &str) -> Result<Vec<PolicyYaml>, BackendError> {
        let params = [SqlValue::Text(policy_type.to_string())];
        self.with_conn(|conn| {
            query_rows(conn, &sql::policy_yaml_select(), &params, sql::POLICY_YAML_COLUMNS)?
                .into_iter()
                .map(sql::policy_yaml_from_values)
                .collect()
        })
    }

    async fn upsert_policy_yamls(&self, policies: &[PolicyYaml]) -> Result<(), BackendError> {
        let stmt_sql = format!(
            "{} ON CONFLICT(policy_type, cluster, namespace, name) DO UPDATE SET \
             kind = excluded.kind, labels = excluded.labels, policy_yaml = excluded.policy_yaml, \
             updated_time = excluded.updated_time",
            sql::policy_yaml_insert()
        );
        let rows = policies
            .iter()
            .map(sql::policy_yaml_values)
            .collect::<Result<Vec<_>, _>>()?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            for values in &rows {
                execute(&tx, &stmt_sql, values)?;
            }
            tx.commit().map_err(db_err)
        })
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
    }

    async fn get_system_summaries(
        &self,
        filter: &SystemSummary,
    ) -> Result<Vec<SummaryRecord>, BackendError> {
        let (rows, _) = self.select_tuples(filter, &Page::default())?;
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
