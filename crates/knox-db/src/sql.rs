//! Statement builders shared by both engines.
//!
//! MySQL and SQLite both accept `?` placeholders and `LIMIT n OFFSET m`, so
//! filters, column lists and row layouts are built here once. DDL and the
//! conflict clause of upserts are dialect-specific and live with each backend.

use knox_types::{
    BackendError, Column, ColumnType, Dimensions, EventKind, NetworkPolicy, NetworkPolicySpec,
    Page, PodFilter, PolicyFilter, PolicyKey, PolicyMetadata, PolicyStatus, PolicyYaml, SqlValue,
    SystemPolicy, SystemPolicySpec, Table, ValueReader,
};

/// Name of the unique hash column on every dimension table.
pub(crate) const DIM_HASH: &str = "dim_hash";

/// Comma-separated dimension column names.
pub(crate) fn dimension_columns<T: Dimensions>() -> String {
    T::COLUMNS
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `INSERT INTO t (dims, dim_hash, count, updated_time) VALUES (...)` without a conflict clause.
pub(crate) fn dimension_insert<T: Dimensions>() -> String {
    format!(
        "INSERT INTO {} ({}, {}, count, updated_time) VALUES ({})",
        T::TABLE.name(),
        dimension_columns::<T>(),
        DIM_HASH,
        placeholders(T::COLUMNS.len() + 3)
    )
}

/// Bind values for [`dimension_insert`], one row per tuple, ordered by `dim_hash`.
///
/// Concurrent batches sharing tuples then take their row locks in the same order.
pub(crate) fn ordered_upsert_values<T: Dimensions>(rows: Vec<(&T, i64, i64)>) -> Vec<Vec<SqlValue>> {
    let mut keyed: Vec<(String, Vec<SqlValue>)> = rows
        .into_iter()
        .map(|(tuple, count, updated_time)| {
            let hash = tuple.dim_hash();
            let mut values = tuple.values();
            values.push(SqlValue::Text(hash.clone()));
            values.push(SqlValue::Int(count.max(0)));
            values.push(SqlValue::Int(updated_time));
            (hash, values)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, values)| values).collect()
}

/// `count + <incoming>` clamped at `i64::MAX`. `incoming` is never negative.
pub(crate) fn saturating_count_sum(incoming: &str) -> String {
    format!(
        "CASE WHEN count > {max} - {inc} THEN {max} ELSE count + {inc} END",
        max = i64::MAX,
        inc = incoming
    )
}

/// Dimension columns followed by `count` and `updated_time`, for decoding.
pub(crate) fn dimension_row_columns<T: Dimensions>() -> Vec<Column> {
    let mut cols = T::COLUMNS.to_vec();
    cols.push(Column::int("count"));
    cols.push(Column::int("updated_time"));
    cols
}

/// Split a decoded row into the tuple and its `(count, updated_time)`.
pub(crate) fn split_dimension_row<T: Dimensions>(
    mut row: Vec<SqlValue>,
) -> Result<(T, u64, i64), BackendError> {
    let tail = row.split_off(T::COLUMNS.len());
    let mut r = ValueReader::new(tail);
    let count = r.int()?;
    let updated_time = r.int()?;
    let tuple = T::from_values(row)?;
    Ok((tuple, u64::try_from(count).unwrap_or(0), updated_time))
}

/// ` WHERE a = ? AND b = ?` (or empty) plus its bind values.
pub(crate) fn where_eq(pairs: Vec<(&str, SqlValue)>) -> (String, Vec<SqlValue>) {
    if pairs.is_empty() {
        return (String::new(), Vec::new());
    }
    let clause = pairs
        .iter()
        .map(|(c, _)| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(" AND ");
    let values = pairs.into_iter().map(|(_, v)| v).collect();
    (format!(" WHERE {}", clause), values)
}

/// Partial-match filter over a dimension tuple.
pub(crate) fn dimension_where<T: Dimensions>(filter: &T) -> (String, Vec<SqlValue>) {
    where_eq(filter.filter_values())
}

pub(crate) fn dimension_select<T: Dimensions>(where_sql: &str, page: &Page) -> String {
    format!(
        "SELECT {}, count, updated_time FROM {}{} ORDER BY id{}",
        dimension_columns::<T>(),
        T::TABLE.name(),
        where_sql,
        page_clause(page)
    )
}

pub(crate) fn dimension_count<T: Dimensions>(where_sql: &str) -> String {
    format!("SELECT COUNT(*) FROM {}{}", T::TABLE.name(), where_sql)
}

pub(crate) fn page_clause(page: &Page) -> String {
    if page.offset == 0 && page.limit.is_none() {
        return String::new();
    }
    let limit = page.limit.map(i64::from).unwrap_or(i64::MAX);
    format!(" LIMIT {} OFFSET {}", limit, page.offset)
}

pub(crate) fn total_from_count(n: i64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Stored layout shared by the network and system policy tables.
pub(crate) const POLICY_COLUMNS: &[Column] = &[
    Column::text("api_version"),
    Column::text("kind"),
    Column::text("flow_ids"),
    Column::text("name"),
    Column::text("cluster_name"),
    Column::text("namespace"),
    Column::text("policy_type"),
    Column::text("rule"),
    Column::text("status"),
    Column::text("outdated"),
    Column::text("spec"),
    Column::int("generated_time"),
];

fn policy_column_list() -> String {
    POLICY_COLUMNS
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn policy_insert(table: Table) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name(),
        policy_column_list(),
        placeholders(POLICY_COLUMNS.len())
    )
}

pub(crate) fn policy_select(table: Table, where_sql: &str) -> String {
    format!(
        "SELECT {} FROM {}{} ORDER BY id",
        policy_column_list(),
        table.name(),
        where_sql
    )
}

/// Content replace by key. Bind with [`PolicyRow::update_values`].
pub(crate) fn policy_update(table: Table) -> String {
    format!(
        "UPDATE {} SET api_version = ?, kind = ?, flow_ids = ?, policy_type = ?, rule = ?, \
         status = ?, outdated = ?, spec = ?, generated_time = ? \
         WHERE cluster_name = ? AND namespace = ? AND name = ?",
        table.name()
    )
}

pub(crate) fn policy_set_status(table: Table) -> String {
    format!(
        "UPDATE {} SET status = ?, outdated = ? WHERE cluster_name = ? AND namespace = ? AND name = ?",
        table.name()
    )
}

#[cfg_attr(not(feature = "mysql"), allow(dead_code))]
pub(crate) fn policy_exists(table: Table) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE cluster_name = ? AND namespace = ? AND name = ?",
        table.name()
    )
}

pub(crate) fn key_values(key: &PolicyKey) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(key.cluster.clone()),
        SqlValue::Text(key.namespace.clone()),
        SqlValue::Text(key.name.clone()),
    ]
}

pub(crate) fn status_values(status: PolicyStatus, outdated: &str, key: &PolicyKey) -> Vec<SqlValue> {
    let mut values = vec![
        SqlValue::Text(status.as_str().to_string()),
        SqlValue::Text(outdated.to_string()),
    ];
    values.extend(key_values(key));
    values
}

pub(crate) fn policy_where(filter: &PolicyFilter) -> (String, Vec<SqlValue>) {
    let mut pairs = Vec::new();
    if let Some(ref c) = filter.cluster {
        pairs.push(("cluster_name", SqlValue::Text(c.clone())));
    }
    if let Some(ref ns) = filter.namespace {
        pairs.push(("namespace", SqlValue::Text(ns.clone())));
    }
    if let Some(status) = filter.status {
        pairs.push(("status", SqlValue::Text(status.as_str().to_string())));
    }
    if let Some(ref t) = filter.policy_type {
        pairs.push(("policy_type", SqlValue::Text(t.clone())));
    }
    if let Some(ref r) = filter.rule {
        pairs.push(("rule", SqlValue::Text(r.clone())));
    }
    where_eq(pairs)
}

/// One policy row; both document kinds map onto it.
#[derive(Debug, Clone)]
pub(crate) struct PolicyRow {
    api_version: String,
    kind: String,
    flow_ids: String,
    metadata: PolicyMetadata,
    outdated: String,
    spec: String,
    generated_time: i64,
}

fn encode_err(e: serde_json::Error) -> BackendError {
    BackendError::Decode(e.to_string())
}

impl PolicyRow {
    pub(crate) fn from_network(p: &NetworkPolicy) -> Result<Self, BackendError> {
        Ok(Self {
            api_version: p.api_version.clone(),
            kind: p.kind.clone(),
            flow_ids: serde_json::to_string(&p.flow_ids).map_err(encode_err)?,
            metadata: p.metadata.clone(),
            outdated: p.outdated.clone(),
            spec: serde_json::to_string(&p.spec).map_err(encode_err)?,
            generated_time: p.generated_time,
        })
    }

    pub(crate) fn from_system(p: &SystemPolicy) -> Result<Self, BackendError> {
        Ok(Self {
            api_version: p.api_version.clone(),
            kind: p.kind.clone(),
            flow_ids: "[]".to_string(),
            metadata: p.metadata.clone(),
            outdated: p.outdated.clone(),
            spec: serde_json::to_string(&p.spec).map_err(encode_err)?,
            generated_time: p.generated_time,
        })
    }

    pub(crate) fn key(&self) -> PolicyKey {
        PolicyKey::new(
            &self.metadata.cluster_name,
            &self.metadata.namespace,
            &self.metadata.name,
        )
    }

    /// Values in [`POLICY_COLUMNS`] order.
    pub(crate) fn insert_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.api_version.clone()),
            SqlValue::Text(self.kind.clone()),
            SqlValue::Text(self.flow_ids.clone()),
            SqlValue::Text(self.metadata.name.clone()),
            SqlValue::Text(self.metadata.cluster_name.clone()),
            SqlValue::Text(self.metadata.namespace.clone()),
            SqlValue::Text(self.metadata.policy_type.clone()),
            SqlValue::Text(self.metadata.rule.clone()),
            SqlValue::Text(self.metadata.status.as_str().to_string()),
            SqlValue::Text(self.outdated.clone()),
            SqlValue::Text(self.spec.clone()),
            SqlValue::Int(self.generated_time),
        ]
    }

    /// Values for [`policy_update`]: content columns then the key.
    pub(crate) fn update_values(&self) -> Vec<SqlValue> {
        let mut values = vec![
            SqlValue::Text(self.api_version.clone()),
            SqlValue::Text(self.kind.clone()),
            SqlValue::Text(self.flow_ids.clone()),
            SqlValue::Text(self.metadata.policy_type.clone()),
            SqlValue::Text(self.metadata.rule.clone()),
            SqlValue::Text(self.metadata.status.as_str().to_string()),
            SqlValue::Text(self.outdated.clone()),
            SqlValue::Text(self.spec.clone()),
            SqlValue::Int(self.generated_time),
        ];
        values.extend(key_values(&self.key()));
        values
    }

    pub(crate) fn from_values(values: Vec<SqlValue>) -> Result<Self, BackendError> {
        let mut r = ValueReader::new(values);
        let api_version = r.text()?;
        let kind = r.text()?;
        let flow_ids = r.text()?;
        let name = r.text()?;
        let cluster_name = r.text()?;
        let namespace = r.text()?;
        let policy_type = r.text()?;
        let rule = r.text()?;
        let status_raw = r.text()?;
        let status = PolicyStatus::parse(&status_raw)
            .ok_or_else(|| BackendError::Decode(format!("unknown policy status: {}", status_raw)))?;
        Ok(Self {
            api_version,
            kind,
            flow_ids,
            metadata: PolicyMetadata {
                name,
                namespace,
                cluster_name,
                policy_type,
                rule,
                status,
            },
            outdated: r.text()?,
            spec: r.text()?,
            generated_time: r.int()?,
        })
    }

    pub(crate) fn into_network(self) -> Result<NetworkPolicy, BackendError> {
        let spec: NetworkPolicySpec = serde_json::from_str(&self.spec).map_err(encode_err)?;
        let flow_ids: Vec<i64> = serde_json::from_str(&self.flow_ids).map_err(encode_err)?;
        Ok(NetworkPolicy {
            api_version: self.api_version,
            kind: self.kind,
            flow_ids,
            metadata: self.metadata,
            outdated: self.outdated,
            spec,
            generated_time: self.generated_time,
        })
    }

    pub(crate) fn into_system(self) -> Result<SystemPolicy, BackendError> {
        let spec: SystemPolicySpec = serde_json::from_str(&self.spec).map_err(encode_err)?;
        Ok(SystemPolicy {
            api_version: self.api_version,
            kind: self.kind,
            metadata: self.metadata,
            outdated: self.outdated,
            spec,
            generated_time: self.generated_time,
        })
    }
}

// ---------------------------------------------------------------------------
// Workload process file sets
// ---------------------------------------------------------------------------

pub(crate) fn file_set_lookup() -> String {
    format!(
        "SELECT id, file_set FROM {} WHERE {} = ?",
        Table::WorkloadProcessFileSet.name(),
        DIM_HASH
    )
}

pub(crate) fn file_set_insert() -> String {
    format!(
        "INSERT INTO {} (policy_name, cluster_name, container_name, namespace, labels, from_source, \
         set_type, {}, file_set, created_time, updated_time) VALUES ({})",
        Table::WorkloadProcessFileSet.name(),
        DIM_HASH,
        placeholders(11)
    )
}

pub(crate) fn file_set_update() -> String {
    format!(
        "UPDATE {} SET file_set = ?, updated_time = ? WHERE id = ?",
        Table::WorkloadProcessFileSet.name()
    )
}

/// Columns returned by [`file_set_select`].
pub(crate) fn file_set_row_columns() -> Vec<Column> {
    let mut cols = vec![Column::text("policy_name")];
    cols.extend_from_slice(<knox_types::WorkloadProcessFileSet as Dimensions>::COLUMNS);
    cols.push(Column::text("file_set"));
    cols
}

pub(crate) fn file_set_select(where_sql: &str) -> String {
    format!(
        "SELECT policy_name, {}, file_set FROM {}{} ORDER BY id",
        dimension_columns::<knox_types::WorkloadProcessFileSet>(),
        Table::WorkloadProcessFileSet.name(),
        where_sql
    )
}

/// Bind values for [`file_set_insert`].
pub(crate) fn file_set_insert_values(
    key: &knox_types::WorkloadProcessFileSet,
    policy_name: String,
    files_json: String,
    now: i64,
) -> Vec<SqlValue> {
    let mut values = vec![SqlValue::Text(policy_name)];
    values.extend(key.values());
    values.push(SqlValue::Text(key.dim_hash()));
    values.push(SqlValue::Text(files_json));
    values.push(SqlValue::Int(now));
    values.push(SqlValue::Int(now));
    values
}

/// Decode a [`file_set_select`] row into `(key, policy_name, files)`.
pub(crate) fn split_file_set_row(
    mut row: Vec<SqlValue>,
) -> Result<(knox_types::WorkloadProcessFileSet, String, Vec<String>), BackendError> {
    let files = match row.pop() {
        Some(SqlValue::Text(raw)) => decode_files(&raw)?,
        _ => return Err(BackendError::Decode("missing file_set column".to_string())),
    };
    if row.is_empty() {
        return Err(BackendError::Decode("missing policy_name column".to_string()));
    }
    let policy_name = match row.remove(0) {
        SqlValue::Text(s) => s,
        SqlValue::Int(v) => v.to_string(),
    };
    let key = knox_types::WorkloadProcessFileSet::from_values(row)?;
    Ok((key, policy_name, files))
}

/// Delete matching sets not updated since `cutoff`. The filter's values come first.
pub(crate) fn file_set_clear(where_sql: &str) -> String {
    let cond = if where_sql.is_empty() {
        " WHERE updated_time <= ?".to_string()
    } else {
        format!("{} AND updated_time <= ?", where_sql)
    };
    format!(
        "DELETE FROM {}{}",
        Table::WorkloadProcessFileSet.name(),
        cond
    )
}

/// Union preserving first-seen order.
pub(crate) fn merge_files(existing: &mut Vec<String>, files: &[String]) {
    for f in files {
        if !existing.contains(f) {
            existing.push(f.clone());
        }
    }
}

pub(crate) fn decode_files(raw: &str) -> Result<Vec<String>, BackendError> {
    serde_json::from_str(raw).map_err(encode_err)
}

pub(crate) fn encode_files(files: &[String]) -> Result<String, BackendError> {
    serde_json::to_string(files).map_err(encode_err)
}

/// `autopol-<set_type>-<10 lowercase letters>`.
pub(crate) fn generate_policy_name(set_type: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(10)
        .map(|b| char::from(b'a' + b % 26))
        .collect();
    format!("autopol-{}-{}", set_type, suffix)
}

// ---------------------------------------------------------------------------
// Pod names
// ---------------------------------------------------------------------------

/// `SELECT DISTINCT <pod column>` over the table matching the filter's event kind.
pub(crate) fn pod_names_query(filter: &PodFilter) -> (String, Vec<SqlValue>) {
    let (table, pod_col, ns_col, labels_col) = match filter.kind {
        EventKind::System => (Table::SystemLogs, "pod_name", "namespace_name", "labels"),
        EventKind::Network => (
            Table::NetworkLogs,
            "source_pod_name",
            "source_namespace",
            "source_labels",
        ),
    };
    let mut pairs: Vec<(&str, SqlValue)> = Vec::new();
    let mut push = |col: &'static str, v: &str| {
        if !v.is_empty() {
            pairs.push((col, SqlValue::Text(v.to_string())));
        }
    };
    push("cluster_name", &filter.cluster_name);
    push(ns_col, &filter.namespace);
    push(labels_col, &filter.labels);
    if filter.kind == EventKind::System {
        push("container_name", &filter.container_name);
    }
    push(pod_col, &filter.pod_name);

    let (where_sql, values) = where_eq(pairs);
    let non_empty = if where_sql.is_empty() {
        format!(" WHERE {} <> ''", pod_col)
    } else {
        format!("{} AND {} <> ''", where_sql, pod_col)
    };
    (
        format!(
            "SELECT DISTINCT {} FROM {}{} ORDER BY {}",
            pod_col,
            table.name(),
            non_empty,
            pod_col
        ),
        values,
    )
}

// ---------------------------------------------------------------------------
// Policy blobs
// ---------------------------------------------------------------------------

pub(crate) const POLICY_YAML_COLUMNS: &[Column] = &[
    Column::text("policy_type"),
    Column::text("kind"),
    Column::text("name"),
    Column::text("namespace"),
    Column::text("cluster"),
    Column::text("labels"),
    Column::text("policy_yaml"),
    Column::int("updated_time"),
];

pub(crate) fn policy_yaml_insert() -> String {
    format!(
        "INSERT INTO {} (policy_type, kind, name, namespace, cluster, labels, policy_yaml, updated_time) \
         VALUES ({})",
        Table::PolicyYaml.name(),
        placeholders(POLICY_YAML_COLUMNS.len())
    )
}

pub(crate) fn policy_yaml_select() -> String {
    format!(
        "SELECT policy_type, kind, name, namespace, cluster, labels, policy_yaml, updated_time \
         FROM {} WHERE policy_type = ? ORDER BY id",
        Table::PolicyYaml.name()
    )
}

pub(crate) fn policy_yaml_values(p: &PolicyYaml) -> Result<Vec<SqlValue>, BackendError> {
    Ok(vec![
        SqlValue::Text(p.policy_type.clone()),
        SqlValue::Text(p.kind.clone()),
        SqlValue::Text(p.name.clone()),
        SqlValue::Text(p.namespace.clone()),
        SqlValue::Text(p.cluster.clone()),
        SqlValue::Text(serde_json::to_string(&p.labels).map_err(encode_err)?),
        SqlValue::Text(p.policy_yaml.clone()),
        SqlValue::Int(p.updated_time),
    ])
}

pub(crate) fn policy_yaml_from_values(values: Vec<SqlValue>) -> Result<PolicyYaml, BackendError> {
    let mut r = ValueReader::new(values);
    Ok(PolicyYaml {
        policy_type: r.text()?,
        kind: r.text()?,
        name: r.text()?,
        namespace: r.text()?,
        cluster: r.text()?,
        labels: serde_json::from_str(&r.text()?).map_err(encode_err)?,
        policy_yaml: r.text()?,
        updated_time: r.int()?,
    })
}

// ---------------------------------------------------------------------------
// DDL helpers
// ---------------------------------------------------------------------------

/// Dimension column definitions with the given text / integer type names.
pub(crate) fn dimension_column_defs(cols: &[Column], text_ty: &str, int_ty: &str) -> String {
    cols.iter()
        .map(|c| match c.ty {
            ColumnType::Text => format!("{} {} NOT NULL", c.name, text_ty),
            ColumnType::Int => format!("{} {} NOT NULL DEFAULT 0", c.name, int_ty),
        })
        .collect::<Vec<_>>()
        .join(",\n    ")
}
