//! Telemetry events: KubeArmor process/file events and Cilium network flows.
//!
//! An event value holds only its dimensions. Two equal values are the same
//! logical event seen more than once; the observation count lives beside the
//! event in [`LogRecord`] and in the ingestion maps.

use crate::dimensions::{Column, Dimensions, SqlValue, ValueReader};
use crate::{BackendError, Table};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// KubeArmor process / file / syscall events.
    System,
    /// Cilium network flows.
    Network,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeArmorLog {
    pub cluster_name: String,
    pub host_name: String,
    pub namespace_name: String,
    pub pod_name: String,
    pub labels: String,
    pub container_id: String,
    pub container_name: String,
    pub container_image: String,
    pub parent_process_name: String,
    pub process_name: String,
    pub host_ppid: i64,
    pub host_pid: i64,
    pub ppid: i64,
    pub pid: i64,
    pub uid: i64,
    #[serde(rename = "type")]
    pub log_type: String,
    pub source: String,
    pub operation: String,
    pub resource: String,
    pub data: String,
    pub result: String,
    pub action: String,
    pub timestamp: i64,
}

impl Dimensions for KubeArmorLog {
    const TABLE: Table = Table::SystemLogs;
    const COLUMNS: &'static [Column] = &[
        Column::text("cluster_name"),
        Column::text("host_name"),
        Column::text("namespace_name"),
        Column::text("pod_name"),
        Column::text("labels"),
        Column::text("container_id"),
        Column::text("container_name"),
        Column::text("container_image"),
        Column::text("parent_process_name"),
        Column::text("process_name"),
        Column::int("host_ppid"),
        Column::int("host_pid"),
        Column::int("ppid"),
        Column::int("pid"),
        Column::int("uid"),
        Column::text("log_type"),
        Column::text("source"),
        Column::text("operation"),
        Column::text("resource"),
        Column::text("data"),
        Column::text("result"),
        Column::text("action"),
        Column::int("timestamp"),
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.cluster_name.clone()),
            SqlValue::Text(self.host_name.clone()),
            SqlValue::Text(self.namespace_name.clone()),
            SqlValue::Text(self.pod_name.clone()),
            SqlValue::Text(self.labels.clone()),
            SqlValue::Text(self.container_id.clone()),
            SqlValue::Text(self.container_name.clone()),
            SqlValue::Text(self.container_image.clone()),
            SqlValue::Text(self.parent_process_name.clone()),
            SqlValue::Text(self.process_name.clone()),
            SqlValue::Int(self.host_ppid),
            SqlValue::Int(self.host_pid),
            SqlValue::Int(self.ppid),
            SqlValue::Int(self.pid),
            SqlValue::Int(self.uid),
            SqlValue::Text(self.log_type.clone()),
            SqlValue::Text(self.source.clone()),
            SqlValue::Text(self.operation.clone()),
            SqlValue::Text(self.resource.clone()),
            SqlValue::Text(self.data.clone()),
            SqlValue::Text(self.result.clone()),
            SqlValue::Text(self.action.clone()),
            SqlValue::Int(self.timestamp),
        ]
    }

    fn from_values(values: Vec<SqlValue>) -> Result<Self, BackendError> {
        let mut r = ValueReader::new(values);
        Ok(Self {
            cluster_name: r.text()?,
            host_name: r.text()?,
            namespace_name: r.text()?,
            pod_name: r.text()?,
            labels: r.text()?,
            container_id: r.text()?,
            container_name: r.text()?,
            container_image: r.text()?,
            parent_process_name: r.text()?,
            process_name: r.text()?,
            host_ppid: r.int()?,
            host_pid: r.int()?,
            ppid: r.int()?,
            pid: r.int()?,
            uid: r.int()?,
            log_type: r.text()?,
            source: r.text()?,
            operation: r.text()?,
            resource: r.text()?,
            data: r.text()?,
            result: r.text()?,
            action: r.text()?,
            timestamp: r.int()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CiliumLog {
    pub cluster_name: String,
    pub verdict: String,
    pub drop_reason: i64,
    pub ip_source: String,
    pub ip_destination: String,
    pub ip_version: i64,
    pub l4_protocol: String,
    pub l4_source_port: i64,
    pub l4_destination_port: i64,
    pub source_namespace: String,
    pub source_labels: String,
    pub source_pod_name: String,
    pub destination_namespace: String,
    pub destination_labels: String,
    pub destination_pod_name: String,
    pub traffic_direction: String,
    pub trace_observation_point: String,
    pub l7_type: String,
    pub l7_dns_query: String,
    pub l7_http_method: String,
    pub l7_http_url: String,
    pub is_reply: bool,
    pub node_name: String,
    pub timestamp: i64,
}

impl Dimensions for CiliumLog {
    const TABLE: Table = Table::NetworkLogs;
    const COLUMNS: &'static [Column] = &[
        Column::text("cluster_name"),
        Column::text("verdict"),
        Column::int("drop_reason"),
        Column::text("ip_source"),
        Column::text("ip_destination"),
        Column::int("ip_version"),
        Column::text("l4_protocol"),
        Column::int("l4_source_port"),
        Column::int("l4_destination_port"),
        Column::text("source_namespace"),
        Column::text("source_labels"),
        Column::text("source_pod_name"),
        Column::text("destination_namespace"),
        Column::text("destination_labels"),
        Column::text("destination_pod_name"),
        Column::text("traffic_direction"),
        Column::text("trace_observation_point"),
        Column::text("l7_type"),
        Column::text("l7_dns_query"),
        Column::text("l7_http_method"),
        Column::text("l7_http_url"),
        Column::int("is_reply"),
        Column::text("node_name"),
        Column::int("timestamp"),
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.cluster_name.clone()),
            SqlValue::Text(self.verdict.clone()),
            SqlValue::Int(self.drop_reason),
            SqlValue::Text(self.ip_source.clone()),
            SqlValue::Text(self.ip_destination.clone()),
            SqlValue::Int(self.ip_version),
            SqlValue::Text(self.l4_protocol.clone()),
            SqlValue::Int(self.l4_source_port),
            SqlValue::Int(self.l4_destination_port),
            SqlValue::Text(self.source_namespace.clone()),
            SqlValue::Text(self.source_labels.clone()),
            SqlValue::Text(self.source_pod_name.clone()),
            SqlValue::Text(self.destination_namespace.clone()),
            SqlValue::Text(self.destination_labels.clone()),
            SqlValue::Text(self.destination_pod_name.clone()),
            SqlValue::Text(self.traffic_direction.clone()),
            SqlValue::Text(self.trace_observation_point.clone()),
            SqlValue::Text(self.l7_type.clone()),
            SqlValue::Text(self.l7_dns_query.clone()),
            SqlValue::Text(self.l7_http_method.clone()),
            SqlValue::Text(self.l7_http_url.clone()),
            SqlValue::Int(i64::from(self.is_reply)),
            SqlValue::Text(self.node_name.clone()),
            SqlValue::Int(self.timestamp),
        ]
    }

    fn from_values(values: Vec<SqlValue>) -> Result<Self, BackendError> {
        let mut r = ValueReader::new(values);
        Ok(Self {
            cluster_name: r.text()?,
            verdict: r.text()?,
            drop_reason: r.int()?,
            ip_source: r.text()?,
            ip_destination: r.text()?,
            ip_version: r.int()?,
            l4_protocol: r.text()?,
            l4_source_port: r.int()?,
            l4_destination_port: r.int()?,
            source_namespace: r.text()?,
            source_labels: r.text()?,
            source_pod_name: r.text()?,
            destination_namespace: r.text()?,
            destination_labels: r.text()?,
            destination_pod_name: r.text()?,
            traffic_direction: r.text()?,
            trace_observation_point: r.text()?,
            l7_type: r.text()?,
            l7_dns_query: r.text()?,
            l7_http_method: r.text()?,
            l7_http_url: r.text()?,
            is_reply: r.int()? != 0,
            node_name: r.text()?,
            timestamp: r.int()?,
        })
    }
}

/// A stored event together with its aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord<E> {
    #[serde(flatten)]
    pub event: E,
    pub count: u64,
    pub updated_time: i64,
}

/// Offset/limit window. `limit: None` returns every remaining row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Partial-match query: wildcard (empty / zero) fields of `filter` match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery<E> {
    #[serde(default)]
    pub filter: E,
    #[serde(default)]
    pub page: Page,
}

impl<E> EventQuery<E> {
    pub fn new(filter: E, page: Page) -> Self {
        Self { filter, page }
    }
}

/// One page of events plus the number of rows matching the filter across all pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage<E> {
    pub events: Vec<LogRecord<E>>,
    pub total: u32,
}

impl<E> Default for EventPage<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            total: 0,
        }
    }
}

/// Filter for distinct pod-name lookups. Empty fields match everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodFilter {
    pub kind: EventKind,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: String,
    /// Only applied to system events; network flows carry no container name.
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub pod_name: String,
}

impl PodFilter {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            cluster_name: String::new(),
            namespace: String::new(),
            labels: String::new(),
            container_name: String::new(),
            pod_name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> KubeArmorLog {
        KubeArmorLog {
            cluster_name: "c1".to_string(),
            namespace_name: "ns1".to_string(),
            pod_name: "web-0".to_string(),
            process_name: "/bin/sh".to_string(),
            pid: 42,
            operation: "Process".to_string(),
            timestamp: 1_700_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn values_follow_column_order() {
        let log = sample_log();
        let values = log.values();
        assert_eq!(values.len(), KubeArmorLog::COLUMNS.len());
        let decoded = KubeArmorLog::from_values(values).unwrap();
        assert_eq!(decoded, log);

        let flow = CiliumLog {
            is_reply: true,
            l4_destination_port: 443,
            ..Default::default()
        };
        assert_eq!(flow.values().len(), CiliumLog::COLUMNS.len());
    }

    #[test]
    fn dim_hash_changes_with_any_field() {
        let a = sample_log();
        let mut b = sample_log();
        assert_eq!(a.dim_hash(), b.dim_hash());
        b.pid = 43;
        assert_ne!(a.dim_hash(), b.dim_hash());
        assert_eq!(a.dim_hash().len(), 64);
    }

    #[test]
    fn filter_values_skip_wildcards() {
        let filter = KubeArmorLog {
            namespace_name: "ns1".to_string(),
            pid: 7,
            ..Default::default()
        };
        let pairs = filter.filter_values();
        assert_eq!(
            pairs,
            vec![
                ("namespace_name", SqlValue::Text("ns1".to_string())),
                ("pid", SqlValue::Int(7)),
            ]
        );
    }
}
