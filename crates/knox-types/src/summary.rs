//! System summary tuples and their rolling aggregates.

use crate::dimensions::{Column, Dimensions, SqlValue, ValueReader};
use crate::{BackendError, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full dimension tuple of one summary bucket. As a filter, empty / zero fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSummary {
    pub cluster_name: String,
    pub cluster_id: i64,
    pub namespace_name: String,
    pub namespace_id: i64,
    pub container_name: String,
    pub container_image: String,
    pub container_id: String,
    pub pod_name: String,
    pub operation: String,
    pub labels: String,
    pub deployment_name: String,
    pub source: String,
    pub destination: String,
    pub destination_namespace: String,
    pub destination_labels: String,
    #[serde(rename = "type")]
    pub nw_type: String,
    pub ip: String,
    pub port: i64,
    pub protocol: String,
    pub action: String,
}

impl Dimensions for SystemSummary {
    const TABLE: Table = Table::SystemSummary;
    const COLUMNS: &'static [Column] = &[
        Column::text("cluster_name"),
        Column::int("cluster_id"),
        Column::text("namespace_name"),
        Column::int("namespace_id"),
        Column::text("container_name"),
        Column::text("container_image"),
        Column::text("container_id"),
        Column::text("podname"),
        Column::text("operation"),
        Column::text("labels"),
        Column::text("deployment_name"),
        Column::text("source"),
        Column::text("destination"),
        Column::text("destination_namespace"),
        Column::text("destination_labels"),
        Column::text("nw_type"),
        Column::text("ip"),
        Column::int("port"),
        Column::text("protocol"),
        Column::text("action"),
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.cluster_name.clone()),
            SqlValue::Int(self.cluster_id),
            SqlValue::Text(self.namespace_name.clone()),
            SqlValue::Int(self.namespace_id),
            SqlValue::Text(self.container_name.clone()),
            SqlValue::Text(self.container_image.clone()),
            SqlValue::Text(self.container_id.clone()),
            SqlValue::Text(self.pod_name.clone()),
            SqlValue::Text(self.operation.clone()),
            SqlValue::Text(self.labels.clone()),
            SqlValue::Text(self.deployment_name.clone()),
            SqlValue::Text(self.source.clone()),
            SqlValue::Text(self.destination.clone()),
            SqlValue::Text(self.destination_namespace.clone()),
            SqlValue::Text(self.destination_labels.clone()),
            SqlValue::Text(self.nw_type.clone()),
            SqlValue::Text(self.ip.clone()),
            SqlValue::Int(self.port),
            SqlValue::Text(self.protocol.clone()),
            SqlValue::Text(self.action.clone()),
        ]
    }

    fn from_values(values: Vec<SqlValue>) -> Result<Self, BackendError> {
        let mut r = ValueReader::new(values);
        Ok(Self {
            cluster_name: r.text()?,
            cluster_id: r.int()?,
            namespace_name: r.text()?,
            namespace_id: r.int()?,
            container_name: r.text()?,
            container_image: r.text()?,
            container_id: r.text()?,
            pod_name: r.text()?,
            operation: r.text()?,
            labels: r.text()?,
            deployment_name: r.text()?,
            source: r.text()?,
            destination: r.text()?,
            destination_namespace: r.text()?,
            destination_labels: r.text()?,
            nw_type: r.text()?,
            ip: r.text()?,
            port: r.int()?,
            protocol: r.text()?,
            action: r.text()?,
        })
    }
}

/// Mutable aggregate attached to a summary tuple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysSummaryTimeCount {
    pub count: u64,
    pub updated_time: i64,
}

impl SysSummaryTimeCount {
    pub fn new(count: u64, updated_time: i64) -> Self {
        Self {
            count,
            updated_time,
        }
    }

    /// Fold another observation in. Both fields only move forward.
    pub fn absorb(&mut self, other: SysSummaryTimeCount) {
        self.count = self.count.saturating_add(other.count);
        self.updated_time = self.updated_time.max(other.updated_time);
    }
}

pub type SummaryMap = HashMap<SystemSummary, SysSummaryTimeCount>;

/// Stored summary tuple with its aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(flatten)]
    pub summary: SystemSummary,
    pub count: u64,
    pub updated_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_accumulates_and_keeps_latest_time() {
        let mut agg = SysSummaryTimeCount::new(2, 100);
        agg.absorb(SysSummaryTimeCount::new(3, 90));
        assert_eq!(agg, SysSummaryTimeCount::new(5, 100));
        agg.absorb(SysSummaryTimeCount::new(1, 120));
        assert_eq!(agg, SysSummaryTimeCount::new(6, 120));
    }

    #[test]
    fn twenty_columns_round_trip() {
        let s = SystemSummary {
            cluster_name: "c1".to_string(),
            cluster_id: 3,
            pod_name: "web-0".to_string(),
            port: 8080,
            protocol: "TCP".to_string(),
            ..Default::default()
        };
        let values = s.values();
        assert_eq!(values.len(), SystemSummary::COLUMNS.len());
        assert_eq!(SystemSummary::from_values(values).unwrap(), s);
    }
}
