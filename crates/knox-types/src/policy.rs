//! Network and system policy documents, the workload file-set model and policy blobs.

use crate::dimensions::{Column, Dimensions, SqlValue, ValueReader};
use crate::{BackendError, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Lifecycle status of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    #[default]
    Latest,
    Outdated,
}

impl PolicyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyStatus::Latest => "latest",
            PolicyStatus::Outdated => "outdated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "latest" => Some(PolicyStatus::Latest),
            "outdated" => Some(PolicyStatus::Outdated),
            _ => None,
        }
    }
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Network,
    System,
}

/// Logical identity of a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyKey {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

impl PolicyKey {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

/// Query filter for policy reads; `None` fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFilter {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub status: Option<PolicyStatus>,
    /// Network type (e.g. egress / ingress) for network policies, policy type for system ones.
    #[serde(default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(rename = "matchLabels", default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub name: String,
    pub namespace: String,
    pub cluster_name: String,
    #[serde(rename = "type", default)]
    pub policy_type: String,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub status: PolicyStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPolicySpec {
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub egress: Vec<serde_json::Value>,
    #[serde(default)]
    pub ingress: Vec<serde_json::Value>,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub flow_ids: Vec<i64>,
    pub metadata: PolicyMetadata,
    /// Name of the policy that replaced this one, set when superseded.
    #[serde(default)]
    pub outdated: String,
    pub spec: NetworkPolicySpec,
    #[serde(rename = "generatedTime", default)]
    pub generated_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPolicySpec {
    #[serde(default)]
    pub severity: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub process: serde_json::Value,
    #[serde(default)]
    pub file: serde_json::Value,
    #[serde(default)]
    pub network: serde_json::Value,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPolicy {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub outdated: String,
    pub spec: SystemPolicySpec,
    #[serde(rename = "generatedTime", default)]
    pub generated_time: i64,
}

/// Behaviour shared by network and system policy documents.
pub trait PolicyDocument {
    fn metadata(&self) -> &PolicyMetadata;

    fn selector(&self) -> &Selector;

    fn key(&self) -> PolicyKey {
        let m = self.metadata();
        PolicyKey::new(&m.cluster_name, &m.namespace, &m.name)
    }
}

impl PolicyDocument for NetworkPolicy {
    fn metadata(&self) -> &PolicyMetadata {
        &self.metadata
    }

    fn selector(&self) -> &Selector {
        &self.spec.selector
    }
}

impl PolicyDocument for SystemPolicy {
    fn metadata(&self) -> &PolicyMetadata {
        &self.metadata
    }

    fn selector(&self) -> &Selector {
        &self.spec.selector
    }
}

/// True when every selector pair is present with an equal value in `labels`.
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|val| val == v))
}

/// Workload identity used to accumulate accessed file paths.
/// As a filter, empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadProcessFileSet {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: String,
    #[serde(default)]
    pub from_source: String,
    /// `file` or `process`.
    #[serde(default)]
    pub set_type: String,
}

impl Dimensions for WorkloadProcessFileSet {
    const TABLE: Table = Table::WorkloadProcessFileSet;
    const COLUMNS: &'static [Column] = &[
        Column::text("cluster_name"),
        Column::text("container_name"),
        Column::text("namespace"),
        Column::text("labels"),
        Column::text("from_source"),
        Column::text("set_type"),
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.cluster_name.clone()),
            SqlValue::Text(self.container_name.clone()),
            SqlValue::Text(self.namespace.clone()),
            SqlValue::Text(self.labels.clone()),
            SqlValue::Text(self.from_source.clone()),
            SqlValue::Text(self.set_type.clone()),
        ]
    }

    fn from_values(values: Vec<SqlValue>) -> Result<Self, BackendError> {
        let mut r = ValueReader::new(values);
        Ok(Self {
            cluster_name: r.text()?,
            container_name: r.text()?,
            namespace: r.text()?,
            labels: r.text()?,
            from_source: r.text()?,
            set_type: r.text()?,
        })
    }
}

pub type FileSetMap = HashMap<WorkloadProcessFileSet, Vec<String>>;
pub type PolicyNameMap = HashMap<WorkloadProcessFileSet, String>;

/// Result of a file-set lookup: accumulated paths and the generated policy name per key.
#[derive(Debug, Clone, Default)]
pub struct WorkloadFileSets {
    pub files: FileSetMap,
    pub names: PolicyNameMap,
}

impl WorkloadFileSets {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Rendered policy blob, keyed by `(policy_type, cluster, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyYaml {
    #[serde(rename = "type")]
    pub policy_type: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "yaml")]
    pub policy_yaml: String,
    #[serde(default)]
    pub updated_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn selector(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(matches_selector(&labels(&[]), &selector(&[])));
        assert!(matches_selector(&labels(&[("app", "web")]), &selector(&[])));
    }

    #[test]
    fn selector_requires_every_pair() {
        let l = labels(&[("app", "web"), ("tier", "front")]);
        assert!(matches_selector(&l, &selector(&[("app", "web")])));
        assert!(matches_selector(&l, &selector(&[("app", "web"), ("tier", "front")])));
        assert!(!matches_selector(&l, &selector(&[("app", "db")])));
        assert!(!matches_selector(&l, &selector(&[("app", "web"), ("zone", "a")])));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PolicyStatus::Outdated).unwrap(),
            "\"outdated\""
        );
        assert_eq!(PolicyStatus::parse("latest"), Some(PolicyStatus::Latest));
        assert_eq!(PolicyStatus::parse("stale"), None);
    }
}
