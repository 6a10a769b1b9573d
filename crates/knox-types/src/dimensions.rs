//! Column-level view of dimension tuples.
//!
//! Telemetry events and summary tuples are stored as one column per dimension
//! plus a `dim_hash` column that carries a unique constraint. Backends build
//! their statements from [`Dimensions::COLUMNS`] so both engines agree on the
//! layout without sharing dialect-specific code.

use crate::{BackendError, Table};
use sha2::{Digest, Sha256};

/// A single bound or decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
}

impl SqlValue {
    /// Zero values act as wildcards when a tuple is used as a filter template.
    pub fn is_wildcard(&self) -> bool {
        match self {
            SqlValue::Text(s) => s.is_empty(),
            SqlValue::Int(v) => *v == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Text,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Int,
        }
    }
}

/// A tuple of descriptive fields that identifies one aggregation bucket.
pub trait Dimensions: Sized {
    const TABLE: Table;
    /// Dimension columns in storage order. `values` and `from_values` follow the same order.
    const COLUMNS: &'static [Column];

    fn values(&self) -> Vec<SqlValue>;

    fn from_values(values: Vec<SqlValue>) -> Result<Self, BackendError>;

    /// Hex SHA-256 over the full tuple; the unique key backing atomic upserts.
    fn dim_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for value in self.values() {
            match value {
                SqlValue::Text(s) => {
                    hasher.update([b't']);
                    hasher.update((s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
                SqlValue::Int(v) => {
                    hasher.update([b'i']);
                    hasher.update(v.to_le_bytes());
                }
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Non-wildcard `(column, value)` pairs, for partial-match queries.
    fn filter_values(&self) -> Vec<(&'static str, SqlValue)> {
        Self::COLUMNS
            .iter()
            .zip(self.values())
            .filter(|(_, v)| !v.is_wildcard())
            .map(|(c, v)| (c.name, v))
            .collect()
    }
}

/// Sequential reader used by `Dimensions::from_values` implementations.
pub struct ValueReader {
    values: std::vec::IntoIter<SqlValue>,
}

impl ValueReader {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    pub fn text(&mut self) -> Result<String, BackendError> {
        match self.values.next() {
            Some(SqlValue::Text(s)) => Ok(s),
            Some(SqlValue::Int(v)) => Ok(v.to_string()),
            None => Err(BackendError::Decode("missing text column".to_string())),
        }
    }

    pub fn int(&mut self) -> Result<i64, BackendError> {
        match self.values.next() {
            Some(SqlValue::Int(v)) => Ok(v),
            Some(SqlValue::Text(s)) => s
                .parse()
                .map_err(|_| BackendError::Decode(format!("not an integer: {}", s))),
            None => Err(BackendError::Decode("missing integer column".to_string())),
        }
    }
}
