//! Tabular datasets exchanged with the store
//!
//! A [`Table`] is an ordered set of named columns and a list of rows. Rows
//! may carry an experiment id as their index: measure writes require it,
//! parameter writes ignore it, and every read sets it.

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Scope-unique experiment identifier
pub type ExperimentId = i64;

/// Origin of a measure value: `0` is the core model, anything else a metamodel id
pub type SourceId = u32;

/// Source id reserved for the original (core) model
pub const CORE_MODEL_SOURCE: SourceId = 0;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or a float SQLite cannot keep (NaN is stored as NULL)
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the value; booleans count as 0/1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Null | Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality used for experiment lookup: numbers compare by value
    /// regardless of their storage class.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
            Value::Int(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(i) => Ok(Value::Int(i)),
            ValueRef::Real(f) => Ok(Value::Float(f)),
            ValueRef::Text(t) => std::str::from_utf8(t)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// One row of a [`Table`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub experiment_id: Option<ExperimentId>,
    pub values: Vec<Value>,
}

/// Ordered set of named columns with one value per column per row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

/// Deserialized form of a [`Table`] before its row widths are checked
#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<TableRow>,
}

impl TryFrom<RawTable> for Table {
    type Error = StorageError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        let mut table = Table::new(raw.columns);
        for row in raw.rows {
            table.push(row.experiment_id, row.values)?;
        }
        Ok(table)
    }
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Single-row table built from a name → value mapping
    pub fn from_record(record: &BTreeMap<String, Value>) -> Self {
        Self {
            columns: record.keys().cloned().collect(),
            rows: vec![TableRow {
                experiment_id: None,
                values: record.values().cloned().collect(),
            }],
        }
    }

    /// Append an unindexed row
    pub fn push_row(&mut self, values: Vec<Value>) -> StorageResult<()> {
        self.push(None, values)
    }

    /// Append a row indexed by experiment id
    pub fn push_indexed(&mut self, id: ExperimentId, values: Vec<Value>) -> StorageResult<()> {
        self.push(Some(id), values)
    }

    fn push(&mut self, experiment_id: Option<ExperimentId>, values: Vec<Value>) -> StorageResult<()> {
        if values.len() != self.columns.len() {
            return Err(StorageError::invalid(format!(
                "row has {} values but table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(TableRow { experiment_id, values });
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at row position `row` in column `column`
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.values.get(idx))
    }

    /// Value for the row indexed by `id` in column `column`
    pub fn value(&self, id: ExperimentId, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.row_by_id(id).and_then(|r| r.values.get(idx))
    }

    pub fn row_by_id(&self, id: ExperimentId) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.experiment_id == Some(id))
    }

    /// Experiment ids of the indexed rows, in row order
    pub fn ids(&self) -> Vec<ExperimentId> {
        self.rows.iter().filter_map(|r| r.experiment_id).collect()
    }

    /// Row at position `row` as a column → value mapping
    pub fn record(&self, row: usize) -> Option<BTreeMap<&str, &Value>> {
        self.rows.get(row).map(|r| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(r.values.iter())
                .collect()
        })
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [TableRow] {
        &mut self.rows
    }
}
