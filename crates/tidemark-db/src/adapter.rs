//! Driver-agnostic connection contract.
//!
//! Migration bodies only ever see a [`Handle`]; the engine drives
//! transactions through [`Connection`]. Every driver adapter implements
//! both with identical transaction semantics.

use serde::Serialize;
use tidemark_common::{Error, Result};

/// A single SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Integer(i) => Some(*i != 0),
            Value::Text(s) => match s.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row with its column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    fn require(&self, column: &str) -> Result<&Value> {
        self.get(column)
            .ok_or_else(|| Error::Database(format!("column {column:?} missing from result row")))
    }

    pub fn i64(&self, column: &str) -> Result<i64> {
        let value = self.require(column)?;
        value
            .as_i64()
            .ok_or_else(|| Error::Database(format!("column {column:?} is not an integer: {value:?}")))
    }

    pub fn bool(&self, column: &str) -> Result<bool> {
        let value = self.require(column)?;
        value
            .as_bool()
            .ok_or_else(|| Error::Database(format!("column {column:?} is not a boolean: {value:?}")))
    }

    pub fn text(&self, column: &str) -> Result<&str> {
        let value = self.require(column)?;
        value
            .as_str()
            .ok_or_else(|| Error::Database(format!("column {column:?} is not text: {value:?}")))
    }
}

/// Statement execution surface handed to migration bodies.
pub trait Handle {
    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Execute a batch of `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn query_row(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// True when statements are accepted without being applied.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// A handle that also owns transaction control.
pub trait Connection: Handle {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn in_transaction(&self) -> bool;

    /// Narrow to the statement surface given to migration bodies.
    fn as_handle(&mut self) -> &mut dyn Handle;
}
