//! Scalar values, executor rows and nested result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Scalar value flowing through filters, rows and results.
///
/// Deserializes from plain JSON scalars. Timestamps are never produced by
/// deserialization (ISO strings stay strings); they compare against strings by
/// parsing them as RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// SQL-style comparison. `None` when either side is NULL or the types
    /// cannot be compared.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::String(b)) => parse_timestamp(b).map(|b| a.cmp(&b)),
            (Value::String(a), Value::Timestamp(b)) => parse_timestamp(a).map(|a| a.cmp(b)),
            _ => None,
        }
    }

    /// Equality under SQL semantics (NULL is never equal to anything).
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order used for sorting: NULLs compare equal to each other and
    /// are positioned by the caller.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        self.compare(other).unwrap_or(Ordering::Equal)
    }

    /// Canonical text used when values act as grouping or stitching keys.
    /// Integral floats share the integer form so `1` and `1.0` meet.
    pub fn key_fragment(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Boolean(b) => format!("b:{}", b),
            Value::Integer(i) => format!("n:{}", i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                format!("n:{}", *f as i64)
            }
            Value::Float(f) => format!("f:{}", f),
            Value::String(s) => format!("s:{}", s),
            Value::Timestamp(t) => format!("t:{}", t.to_rfc3339()),
        }
    }
}

/// Joins several values into one composite key string.
pub fn composite_key<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    values
        .into_iter()
        .map(Value::key_fragment)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A flat row as returned by a [`SqlExecutor`](crate::query::SqlExecutor),
/// keyed by output column name.
pub type Row = BTreeMap<String, Value>;

/// A nested result record.
pub type Record = BTreeMap<String, Node>;

/// One entry of a result record: a scalar, a to-one relation or a to-many
/// relation. A to-one relation without a match is `Node::Value(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Value(Value),
    Object(Record),
    List(Vec<Record>),
}

impl Node {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Node::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Record]> {
        match self {
            Node::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Value(Value::Null))
    }
}

impl From<Value> for Node {
    fn from(v: Value) -> Self {
        Node::Value(v)
    }
}

/// Lifts a flat row into a record holding only scalar nodes.
pub fn row_to_record(row: Row) -> Record {
    row.into_iter().map(|(k, v)| (k, Node::Value(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_null_never_equal() {
        assert!(!Value::Null.sql_eq(&Value::Null));
        assert!(!Value::Null.sql_eq(&Value::Integer(1)));
    }

    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Integer(3).key_fragment(),
            Value::Float(3.0).key_fragment()
        );
    }

    #[test]
    fn test_timestamp_against_string() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = Value::from("2024-06-01T00:00:00Z");
        assert_eq!(Value::Timestamp(ts).compare(&later), Some(Ordering::Less));
    }

    #[test]
    fn test_deserialize_scalars() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[null, true, 7, 1.5, "2024-01-01T00:00:00Z"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Integer(7),
                Value::Float(1.5),
                Value::String("2024-01-01T00:00:00Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_composite_key_distinguishes_types() {
        let a = composite_key([&Value::Integer(1), &Value::from("x")]);
        let b = composite_key([&Value::from("1"), &Value::from("x")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(Value::from("O'Brien").to_string(), "'O''Brien'");
    }
}
