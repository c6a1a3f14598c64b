//! Cell values and semantic data types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Semantic type of a data field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Long,
    Decimal,
    Double,
    #[default]
    String,
    Bool,
    DateTime,
    Guid,
    Binary,
}

impl DataType {
    /// Integer types (valid for id based append)
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int | DataType::Long)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int | DataType::Long | DataType::Decimal | DataType::Double
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::DateTime)
    }

    /// Map a native type name (SQL Server, DuckDB or EDM) to a semantic type
    pub fn from_native(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();
        let base = lower
            .trim_start_matches("edm.")
            .split(['(', ' '])
            .next()
            .unwrap_or_default();
        match base {
            "tinyint" | "smallint" | "int" | "integer" | "int16" | "int32" | "byte" | "sbyte"
            | "utinyint" | "usmallint" => DataType::Int,
            "bigint" | "int64" | "long" | "hugeint" | "uinteger" | "ubigint" => DataType::Long,
            "decimal" | "numeric" | "money" | "smallmoney" => DataType::Decimal,
            "float" | "real" | "double" | "single" => DataType::Double,
            "bit" | "bool" | "boolean" => DataType::Bool,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "timestamp"
            | "timestamptz" => DataType::DateTime,
            "uniqueidentifier" | "uuid" | "guid" => DataType::Guid,
            "binary" | "varbinary" | "image" | "blob" | "bytea" => DataType::Binary,
            _ => DataType::String,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Decimal => "decimal",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::DateTime => "datetime",
            DataType::Guid => "guid",
            DataType::Binary => "binary",
        };
        write!(f, "{name}")
    }
}

/// A single cell value
///
/// Values are totally ordered so identity tuples can be sorted and compared
/// position by position. Ordering across variants follows the declaration
/// order; use [`Value::compare`] for numeric comparisons across variants.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal kept in its textual form
    Decimal(String),
    Text(String),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Decimal(_) => 4,
            Value::Text(_) => 5,
            Value::DateTime(_) => 6,
            Value::Guid(_) => 7,
            Value::Binary(_) => 8,
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Decimal(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two values the way a database would
    ///
    /// Returns `None` when either side is NULL or the values are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                let (a, b) = (a.as_f64()?, b.as_f64()?);
                Some(a.total_cmp(&b))
            }
            (a, b) if a.rank() == b.rank() => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Coerce the value to a semantic type, used when reading loosely typed payloads
    pub fn coerce(self, data_type: DataType) -> Value {
        match (data_type, self) {
            (_, Value::Null) => Value::Null,
            (DataType::Int | DataType::Long, Value::Text(s)) => {
                s.trim().parse().map(Value::Int).unwrap_or(Value::Text(s))
            }
            (DataType::Int | DataType::Long, Value::Float(f)) if f.fract() == 0.0 => {
                Value::Int(f as i64)
            }
            (DataType::Double, Value::Int(i)) => Value::Float(i as f64),
            (DataType::Double, Value::Text(s)) => {
                s.trim().parse().map(Value::Float).unwrap_or(Value::Text(s))
            }
            (DataType::Decimal, Value::Int(i)) => Value::Decimal(i.to_string()),
            (DataType::Decimal, Value::Float(f)) => Value::Decimal(f.to_string()),
            (DataType::Decimal, Value::Text(s)) => Value::Decimal(s),
            (DataType::Bool, Value::Int(i)) => Value::Bool(i != 0),
            (DataType::DateTime, Value::Text(s)) => parse_datetime(&s)
                .map(Value::DateTime)
                .unwrap_or(Value::Text(s)),
            (DataType::Guid, Value::Text(s)) => {
                Uuid::parse_str(&s).map(Value::Guid).unwrap_or(Value::Text(s))
            }
            (_, v) => v,
        }
    }
}

/// Parse the date/time notations emitted by SQL and OData backends
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim().trim_end_matches('Z');
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    if let Some(ms) = trimmed
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
        .and_then(|ms| ms.split(['+', '-']).next())
        .and_then(|ms| ms.parse::<i64>().ok())
    {
        return chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc());
    }
    chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(x), Ok(y)) if x != y => x.total_cmp(&y),
                _ => a.cmp(b),
            },
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Guid(a), Value::Guid(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Decimal(v) => match v.parse::<f64>() {
                Ok(f) => f.to_bits().hash(state),
                Err(_) => v.hash(state),
            },
            Value::Text(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::Guid(v) => v.hash(state),
            Value::Binary(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) | Value::Text(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.3f")),
            Value::Guid(v) => write!(f, "{v}"),
            Value::Binary(v) => write!(f, "0x{}", v.iter().map(|b| format!("{b:02X}")).collect::<String>()),
        }
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

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}
