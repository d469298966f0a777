//! Storage cell values and rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A row as stored by a connection: column name -> cell.
pub type Row = BTreeMap<String, SqlValue>;

/// A single storage cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl SqlValue {
    /// Convert a JSON value. Arrays and objects are stored as JSON text.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map(Self::Real).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Convert back to JSON without type knowledge.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Integer(i) => Value::Number((*i).into()),
            Self::Real(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
            Self::Boolean(b) => Value::Bool(*b),
        }
    }

    /// Check for NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Textual form used for primary key indexes.
    #[must_use]
    pub fn key_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(i) => i.to_string(),
            Self::Real(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Boolean(b) => u8::from(*b).to_string(),
        }
    }

    /// SQL comparison. `None` when either side is NULL. Numeric-looking
    /// text compares numerically; booleans compare as integers.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        match (self.numeric(), other.numeric()) {
            (Some(Numeric::Int(a)), Some(Numeric::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => Some(self.key_string().cmp(&other.key_string())),
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Self::Integer(i) => Some(Numeric::Int(*i)),
            Self::Real(f) => Some(Numeric::Real(*f)),
            Self::Boolean(b) => Some(Numeric::Int(i64::from(*b))),
            Self::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Numeric::Int)
                .ok()
                .or_else(|| {
                    s.trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Numeric::Real)
                }),
            Self::Null => None,
        }
    }
}

/// Storage format of `DATETIME` cells.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalize a date-time string to [`DATETIME_FORMAT`].
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and bare
/// dates (midnight). Offsets are converted to UTC.
#[must_use]
pub fn normalize_datetime(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(DATETIME_FORMAT).to_string());
    }
    for format in [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.format(DATETIME_FORMAT).to_string());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
}

/// Current UTC time in [`DATETIME_FORMAT`].
#[must_use]
pub fn now_datetime() -> String {
    Utc::now().format(DATETIME_FORMAT).to_string()
}

#[derive(Clone, Copy)]
enum Numeric {
    Int(i64),
    Real(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Real(f) => f,
        }
    }
}

/// SQL literal rendering.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{}", r),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Boolean(b) => write!(f, "{}", u8::from(*b)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion() {
        assert_eq!(SqlValue::from_json(&json!(3)), SqlValue::Integer(3));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(SqlValue::from_json(&json!([1])), SqlValue::Text("[1]".to_string()));
        assert_eq!(SqlValue::Boolean(true).to_json(), json!(true));
    }

    #[test]
    fn comparisons() {
        assert_eq!(SqlValue::Integer(2).compare(&SqlValue::Real(2.5)), Some(Ordering::Less));
        assert_eq!(SqlValue::Boolean(true).compare(&SqlValue::Integer(1)), Some(Ordering::Equal));
        assert_eq!(
            SqlValue::Text("b".into()).compare(&SqlValue::Text("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(SqlValue::Null.compare(&SqlValue::Null), None);
        assert_eq!(SqlValue::Text("10".into()).compare(&SqlValue::Integer(9)), Some(Ordering::Greater));
    }

    #[test]
    fn datetime_normalization() {
        assert_eq!(
            normalize_datetime("2024-03-01T10:00:00+02:00").as_deref(),
            Some("2024-03-01 08:00:00")
        );
        assert_eq!(normalize_datetime("2024-03-01").as_deref(), Some("2024-03-01 00:00:00"));
        assert_eq!(
            normalize_datetime(" 2024-03-01 12:30:05 ").as_deref(),
            Some("2024-03-01 12:30:05")
        );
        assert!(normalize_datetime("yesterday").is_none());
    }

    #[test]
    fn literal_escaping() {
        assert_eq!(SqlValue::Text("it's".into()).to_string(), "'it''s'");
        assert_eq!(SqlValue::Boolean(false).to_string(), "0");
    }
}
