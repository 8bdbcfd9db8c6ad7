//! Field types and typed row values.
//!
//! A [`Value`] is one cell of a [`Row`](crate::row::Row). Its runtime variant
//! normally matches the [`FieldType`] declared by the schema at the same
//! position; [`Value::Null`] is valid for every type.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Timestamp,
}

impl FieldType {
    /// Wire-format name, as used in pipeline YAML.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
        }
    }

    /// Whether values of this type compare numerically.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed cell of a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

/// Failure converting a literal into a typed [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert {literal} to {expected}")]
pub struct ConversionError {
    pub literal: String,
    pub expected: FieldType,
}

impl Value {
    /// Runtime type of this value, `None` for [`Value::Null`].
    #[must_use]
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(FieldType::Boolean),
            Self::Integer(_) => Some(FieldType::Integer),
            Self::Number(_) => Some(FieldType::Number),
            Self::String(_) => Some(FieldType::String),
            Self::Timestamp(_) => Some(FieldType::Timestamp),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(v) => Some(*v as f64),
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a JSON/YAML literal into a value of the requested type.
    ///
    /// Strings are parsed when the target type is not `string`, so pipeline
    /// files may quote numbers or timestamps freely.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] when the literal cannot represent `ty`.
    pub fn from_json(literal: &serde_json::Value, ty: FieldType) -> Result<Self, ConversionError> {
        let fail = || ConversionError {
            literal: literal.to_string(),
            expected: ty,
        };
        if literal.is_null() {
            return Ok(Self::Null);
        }
        match ty {
            FieldType::String => Ok(Self::String(match literal {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            FieldType::Integer => match literal {
                serde_json::Value::Number(n) => n.as_i64().map(Self::Integer).ok_or_else(fail),
                serde_json::Value::String(s) => {
                    s.trim().parse().map(Self::Integer).map_err(|_| fail())
                }
                _ => Err(fail()),
            },
            FieldType::Number => match literal {
                serde_json::Value::Number(n) => n.as_f64().map(Self::Number).ok_or_else(fail),
                serde_json::Value::String(s) => {
                    s.trim().parse().map(Self::Number).map_err(|_| fail())
                }
                _ => Err(fail()),
            },
            FieldType::Boolean => match literal {
                serde_json::Value::Bool(b) => Ok(Self::Boolean(*b)),
                serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "y" | "yes" => Ok(Self::Boolean(true)),
                    "false" | "n" | "no" => Ok(Self::Boolean(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            FieldType::Timestamp => match literal {
                serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|ts| Self::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
        }
    }

    /// Rank used when two values of unrelated types meet in a comparison.
    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Number(_) => 2,
            Self::String(_) => 3,
            Self::Timestamp(_) => 4,
        }
    }

    /// Total order over values.
    ///
    /// Null sorts first, integers and floats compare numerically, and values of
    /// unrelated types fall back to a fixed type rank
    /// (null < boolean < number < string < timestamp).
    #[must_use]
    pub fn compare(&self, other: &Self, case_insensitive: bool) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => {
                if case_insensitive {
                    a.to_lowercase().cmp(&b.to_lowercase())
                } else {
                    a.cmp(b)
                }
            }
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.type_rank().cmp(&b.type_rank()),
            },
        }
    }

    /// Feed a process-stable hash of this value into `state`.
    ///
    /// Used for hash partitioning; floats hash by bit pattern.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Self::Null => {}
            Self::Boolean(v) => v.hash(state),
            Self::Integer(v) => v.hash(state),
            Self::Number(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
            Self::Timestamp(v) => v.timestamp_nanos_opt().unwrap_or_default().hash(state),
        }
    }

    /// JSON rendering of this value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(v) => serde_json::Value::Bool(*v),
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Number(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(v) => serde_json::Value::String(v.clone()),
            Self::Timestamp(v) => serde_json::Value::String(v.to_rfc3339()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<null>"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Timestamp(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_parses_quoted_numbers() {
        assert_eq!(
            Value::from_json(&json!("42"), FieldType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::from_json(&json!(1.5), FieldType::Number).unwrap(),
            Value::Number(1.5)
        );
    }

    #[test]
    fn from_json_null_is_valid_for_every_type() {
        for ty in [
            FieldType::String,
            FieldType::Integer,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Timestamp,
        ] {
            assert_eq!(Value::from_json(&json!(null), ty).unwrap(), Value::Null);
        }
    }

    #[test]
    fn from_json_rejects_wrong_literal() {
        let err = Value::from_json(&json!("abc"), FieldType::Integer).unwrap_err();
        assert_eq!(err.expected, FieldType::Integer);
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn from_json_timestamp_rfc3339() {
        let v = Value::from_json(&json!("2026-01-15T10:30:00Z"), FieldType::Timestamp).unwrap();
        assert_eq!(v.field_type(), Some(FieldType::Timestamp));
    }

    #[test]
    fn compare_null_sorts_first() {
        assert_eq!(
            Value::Null.compare(&Value::Integer(i64::MIN), false),
            Ordering::Less
        );
    }

    #[test]
    fn compare_mixed_numeric() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Number(2.5), false),
            Ordering::Less
        );
        assert_eq!(
            Value::Number(3.0).compare(&Value::Integer(3), false),
            Ordering::Equal
        );
    }

    #[test]
    fn compare_case_insensitive_strings() {
        let a = Value::from("apple");
        let b = Value::from("APPLE");
        assert_ne!(a.compare(&b, false), Ordering::Equal);
        assert_eq!(a.compare(&b, true), Ordering::Equal);
    }

    #[test]
    fn compare_unrelated_types_uses_rank() {
        assert_eq!(
            Value::from("x").compare(&Value::Integer(10), false),
            Ordering::Greater
        );
        assert_eq!(
            Value::Boolean(true).compare(&Value::Integer(0), false),
            Ordering::Less
        );
    }

    #[test]
    fn value_serializes_untagged() {
        let json = serde_json::to_value(vec![Value::Integer(1), Value::Null, Value::from("a")])
            .unwrap();
        assert_eq!(json, json!([1, null, "a"]));
    }
}
