use core::fmt;

use polars::prelude::*;
use serde_json::Value;

/// A single cell of an API response.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&Value> for FieldValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, ""),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Builds one column from heterogeneous cells, picking the narrowest type
/// that holds every non-null value.
pub(crate) fn series_from_values(name: &str, values: &[FieldValue]) -> Series {
    let non_null = || values.iter().filter(|v| !v.is_null());

    if non_null().all(|v| matches!(v, FieldValue::Int(_))) {
        let col: Vec<Option<i64>> = values.iter().map(|v| v.as_i64()).collect();
        Series::new(name.into(), col)
    } else if non_null().all(|v| matches!(v, FieldValue::Int(_) | FieldValue::Float(_))) {
        let col: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
        Series::new(name.into(), col)
    } else if non_null().all(|v| matches!(v, FieldValue::Bool(_))) {
        let col: Vec<Option<bool>> = values
            .iter()
            .map(|v| match v {
                FieldValue::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        Series::new(name.into(), col)
    } else {
        let col: Vec<Option<String>> = values
            .iter()
            .map(|v| (!v.is_null()).then(|| v.to_string()))
            .collect();
        Series::new(name.into(), col)
    }
}
