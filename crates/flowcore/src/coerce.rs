//! Best-effort conversions between [`Value`] variants.
//!
//! Every node, the aggregator and the condition evaluator go through these
//! functions, so "is this a number?" has one answer across the engine. The
//! single failure mode is [`CoercionError`]; callers decide whether that
//! means skip, default, or reject.

use crate::{Value, ValueMap};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce {actual} to {expected}")]
pub struct CoercionError {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl CoercionError {
    fn new(expected: &'static str, value: &Value) -> Self {
        Self {
            expected,
            actual: value.type_name(),
        }
    }
}

/// Numbers and numeric strings. Non-finite results are rejected.
pub fn to_number(value: &Value) -> Result<f64, CoercionError> {
    let n = match value {
        Value::Number(n) => *n,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoercionError::new("number", value))?,
        _ => return Err(CoercionError::new("number", value)),
    };
    if n.is_finite() {
        Ok(n)
    } else {
        Err(CoercionError::new("number", value))
    }
}

/// Non-negative whole count; fractional numbers are truncated.
pub fn to_usize(value: &Value) -> Result<usize, CoercionError> {
    let n = to_number(value)?;
    if n < 0.0 {
        return Err(CoercionError::new("non-negative integer", value));
    }
    Ok(n as usize)
}

pub fn to_bool(value: &Value) -> Result<bool, CoercionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            _ => Err(CoercionError::new("bool", value)),
        },
        _ => Err(CoercionError::new("bool", value)),
    }
}

/// Display form of a value. Never fails; composites render as JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

/// Seconds, as a number or numeric string. Negative values and values too
/// large for a `Duration` are rejected.
pub fn to_duration_secs(value: &Value) -> Result<Duration, CoercionError> {
    let secs = to_number(value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| CoercionError::new("non-negative seconds", value))
}

/// `map[key]` as a count, or `default` when absent or not coercible.
pub fn usize_or(map: &ValueMap, key: &str, default: usize) -> usize {
    map.get(key)
        .and_then(|v| to_usize(v).ok())
        .unwrap_or(default)
}

pub fn bool_or(map: &ValueMap, key: &str, default: bool) -> bool {
    map.get(key).and_then(|v| to_bool(v).ok()).unwrap_or(default)
}

pub fn secs_or(map: &ValueMap, key: &str, default: Duration) -> Duration {
    map.get(key)
        .and_then(|v| to_duration_secs(v).ok())
        .unwrap_or(default)
}

/// Non-empty string at `map[key]`.
pub fn str_opt<'a>(map: &'a ValueMap, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
