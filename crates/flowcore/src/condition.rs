use crate::{coerce, NodeError, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Structured predicate: `{ "field": "status", "operator": "eq", "value": "done" }`.
///
/// `field` is a dotted path into the subject; without it the subject itself
/// is compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(default)]
    pub field: Option<String>,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    Contains,
    Exists,
    NotExists,
    Truthy,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: Some(field.into()),
            operator,
            value: value.into(),
        }
    }

    /// Parses a condition out of node configuration.
    pub fn from_value(value: &Value) -> Result<Self, NodeError> {
        serde_json::from_value(value.to_json())
            .map_err(|e| NodeError::Configuration(format!("invalid condition: {}", e)))
    }

    pub fn evaluate(&self, subject: &Value) -> bool {
        let target = match &self.field {
            Some(path) => subject.pointer(path),
            None => Some(subject),
        };

        match self.operator {
            Operator::Exists => target.is_some_and(|v| !v.is_null()),
            Operator::NotExists => target.map_or(true, Value::is_null),
            Operator::Truthy => target.is_some_and(|v| coerce::to_bool(v).unwrap_or(false)),
            Operator::Eq => target.is_some_and(|v| loosely_equal(v, &self.value)),
            Operator::Ne => !target.is_some_and(|v| loosely_equal(v, &self.value)),
            Operator::Contains => target.is_some_and(|v| contains(v, &self.value)),
            Operator::Gt => compare(target, &self.value) == Some(Ordering::Greater),
            Operator::Lt => compare(target, &self.value) == Some(Ordering::Less),
            Operator::Gte => matches!(
                compare(target, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lte => matches!(
                compare(target, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (coerce::to_number(left), coerce::to_number(right)) {
        (Ok(a), Ok(b)) => a == b,
        _ => left.canonical() == right.canonical(),
    }
}

fn compare(left: Option<&Value>, right: &Value) -> Option<Ordering> {
    let left = left?;
    match (coerce::to_number(left), coerce::to_number(right)) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&coerce::to_text(needle)),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}
