use crate::{NodeId, Value, ValueMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declarative description of one unit of work: a type identifier plus the
/// configuration handed to its constructor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ValueMap,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_type: node_type.into(),
            name: None,
            config: ValueMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reads a nested `{ "type": ..., "config": {...} }` value, as used for
    /// the body of iterating nodes.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let node_type = map.get("type")?.as_str()?;
        let config = map
            .get("config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut spec = NodeSpec::new(node_type);
        spec.config = config;
        spec.name = map.get("name").and_then(Value::as_str).map(str::to_string);
        Some(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_plain_json() {
        let spec: NodeSpec = serde_json::from_value(json!({
            "type": "data.aggregate",
            "config": {"operation": "sum", "field": "amount"}
        }))
        .unwrap();

        assert_eq!(spec.node_type, "data.aggregate");
        assert_eq!(spec.config.get("field"), Some(&Value::from("amount")));
        assert!(spec.name.is_none());
    }

    #[test]
    fn reads_nested_body() {
        let body = Value::from(json!({"type": "time.delay", "config": {"delay_ms": 5}}));
        let spec = NodeSpec::from_value(&body).unwrap();
        assert_eq!(spec.node_type, "time.delay");
        assert_eq!(spec.config.get("delay_ms"), Some(&Value::from(5i64)));
        assert!(NodeSpec::from_value(&Value::from("time.delay")).is_none());
    }
}
