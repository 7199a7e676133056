use crate::data::{self, AggregateMethod, DedupeKey, KeepPolicy};
use async_trait::async_trait;
use flowcore::{coerce, Node, NodeContext, NodeError, NodeOutput, Row, Value, ValueMap};
use flowruntime::{NodeFactory, NodeRegistry, NodeTypeInfo, PortDefinition};

/// Object elements of the `rows` input. Other elements are skipped with a
/// warning.
fn rows_input(ctx: &NodeContext) -> Result<Vec<Row>, NodeError> {
    let value = ctx.require_input("rows")?;
    let items = value.as_array().ok_or_else(|| NodeError::InvalidInputType {
        field: "rows".to_string(),
        expected: "array".to_string(),
        actual: value.type_name().to_string(),
    })?;

    let rows: Vec<Row> = items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect();
    if rows.len() < items.len() {
        ctx.events
            .warn(format!("Skipped {} rows that are not objects", items.len() - rows.len()));
    }
    Ok(rows)
}

fn rows_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// Aggregates one field over the input rows, optionally per group
pub struct AggregateNode {
    method: AggregateMethod,
    field: String,
    group_by: Option<String>,
}

impl AggregateNode {
    pub fn new(method: AggregateMethod, field: impl Into<String>) -> Self {
        Self {
            method,
            field: field.into(),
            group_by: None,
        }
    }

    pub fn with_group_by(mut self, key_field: impl Into<String>) -> Self {
        self.group_by = Some(key_field.into());
        self
    }

    fn from_config(config: &ValueMap) -> Result<Self, NodeError> {
        let operation = coerce::str_opt(config, "operation")
            .ok_or_else(|| NodeError::Configuration("Missing 'operation' config".into()))?;

        let method = if operation.eq_ignore_ascii_case("percentile") {
            let p = config
                .get("percentile")
                .and_then(|v| coerce::to_number(v).ok())
                .ok_or_else(|| {
                    NodeError::Configuration("'percentile' operation requires a 'percentile' value".into())
                })?;
            format!("percentile:{}", p).parse::<AggregateMethod>()?
        } else {
            operation.parse::<AggregateMethod>()?
        };

        let field = match coerce::str_opt(config, "field") {
            Some(field) => field.to_string(),
            None if !method.needs_field() => "count".to_string(),
            None => {
                return Err(NodeError::Configuration(format!(
                    "Missing 'field' config for '{}'",
                    method
                )))
            }
        };

        let node = Self::new(method, field);
        Ok(match coerce::str_opt(config, "group_by") {
            Some(key_field) => node.with_group_by(key_field),
            None => node,
        })
    }
}

#[async_trait]
impl Node for AggregateNode {
    fn node_type(&self) -> &str {
        "data.aggregate"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let rows = rows_input(&ctx)?;

        let result = match &self.group_by {
            Some(key_field) => rows_value(data::group_by(&rows, key_field, &self.field, self.method)?),
            None => self.method.apply(&rows, &self.field)?,
        };

        Ok(NodeOutput::new()
            .with_output("result", result)
            .with_output("row_count", rows.len()))
    }
}

pub struct AggregateNodeFactory;

impl NodeFactory for AggregateNodeFactory {
    fn create(&self, config: &ValueMap, _registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(AggregateNode::from_config(config)?))
    }

    fn node_type(&self) -> &str {
        "data.aggregate"
    }

    fn metadata(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Sum, average, min, max, count, median or percentile of a field".to_string(),
            category: "data".to_string(),
            inputs: vec![PortDefinition::required("rows", "Array of objects")],
            outputs: vec![
                PortDefinition::required("result", "Aggregate value, or one row per group"),
                PortDefinition::required("row_count", "Number of rows considered"),
            ],
        }
    }
}

/// Drops duplicate rows
pub struct DedupeNode {
    key: DedupeKey,
    keep: KeepPolicy,
}

impl DedupeNode {
    pub fn new(key: DedupeKey, keep: KeepPolicy) -> Self {
        Self { key, keep }
    }

    fn from_config(config: &ValueMap) -> Result<Self, NodeError> {
        let keep = match coerce::str_opt(config, "keep") {
            Some(keep) => keep.parse::<KeepPolicy>().map_err(NodeError::Configuration)?,
            None => KeepPolicy::default(),
        };

        let key = if let Some(field) = coerce::str_opt(config, "key") {
            DedupeKey::Field(field.to_string())
        } else if let Some(fields) = config.get("keys") {
            let fields = fields
                .as_array()
                .and_then(|items| {
                    items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                })
                .filter(|fields| !fields.is_empty())
                .ok_or_else(|| {
                    NodeError::Configuration("'keys' must be a non-empty array of field names".into())
                })?;
            DedupeKey::Fields(fields)
        } else {
            match coerce::str_opt(config, "strategy") {
                None | Some("hash") => DedupeKey::Row,
                Some(other) => {
                    return Err(NodeError::Configuration(format!(
                        "Unknown dedupe strategy '{}'",
                        other
                    )))
                }
            }
        };

        Ok(Self::new(key, keep))
    }
}

#[async_trait]
impl Node for DedupeNode {
    fn node_type(&self) -> &str {
        "data.dedupe"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let rows = rows_input(&ctx)?;
        let kept = data::dedupe(&rows, &self.key, self.keep);
        let removed = rows.len() - kept.len();
        if removed > 0 {
            ctx.events.info(format!("Removed {} duplicate rows", removed));
        }

        Ok(NodeOutput::new()
            .with_output("count", kept.len())
            .with_output("rows", rows_value(kept))
            .with_output("removed", removed))
    }
}

pub struct DedupeNodeFactory;

impl NodeFactory for DedupeNodeFactory {
    fn create(&self, config: &ValueMap, _registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DedupeNode::from_config(config)?))
    }

    fn node_type(&self) -> &str {
        "data.dedupe"
    }

    fn metadata(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Remove duplicate rows by field, field list or whole-row content".to_string(),
            category: "data".to_string(),
            inputs: vec![PortDefinition::required("rows", "Array of objects")],
            outputs: vec![
                PortDefinition::required("rows", "Rows that were kept, in input order"),
                PortDefinition::required("removed", "Number of rows dropped"),
                PortDefinition::optional("count", "Number of rows kept"),
            ],
        }
    }
}
