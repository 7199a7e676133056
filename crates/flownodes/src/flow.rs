use async_trait::async_trait;
use flowcore::{
    coerce, overlay, Condition, Node, NodeContext, NodeError, NodeOutput, NodeSpec, Value, ValueMap,
};
use flowruntime::{
    FanOutExecutor, FanOutOptions, IterationResult, NodeFactory, NodeRegistry, NodeTypeInfo,
    PortDefinition,
};
use std::sync::Arc;
use std::time::Duration;

/// Keys an invocation may override through its inputs
const OVERRIDABLE_KEYS: &[&str] = &[
    "items_source",
    "max_iterations",
    "max_concurrency",
    "enable_parallel",
    "timeout_per_item",
    "timeout",
    "enable_break",
    "break_condition",
    "enable_continue",
    "continue_condition",
    "item_key",
    "result_key",
];

const DEFAULT_ITEMS_SOURCE: &str = "items";
const DEFAULT_MAX_ITERATIONS: usize = 100;
const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct LoopSettings {
    items_source: String,
    /// Extra input name the body receives each item under
    item_key: Option<String>,
    max_iterations: usize,
    concurrency: usize,
    item_timeout: Duration,
    timeout: Duration,
    break_condition: Option<Condition>,
    /// Matching items are recorded but left out of `all_results`
    continue_condition: Option<Condition>,
    result_key: Option<String>,
}

impl LoopSettings {
    /// Zero counts and durations fall back to the defaults.
    fn from_config(config: &ValueMap) -> Result<Self, NodeError> {
        let max_concurrency = coerce::usize_or(config, "max_concurrency", 1).max(1);
        let concurrency = if coerce::bool_or(config, "enable_parallel", false) {
            max_concurrency
        } else {
            1
        };

        let break_condition = condition(config, "enable_break", "break_condition")?;
        let continue_condition = condition(config, "enable_continue", "continue_condition")?;

        Ok(Self {
            items_source: coerce::str_opt(config, "items_source")
                .unwrap_or(DEFAULT_ITEMS_SOURCE)
                .to_string(),
            item_key: coerce::str_opt(config, "item_key").map(str::to_string),
            max_iterations: match coerce::usize_or(config, "max_iterations", 0) {
                0 => DEFAULT_MAX_ITERATIONS,
                n => n,
            },
            concurrency,
            item_timeout: non_zero(coerce::secs_or(config, "timeout_per_item", DEFAULT_ITEM_TIMEOUT))
                .unwrap_or(DEFAULT_ITEM_TIMEOUT),
            timeout: non_zero(coerce::secs_or(config, "timeout", DEFAULT_TIMEOUT)).unwrap_or(DEFAULT_TIMEOUT),
            break_condition,
            continue_condition,
            result_key: coerce::str_opt(config, "result_key").map(str::to_string),
        })
    }

    fn options(&self) -> FanOutOptions {
        let options = if self.concurrency > 1 {
            FanOutOptions::parallel(self.concurrency)
        } else {
            FanOutOptions::serial()
        }
        .with_item_timeout(self.item_timeout);

        match self.break_condition.clone() {
            Some(condition) => options.with_break(move |r: &IterationResult| {
                condition.evaluate(judged_value(r))
            }),
            None => options,
        }
    }

    fn skips(&self, result: &IterationResult) -> bool {
        result.success()
            && self
                .continue_condition
                .as_ref()
                .is_some_and(|condition| condition.evaluate(judged_value(result)))
    }
}

/// Reads `condition_key` when `flag` is set; the flag without a condition is
/// a configuration error.
fn condition(config: &ValueMap, flag: &str, condition_key: &str) -> Result<Option<Condition>, NodeError> {
    if !coerce::bool_or(config, flag, false) {
        return Ok(None);
    }
    let raw = config.get(condition_key).ok_or_else(|| {
        NodeError::Configuration(format!("'{}' requires a '{}'", flag, condition_key))
    })?;
    Condition::from_value(raw).map(Some)
}

/// Items without a result are judged on the item itself.
fn judged_value(result: &IterationResult) -> &Value {
    if result.result.is_null() {
        &result.item
    } else {
        &result.result
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Runs a body node once per item of an input array
pub struct LoopNode {
    config: ValueMap,
    body: Option<Arc<dyn Node>>,
}

impl LoopNode {
    pub fn new(config: ValueMap, body: Option<Arc<dyn Node>>) -> Self {
        Self { config, body }
    }
}

#[async_trait]
impl Node for LoopNode {
    fn node_type(&self) -> &str {
        "flow.loop"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let settings = LoopSettings::from_config(&overlay(&self.config, &ctx.inputs, OVERRIDABLE_KEYS))?;

        let mut items = match ctx.inputs.get(&settings.items_source) {
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => return Err(NodeError::MissingInput(settings.items_source)),
        };
        if items.len() > settings.max_iterations {
            ctx.events.warn(format!(
                "Processing the first {} of {} items",
                settings.max_iterations,
                items.len()
            ));
            items.truncate(settings.max_iterations);
        }

        ctx.events.info(format!(
            "Looping over {} items, {} at a time",
            items.len(),
            settings.concurrency
        ));

        let scope = ctx.cancellation.clone().with_timeout(settings.timeout);
        let body = self.body.clone();
        let item_key = settings.item_key.clone();
        let parent = ctx.clone();
        let executor = FanOutExecutor::new(settings.options());
        let report = executor
            .run(&scope, items, move |index, item, item_scope| {
                let body = body.clone();
                let mut inputs = parent.inputs.clone();
                for name in ["item", "current_item"] {
                    inputs.insert(name.to_string(), item.clone());
                }
                for name in ["index", "iteration", "loop_index"] {
                    inputs.insert(name.to_string(), Value::from(index));
                }
                if let Some(key) = &item_key {
                    inputs.insert(key.clone(), item.clone());
                }
                let item_ctx = parent.derive(inputs, item_scope);
                async move {
                    match body {
                        Some(body) => body
                            .execute(item_ctx)
                            .await
                            .map(|output| Value::Object(output.outputs)),
                        None => Ok(item),
                    }
                }
            })
            .await;

        ctx.events.info(format!(
            "Loop {}: {} succeeded, {} failed",
            report.outcome.as_str(),
            report.success_count,
            report.failure_count
        ));

        let mut results = Vec::with_capacity(report.results.len());
        let mut kept = Vec::new();
        let mut skipped = 0usize;
        for result in &report.results {
            let skip = settings.skips(result);
            if skip {
                skipped += 1;
            } else if result.success() {
                kept.push(result.result.clone());
            }
            let mut record = result.to_value();
            if let Value::Object(map) = &mut record {
                map.insert("skipped".to_string(), Value::from(skip));
            }
            results.push(record);
        }

        let output = match &settings.result_key {
            Some(key) => NodeOutput::new().with_output(key.as_str(), kept.clone()),
            None => NodeOutput::new(),
        };
        Ok(output
            .with_output("results", results)
            .with_output("all_results", kept)
            .with_output("skipped_iterations", skipped)
            .with_output("successful_iterations", report.success_count)
            .with_output("failed_iterations", report.failure_count)
            .with_output("total_iterations", report.results.len())
            .with_output("average_processing_time", report.average_duration().as_secs_f64())
            .with_output("total_processing_time", report.total_duration.as_secs_f64())
            .with_output("outcome", report.outcome.as_str())
            .with_counts(report.success_count, report.failure_count))
    }
}

/// Builds loop nodes, resolving the `body` spec through the registry.
pub struct LoopNodeFactory;

impl LoopNodeFactory {
    fn body(raw: &Value, registry: &NodeRegistry) -> Result<Arc<dyn Node>, NodeError> {
        let spec = match raw {
            Value::String(node_type) => NodeSpec::new(node_type.as_str()),
            other => NodeSpec::from_value(other).ok_or_else(|| {
                NodeError::Configuration("'body' must name a node type or be {type, config}".into())
            })?,
        };
        let node = registry.create_node(&spec.node_type, &spec.config)?;
        Ok(Arc::from(node))
    }
}

impl NodeFactory for LoopNodeFactory {
    fn create(&self, config: &ValueMap, registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        LoopSettings::from_config(config)?;

        let body = match config.get("body") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(Self::body(raw, registry)?),
        };
        Ok(Box::new(LoopNode::new(config.clone(), body)))
    }

    fn node_type(&self) -> &str {
        "flow.loop"
    }

    fn metadata(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Run a body node for each item, serially or in parallel".to_string(),
            category: "flow".to_string(),
            inputs: vec![PortDefinition::required("items", "Items to iterate; the port name is configurable")],
            outputs: vec![
                PortDefinition::required("results", "One record per processed item, in input order"),
                PortDefinition::required("all_results", "Outputs of the successful, not skipped items"),
                PortDefinition::optional("skipped_iterations", "Successful items matching the continue condition"),
                PortDefinition::required("successful_iterations", "Count of successful items"),
                PortDefinition::required("failed_iterations", "Count of failed, cancelled or timed out items"),
                PortDefinition::required("total_iterations", "Number of records"),
                PortDefinition::optional("average_processing_time", "Mean seconds per item"),
                PortDefinition::optional("total_processing_time", "Summed seconds across items"),
                PortDefinition::optional("outcome", "completed, cancelled or broke_early"),
            ],
        }
    }
}
