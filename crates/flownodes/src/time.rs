use async_trait::async_trait;
use flowcore::{coerce, overlay, Node, NodeContext, NodeError, NodeOutput, ValueMap};
use flowruntime::{NodeFactory, NodeRegistry, NodeTypeInfo, PortDefinition};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

fn delay_ms(settings: &ValueMap) -> Result<u64, NodeError> {
    match settings.get("delay_ms") {
        None => Ok(DEFAULT_DELAY_MS),
        Some(value) => coerce::to_usize(value)
            .map(|ms| ms as u64)
            .map_err(|e| NodeError::invalid_input("delay_ms", "non-negative milliseconds", &e)),
    }
}

/// Delay execution for a specified duration
pub struct DelayNode {
    config: ValueMap,
}

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = delay_ms(&overlay(&self.config, &ctx.inputs, &["delay_ms"]))?;
        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through any inputs
        Ok(NodeOutput {
            outputs: ctx.inputs,
            metadata: flowcore::NodeMetadata::default(),
        })
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, config: &ValueMap, _registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        delay_ms(config).map_err(|e| NodeError::Configuration(e.to_string()))?;
        Ok(Box::new(DelayNode {
            config: config.clone(),
        }))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![PortDefinition::optional("delay_ms", "Overrides the configured delay")],
            outputs: vec![],
        }
    }
}
