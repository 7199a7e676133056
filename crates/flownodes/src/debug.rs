use async_trait::async_trait;
use flowcore::{coerce, Node, NodeContext, NodeError, NodeOutput, ValueMap};
use flowruntime::{NodeFactory, NodeRegistry, NodeTypeInfo, PortDefinition};

/// Simple debug node that logs its inputs
pub struct DebugNode {
    label: Option<String>,
}

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .inputs
            .get("message")
            .map(coerce::to_text)
            .or_else(|| self.label.clone())
            .unwrap_or_else(|| "(no message)".to_string());

        ctx.events.info(format!("DEBUG: {}", message));
        tracing::info!(node_id = %ctx.node_id, "{}", message);

        // Also log all inputs for visibility
        let mut keys: Vec<&String> = ctx.inputs.keys().collect();
        keys.sort();
        for key in keys {
            ctx.events.info(format!("  {}: {}", key, coerce::to_text(&ctx.inputs[key])));
        }

        Ok(NodeOutput::new().with_output("message", message))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, config: &ValueMap, _registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode {
            label: coerce::str_opt(config, "label").map(str::to_string),
        }))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("message", "Text to log")],
            outputs: vec![PortDefinition::required("message", "The logged text")],
        }
    }
}
