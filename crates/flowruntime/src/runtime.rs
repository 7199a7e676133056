use crate::{dispatcher::NodeDispatcher, registry::NodeRegistry};
use chrono::Utc;
use flowcore::{
    CancelScope, EventBus, ExecutionEvent, ExecutionId, FlowError, NodeContext, NodeOutput,
    NodeSpec, ValueMap,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main runtime for executing single nodes
pub struct FlowRuntime {
    dispatcher: NodeDispatcher,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            dispatcher: NodeDispatcher::new(registry),
            event_bus,
            config,
        }
    }

    /// Get access to the node registry for registering node types
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &NodeDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build the node described by `spec` and run it once.
    ///
    /// Construction errors are returned as `FlowError::Dispatch`; a failing
    /// node as `FlowError::Node`. The configured node timeout becomes the
    /// deadline of the context.
    pub async fn execute(&self, spec: &NodeSpec, inputs: ValueMap) -> Result<NodeRun, FlowError> {
        self.execute_with(spec, inputs, CancelScope::new()).await
    }

    /// Like [`execute`](Self::execute), under a caller-supplied scope.
    pub async fn execute_with(
        &self,
        spec: &NodeSpec,
        inputs: ValueMap,
        scope: CancelScope,
    ) -> Result<NodeRun, FlowError> {
        let node = self.dispatcher.create_from_spec(spec)?;
        let execution_id = ExecutionId::new_v4();
        let node_id = spec.id;

        let scope = match self.config.node_timeout() {
            Some(timeout) => scope.with_timeout(timeout),
            None => scope,
        };
        let ctx = NodeContext::new(node_id, self.event_bus.create_emitter(execution_id, node_id))
            .with_inputs(inputs)
            .with_cancellation(scope);

        self.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node_id,
            node_type: spec.node_type.clone(),
            timestamp: Utc::now(),
        });

        let start = Instant::now();
        let result = node.execute(ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(mut output) => {
                output.metadata.execution_time_ms = duration_ms;
                tracing::info!("Node {} ({}) completed in {}ms", node_id, spec.node_type, duration_ms);

                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id,
                    outputs: output.outputs.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });

                Ok(NodeRun {
                    execution_id,
                    output,
                })
            }
            Err(e) => {
                tracing::error!("Node {} ({}) failed: {}", node_id, spec.node_type, e);

                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });

                Err(FlowError::Node(e))
            }
        }
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one node execution
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub execution_id: ExecutionId,
    pub output: NodeOutput,
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Deadline applied to every node execution
    pub node_timeout_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            node_timeout_ms: None,
        }
    }
}
