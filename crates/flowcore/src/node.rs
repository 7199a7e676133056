use crate::{events::EventEmitter, CancelScope, NodeError, Value, ValueMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type NodeId = Uuid;

/// Core trait that all executable nodes implement.
///
/// Instances are built by a factory from an immutable configuration and may
/// be executed many times, concurrently, through `&self`.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "flow.loop", "data.aggregate")
    fn node_type(&self) -> &str;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Unique node instance ID
    pub node_id: NodeId,

    /// Input values for this invocation
    pub inputs: ValueMap,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancellation token and deadline for this invocation
    pub cancellation: CancelScope,
}

impl NodeContext {
    pub fn new(node_id: NodeId, events: EventEmitter) -> Self {
        Self {
            node_id,
            inputs: HashMap::new(),
            events,
            cancellation: CancelScope::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: ValueMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancelScope) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Context for a nested invocation sharing node id and events.
    pub fn derive(&self, inputs: ValueMap, cancellation: CancelScope) -> Self {
        Self {
            node_id: self.node_id,
            inputs,
            events: self.events.clone(),
            cancellation,
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Fails with `Cancelled` once the scope is cancelled or expired.
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.cancellation.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Output from node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: ValueMap,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_counts(mut self, success_count: usize, failure_count: usize) -> Self {
        self.metadata.success_count = success_count;
        self.metadata.failure_count = failure_count;
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight execution statistics attached to every output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub success_count: usize,
    pub failure_count: usize,
    pub custom: ValueMap,
}
