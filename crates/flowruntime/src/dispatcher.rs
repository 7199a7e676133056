use crate::registry::NodeRegistry;
use flowcore::{DispatchError, Node, NodeSpec, ValueMap};
use std::sync::Arc;

/// Resolves type identifiers into ready-to-run node instances.
///
/// Holds nothing but a handle to the registry; constructed nodes belong to
/// the caller.
#[derive(Clone)]
pub struct NodeDispatcher {
    registry: Arc<NodeRegistry>,
}

impl NodeDispatcher {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn create(&self, node_type: &str, config: &ValueMap) -> Result<Box<dyn Node>, DispatchError> {
        instantiate(&self.registry, node_type, config)
    }

    pub fn create_from_spec(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, DispatchError> {
        self.create(&spec.node_type, &spec.config)
    }
}

pub(crate) fn instantiate(
    registry: &NodeRegistry,
    node_type: &str,
    config: &ValueMap,
) -> Result<Box<dyn Node>, DispatchError> {
    // the Arc clone releases the registry lock before the constructor runs
    let factory = registry
        .lookup(node_type)
        .ok_or_else(|| DispatchError::UnknownType(node_type.to_string()))?;

    let node = factory
        .create(config, registry)
        .map_err(|source| DispatchError::InvalidConfig {
            node_type: node_type.to_string(),
            source,
        })?;

    tracing::debug!(node_type, "Created node instance");
    Ok(node)
}
