use crate::dispatcher;
use flowcore::{DispatchError, Node, NodeError, ValueMap};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with given configuration.
    ///
    /// The registry is passed along so composite nodes can resolve the
    /// node types they wrap.
    fn create(&self, config: &ValueMap, registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, input/output ports)
    fn metadata(&self) -> NodeTypeInfo {
        NodeTypeInfo::default()
    }
}

/// Descriptive metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeTypeInfo {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeTypeInfo {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

type Constructor = dyn Fn(&ValueMap) -> Result<Box<dyn Node>, NodeError> + Send + Sync;

/// Factory backed by a plain constructor closure.
pub struct FnFactory {
    node_type: String,
    info: NodeTypeInfo,
    constructor: Box<Constructor>,
}

impl FnFactory {
    pub fn new<F>(node_type: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ValueMap) -> Result<Box<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        Self {
            node_type: node_type.into(),
            info: NodeTypeInfo::default(),
            constructor: Box::new(constructor),
        }
    }

    pub fn with_info(mut self, info: NodeTypeInfo) -> Self {
        self.info = info;
        self
    }
}

impl NodeFactory for FnFactory {
    fn create(&self, config: &ValueMap, _registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        (self.constructor)(config)
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn metadata(&self) -> NodeTypeInfo {
        self.info.clone()
    }
}

/// Registry of available node types.
///
/// Readers share the lock; a writer holds it only for its own insert. The
/// lock is released before any constructor runs, so constructors may call
/// back into the registry.
///
/// Registering an identifier that already exists replaces the previous
/// factory; the last registration wins.
pub struct NodeRegistry {
    factories: RwLock<HashMap<String, Arc<dyn NodeFactory>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a node factory, returning the one it replaced.
    pub fn register(&self, factory: Arc<dyn NodeFactory>) -> Option<Arc<dyn NodeFactory>> {
        let node_type = factory.node_type().to_string();
        let previous = self.write().insert(node_type.clone(), factory);
        if previous.is_some() {
            tracing::warn!("Replacing node type: {}", node_type);
        } else {
            tracing::info!("Registering node type: {}", node_type);
        }
        previous
    }

    /// Register a constructor closure under `node_type`.
    pub fn register_fn<F>(&self, node_type: impl Into<String>, constructor: F) -> Option<Arc<dyn NodeFactory>>
    where
        F: Fn(&ValueMap) -> Result<Box<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFactory::new(node_type, constructor)))
    }

    pub fn lookup(&self, node_type: &str) -> Option<Arc<dyn NodeFactory>> {
        self.read().get(node_type).cloned()
    }

    pub fn exists(&self, node_type: &str) -> bool {
        self.read().contains_key(node_type)
    }

    /// Create a node instance from a node type and config
    pub fn create_node(&self, node_type: &str, config: &ValueMap) -> Result<Box<dyn Node>, DispatchError> {
        dispatcher::instantiate(self, node_type, config)
    }

    /// Get all registered node types, sorted for display
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeTypeInfo> {
        self.lookup(node_type).map(|f| f.metadata())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-written: the
    // only mutation is a single insert.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn NodeFactory>>> {
        self.factories.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn NodeFactory>>> {
        self.factories.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
