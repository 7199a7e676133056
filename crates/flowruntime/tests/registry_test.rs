use async_trait::async_trait;
use flowcore::{DispatchError, Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use flowruntime::{FnFactory, NodeDispatcher, NodeFactory, NodeRegistry, NodeTypeInfo};
use std::sync::Arc;

/// Echoes its `tag` configuration
struct TagNode {
    tag: String,
}

#[async_trait]
impl Node for TagNode {
    fn node_type(&self) -> &str {
        "test.tag"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new().with_output("tag", self.tag.clone()))
    }
}

fn tag_constructor(tag: &'static str) -> impl Fn(&ValueMap) -> Result<Box<dyn Node>, NodeError> {
    move |config: &ValueMap| {
        if config.contains_key("reject") {
            return Err(NodeError::Configuration("rejected".to_string()));
        }
        Ok(Box::new(TagNode { tag: tag.to_string() }) as Box<dyn Node>)
    }
}

fn tag_of(node: &dyn Node) -> Value {
    futures::executor::block_on(node.execute(NodeContext::new(
        uuid::Uuid::new_v4(),
        flowcore::EventEmitter::detached(uuid::Uuid::new_v4()),
    )))
    .unwrap()
    .outputs
    .remove("tag")
    .unwrap()
}

#[test]
fn test_register_lookup_and_list() {
    let registry = NodeRegistry::new();
    assert!(registry.is_empty());

    registry.register_fn("test.a", tag_constructor("a"));
    registry.register_fn("test.b", tag_constructor("b"));

    assert!(registry.exists("test.a"));
    assert!(!registry.exists("test.c"));
    assert!(registry.lookup("test.b").is_some());
    assert_eq!(registry.len(), 2);

    let mut types = registry.list_node_types();
    types.sort();
    assert_eq!(types, vec!["test.a".to_string(), "test.b".to_string()]);
}

#[test]
fn test_reregistering_replaces_previous_factory() {
    let registry = NodeRegistry::new();
    assert!(registry.register_fn("test.tag", tag_constructor("old")).is_none());

    let previous = registry.register_fn("test.tag", tag_constructor("new"));
    assert!(previous.is_some(), "Overwrite should hand back the replaced factory");
    assert_eq!(registry.len(), 1);

    let node = registry.create_node("test.tag", &ValueMap::new()).unwrap();
    assert_eq!(tag_of(node.as_ref()), Value::from("new"));
}

#[test]
fn test_metadata_comes_from_factory() {
    let registry = NodeRegistry::new();
    let factory = FnFactory::new("test.tag", tag_constructor("x")).with_info(NodeTypeInfo {
        description: "Tags things".to_string(),
        category: "test".to_string(),
        ..NodeTypeInfo::default()
    });
    registry.register(Arc::new(factory));

    let info = registry.get_metadata("test.tag").unwrap();
    assert_eq!(info.category, "test");
    assert_eq!(info.description, "Tags things");
    assert!(registry.get_metadata("missing").is_none());
}

#[test]
fn test_constructor_rejection_is_invalid_config() {
    let registry = Arc::new(NodeRegistry::new());
    registry.register_fn("test.tag", tag_constructor("x"));
    let dispatcher = NodeDispatcher::new(registry);

    let mut config = ValueMap::new();
    config.insert("reject".to_string(), Value::Bool(true));

    match dispatcher.create("test.tag", &config) {
        Err(DispatchError::InvalidConfig { node_type, source }) => {
            assert_eq!(node_type, "test.tag");
            assert_eq!(source, NodeError::Configuration("rejected".to_string()));
        }
        Err(other) => panic!("Expected InvalidConfig, got {:?}", other),
        Ok(_) => panic!("Expected InvalidConfig, got a node"),
    }
}

/// Factory whose constructor resolves another type through the registry
struct WrapperFactory;

impl NodeFactory for WrapperFactory {
    fn create(&self, _config: &ValueMap, registry: &NodeRegistry) -> Result<Box<dyn Node>, NodeError> {
        registry
            .create_node("test.tag", &ValueMap::new())
            .map_err(NodeError::from)
    }

    fn node_type(&self) -> &str {
        "test.wrapper"
    }
}

#[test]
fn test_constructor_may_reenter_registry() {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(WrapperFactory));

    // nested type missing: surfaces as invalid config of the wrapper
    let err = registry.create_node("test.wrapper", &ValueMap::new()).err().unwrap();
    assert!(matches!(err, DispatchError::InvalidConfig { .. }));

    registry.register_fn("test.tag", tag_constructor("inner"));
    let node = registry.create_node("test.wrapper", &ValueMap::new()).unwrap();
    assert_eq!(tag_of(node.as_ref()), Value::from("inner"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_type_under_concurrent_calls() {
    let registry = Arc::new(NodeRegistry::new());
    registry.register_fn("test.tag", tag_constructor("x"));
    let dispatcher = NodeDispatcher::new(registry.clone());

    let mut handles = Vec::new();
    for i in 0..32 {
        let dispatcher = dispatcher.clone();
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            // interleave writers with the readers
            if i % 8 == 0 {
                registry.register_fn(format!("test.dynamic{}", i), tag_constructor("d"));
            }
            dispatcher.create("nonexistent_type", &ValueMap::new()).err()
        }));
    }

    for handle in handles {
        let err = handle.await.expect("task should not panic");
        assert_eq!(err, Some(DispatchError::UnknownType("nonexistent_type".to_string())));
    }
    assert_eq!(registry.len(), 5);
}
