use flowcore::{CancelScope, DispatchError, EventEmitter, NodeContext, NodeError, Value, ValueMap};
use flowruntime::NodeRegistry;
use serde_json::json;
use std::time::{Duration, Instant};

fn registry() -> NodeRegistry {
    let registry = NodeRegistry::new();
    flownodes::register_all(&registry);
    registry
}

fn map(value: serde_json::Value) -> ValueMap {
    Value::from(value).as_object().cloned().unwrap_or_default()
}

fn context(inputs: serde_json::Value) -> NodeContext {
    let node_id = uuid::Uuid::new_v4();
    NodeContext::new(node_id, EventEmitter::detached(node_id)).with_inputs(map(inputs))
}

fn records(outputs: &ValueMap) -> Vec<ValueMap> {
    outputs["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().unwrap().clone())
        .collect()
}

#[tokio::test]
async fn test_loop_without_body_passes_items_through() {
    let node = registry()
        .create_node("flow.loop", &ValueMap::new())
        .unwrap();

    let output = node.execute(context(json!({"items": [1, "two", 3]}))).await.unwrap();
    let outputs = output.outputs;

    assert_eq!(outputs["total_iterations"], Value::from(3usize));
    assert_eq!(outputs["successful_iterations"], Value::from(3usize));
    assert_eq!(outputs["failed_iterations"], Value::from(0usize));
    assert_eq!(outputs["outcome"], Value::from("completed"));
    assert_eq!(
        outputs["all_results"],
        Value::from(json!([1, "two", 3]))
    );
    assert_eq!(output.metadata.success_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_body_runs_concurrently_in_order() {
    let config = map(json!({
        "enable_parallel": true,
        "max_concurrency": 5,
        "body": {"type": "time.delay", "config": {"delay_ms": 100}}
    }));
    let node = registry().create_node("flow.loop", &config).unwrap();

    let started = Instant::now();
    let output = node
        .execute(context(json!({"items": [0, 1, 2, 3, 4], "tag": "x"})))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(450), "took {:?}", elapsed);
    let records = records(&output.outputs);
    assert_eq!(records.len(), 5);
    for (position, record) in records.iter().enumerate() {
        assert_eq!(record["index"], Value::from(position));
        assert_eq!(record["success"], Value::Bool(true));
        // the delay node echoes the per-item inputs
        let result = record["result"].as_object().unwrap();
        assert_eq!(result["item"], Value::from(position));
        assert_eq!(result["index"], Value::from(position));
        assert_eq!(result["tag"], Value::from("x"));
    }
}

#[tokio::test]
async fn test_break_condition_stops_the_loop() {
    let config = map(json!({
        "enable_break": true,
        "break_condition": {"field": "status", "operator": "eq", "value": "stop"}
    }));
    let node = registry().create_node("flow.loop", &config).unwrap();

    let items = json!({"items": [
        {"status": "go"}, {"status": "go"}, {"status": "stop"}, {"status": "go"}
    ]});
    let output = node.execute(context(items)).await.unwrap();

    assert_eq!(output.outputs["total_iterations"], Value::from(3usize));
    assert_eq!(output.outputs["outcome"], Value::from("broke_early"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_item_timeout_fails_only_slow_items() {
    let config = map(json!({
        "enable_parallel": true,
        "max_concurrency": 3,
        "timeout_per_item": 0.1,
        "body": {"type": "time.delay", "config": {"delay_ms": 10}}
    }));
    let node = registry().create_node("flow.loop", &config).unwrap();

    let output = node
        .execute(context(json!({"items": [1, 2, 3]})))
        .await
        .unwrap();
    assert_eq!(output.outputs["failed_iterations"], Value::from(0usize));

    let slow = map(json!({
        "timeout_per_item": 0.1,
        "body": {"type": "time.delay", "config": {"delay_ms": 5000}}
    }));
    let node = registry().create_node("flow.loop", &slow).unwrap();
    let started = Instant::now();
    let output = node
        .execute(context(json!({"items": ["a", "b"]})))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    let records = records(&output.outputs);
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record["success"], Value::Bool(false));
        assert_eq!(record["error"], Value::from("timeout"));
    }
}

#[tokio::test]
async fn test_inputs_override_configuration() {
    let config = map(json!({"items_source": "things", "max_iterations": 10}));
    let node = registry().create_node("flow.loop", &config).unwrap();

    let output = node
        .execute(context(json!({
            "rows": [1, 2, 3, 4, 5],
            "items_source": "rows",
            "max_iterations": 2
        })))
        .await
        .unwrap();

    assert_eq!(output.outputs["total_iterations"], Value::from(2usize));
    assert_eq!(output.outputs["all_results"], Value::from(json!([1, 2])));
}

#[tokio::test]
async fn test_single_value_source_is_one_item() {
    let node = registry()
        .create_node("flow.loop", &ValueMap::new())
        .unwrap();
    let output = node.execute(context(json!({"items": "solo"}))).await.unwrap();
    assert_eq!(output.outputs["all_results"], Value::from(json!(["solo"])));
}

#[tokio::test]
async fn test_missing_source_is_missing_input() {
    let node = registry()
        .create_node("flow.loop", &ValueMap::new())
        .unwrap();
    let err = node.execute(context(json!({"other": []}))).await.unwrap_err();
    assert_eq!(err, NodeError::MissingInput("items".to_string()));
}

#[tokio::test]
async fn test_cancelled_loop_reports_every_item() {
    let config = map(json!({"body": {"type": "time.delay", "config": {"delay_ms": 50}}}));
    let node = registry().create_node("flow.loop", &config).unwrap();

    let scope = CancelScope::new();
    let canceller = scope.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        canceller.cancel();
    });

    let output = node
        .execute(context(json!({"items": [1, 2, 3, 4, 5, 6]})).with_cancellation(scope))
        .await
        .unwrap();

    assert_eq!(output.outputs["total_iterations"], Value::from(6usize));
    assert_eq!(output.outputs["outcome"], Value::from("cancelled"));
    let last = &records(&output.outputs)[5];
    assert_eq!(last["error"], Value::from("cancelled"));
}

#[test]
fn test_unknown_body_type_is_rejected_at_construction() {
    let config = map(json!({"body": {"type": "does.not.exist"}}));
    let err = registry().create_node("flow.loop", &config).err().unwrap();
    assert!(matches!(err, DispatchError::InvalidConfig { ref node_type, .. } if node_type == "flow.loop"));
}

#[test]
fn test_break_without_condition_is_rejected() {
    let config = map(json!({"enable_break": true}));
    let err = registry().create_node("flow.loop", &config).err().unwrap();
    assert!(matches!(err, DispatchError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_oversized_timeouts_do_not_panic() {
    let config = map(json!({"timeout": 1e20, "timeout_per_item": 1e20}));
    let node = registry().create_node("flow.loop", &config).unwrap();
    let output = node.execute(context(json!({"items": [1, 2]}))).await.unwrap();
    assert_eq!(output.outputs["successful_iterations"], Value::from(2usize));

    // representable as a duration, but not as an instant
    let node = registry().create_node("flow.loop", &ValueMap::new()).unwrap();
    let output = node
        .execute(context(json!({"items": [1, 2], "timeout": 1e19, "timeout_per_item": 1e19})))
        .await
        .unwrap();
    assert_eq!(output.outputs["successful_iterations"], Value::from(2usize));
    assert_eq!(output.outputs["outcome"], Value::from("completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_huge_concurrency_is_bounded() {
    let config = map(json!({"enable_parallel": true, "max_concurrency": 1e30}));
    let node = registry().create_node("flow.loop", &config).unwrap();
    let output = node
        .execute(context(json!({"items": [1, 2, 3]})))
        .await
        .unwrap();
    assert_eq!(output.outputs["all_results"], Value::from(json!([1, 2, 3])));
}

#[tokio::test]
async fn test_continue_condition_skips_without_stopping() {
    let config = map(json!({
        "enable_continue": true,
        "continue_condition": {"field": "status", "operator": "eq", "value": "skip"},
        "result_key": "kept"
    }));
    let node = registry().create_node("flow.loop", &config).unwrap();

    let items = json!({"items": [
        {"status": "go", "n": 1}, {"status": "skip", "n": 2}, {"status": "go", "n": 3}
    ]});
    let outputs = node.execute(context(items)).await.unwrap().outputs;

    assert_eq!(outputs["total_iterations"], Value::from(3usize));
    assert_eq!(outputs["successful_iterations"], Value::from(3usize));
    assert_eq!(outputs["skipped_iterations"], Value::from(1usize));
    assert_eq!(outputs["outcome"], Value::from("completed"));
    let expected = Value::from(json!([{"status": "go", "n": 1}, {"status": "go", "n": 3}]));
    assert_eq!(outputs["all_results"], expected);
    assert_eq!(outputs["kept"], expected);

    let skipped: Vec<bool> = records(&outputs)
        .iter()
        .map(|r| r["skipped"].as_bool().unwrap())
        .collect();
    assert_eq!(skipped, vec![false, true, false]);
}

#[test]
fn test_continue_without_condition_is_rejected() {
    let config = map(json!({"enable_continue": true}));
    let err = registry().create_node("flow.loop", &config).err().unwrap();
    assert!(matches!(err, DispatchError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_body_sees_iteration_aliases() {
    let config = map(json!({"body": {"type": "time.delay", "config": {"delay_ms": 0}}}));
    let node = registry().create_node("flow.loop", &config).unwrap();
    let outputs = node
        .execute(context(json!({"items": ["a", "b"]})))
        .await
        .unwrap()
        .outputs;

    let second = records(&outputs)[1]["result"].as_object().unwrap().clone();
    assert_eq!(second["current_item"], Value::from("b"));
    assert_eq!(second["iteration"], Value::from(1usize));
    assert_eq!(second["loop_index"], Value::from(1usize));
}
