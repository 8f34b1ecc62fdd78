use dagcore::{shape_map, DagError, Edge, Node, NodeType, Providers, Shape, Workflow};
use dagnodes::{standard_registry, RhaiExpressionEngine};
use dagruntime::{
    available_data, plan_graph, validate_graph, DagRuntime, RuntimeConfig, StreamFrame,
};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn engine() -> Arc<RhaiExpressionEngine> {
    Arc::new(RhaiExpressionEngine::new())
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn runtime() -> DagRuntime {
    let config = RuntimeConfig {
        stream_poll: Duration::from_millis(50),
        ..RuntimeConfig::default()
    };
    DagRuntime::new(config, standard_registry(engine()), Providers::new(engine()))
}

/// map -> if_else -> (pass | fail) -> merge -> return
fn grading_workflow() -> Workflow {
    let mut wf = Workflow::new(10, "grading");
    wf.add_node(Node::new(1, NodeType::Map).with_meta("mapping", json!({"score": "exam.score", "student": "name"})));
    wf.add_node(Node::new(2, NodeType::IfElse).with_meta("predicate", "score >= 5"));
    wf.add_node(Node::new(3, NodeType::Map).with_meta("mapping", json!({"verdict": "\"pass\""})));
    wf.add_node(Node::new(4, NodeType::Map).with_meta("mapping", json!({"verdict": "\"fail\""})));
    wf.add_node(Node::new(5, NodeType::Merge).with_meta("expected_parents", 2));
    wf.add_node(
        Node::new(6, NodeType::Return)
            .with_meta("payload_selector", "merged_data.verdict")
            .with_meta("status_code", 200),
    );
    wf.connect(1, 2);
    wf.connect_branch(2, 3, "true");
    wf.connect_branch(2, 4, "false");
    wf.connect(3, 5);
    wf.connect(4, 5);
    wf.connect(5, 6);
    wf
}

#[test]
fn branching_graph_is_valid() {
    let wf = grading_workflow();
    let result = validate_graph(&wf.nodes, &wf.edges);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let position = |id| result.topo_order.iter().position(|&n| n == id).unwrap();
    for edge in &wf.edges {
        assert!(position(edge.parent_id) < position(edge.child_id));
    }
}

#[test]
fn bad_branch_label_is_reported_once() {
    let mut wf = grading_workflow();
    wf.edges[1] = Edge::labeled(2, 3, "maybe");
    let result = validate_graph(&wf.nodes, &wf.edges);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("If-else node 2"));
    assert!(result.topo_order.is_empty());
}

#[test]
fn lone_return_node() {
    let nodes = vec![Node::new(1, NodeType::Return)];
    let result = validate_graph(&nodes, &[]);
    assert_eq!(result.errors, vec!["Return node 1 has no incoming edges".to_string()]);

    let services = standard_registry(engine());
    let start = shape_map([("x", Shape::string())]);
    let plan = plan_graph(&nodes, &[], &start, &services);
    assert_eq!(plan[0].input_shape, start);
    assert_eq!(plan[0].output_shape, start);
}

#[test]
fn plan_uses_service_shapes() {
    let wf = grading_workflow();
    let services = standard_registry(engine());
    let start = shape_map([("exam", Shape::object()), ("name", Shape::string())]);
    let plan = plan_graph(&wf.nodes, &wf.edges, &start, &services);

    let step = |id| plan.iter().find(|s| s.node_id == id).unwrap();
    assert_eq!(step(1).output_shape["score"], Shape::unknown());
    assert_eq!(step(2).output_shape["condition_result"], Shape::boolean());
    assert_eq!(step(5).output_shape["merged_data"], Shape::object());
    assert_eq!(step(6).output_shape, step(6).input_shape);
    assert!(step(5).notes.is_empty());
}

#[test]
fn diamond_available_data_includes_grandparent() {
    let nodes = vec![
        Node::new(1, NodeType::GetApi).with_meta("url", "https://example.com"),
        Node::new(2, NodeType::Job)
            .with_meta("prompt", "p")
            .with_meta("model_name", "m"),
        Node::new(3, NodeType::Guru)
            .with_meta("space", "s")
            .with_meta("query_template", "q"),
        Node::new(4, NodeType::Merge),
    ];
    let edges = vec![Edge::new(1, 2), Edge::new(1, 3), Edge::new(2, 4), Edge::new(3, 4)];
    let available = available_data(&nodes, &edges, &standard_registry(engine()));

    let d = &available[&4];
    assert_eq!(d["status"], Shape::number());
    assert_eq!(d["text"], Shape::string());
    assert_eq!(d["items"], Shape::array());
    assert!(available[&1].is_empty());
}

#[test]
fn metadata_errors_per_type() {
    let services = standard_registry(engine());
    let cases = [
        (NodeType::Job, json!({"prompt": "p"}), "model_name"),
        (NodeType::Embed, json!({"vector_store_id": "", "input_selector": "x"}), "vector_store_id"),
        (NodeType::Guru, json!({"space": "s", "query_template": "q", "top_k": 0}), "top_k"),
        (NodeType::GetApi, json!({"url": "not a url"}), "url"),
        (NodeType::PostApi, json!({"url": "https://x.io", "body_map": {"a": [1]}}), "body_map value at 'a'"),
        (NodeType::VectorQuery, json!({"vector_store_id": "v"}), "query_template"),
        (NodeType::Filter, json!({"items_selector": "rows"}), "where"),
        (NodeType::Map, json!({"mapping": {}}), "mapping cannot be empty"),
        (NodeType::IfElse, json!({"predicate": "a >"}), "predicate"),
        (NodeType::Merge, json!({"expected_parents": 0}), "expected_parents"),
        (NodeType::Return, json!({"payload_selector": "input", "extra": 1}), "Unknown fields in metadata: extra"),
    ];

    for (node_type, metadata, needle) in cases {
        let err = services
            .lookup(node_type)
            .validate(&metadata, None)
            .expect_err(node_type.as_str());
        assert!(
            err.to_string().contains(needle),
            "{}: '{}' does not mention '{}'",
            node_type,
            err,
            needle
        );
    }
}

#[test]
fn unimplemented_types_fail_every_operation() {
    let services = standard_registry(engine());
    let service = services.lookup(NodeType::ForEach);
    let err = service.validate(&json!({}), None).unwrap_err();
    assert_eq!(err.to_string(), "Node service not implemented - validation not available");
    assert!(service.plan(&json!({}), &Default::default(), None).is_err());
}

#[tokio::test]
async fn executes_taken_branch_only() {
    let runtime = runtime();
    let wf = grading_workflow();

    let passed = runtime
        .execute(&wf, inputs(json!({"name": "Ada", "exam": {"score": 7}})))
        .await
        .unwrap();
    assert_eq!(passed.payload, Some(json!("pass")));
    assert_eq!(passed.skipped, vec![4]);
    assert_eq!(passed.outputs[&1]["student"], "Ada");

    let failed = runtime
        .execute(&wf, inputs(json!({"name": "Bo", "exam": {"score": 2}})))
        .await
        .unwrap();
    assert_eq!(failed.payload, Some(json!("fail")));
    assert_eq!(failed.skipped, vec![3]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn invalid_node_metadata_stops_the_run() {
    let runtime = runtime();
    let mut wf = Workflow::new(11, "broken");
    wf.add_node(Node::new(1, NodeType::Map).with_meta("mapping", json!({})));
    wf.add_node(Node::new(2, NodeType::Return).with_meta("payload_selector", "input"));
    wf.connect(1, 2);

    match runtime.execute(&wf, Map::new()).await {
        Err(DagError::Node { node_id, source }) => {
            assert_eq!(node_id, 1);
            assert!(source.is_configuration());
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.payload)),
    }
    runtime.shutdown().await;
}

#[tokio::test]
async fn stream_follows_a_spawned_run() {
    let runtime = runtime();
    runtime.register_workflow(grading_workflow()).await.unwrap();

    let (run_id, handle) = runtime
        .spawn_workflow(10, inputs(json!({"name": "Ada", "exam": {"score": 9}})))
        .await
        .unwrap();
    let frames: Vec<StreamFrame> = runtime.stream(run_id).collect().await;
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.payload, Some(json!("pass")));

    assert!(matches!(frames.last(), Some(StreamFrame::Done { .. })));
    let logs: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::Log(event) => Some(event),
            _ => None,
        })
        .collect();
    let seqs: Vec<u64> = logs.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..logs.len() as u64).collect::<Vec<_>>());
    assert!(logs.iter().any(|e| e.message == "Workflow completed"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn missing_workflow() {
    let runtime = runtime();
    let err = runtime.execute_workflow(404, Map::new()).await.unwrap_err();
    assert!(matches!(err, DagError::WorkflowNotFound(404)));
    runtime.shutdown().await;
}
