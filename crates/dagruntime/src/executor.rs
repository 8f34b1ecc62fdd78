use crate::graph::GraphModel;
use crate::registry::NodeServiceRegistry;
use crate::runs::{RunLogger, RunRegistry};
use crate::validate::validate_graph;
use dagcore::{
    DagError, ExecutionError, Node, NodeContext, NodeError, NodeId, NodeOutput, NodeType, OnError,
    Providers, RunEvent, RunId, Workflow,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};

/// Runs a workflow's nodes one at a time in topological order.
pub struct WorkflowExecutor {
    default_timeout: Duration,
}

impl WorkflowExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Execute `workflow` inside the already created run `run_id`.
    ///
    /// Progress goes to the run registry; the run is finished whatever the
    /// outcome.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        services: &NodeServiceRegistry,
        providers: &Providers,
        runs: &Arc<RunRegistry>,
        run_id: RunId,
        inputs: Map<String, Value>,
    ) -> Result<ExecutionResult, DagError> {
        let logger = RunLogger::new(runs.clone(), run_id);
        let started = Instant::now();

        tracing::info!("Starting workflow execution: {} (run {})", workflow.id, run_id);
        logger.log(
            RunEvent::info(format!("Starting workflow '{}'", workflow.name))
                .with_data("workflow_id", workflow.id),
        );

        let result = self
            .execute_dag(workflow, services, providers, &logger, inputs)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match result {
            Ok(mut done) => {
                done.duration_ms = duration_ms;
                tracing::info!("Workflow {} completed in {}ms", workflow.id, duration_ms);
                logger.log(
                    RunEvent::info("Workflow completed")
                        .with_data("duration_ms", duration_ms)
                        .with_data("executed", done.outputs.len()),
                );
                Ok(done)
            }
            Err(e) => {
                tracing::error!("Workflow {} failed: {}", workflow.id, e);
                logger.error_with("Workflow failed", &e);
                Err(e)
            }
        };

        logger.finish();
        result
    }

    async fn execute_dag(
        &self,
        workflow: &Workflow,
        services: &NodeServiceRegistry,
        providers: &Providers,
        logger: &RunLogger,
        inputs: Map<String, Value>,
    ) -> Result<ExecutionResult, DagError> {
        let validation = validate_graph(&workflow.nodes, &workflow.edges);
        for warning in &validation.warnings {
            logger.warn(warning.clone());
        }
        if !validation.is_valid() {
            for error in &validation.errors {
                logger.error(error.clone());
            }
            return Err(DagError::Invalid(validation.errors));
        }

        let graph = GraphModel::new(&workflow.nodes, &workflow.edges);
        let mut result = ExecutionResult {
            run_id: logger.run_id(),
            ..ExecutionResult::default()
        };

        for id in validation.topo_order {
            let Some(node) = graph.node(id) else { continue };

            let node_inputs = if graph.in_degree(id) == 0 {
                inputs.clone()
            } else {
                match self.collect_node_inputs(&graph, id, &result.outputs) {
                    Some(merged) => merged,
                    None => {
                        logger.log(
                            RunEvent::info(format!("Skipping node {}: no active parent", id))
                                .with_data("node_id", id),
                        );
                        result.skipped.push(id);
                        continue;
                    }
                }
            };

            match self.run_node(node, services, providers, logger, node_inputs.clone()).await {
                Ok(output) => {
                    if node.node_type == NodeType::Return {
                        result.payload = Some(
                            output
                                .get("payload")
                                .cloned()
                                .unwrap_or_else(|| Value::Object(output.outputs.clone())),
                        );
                    }
                    // Children see the node's inputs overlaid with what it produced.
                    let mut carried = node_inputs;
                    carried.extend(output.outputs);
                    result.outputs.insert(id, carried);
                }
                Err(err) => match node.options().on_error.unwrap_or_default() {
                    OnError::Fail => return Err(DagError::Node { node_id: id, source: err }),
                    OnError::Skip => {
                        logger.warn(format!("Node {} failed, skipping it: {}", id, err));
                        result.skipped.push(id);
                    }
                    OnError::Continue => {
                        logger.warn(format!("Node {} failed, continuing: {}", id, err));
                        let mut carried = node_inputs;
                        // A failed branch must not steer by an upstream result.
                        if node.node_type == NodeType::IfElse {
                            carried.remove("condition_result");
                        }
                        result.outputs.insert(id, carried);
                    }
                },
            }
        }

        Ok(result)
    }

    /// Merge outputs of the parents whose edge into `id` is active.
    ///
    /// An edge leaving an `if_else` is active only when its label matches the
    /// parent's `condition_result`. `None` means no parent is active.
    fn collect_node_inputs(
        &self,
        graph: &GraphModel<'_>,
        id: NodeId,
        outputs: &BTreeMap<NodeId, Map<String, Value>>,
    ) -> Option<Map<String, Value>> {
        let mut merged = Map::new();
        let mut active = false;

        for parent in graph.parents(id) {
            let Some(parent_output) = outputs.get(&parent) else {
                continue;
            };
            let is_branch = graph.node(parent).map(|n| n.node_type) == Some(NodeType::IfElse);
            if is_branch {
                let taken = if condition_result(parent_output) { "true" } else { "false" };
                let follows = graph
                    .children(parent)
                    .into_iter()
                    .any(|(child, label)| child == id && label == Some(taken));
                if !follows {
                    continue;
                }
            }
            active = true;
            merged.extend(parent_output.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        active.then_some(merged)
    }

    async fn run_node(
        &self,
        node: &Node,
        services: &NodeServiceRegistry,
        providers: &Providers,
        logger: &RunLogger,
        inputs: Map<String, Value>,
    ) -> Result<NodeOutput, NodeError> {
        let service = services.lookup(node.node_type);

        if let Err(e) = service.validate(&node.metadata, node.structured_output.as_ref()) {
            let err = NodeError::from(e);
            logger.log(
                RunEvent::error(format!("Node {} has invalid configuration", node.id))
                    .with_data("node_id", node.id)
                    .with_exception(&err),
            );
            return Err(err);
        }

        let options = node.options();
        let budget = options
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let retries = options.retry.unwrap_or(0);

        logger.log(
            RunEvent::info(format!("Running node {} ({})", node.id, node.node_type))
                .with_data("node_id", node.id),
        );

        let mut attempt = 0;
        loop {
            let ctx = NodeContext::new(node, providers.clone(), logger.emitter())
                .with_inputs(inputs.clone());
            let start = Instant::now();
            let outcome = match timeout(budget, service.execute(ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutionError::Timeout {
                    ms: budget.as_millis() as u64,
                }),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(mut output) => {
                    output.execution_time_ms = duration_ms;
                    tracing::info!("Node {} completed in {}ms", node.id, duration_ms);
                    logger.log(
                        RunEvent::info(format!("Node {} completed", node.id))
                            .with_data("node_id", node.id)
                            .with_data("duration_ms", duration_ms),
                    );
                    return Ok(output);
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!("Node {} failed, retrying ({}/{}): {}", node.id, attempt, retries, e);
                    logger.log(
                        RunEvent::warn(format!("Node {} failed, retrying ({}/{})", node.id, attempt, retries))
                            .with_data("node_id", node.id)
                            .with_exception(&e),
                    );
                }
                Err(e) => {
                    tracing::error!("Node {} failed: {}", node.id, e);
                    logger.log(
                        RunEvent::error(format!("Node {} failed", node.id))
                            .with_data("node_id", node.id)
                            .with_exception(&e),
                    );
                    return Err(e.into());
                }
            }
        }
    }
}

fn condition_result(output: &Map<String, Value>) -> bool {
    output
        .get("condition_result")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Result of workflow execution
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// Data each node that ran passed on: its inputs overlaid with its
    /// outputs, by node id.
    pub outputs: BTreeMap<NodeId, Map<String, Value>>,
    /// Nodes on an untaken branch, or skipped after failing.
    pub skipped: Vec<NodeId>,
    /// Payload of the `return` node, if one ran.
    pub payload: Option<Value>,
    pub duration_ms: u64,
}
