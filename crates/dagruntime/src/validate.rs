use crate::graph::GraphModel;
use dagcore::{Edge, Node, NodeId, NodeType, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Structural verdict for one workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Execution order; empty whenever `errors` is not.
    pub topo_order: Vec<NodeId>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a graph against the structural rules without short-circuiting.
///
/// Errors come out grouped by rule: references, cycles, multiple parents,
/// return placement, then branch labels.
pub fn validate_graph(nodes: &[Node], edges: &[Edge]) -> ValidationResult {
    let mut result = ValidationResult::default();
    if nodes.is_empty() && edges.is_empty() {
        return result;
    }

    let graph = GraphModel::new(nodes, edges);

    check_references(&graph, &mut result.errors);

    let sorted = graph.topological_order();
    if sorted.len() == graph.len() {
        result.topo_order = sorted;
    } else {
        let cycle = graph.find_cycle(&sorted);
        let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        result
            .errors
            .push(format!("Cycle detected in graph: {}", path.join(" -> ")));
    }

    check_multiple_parents(&graph, &mut result.errors);
    check_return_nodes(&graph, &mut result.errors);
    check_branch_labels(&graph, &mut result.errors, &mut result.warnings);

    if !result.errors.is_empty() {
        result.topo_order.clear();
    }

    tracing::debug!(
        nodes = graph.len(),
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "Validated workflow graph"
    );
    result
}

fn check_references(graph: &GraphModel<'_>, errors: &mut Vec<String>) {
    for id in graph.duplicate_ids() {
        errors.push(format!("Duplicate node id {}", id));
    }
    for edge in graph.dangling_edges() {
        for id in [edge.parent_id, edge.child_id] {
            if graph.node(id).is_none() {
                errors.push(format!(
                    "Edge {} -> {} references unknown node {}",
                    edge.parent_id, edge.child_id, id
                ));
            }
        }
    }
}

fn check_multiple_parents(graph: &GraphModel<'_>, errors: &mut Vec<String>) {
    for &id in graph.node_ids() {
        let Some(node) = graph.node(id) else { continue };
        if graph.in_degree(id) > 1 && node.node_type != NodeType::Merge {
            errors.push(format!(
                "Node {} (type: {}) has multiple parents but is not a merge node",
                id, node.node_type
            ));
        }
    }
}

fn check_return_nodes(graph: &GraphModel<'_>, errors: &mut Vec<String>) {
    for &id in graph.node_ids() {
        if graph.node(id).map(|n| n.node_type) != Some(NodeType::Return) {
            continue;
        }
        if graph.in_degree(id) == 0 {
            errors.push(format!("Return node {} has no incoming edges", id));
        }
        if graph.out_degree(id) > 0 {
            errors.push(format!("Return node {} has outgoing edges", id));
        }
        let for_each = graph
            .ancestors(id)
            .into_iter()
            .find(|&a| graph.node(a).map(|n| n.node_type) == Some(NodeType::ForEach));
        if let Some(ancestor) = for_each {
            errors.push(format!(
                "Return node {} is nested under for_each node {}",
                id, ancestor
            ));
        }
    }
}

fn check_branch_labels(graph: &GraphModel<'_>, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    for &id in graph.node_ids() {
        let Some(node) = graph.node(id) else { continue };
        let children = graph.children(id);

        if node.node_type == NodeType::IfElse {
            if children.is_empty() {
                warnings.push(format!("If-else node {} has no outgoing edges", id));
                continue;
            }
            let labels: BTreeSet<Option<&str>> = children.iter().map(|(_, l)| *l).collect();
            let expected = BTreeSet::from([Some("false"), Some("true")]);
            if labels != expected {
                let got: Vec<String> = labels
                    .iter()
                    .map(|l| match l {
                        Some(l) => format!("'{}'", l),
                        None => "None".to_string(),
                    })
                    .collect();
                errors.push(format!(
                    "If-else node {} must have exactly two outgoing edges with branch_label 'true' and 'false', got: [{}]",
                    id,
                    got.join(", ")
                ));
            }
        } else {
            for (child, label) in children {
                if let Some(label) = label {
                    errors.push(format!(
                        "Node {} (type: {}) has edge to {} with branch_label '{}', but only if_else nodes can have branch labels",
                        id, node.node_type, child, label
                    ));
                }
            }
        }
    }
}

/// Warnings about how a workflow gets triggered.
///
/// Accepts standard 5-field cron expressions as well as the 6-field form
/// with a leading seconds column.
pub fn validate_triggers(workflow: &Workflow) -> Vec<String> {
    let mut warnings = Vec::new();
    let schedule = workflow
        .cron_schedule
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(expr) = schedule {
        if !is_valid_cron(expr) {
            warnings.push(format!("Invalid cron schedule: {}", expr));
        }
    }
    if schedule.is_none() && !workflow.is_api {
        warnings.push("No trigger configured (neither cron_schedule nor is_api is set)".to_string());
    }

    warnings
}

pub fn is_valid_cron(expr: &str) -> bool {
    let normalized = match expr.split_whitespace().count() {
        5 => format!("0 {}", expr),
        6 => expr.to_string(),
        _ => return false,
    };
    cron::Schedule::from_str(&normalized).is_ok()
}
