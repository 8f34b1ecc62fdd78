use crate::graph::GraphModel;
use crate::registry::NodeServiceRegistry;
use dagcore::{flatten_schema, shape_map, Edge, Node, NodeId, NodeType, Shape, ShapeMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static input/output description of one node, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub input_shape: ShapeMap,
    pub output_shape: ShapeMap,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Propagate shapes through the graph in topological order.
///
/// Returns an empty plan if the graph has a cycle. Nothing here mutates
/// shared state or calls outside the registry.
pub fn plan_graph(
    nodes: &[Node],
    edges: &[Edge],
    starting_inputs: &ShapeMap,
    services: &NodeServiceRegistry,
) -> Vec<PlannedStep> {
    let graph = GraphModel::new(nodes, edges);
    let Some(order) = graph.acyclic_order() else {
        return Vec::new();
    };

    let mut outputs: HashMap<NodeId, ShapeMap> = HashMap::with_capacity(order.len());
    let mut steps = Vec::with_capacity(order.len());

    for id in order {
        let Some(node) = graph.node(id) else { continue };
        let mut notes = Vec::new();

        let parents = graph.parents(id);
        let input_shape = if parents.is_empty() {
            starting_inputs.clone()
        } else {
            let mut merged = ShapeMap::new();
            for parent in parents {
                let Some(parent_output) = outputs.get(&parent) else { continue };
                for (key, shape) in parent_output {
                    if let Some(previous) = merged.insert(key.clone(), shape.clone()) {
                        if &previous != shape {
                            notes.push(format!(
                                "Field '{}' has conflicting shapes from multiple parents",
                                key
                            ));
                        }
                    }
                }
            }
            merged
        };

        let output_shape = output_shape(node, &input_shape, services, &mut notes);
        outputs.insert(id, output_shape.clone());
        steps.push(PlannedStep {
            node_id: id,
            node_type: node.node_type,
            input_shape,
            output_shape,
            notes,
        });
    }

    steps
}

/// Output shape of a single node given its input shape.
///
/// `return` passes its input through untouched; every other type keeps its
/// input and overlays the fields it derives.
pub(crate) fn output_shape(
    node: &Node,
    input_shape: &ShapeMap,
    services: &NodeServiceRegistry,
    notes: &mut Vec<String>,
) -> ShapeMap {
    if node.node_type == NodeType::Return {
        return input_shape.clone();
    }

    let derived = match node.output_schema() {
        Some(schema) => flatten_schema(schema),
        None => services
            .lookup(node.node_type)
            .plan(&node.metadata, input_shape, node.structured_output.as_ref())
            .unwrap_or_else(|e| {
                notes.push(format!("Output shape unknown for node {}: {}", node.id, e));
                shape_map([("output", Shape::object())])
            }),
    };

    let mut output = input_shape.clone();
    output.extend(derived);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedService;
    use std::sync::Arc;

    fn registry() -> NodeServiceRegistry {
        let mut registry = NodeServiceRegistry::new();
        registry.register(Arc::new(
            FixedService::new(NodeType::Job).with_shape("text", Shape::string()),
        ));
        registry.register(Arc::new(
            FixedService::new(NodeType::IfElse).with_shape("condition_result", Shape::boolean()),
        ));
        registry
    }

    #[test]
    fn lone_return_passes_inputs_through() {
        let inputs = shape_map([("x", Shape::string())]);
        let plan = plan_graph(&[Node::new(1, NodeType::Return)], &[], &inputs, &registry());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].input_shape, inputs);
        assert_eq!(plan[0].output_shape, inputs);
        assert!(plan[0].notes.is_empty());
    }

    #[test]
    fn shapes_accumulate_along_the_chain() {
        let nodes = vec![
            Node::new(1, NodeType::Job),
            Node::new(2, NodeType::IfElse),
            Node::new(3, NodeType::Return),
        ];
        let edges = vec![Edge::new(1, 2), Edge::new(2, 3)];
        let inputs = shape_map([("question", Shape::string())]);
        let plan = plan_graph(&nodes, &edges, &inputs, &registry());

        let ids: Vec<NodeId> = plan.iter().map(|s| s.node_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(
            plan[2].output_shape,
            shape_map([
                ("question", Shape::string()),
                ("text", Shape::string()),
                ("condition_result", Shape::boolean()),
            ])
        );
    }

    #[test]
    fn structured_output_wins_over_service_defaults() {
        let node = Node::new(1, NodeType::Job).with_structured_output(serde_json::json!({
            "type": "object",
            "properties": {"label": {"type": "string"}}
        }));
        let plan = plan_graph(&[node], &[], &ShapeMap::new(), &registry());

        assert_eq!(plan[0].output_shape, shape_map([("label", Shape::string())]));
    }

    #[test]
    fn conflicting_parents_are_noted() {
        let nodes = vec![
            Node::new(1, NodeType::Job).with_structured_output(serde_json::json!({
                "type": "object", "properties": {"v": {"type": "string"}}
            })),
            Node::new(2, NodeType::Job).with_structured_output(serde_json::json!({
                "type": "object", "properties": {"v": {"type": "number"}}
            })),
            Node::new(3, NodeType::Merge),
        ];
        let edges = vec![Edge::new(1, 3), Edge::new(2, 3)];
        let plan = plan_graph(&nodes, &edges, &ShapeMap::new(), &registry());

        let merge = &plan[2];
        assert_eq!(merge.input_shape["v"], Shape::number());
        assert_eq!(
            merge.notes[0],
            "Field 'v' has conflicting shapes from multiple parents"
        );
        // merge has no service registered here, so the fallback shape applies
        assert_eq!(merge.output_shape["output"], Shape::object());
        assert_eq!(merge.notes.len(), 2);
    }

    #[test]
    fn cycle_yields_empty_plan() {
        let nodes = vec![Node::new(1, NodeType::Job), Node::new(2, NodeType::Job)];
        let edges = vec![Edge::new(1, 2), Edge::new(2, 1)];
        assert!(plan_graph(&nodes, &edges, &ShapeMap::new(), &registry()).is_empty());
    }
}
