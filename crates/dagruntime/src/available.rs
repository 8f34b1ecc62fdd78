use crate::graph::GraphModel;
use crate::plan::output_shape;
use crate::registry::NodeServiceRegistry;
use dagcore::{Edge, Node, NodeId, ShapeMap};
use std::collections::{BTreeMap, HashMap};

/// For every node, the union of the output shapes of all its transitive
/// ancestors. Used to show what data a node can reference.
///
/// Each node's own output is derived from an empty input, so only what the
/// node itself produces counts. Later ancestors in breadth-first order win
/// on key collisions. Empty if the graph has a cycle.
pub fn available_data(
    nodes: &[Node],
    edges: &[Edge],
    services: &NodeServiceRegistry,
) -> BTreeMap<NodeId, ShapeMap> {
    let graph = GraphModel::new(nodes, edges);
    let Some(order) = graph.acyclic_order() else {
        return BTreeMap::new();
    };

    let empty = ShapeMap::new();
    let mut own_outputs: HashMap<NodeId, ShapeMap> = HashMap::with_capacity(order.len());
    let mut available = BTreeMap::new();

    for id in order {
        let Some(node) = graph.node(id) else { continue };

        let mut merged = ShapeMap::new();
        for ancestor in graph.ancestors(id) {
            if let Some(output) = own_outputs.get(&ancestor) {
                merged.extend(output.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        available.insert(id, merged);

        let mut notes = Vec::new();
        own_outputs.insert(id, output_shape(node, &empty, services, &mut notes));
    }

    available
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedService;
    use dagcore::{NodeType, Shape};
    use serde_json::json;
    use std::sync::Arc;

    fn schema_node(id: NodeId, field: &str) -> Node {
        Node::new(id, NodeType::Job).with_structured_output(json!({
            "type": "object",
            "properties": { field: {"type": "string"} }
        }))
    }

    #[test]
    fn diamond_sees_every_ancestor() {
        let nodes = vec![
            schema_node(1, "a"),
            schema_node(2, "b"),
            schema_node(3, "c"),
            Node::new(4, NodeType::Merge),
        ];
        let edges = vec![Edge::new(1, 2), Edge::new(1, 3), Edge::new(2, 4), Edge::new(3, 4)];
        let available = available_data(&nodes, &edges, &NodeServiceRegistry::new());

        let keys: Vec<&str> = available[&4].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(available[&1].is_empty());
        assert_eq!(available[&2].len(), 1);
    }

    #[test]
    fn own_output_ignores_upstream_fields() {
        let mut registry = NodeServiceRegistry::new();
        registry.register(Arc::new(
            FixedService::new(NodeType::Job).with_shape("text", Shape::string()),
        ));
        let nodes = vec![
            schema_node(1, "a"),
            Node::new(2, NodeType::Job),
            Node::new(3, NodeType::Return),
            Node::new(4, NodeType::Job),
        ];
        let edges = vec![Edge::new(1, 2), Edge::new(2, 3), Edge::new(3, 4)];
        let available = available_data(&nodes, &edges, &registry);

        let keys: Vec<&str> = available[&4].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "text"]);
    }

    #[test]
    fn cycle_yields_empty_map() {
        let nodes = vec![Node::new(1, NodeType::Job), Node::new(2, NodeType::Job)];
        let edges = vec![Edge::new(1, 2), Edge::new(2, 1)];
        assert!(available_data(&nodes, &edges, &NodeServiceRegistry::new()).is_empty());
    }
}
