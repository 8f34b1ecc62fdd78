use dagcore::{Edge, Node, NodeId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Immutable adjacency view of one workflow, built once per analysis call.
///
/// Edges that reference unknown node ids never enter the graph; they are
/// kept aside as dangling so validation can report them. A repeated node id
/// keeps its first occurrence.
pub struct GraphModel<'a> {
    graph: DiGraph<NodeId, Option<String>>,
    index: HashMap<NodeId, NodeIndex>,
    nodes: HashMap<NodeId, &'a Node>,
    order: Vec<NodeId>,
    duplicates: Vec<NodeId>,
    dangling: Vec<&'a Edge>,
}

impl<'a> GraphModel<'a> {
    pub fn new(nodes: &'a [Node], edges: &'a [Edge]) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut order = Vec::with_capacity(nodes.len());
        let mut duplicates = Vec::new();

        for node in nodes {
            if by_id.contains_key(&node.id) {
                duplicates.push(node.id);
                continue;
            }
            index.insert(node.id, graph.add_node(node.id));
            by_id.insert(node.id, node);
            order.push(node.id);
        }

        let mut dangling = Vec::new();
        for edge in edges {
            match (index.get(&edge.parent_id), index.get(&edge.child_id)) {
                (Some(&from), Some(&to)) => {
                    graph.add_edge(from, to, edge.branch_label.clone());
                }
                _ => dangling.push(edge),
            }
        }

        Self {
            graph,
            index,
            nodes: by_id,
            order,
            duplicates,
            dangling,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node ids in input order, duplicates removed.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn node(&self, id: NodeId) -> Option<&'a Node> {
        self.nodes.get(&id).copied()
    }

    pub fn duplicate_ids(&self) -> &[NodeId] {
        &self.duplicates
    }

    pub fn dangling_edges(&self) -> &[&'a Edge] {
        &self.dangling
    }

    /// Children with their branch labels, in edge order.
    pub fn children(&self, id: NodeId) -> Vec<(NodeId, Option<&str>)> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).collect();
        edges.sort_by_key(|e| e.id());
        edges
            .into_iter()
            .map(|e| (self.graph[e.target()], e.weight().as_deref()))
            .collect()
    }

    /// Parents in edge order. A parent connected twice appears twice.
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(idx, Direction::Incoming).collect();
        edges.sort_by_key(|e| e.id());
        edges.into_iter().map(|e| self.graph[e.source()]).collect()
    }

    pub fn in_degree(&self, id: NodeId) -> usize {
        self.index
            .get(&id)
            .map_or(0, |&idx| self.graph.edges_directed(idx, Direction::Incoming).count())
    }

    pub fn out_degree(&self, id: NodeId) -> usize {
        self.index
            .get(&id)
            .map_or(0, |&idx| self.graph.edges_directed(idx, Direction::Outgoing).count())
    }

    /// Every transitive ancestor of `id`, in breadth-first visit order.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut visited = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut found = Vec::new();

        while let Some(current) = queue.pop_front() {
            for parent in self.parents(current) {
                if visited.insert(parent) {
                    found.push(parent);
                    queue.push_back(parent);
                }
            }
        }

        found
    }

    /// Kahn's algorithm. Shorter than `len()` when the graph has a cycle.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut indegree: HashMap<NodeId, usize> = self
            .order
            .iter()
            .map(|&id| (id, self.in_degree(id)))
            .collect();
        let mut queue: VecDeque<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| indegree[id] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(current) = queue.pop_front() {
            sorted.push(current);
            for (child, _) in self.children(current) {
                if let Some(degree) = indegree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        sorted
    }

    /// Topological order, or `None` if any node sits on or behind a cycle.
    pub fn acyclic_order(&self) -> Option<Vec<NodeId>> {
        let sorted = self.topological_order();
        (sorted.len() == self.len()).then_some(sorted)
    }

    /// A closed cycle path (first node repeated at the end) among the nodes
    /// Kahn's algorithm could not process.
    ///
    /// Falls back to the first three unprocessed ids if no back edge is found.
    pub fn find_cycle(&self, processed: &[NodeId]) -> Vec<NodeId> {
        let processed: HashSet<NodeId> = processed.iter().copied().collect();
        let unprocessed: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| !processed.contains(id))
            .collect();

        let mut visited = HashSet::new();
        for &start in &unprocessed {
            if visited.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.cycle_from(start, &mut visited) {
                return cycle;
            }
        }

        unprocessed.into_iter().take(3).collect()
    }

    fn cycle_from(&self, start: NodeId, visited: &mut HashSet<NodeId>) -> Option<Vec<NodeId>> {
        // Each frame is a node on the current path plus its next child to try.
        let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];
        let mut path = vec![start];
        let mut on_path = HashSet::from([start]);
        visited.insert(start);

        while let Some(frame) = stack.last_mut() {
            let (current, next) = *frame;
            let children = self.children(current);
            if next >= children.len() {
                stack.pop();
                path.pop();
                on_path.remove(&current);
                continue;
            }
            frame.1 += 1;

            let child = children[next].0;
            if on_path.contains(&child) {
                let begin = path.iter().position(|&n| n == child).unwrap_or(0);
                let mut cycle = path[begin..].to_vec();
                cycle.push(child);
                return Some(cycle);
            }
            if visited.insert(child) {
                stack.push((child, 0));
                path.push(child);
                on_path.insert(child);
            }
        }

        None
    }
}
