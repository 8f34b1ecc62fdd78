use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub type WorkflowId = i64;
pub type NodeId = i64;

/// The closed set of node types a workflow may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Job,
    Embed,
    Guru,
    GetApi,
    PostApi,
    VectorQuery,
    Filter,
    Map,
    IfElse,
    ForEach,
    Merge,
    Split,
    Advanced,
    Return,
    Workflow,
}

impl NodeType {
    pub const ALL: [NodeType; 15] = [
        NodeType::Job,
        NodeType::Embed,
        NodeType::Guru,
        NodeType::GetApi,
        NodeType::PostApi,
        NodeType::VectorQuery,
        NodeType::Filter,
        NodeType::Map,
        NodeType::IfElse,
        NodeType::ForEach,
        NodeType::Merge,
        NodeType::Split,
        NodeType::Advanced,
        NodeType::Return,
        NodeType::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Job => "job",
            NodeType::Embed => "embed",
            NodeType::Guru => "guru",
            NodeType::GetApi => "get_api",
            NodeType::PostApi => "post_api",
            NodeType::VectorQuery => "vector_query",
            NodeType::Filter => "filter",
            NodeType::Map => "map",
            NodeType::IfElse => "if_else",
            NodeType::ForEach => "for_each",
            NodeType::Merge => "merge",
            NodeType::Split => "split",
            NodeType::Advanced => "advanced",
            NodeType::Return => "return",
            NodeType::Workflow => "workflow",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown node type: {}", s))
    }
}

/// Node specification in a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// What to do when a node fails after its retries are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Fail,
    Skip,
    Continue,
}

/// Execution options every node type accepts in its metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeOptions {
    pub timeout_ms: Option<u64>,
    pub retry: Option<u32>,
    pub on_error: Option<OnError>,
}

impl Node {
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            metadata: empty_object(),
            structured_output: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set a single metadata key, turning `metadata` into an object if needed.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.metadata.is_object() {
            self.metadata = empty_object();
        }
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_structured_output(mut self, schema: Value) -> Self {
        self.structured_output = Some(schema);
        self
    }

    /// Execution options read from `metadata`; malformed options fall back
    /// to the defaults.
    pub fn options(&self) -> NodeOptions {
        NodeOptions::deserialize(&self.metadata).unwrap_or_default()
    }

    /// The declared output schema, if it is a non-empty object.
    pub fn output_schema(&self) -> Option<&Value> {
        self.structured_output
            .as_ref()
            .filter(|s| s.as_object().is_some_and(|m| !m.is_empty()))
    }
}

/// Directed edge between two nodes of the same graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub parent_id: NodeId,
    pub child_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_label: Option<String>,
}

impl Edge {
    pub fn new(parent_id: NodeId, child_id: NodeId) -> Self {
        Self {
            parent_id,
            child_id,
            branch_label: None,
        }
    }

    pub fn labeled(parent_id: NodeId, child_id: NodeId, label: impl Into<String>) -> Self {
        Self {
            parent_id,
            child_id,
            branch_label: Some(label.into()),
        }
    }
}

/// Complete workflow record as handed over by the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub is_api: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            cron_schedule: None,
            is_api: false,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, parent_id: NodeId, child_id: NodeId) {
        self.edges.push(Edge::new(parent_id, child_id));
    }

    pub fn connect_branch(&mut self, parent_id: NodeId, child_id: NodeId, label: impl Into<String>) {
        self.edges.push(Edge::labeled(parent_id, child_id, label));
    }

    pub fn find_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
