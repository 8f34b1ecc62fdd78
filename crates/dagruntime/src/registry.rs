use async_trait::async_trait;
use dagcore::{
    ExecutionError, NodeContext, NodeOutput, NodeService, NodeType, ShapeMap, ValidationError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Stand-in for node types without an implementation; every call fails.
pub struct UnimplementedService {
    node_type: NodeType,
}

impl UnimplementedService {
    pub fn new(node_type: NodeType) -> Self {
        Self { node_type }
    }
}

#[async_trait]
impl NodeService for UnimplementedService {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn description(&self) -> &str {
        "Not implemented"
    }

    fn validate(&self, _metadata: &Value, _structured_output: Option<&Value>) -> Result<(), ValidationError> {
        Err(ValidationError::NotImplemented)
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Err(ExecutionError::NotImplemented("planning"))
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        Err(ExecutionError::NotImplemented("execution"))
    }
}

/// Node type to service table, filled once and then shared read-only.
pub struct NodeServiceRegistry {
    services: HashMap<NodeType, Arc<dyn NodeService>>,
}

impl NodeServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register a node service under its own type, replacing any earlier one.
    pub fn register(&mut self, service: Arc<dyn NodeService>) {
        let node_type = service.node_type();
        tracing::info!("Registering node type: {}", node_type);
        self.services.insert(node_type, service);
    }

    /// The service for `node_type`, or the unimplemented fallback.
    pub fn lookup(&self, node_type: NodeType) -> Arc<dyn NodeService> {
        self.services
            .get(&node_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(UnimplementedService::new(node_type)))
    }

    pub fn is_implemented(&self, node_type: NodeType) -> bool {
        self.services.contains_key(&node_type)
    }

    /// Registered node types in declaration order.
    pub fn list_node_types(&self) -> Vec<NodeType> {
        NodeType::ALL
            .into_iter()
            .filter(|t| self.services.contains_key(t))
            .collect()
    }
}

impl Default for NodeServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
