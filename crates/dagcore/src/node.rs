use crate::{
    events::EventEmitter, ExecutionError, Node, NodeId, NodeType, Providers, ShapeMap,
    ValidationError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-type behaviour behind every node in a workflow.
#[async_trait]
pub trait NodeService: Send + Sync {
    /// The node type this service stands for.
    fn node_type(&self) -> NodeType;

    /// One-line summary for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Check `metadata` (and the optional output schema) at workflow load time.
    fn validate(
        &self,
        metadata: &Value,
        structured_output: Option<&Value>,
    ) -> Result<(), ValidationError>;

    /// Fields this node derives on top of its input shape.
    ///
    /// The planner overlays the returned map on `input_shape`, so services
    /// that only pass data through return an empty map.
    fn plan(
        &self,
        metadata: &Value,
        input_shape: &ShapeMap,
        structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError>;

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError>;
}

/// Execution context passed to each node service
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub node_type: NodeType,

    /// Merged outputs of the active parents, or the run's starting inputs.
    pub inputs: Map<String, Value>,

    pub metadata: Value,
    pub structured_output: Option<Value>,
    pub providers: Providers,
    pub events: EventEmitter,
}

impl NodeContext {
    pub fn new(node: &Node, providers: Providers, events: EventEmitter) -> Self {
        Self {
            node_id: node.id,
            node_type: node.node_type,
            inputs: Map::new(),
            metadata: node.metadata.clone(),
            structured_output: node.structured_output.clone(),
            providers,
            events: events.for_node(node.id),
        }
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, ExecutionError> {
        self.inputs
            .get(name)
            .ok_or_else(|| ExecutionError::MissingInput(name.to_string()))
    }

    /// Inputs as a single JSON object, the data every expression sees.
    pub fn input_document(&self) -> Value {
        Value::Object(self.inputs.clone())
    }

    /// Evaluate `expression` against the inputs.
    pub fn evaluate(&self, expression: &str) -> Result<Value, ExecutionError> {
        Ok(self
            .providers
            .expressions()
            .evaluate(expression, &self.input_document())?)
    }

    /// Deserialize the metadata into the service's typed form.
    pub fn typed_metadata<T: serde::de::DeserializeOwned>(&self) -> Result<T, ExecutionError> {
        serde_json::from_value(self.metadata.clone())
            .map_err(|e| ExecutionError::Metadata(e.to_string()))
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub outputs: Map<String, Value>,
    pub execution_time_ms: u64,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.outputs.get(port)
    }
}

impl From<Map<String, Value>> for NodeOutput {
    fn from(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            execution_time_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExpressionError;
    use serde_json::json;
    use std::sync::Arc;

    struct Lookup;

    impl crate::ExpressionEngine for Lookup {
        fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError> {
            Ok(data.get(expression).cloned().unwrap_or(Value::Null))
        }

        fn validate_syntax(&self, _expression: &str) -> Result<(), ExpressionError> {
            Ok(())
        }
    }

    fn context() -> NodeContext {
        let node = Node::new(3, NodeType::Map).with_meta("mapping", json!({"a": "x"}));
        let mut inputs = Map::new();
        inputs.insert("x".into(), json!(42));
        NodeContext::new(&node, Providers::new(Arc::new(Lookup)), EventEmitter::disabled())
            .with_inputs(inputs)
    }

    #[test]
    fn require_input_reports_missing_name() {
        let ctx = context();
        assert_eq!(ctx.require_input("x").unwrap(), &json!(42));
        assert_eq!(
            ctx.require_input("y").unwrap_err(),
            ExecutionError::MissingInput("y".into())
        );
    }

    #[test]
    fn evaluates_against_inputs() {
        assert_eq!(context().evaluate("x").unwrap(), json!(42));
    }

    #[test]
    fn output_builder() {
        let out = NodeOutput::new().with_output("text", "hi");
        assert_eq!(out.get("text"), Some(&json!("hi")));
    }
}
