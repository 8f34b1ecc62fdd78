//! Stub services shared by the unit tests in this crate.

use async_trait::async_trait;
use dagcore::{
    ExecutionError, ExpressionEngine, ExpressionError, NodeContext, NodeOutput, NodeService,
    NodeType, Shape, ShapeMap, ValidationError,
};
use serde_json::{Map, Value};
use std::time::Duration;

/// Looks the expression up as a top-level key.
pub struct NullExpressions;

impl ExpressionEngine for NullExpressions {
    fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError> {
        Ok(data.get(expression).cloned().unwrap_or(Value::Null))
    }

    fn validate_syntax(&self, _expression: &str) -> Result<(), ExpressionError> {
        Ok(())
    }
}

/// Passes inputs through and adds fixed outputs.
pub struct FixedService {
    node_type: NodeType,
    derived: ShapeMap,
    outputs: Map<String, Value>,
    failure: Option<ExecutionError>,
    delay: Option<Duration>,
}

impl FixedService {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            derived: ShapeMap::new(),
            outputs: Map::new(),
            failure: None,
            delay: None,
        }
    }

    pub fn with_shape(mut self, key: &str, shape: Shape) -> Self {
        self.derived.insert(key.to_string(), shape);
        self
    }

    pub fn with_output(mut self, key: &str, value: Value) -> Self {
        self.outputs.insert(key.to_string(), value);
        self
    }

    pub fn failing(mut self, error: ExecutionError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl NodeService for FixedService {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn validate(&self, metadata: &Value, _structured_output: Option<&Value>) -> Result<(), ValidationError> {
        if metadata.is_object() {
            Ok(())
        } else {
            Err(ValidationError::MetadataNotObject)
        }
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(self.derived.clone())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let mut outputs = ctx.inputs;
        outputs.extend(self.outputs.clone());
        Ok(NodeOutput::from(outputs))
    }
}
