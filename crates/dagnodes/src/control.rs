use crate::checks::validate_metadata;
use crate::expression::is_truthy;
use crate::meta::{MetaIfElse, MetaMerge, MetaReturn};
use async_trait::async_trait;
use dagcore::{
    shape_map, ExecutionError, ExpressionEngine, NodeContext, NodeOutput, NodeService, NodeType,
    Shape, ShapeMap, ValidationError,
};
use serde_json::Value;
use std::sync::Arc;

/// Evaluate `predicate` into `condition_result`; edges labelled `true` or
/// `false` pick the branch.
pub struct IfElseService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl IfElseService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for IfElseService {
    fn node_type(&self) -> NodeType {
        NodeType::IfElse
    }

    fn description(&self) -> &str {
        "Branch on a predicate"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaIfElse>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(shape_map([("condition_result", Shape::boolean())]))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaIfElse = ctx.typed_metadata()?;
        let result = is_truthy(&ctx.evaluate(&meta.predicate)?);
        ctx.events.info(format!("Predicate evaluated to {}", result));
        Ok(NodeOutput::new().with_output("condition_result", result))
    }
}

/// Collect the outputs of every parent under `merged_data`.
///
/// `strategy` is accepted but does not change the result: parent outputs are
/// already merged key by key before the node runs.
pub struct MergeService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl MergeService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for MergeService {
    fn node_type(&self) -> NodeType {
        NodeType::Merge
    }

    fn description(&self) -> &str {
        "Join parent outputs"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaMerge>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(shape_map([("merged_data", Shape::object())]))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaMerge = ctx.typed_metadata()?;
        if let Some(expected) = meta.expected_parents {
            tracing::debug!(
                "Merge node {} expects {} parents, strategy {:?}",
                ctx.node_id,
                expected,
                meta.strategy
            );
        }
        Ok(NodeOutput::new().with_output("merged_data", ctx.input_document()))
    }
}

/// Final node: select the payload handed back to the caller.
pub struct ReturnService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl ReturnService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for ReturnService {
    fn node_type(&self) -> NodeType {
        NodeType::Return
    }

    fn description(&self) -> &str {
        "Select the workflow result"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaReturn>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    // Planning passes the input through for return nodes.
    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(ShapeMap::new())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaReturn = ctx.typed_metadata()?;
        let payload = ctx.evaluate(&meta.payload_selector)?;
        Ok(NodeOutput::new()
            .with_output("payload", payload)
            .with_output("status_code", meta.status_code)
            .with_output("content_type", meta.content_type.mime()))
    }
}
