use crate::checks::{parse_metadata, validate_metadata};
use crate::expression::is_truthy;
use crate::meta::{Literal, MetaFilter, MetaMap};
use async_trait::async_trait;
use dagcore::{
    ExecutionError, ExpressionEngine, NodeContext, NodeOutput, NodeService, NodeType, Shape,
    ShapeMap, ValidationError,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Keep the items for which `where` is truthy.
///
/// Items come from `items_selector`, or the `items` input when no selector is
/// set. `where` is evaluated against each item.
pub struct FilterService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl FilterService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for FilterService {
    fn node_type(&self) -> NodeType {
        NodeType::Filter
    }

    fn description(&self) -> &str {
        "Keep items matching a condition"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaFilter>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    // Output shape is the input shape.
    fn plan(
        &self,
        metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        parse_metadata::<MetaFilter>(metadata)?;
        Ok(ShapeMap::new())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaFilter = ctx.typed_metadata()?;
        let source = match &meta.items_selector {
            Some(selector) => ctx.evaluate(selector)?,
            None => ctx.require_input("items")?.clone(),
        };
        let Value::Array(items) = source else {
            return Err(ExecutionError::InvalidInput {
                field: meta.items_selector.unwrap_or_else(|| "items".to_string()),
                expected: "array".to_string(),
            });
        };

        let engine = ctx.providers.expressions();
        let total = items.len();
        let mut kept = Vec::with_capacity(total);
        for item in items {
            if is_truthy(&engine.evaluate(&meta.condition, &item)?) {
                kept.push(item);
            }
        }
        ctx.events.info(format!("Kept {} of {} items", kept.len(), total));

        Ok(NodeOutput::new().with_output("items", kept))
    }
}

/// Build new fields from expressions and literals.
pub struct MapService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl MapService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for MapService {
    fn node_type(&self) -> NodeType {
        NodeType::Map
    }

    fn description(&self) -> &str {
        "Compute fields from expressions"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaMap>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        let meta: MetaMap = parse_metadata(metadata)?;
        Ok(meta
            .mapping
            .iter()
            .map(|(key, value)| {
                let shape = match value {
                    Literal::Bool(_) => Shape::boolean(),
                    Literal::Int(_) => Shape::number(),
                    Literal::Text(_) => Shape::unknown(),
                };
                (key.clone(), shape)
            })
            .collect())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaMap = ctx.typed_metadata()?;
        let mut fields = Map::with_capacity(meta.mapping.len());
        for (key, value) in &meta.mapping {
            let computed = match value {
                Literal::Text(expression) => ctx.evaluate(expression)?,
                literal => Value::from(literal),
            };
            fields.insert(key.clone(), computed);
        }
        Ok(NodeOutput::from(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiExpressionEngine;
    use dagcore::{shape_map, EventEmitter, Node, Providers};
    use serde_json::json;

    fn engine() -> Arc<dyn ExpressionEngine> {
        Arc::new(RhaiExpressionEngine::new())
    }

    fn run_ctx(node: &Node, inputs: Value) -> NodeContext {
        NodeContext::new(node, Providers::new(engine()), EventEmitter::disabled())
            .with_inputs(inputs.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn filter_with_selector() {
        let node = Node::new(1, NodeType::Filter)
            .with_meta("items_selector", "order.lines")
            .with_meta("where", "qty > 1 && sku != \"free\"");
        let inputs = json!({"order": {"lines": [
            {"sku": "a", "qty": 2},
            {"sku": "b", "qty": 1},
            {"sku": "free", "qty": 5}
        ]}});

        let out = FilterService::new(engine()).execute(run_ctx(&node, inputs)).await.unwrap();
        assert_eq!(out.get("items"), Some(&json!([{"sku": "a", "qty": 2}])));
    }

    #[tokio::test]
    async fn filter_defaults_to_items_input() {
        let node = Node::new(1, NodeType::Filter).with_meta("where", "input > 2");
        let out = FilterService::new(engine())
            .execute(run_ctx(&node, json!({"items": [1, 3, 5]})))
            .await
            .unwrap();
        assert_eq!(out.get("items"), Some(&json!([3, 5])));
    }

    #[tokio::test]
    async fn filter_rejects_non_array() {
        let node = Node::new(1, NodeType::Filter).with_meta("where", "true");
        let err = FilterService::new(engine())
            .execute(run_ctx(&node, json!({"items": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::InvalidInput {
                field: "items".into(),
                expected: "array".into()
            }
        );
    }

    #[test]
    fn filter_plan_adds_nothing() {
        let service = FilterService::new(engine());
        let input = shape_map([("items", Shape::array_of(Shape::number()))]);
        let plan = service.plan(&json!({"where": "input > 1"}), &input, None).unwrap();
        assert!(plan.is_empty());
        assert!(service.plan(&json!({}), &input, None).is_err());
    }

    #[tokio::test]
    async fn map_mixes_expressions_and_literals() {
        let node = Node::new(1, NodeType::Map).with_meta(
            "mapping",
            json!({"full": "user.name", "version": 2, "active": true}),
        );
        let out = MapService::new(engine())
            .execute(run_ctx(&node, json!({"user": {"name": "Ada"}})))
            .await
            .unwrap();
        assert_eq!(out.get("full"), Some(&json!("Ada")));
        assert_eq!(out.get("version"), Some(&json!(2)));
        assert_eq!(out.get("active"), Some(&json!(true)));
    }

    #[test]
    fn map_plan_uses_mapping_keys() {
        let plan = MapService::new(engine())
            .plan(&json!({"mapping": {"a": "x", "n": 1}}), &ShapeMap::new(), None)
            .unwrap();
        assert_eq!(plan, shape_map([("a", Shape::unknown()), ("n", Shape::number())]));
    }

    #[test]
    fn map_requires_non_empty_mapping() {
        let err = MapService::new(engine()).validate(&json!({"mapping": {}}), None).unwrap_err();
        assert_eq!(err.to_string(), "Invalid map metadata: mapping cannot be empty");
    }
}
