use crate::checks::validate_metadata;
use crate::meta::{Literal, MetaGuru, MetaVectorQuery};
use crate::template::{base_defaults, render_template};
use async_trait::async_trait;
use chrono::Local;
use dagcore::{
    shape_map, ExecutionError, ExpressionEngine, NodeContext, NodeOutput, NodeService, NodeType,
    Shape, ShapeMap, ValidationError, VectorHit, VectorSearch,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn render_query(ctx: &NodeContext, template: &str) -> String {
    let (query, warnings) = render_template(
        template,
        &base_defaults(Local::now()),
        &ctx.input_document(),
        ctx.providers.expressions(),
    );
    for warning in warnings {
        ctx.events.warn(warning);
    }
    query
}

fn filter_map(filters: &BTreeMap<String, Literal>) -> Map<String, Value> {
    filters.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()
}

async fn search(ctx: &NodeContext, search: VectorSearch) -> Result<Vec<VectorHit>, ExecutionError> {
    let store = search.store_id.clone();
    let hits = ctx
        .providers
        .vectors()?
        .query(search)
        .await
        .map_err(|e| ExecutionError::Provider {
            provider: "vector store",
            message: e.0,
        })?;
    ctx.events.info(format!("{} hits from {}", hits.len(), store));
    Ok(hits)
}

fn hits_value(hits: Vec<VectorHit>) -> Result<Value, ExecutionError> {
    serde_json::to_value(hits).map_err(|e| ExecutionError::Provider {
        provider: "vector store",
        message: e.to_string(),
    })
}

/// Knowledge-space search; hits come back as `items`.
pub struct GuruService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl GuruService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for GuruService {
    fn node_type(&self) -> NodeType {
        NodeType::Guru
    }

    fn description(&self) -> &str {
        "Search a knowledge space"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaGuru>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(shape_map([("items", Shape::array())]))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaGuru = ctx.typed_metadata()?;
        let query = render_query(&ctx, &meta.query_template);

        let hits = search(
            &ctx,
            VectorSearch {
                store_id: meta.space.clone(),
                namespace: None,
                query,
                top_k: meta.top_k,
                filters: filter_map(&meta.filters),
            },
        )
        .await?;

        Ok(NodeOutput::new().with_output("items", hits_value(hits)?))
    }
}

/// Similarity search over a vector store; hits come back as `results`.
pub struct VectorQueryService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl VectorQueryService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for VectorQueryService {
    fn node_type(&self) -> NodeType {
        NodeType::VectorQuery
    }

    fn description(&self) -> &str {
        "Query a vector store"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaVectorQuery>(metadata, structured_output, self.expressions.as_ref())
            .map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        let hit = Shape::fields([
            ("id", Shape::string()),
            ("score", Shape::number()),
            ("payload", Shape::object()),
        ]);
        Ok(shape_map([("results", Shape::array_of(hit))]))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaVectorQuery = ctx.typed_metadata()?;
        let query = render_query(&ctx, &meta.query_template);

        let hits = search(
            &ctx,
            VectorSearch {
                store_id: meta.vector_store_id.clone(),
                namespace: meta.namespace.clone(),
                query,
                top_k: meta.top_k,
                filters: filter_map(&meta.filters),
            },
        )
        .await?;

        Ok(NodeOutput::new().with_output("results", hits_value(hits)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiExpressionEngine;
    use dagcore::{EventEmitter, Node, ProviderError, Providers, VectorStore, VectorUpsert};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Index(Mutex<Vec<VectorSearch>>);

    #[async_trait]
    impl VectorStore for Index {
        async fn upsert(&self, _request: VectorUpsert) -> Result<usize, ProviderError> {
            Ok(0)
        }

        async fn query(&self, search: VectorSearch) -> Result<Vec<VectorHit>, ProviderError> {
            let hits = (0..search.top_k.min(2))
                .map(|i| VectorHit {
                    id: format!("doc-{}", i),
                    score: 1.0 - i as f64 / 10.0,
                    payload: json!({"q": &search.query}),
                })
                .collect();
            self.0.lock().unwrap().push(search);
            Ok(hits)
        }
    }

    fn engine() -> Arc<dyn ExpressionEngine> {
        Arc::new(RhaiExpressionEngine::new())
    }

    fn run_ctx(node: &Node, index: Arc<Index>, inputs: Value) -> NodeContext {
        NodeContext::new(node, Providers::new(engine()).with_vector_store(index), EventEmitter::disabled())
            .with_inputs(inputs.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn guru_searches_space_with_rendered_query() {
        let index = Arc::new(Index::default());
        let node = Node::new(1, NodeType::Guru).with_metadata(json!({
            "space": "handbook",
            "query_template": "policy for {{ input.topic }}",
            "filters": {"lang": "en", "public": true}
        }));

        let out = GuruService::new(engine())
            .execute(run_ctx(&node, index.clone(), json!({"topic": "leave"})))
            .await
            .unwrap();
        let items = out.get("items").and_then(Value::as_array).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], "doc-0");

        let searches = index.0.lock().unwrap();
        assert_eq!(searches[0].store_id, "handbook");
        assert_eq!(searches[0].query, "policy for leave");
        assert_eq!(searches[0].top_k, 5);
        assert_eq!(searches[0].filters["public"], json!(true));
    }

    #[tokio::test]
    async fn vector_query_returns_results() {
        let index = Arc::new(Index::default());
        let node = Node::new(2, NodeType::VectorQuery).with_metadata(json!({
            "vector_store_id": "vs",
            "namespace": "ns",
            "query_template": "{{ input.q }}",
            "top_k": 1
        }));

        let out = VectorQueryService::new(engine())
            .execute(run_ctx(&node, index.clone(), json!({"q": "hello"})))
            .await
            .unwrap();
        assert_eq!(
            out.get("results"),
            Some(&json!([{"id": "doc-0", "score": 1.0, "payload": {"q": "hello"}}]))
        );
        assert_eq!(index.0.lock().unwrap()[0].namespace.as_deref(), Some("ns"));
    }

    #[test]
    fn top_k_must_be_positive() {
        let err = VectorQueryService::new(engine())
            .validate(&json!({"vector_store_id": "vs", "query_template": "q", "top_k": 0}), None)
            .unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }
}
