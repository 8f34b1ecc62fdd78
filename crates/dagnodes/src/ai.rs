use crate::checks::validate_metadata;
use crate::meta::{MetaEmbed, MetaJob};
use crate::template::{base_defaults, render_template};
use async_trait::async_trait;
use chrono::Local;
use dagcore::{
    flatten_schema, shape_map, CompletionRequest, ExecutionError, ExpressionEngine, NodeContext,
    NodeOutput, NodeService, NodeType, Shape, ShapeMap, ValidationError, VectorRecord,
    VectorUpsert,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Prompt a language model.
///
/// Output is `{"text": ...}`, or the fields of the parsed reply when the node
/// declares a `structured_output` schema.
pub struct JobService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl JobService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for JobService {
    fn node_type(&self) -> NodeType {
        NodeType::Job
    }

    fn description(&self) -> &str {
        "Render a prompt and call the completion provider"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaJob>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        match structured_output.filter(|s| s.as_object().is_some_and(|o| !o.is_empty())) {
            Some(schema) => Ok(flatten_schema(schema)),
            None => Ok(shape_map([("text", Shape::string())])),
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaJob = ctx.typed_metadata()?;
        let base = base_defaults(Local::now());
        let input = ctx.input_document();
        let engine = ctx.providers.expressions();

        let (prompt, mut warnings) = render_template(&meta.prompt, &base, &input, engine);
        let system = meta.system.as_deref().map(|system| {
            let (rendered, more) = render_template(system, &base, &input, engine);
            warnings.extend(more);
            rendered
        });
        for warning in warnings {
            ctx.events.warn(warning);
        }

        let request = CompletionRequest {
            model: meta.model_name.clone(),
            prompt,
            system,
            temperature: meta.temperature,
            max_tokens: meta.max_tokens,
            stop: meta.stop.unwrap_or_default(),
        };
        ctx.events.info(format!("Calling model {}", meta.model_name));

        let text = ctx
            .providers
            .completion()?
            .complete(request)
            .await
            .map_err(|e| ExecutionError::Provider {
                provider: "completion",
                message: e.0,
            })?;

        let schema = ctx
            .structured_output
            .as_ref()
            .filter(|s| s.as_object().is_some_and(|o| !o.is_empty()));
        match schema {
            Some(schema) => Ok(NodeOutput::from(parse_structured(&text, schema)?)),
            None => Ok(NodeOutput::new().with_output("text", text)),
        }
    }
}

/// Parse a model reply as JSON and check it against the node's schema.
fn parse_structured(text: &str, schema: &Value) -> Result<Map<String, Value>, ExecutionError> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let value: Value = serde_json::from_str(trimmed).map_err(|e| ExecutionError::InvalidInput {
        field: "completion".to_string(),
        expected: format!("JSON matching structured_output ({})", e),
    })?;

    let validator = jsonschema::validator_for(schema)
        .map_err(|e| ExecutionError::Metadata(format!("structured_output: {}", e)))?;
    if let Some(error) = validator.iter_errors(&value).next() {
        return Err(ExecutionError::InvalidInput {
            field: "completion".to_string(),
            expected: format!("JSON matching structured_output ({})", error),
        });
    }

    Ok(match value {
        Value::Object(fields) => fields,
        other => {
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), other);
            wrapped
        }
    })
}

/// Write texts selected from the input into a vector store.
pub struct EmbedService {
    expressions: Arc<dyn ExpressionEngine>,
}

impl EmbedService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl NodeService for EmbedService {
    fn node_type(&self) -> NodeType {
        NodeType::Embed
    }

    fn description(&self) -> &str {
        "Embed selected input text into a vector store"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaEmbed>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(shape_map([("embedded", Shape::boolean()), ("count", Shape::number())]))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaEmbed = ctx.typed_metadata()?;
        let engine = ctx.providers.expressions();
        let document = ctx.input_document();

        let selected = ctx.evaluate(&meta.input_selector)?;
        let items = match selected {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            // Selectors read from the item itself when it is an object.
            let scope = if item.is_object() { &item } else { &document };
            let id = match &meta.id_selector {
                Some(selector) => match engine.evaluate(selector, scope)? {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                },
                None => None,
            };
            let mut metadata = Map::new();
            for (key, selector) in &meta.metadata_map {
                metadata.insert(key.clone(), engine.evaluate(selector, scope)?);
            }
            let text = match &item {
                Value::String(s) => s.clone(),
                Value::Object(fields) => match fields.get("text") {
                    Some(Value::String(s)) => s.clone(),
                    _ => item.to_string(),
                },
                other => other.to_string(),
            };
            records.push(VectorRecord { id, text, metadata });
        }

        if records.is_empty() {
            ctx.events.warn("Nothing selected to embed");
            return Ok(NodeOutput::new()
                .with_output("embedded", false)
                .with_output("count", 0));
        }

        let upsert = VectorUpsert {
            store_id: meta.vector_store_id.clone(),
            namespace: meta.namespace.clone(),
            model: meta.model_name.clone(),
            records,
            upsert: meta.upsert,
        };
        let count = ctx
            .providers
            .vectors()?
            .upsert(upsert)
            .await
            .map_err(|e| ExecutionError::Provider {
                provider: "vector store",
                message: e.0,
            })?;
        ctx.events.info(format!("Embedded {} records into {}", count, meta.vector_store_id));

        Ok(NodeOutput::new()
            .with_output("embedded", true)
            .with_output("count", count))
    }
}
