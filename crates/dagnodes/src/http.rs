use crate::checks::validate_metadata;
use crate::meta::{ContentType, MetaCommon, MetaGetApi, MetaPostApi};
use async_trait::async_trait;
use dagcore::{
    shape_map, ExecutionError, ExpressionEngine, HttpBody, HttpMethod, HttpProvider, HttpRequest,
    HttpResponse, NodeContext, NodeOutput, NodeService, NodeType, ProviderError, Shape, ShapeMap,
    ValidationError,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// [`HttpProvider`] backed by a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpProvider for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ms) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        builder = match request.body {
            Some(HttpBody::Json(body)) => builder.json(&body),
            Some(HttpBody::Form(pairs)) => builder.form(&pairs),
            Some(HttpBody::Text(text)) => builder.header("content-type", "text/plain").body(text),
            None => builder,
        };

        tracing::debug!("{:?} {}", request.method, request.url);
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(HttpResponse { status, body })
    }
}

/// Named header sets a node can opt into with `auth_preset`.
pub type AuthPresets = BTreeMap<String, BTreeMap<String, String>>;

fn preset_headers(
    presets: &AuthPresets,
    name: Option<&str>,
    headers: &mut BTreeMap<String, String>,
) -> Result<(), ExecutionError> {
    let Some(name) = name else { return Ok(()) };
    let preset = presets
        .get(name)
        .ok_or_else(|| ExecutionError::Metadata(format!("Unknown auth preset '{}'", name)))?;
    for (key, value) in preset {
        headers.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Ok(())
}

fn response_output(response: HttpResponse) -> NodeOutput {
    NodeOutput::new()
        .with_output("status", response.status)
        .with_output("body", response.body)
}

fn response_shape() -> ShapeMap {
    shape_map([("status", Shape::number()), ("body", Shape::object())])
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn send(ctx: &NodeContext, common: &MetaCommon, mut request: HttpRequest) -> Result<HttpResponse, ExecutionError> {
    request.timeout_ms = common.timeout_ms;
    ctx.events.info(format!("{:?} {}", request.method, request.url));
    let response = ctx
        .providers
        .http()?
        .send(request)
        .await
        .map_err(|e| ExecutionError::Provider {
            provider: "http",
            message: e.0,
        })?;
    ctx.events.info(format!("Response status: {}", response.status));
    Ok(response)
}

/// GET a URL with query parameters computed from the input.
pub struct GetApiService {
    expressions: Arc<dyn ExpressionEngine>,
    presets: AuthPresets,
}

impl GetApiService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self {
            expressions,
            presets: AuthPresets::new(),
        }
    }

    pub fn with_auth_presets(mut self, presets: AuthPresets) -> Self {
        self.presets = presets;
        self
    }
}

#[async_trait]
impl NodeService for GetApiService {
    fn node_type(&self) -> NodeType {
        NodeType::GetApi
    }

    fn description(&self) -> &str {
        "HTTP GET with query parameters from the input"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaGetApi>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(response_shape())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaGetApi = ctx.typed_metadata()?;

        let mut request = HttpRequest::new(HttpMethod::Get, meta.url.clone());
        request.headers = meta.headers.clone();
        preset_headers(&self.presets, meta.auth_preset.as_deref(), &mut request.headers)?;
        for (name, expression) in &meta.query_map {
            request.query.push((name.clone(), as_text(ctx.evaluate(expression)?)));
        }

        let response = send(&ctx, &meta.common, request).await?;
        Ok(response_output(response))
    }
}

/// POST a body assembled from `body_map`.
pub struct PostApiService {
    expressions: Arc<dyn ExpressionEngine>,
    presets: AuthPresets,
}

impl PostApiService {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self {
            expressions,
            presets: AuthPresets::new(),
        }
    }

    pub fn with_auth_presets(mut self, presets: AuthPresets) -> Self {
        self.presets = presets;
        self
    }
}

/// String leaves are expressions, other scalars are literals, objects recurse.
fn build_body(ctx: &NodeContext, map: &Map<String, Value>) -> Result<Map<String, Value>, ExecutionError> {
    let mut body = Map::with_capacity(map.len());
    for (key, value) in map {
        let built = match value {
            Value::String(expression) => ctx.evaluate(expression)?,
            Value::Object(nested) => Value::Object(build_body(ctx, nested)?),
            literal => literal.clone(),
        };
        body.insert(key.clone(), built);
    }
    Ok(body)
}

#[async_trait]
impl NodeService for PostApiService {
    fn node_type(&self) -> NodeType {
        NodeType::PostApi
    }

    fn description(&self) -> &str {
        "HTTP POST with a body built from the input"
    }

    fn validate(&self, metadata: &Value, structured_output: Option<&Value>) -> Result<(), ValidationError> {
        validate_metadata::<MetaPostApi>(metadata, structured_output, self.expressions.as_ref()).map(|_| ())
    }

    fn plan(
        &self,
        _metadata: &Value,
        _input_shape: &ShapeMap,
        _structured_output: Option<&Value>,
    ) -> Result<ShapeMap, ExecutionError> {
        Ok(response_shape())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, ExecutionError> {
        let meta: MetaPostApi = ctx.typed_metadata()?;
        let body = build_body(&ctx, &meta.body_map)?;

        let mut request = HttpRequest::new(HttpMethod::Post, meta.url.clone());
        request.headers = meta.headers.clone();
        preset_headers(&self.presets, meta.auth_preset.as_deref(), &mut request.headers)?;
        request.body = Some(match meta.content_type {
            ContentType::Json => HttpBody::Json(Value::Object(body)),
            ContentType::Form => HttpBody::Form(
                body.into_iter().map(|(key, value)| (key, as_text(value))).collect(),
            ),
            ContentType::Text => HttpBody::Text(Value::Object(body).to_string()),
        });

        let response = send(&ctx, &meta.common, request).await?;
        Ok(response_output(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiExpressionEngine;
    use dagcore::{EventEmitter, Node, Providers};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<HttpRequest>>);

    #[async_trait]
    impl HttpProvider for Capture {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
            self.0.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: 201,
                body: json!({"ok": true}),
            })
        }
    }

    fn engine() -> Arc<dyn ExpressionEngine> {
        Arc::new(RhaiExpressionEngine::new())
    }

    fn run_ctx(node: &Node, http: Arc<Capture>, inputs: Value) -> NodeContext {
        NodeContext::new(node, Providers::new(engine()).with_http(http), EventEmitter::disabled())
            .with_inputs(inputs.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn get_builds_query_and_preset_headers() {
        let http = Arc::new(Capture::default());
        let node = Node::new(1, NodeType::GetApi).with_metadata(json!({
            "url": "https://api.example.com/search",
            "query_map": {"q": "term", "page": "page"},
            "headers": {"accept": "application/json"},
            "auth_preset": "svc",
            "timeout_ms": 1500
        }));
        let mut presets = AuthPresets::new();
        presets.insert(
            "svc".to_string(),
            BTreeMap::from([("authorization".to_string(), "Bearer t".to_string())]),
        );

        let out = GetApiService::new(engine())
            .with_auth_presets(presets)
            .execute(run_ctx(&node, http.clone(), json!({"term": "rust", "page": 2})))
            .await
            .unwrap();
        assert_eq!(out.get("status"), Some(&json!(201)));
        assert_eq!(out.get("body"), Some(&json!({"ok": true})));

        let sent = http.0.lock().unwrap();
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(sent[0].timeout_ms, Some(1500));
        assert!(sent[0].query.contains(&("q".to_string(), "rust".to_string())));
        assert!(sent[0].query.contains(&("page".to_string(), "2".to_string())));
        assert_eq!(sent[0].headers["authorization"], "Bearer t");
        assert_eq!(sent[0].headers["accept"], "application/json");
    }

    #[tokio::test]
    async fn unknown_preset_is_a_metadata_error() {
        let node = Node::new(1, NodeType::GetApi)
            .with_meta("url", "https://api.example.com")
            .with_meta("auth_preset", "nope");
        let err = GetApiService::new(engine())
            .execute(run_ctx(&node, Arc::new(Capture::default()), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Metadata(_)));
    }

    #[tokio::test]
    async fn post_evaluates_body_map() {
        let http = Arc::new(Capture::default());
        let node = Node::new(1, NodeType::PostApi).with_metadata(json!({
            "url": "https://api.example.com/users",
            "body_map": {"name": "user.name", "active": true, "meta": {"source": "src"}}
        }));

        PostApiService::new(engine())
            .execute(run_ctx(&node, http.clone(), json!({"user": {"name": "Ada"}, "src": "cli"})))
            .await
            .unwrap();

        let sent = http.0.lock().unwrap();
        assert_eq!(
            sent[0].body,
            Some(HttpBody::Json(json!({"name": "Ada", "active": true, "meta": {"source": "cli"}})))
        );
    }

    #[tokio::test]
    async fn post_form_body_is_flattened_to_text() {
        let http = Arc::new(Capture::default());
        let node = Node::new(1, NodeType::PostApi).with_metadata(json!({
            "url": "https://api.example.com/form",
            "content_type": "application/x-www-form-urlencoded",
            "body_map": {"n": "count"}
        }));

        PostApiService::new(engine())
            .execute(run_ctx(&node, http.clone(), json!({"count": 3})))
            .await
            .unwrap();

        let sent = http.0.lock().unwrap();
        assert_eq!(sent[0].body, Some(HttpBody::Form(vec![("n".to_string(), "3".to_string())])));
    }

    #[test]
    fn validation_rejects_non_http_urls() {
        let err = GetApiService::new(engine())
            .validate(&json!({"url": "file:///etc/passwd"}), None)
            .unwrap_err();
        assert!(err.to_string().contains("scheme 'file'"));
    }
}
