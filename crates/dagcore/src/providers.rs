//! Narrow interfaces to the collaborators node services call out to.
//!
//! The analysis engine never touches these; only `NodeService::execute`
//! and metadata validation (expression syntax) do.

use crate::ExecutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Expression cannot be empty")]
    Empty,

    #[error("Syntax error in '{expression}': {message}")]
    Syntax { expression: String, message: String },

    #[error("Evaluation of '{expression}' failed: {message}")]
    Evaluation { expression: String, message: String },

    #[error("Evaluation of '{expression}' timed out after {timeout_ms}ms")]
    Timeout { expression: String, timeout_ms: u64 },
}

/// Black-box `(expression, data) -> value` evaluator.
pub trait ExpressionEngine: Send + Sync {
    fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError>;

    fn validate_syntax(&self, expression: &str) -> Result<(), ExpressionError>;
}

/// Failure reported by an outbound integration.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        ProviderError(message)
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        ProviderError(message.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<HttpBody>,
    pub timeout_ms: Option<u64>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait HttpProvider: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: Option<String>,
    pub text: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct VectorUpsert {
    pub store_id: String,
    pub namespace: Option<String>,
    pub model: Option<String>,
    pub records: Vec<VectorRecord>,
    /// Replace records with matching ids instead of inserting duplicates.
    pub upsert: bool,
}

#[derive(Debug, Clone)]
pub struct VectorSearch {
    pub store_id: String,
    pub namespace: Option<String>,
    pub query: String,
    pub top_k: usize,
    pub filters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: Value,
}

/// Vector index; also backs knowledge-space (`guru`) lookups.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, request: VectorUpsert) -> Result<usize, ProviderError>;

    async fn query(&self, search: VectorSearch) -> Result<Vec<VectorHit>, ProviderError>;
}

/// The collaborators handed to every node execution.
#[derive(Clone)]
pub struct Providers {
    expressions: Arc<dyn ExpressionEngine>,
    completion: Option<Arc<dyn CompletionProvider>>,
    http: Option<Arc<dyn HttpProvider>>,
    vectors: Option<Arc<dyn VectorStore>>,
}

impl Providers {
    pub fn new(expressions: Arc<dyn ExpressionEngine>) -> Self {
        Self {
            expressions,
            completion: None,
            http: None,
            vectors: None,
        }
    }

    pub fn with_completion(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(provider);
        self
    }

    pub fn with_http(mut self, provider: Arc<dyn HttpProvider>) -> Self {
        self.http = Some(provider);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(store);
        self
    }

    pub fn expressions(&self) -> &dyn ExpressionEngine {
        self.expressions.as_ref()
    }

    pub fn completion(&self) -> Result<&dyn CompletionProvider, ExecutionError> {
        self.completion
            .as_deref()
            .ok_or(ExecutionError::ProviderUnavailable("completion"))
    }

    pub fn http(&self) -> Result<&dyn HttpProvider, ExecutionError> {
        self.http
            .as_deref()
            .ok_or(ExecutionError::ProviderUnavailable("http"))
    }

    pub fn vectors(&self) -> Result<&dyn VectorStore, ExecutionError> {
        self.vectors
            .as_deref()
            .ok_or(ExecutionError::ProviderUnavailable("vector store"))
    }
}
