//! Typed node metadata.
//!
//! Every node type deserializes its `metadata` object into one of these
//! structs. Range and length rules live on the fields; anything the derive
//! cannot express goes in [`Metadata::extra_checks`].

pub use dagcore::OnError;

use dagcore::{NodeOptions, NodeType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use validator::Validate;

/// Keys accepted by every node type.
pub const COMMON_FIELDS: &[&str] = &["name", "description", "timeout_ms", "retry", "on_error", "tags"];

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct MetaCommon {
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub timeout_ms: Option<u64>,
    pub retry: Option<u32>,
    pub on_error: Option<OnError>,
    pub tags: Option<Vec<String>>,
}

impl MetaCommon {
    /// The options the executor acts on.
    pub fn options(&self) -> NodeOptions {
        NodeOptions {
            timeout_ms: self.timeout_ms,
            retry: self.retry,
            on_error: self.on_error,
        }
    }
}

/// A metadata model for one node type.
pub trait Metadata: DeserializeOwned + Validate {
    const NODE_TYPE: NodeType;

    /// Type-specific keys, on top of [`COMMON_FIELDS`].
    const FIELDS: &'static [&'static str];

    /// `(field path, expression)` pairs to syntax-check.
    fn expressions(&self) -> Vec<(String, &str)> {
        Vec::new()
    }

    /// `(field, template)` pairs whose `{{ }}` placeholders are checked.
    fn templates(&self) -> Vec<(&'static str, &str)> {
        Vec::new()
    }

    fn extra_checks(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Scalar allowed in filters and mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::from(*i),
            Literal::Text(s) => Value::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[default]
    #[serde(rename = "application/json", alias = "json")]
    Json,
    #[serde(rename = "application/x-www-form-urlencoded", alias = "form")]
    Form,
    #[serde(rename = "text/plain", alias = "text")]
    Text,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Form => "application/x-www-form-urlencoded",
            ContentType::Text => "text/plain",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Union,
    Concat,
    PreferLeft,
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    5
}

fn default_status_code() -> u16 {
    200
}

fn check_http_url(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("url: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("url: scheme '{}' is not http or https", other)),
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaJob {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub prompt: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub model_name: String,
    #[validate(range(min = 0.0, max = 2.0, message = "must be between 0 and 2"))]
    pub temperature: Option<f64>,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub system: Option<String>,
}

impl Metadata for MetaJob {
    const NODE_TYPE: NodeType = NodeType::Job;
    const FIELDS: &'static [&'static str] =
        &["prompt", "model_name", "temperature", "max_tokens", "stop", "system"];

    fn templates(&self) -> Vec<(&'static str, &str)> {
        let mut templates = vec![("prompt", self.prompt.as_str())];
        if let Some(system) = &self.system {
            templates.push(("system", system.as_str()));
        }
        templates
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaEmbed {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub vector_store_id: String,
    pub namespace: Option<String>,
    pub model_name: Option<String>,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub input_selector: String,
    pub id_selector: Option<String>,
    #[serde(default)]
    pub metadata_map: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub upsert: bool,
}

impl Metadata for MetaEmbed {
    const NODE_TYPE: NodeType = NodeType::Embed;
    const FIELDS: &'static [&'static str] = &[
        "vector_store_id",
        "namespace",
        "model_name",
        "input_selector",
        "id_selector",
        "metadata_map",
        "upsert",
    ];

    fn expressions(&self) -> Vec<(String, &str)> {
        let mut exprs = vec![("input_selector".to_string(), self.input_selector.as_str())];
        if let Some(id) = &self.id_selector {
            exprs.push(("id_selector".to_string(), id.as_str()));
        }
        for (key, expr) in &self.metadata_map {
            exprs.push((format!("metadata_map.{}", key), expr.as_str()));
        }
        exprs
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaGuru {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    pub space: String,
    pub query_template: String,
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub top_k: usize,
    #[serde(default)]
    pub filters: BTreeMap<String, Literal>,
}

impl Metadata for MetaGuru {
    const NODE_TYPE: NodeType = NodeType::Guru;
    const FIELDS: &'static [&'static str] = &["space", "query_template", "top_k", "filters"];

    fn templates(&self) -> Vec<(&'static str, &str)> {
        vec![("query_template", self.query_template.as_str())]
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaGetApi {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    #[validate(url(message = "must be a valid URL"))]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_map: BTreeMap<String, String>,
    pub auth_preset: Option<String>,
}

impl Metadata for MetaGetApi {
    const NODE_TYPE: NodeType = NodeType::GetApi;
    const FIELDS: &'static [&'static str] = &["url", "headers", "query_map", "auth_preset"];

    fn expressions(&self) -> Vec<(String, &str)> {
        self.query_map
            .iter()
            .map(|(key, expr)| (format!("query_map.{}", key), expr.as_str()))
            .collect()
    }

    fn extra_checks(&self) -> Result<(), String> {
        check_http_url(&self.url)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaPostApi {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    #[validate(url(message = "must be a valid URL"))]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body_map: Map<String, Value>,
    #[serde(default)]
    pub content_type: ContentType,
    pub auth_preset: Option<String>,
}

impl MetaPostApi {
    fn collect_body_expressions<'a>(
        map: &'a Map<String, Value>,
        prefix: &str,
        out: &mut Vec<(String, &'a str)>,
    ) {
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                Value::String(expr) => out.push((format!("body_map.{}", path), expr.as_str())),
                Value::Object(nested) => Self::collect_body_expressions(nested, &path, out),
                _ => {}
            }
        }
    }

    fn check_body_map(map: &Map<String, Value>, prefix: &str) -> Result<(), String> {
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                Value::Object(nested) => Self::check_body_map(nested, &path)?,
                Value::Array(_) => {
                    return Err(format!(
                        "body_map value at '{}' must be a string (expression), literal value, or nested object",
                        path
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Metadata for MetaPostApi {
    const NODE_TYPE: NodeType = NodeType::PostApi;
    const FIELDS: &'static [&'static str] =
        &["url", "headers", "body_map", "content_type", "auth_preset"];

    fn expressions(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        Self::collect_body_expressions(&self.body_map, "", &mut out);
        out
    }

    fn extra_checks(&self) -> Result<(), String> {
        check_http_url(&self.url)?;
        Self::check_body_map(&self.body_map, "")
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaVectorQuery {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    pub vector_store_id: String,
    pub namespace: Option<String>,
    pub query_template: String,
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub top_k: usize,
    #[serde(default)]
    pub filters: BTreeMap<String, Literal>,
}

impl Metadata for MetaVectorQuery {
    const NODE_TYPE: NodeType = NodeType::VectorQuery;
    const FIELDS: &'static [&'static str] =
        &["vector_store_id", "namespace", "query_template", "top_k", "filters"];

    fn templates(&self) -> Vec<(&'static str, &str)> {
        vec![("query_template", self.query_template.as_str())]
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaFilter {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    pub items_selector: Option<String>,
    #[serde(rename = "where")]
    pub condition: String,
}

impl Metadata for MetaFilter {
    const NODE_TYPE: NodeType = NodeType::Filter;
    const FIELDS: &'static [&'static str] = &["items_selector", "where"];

    fn expressions(&self) -> Vec<(String, &str)> {
        let mut exprs = vec![("where".to_string(), self.condition.as_str())];
        if let Some(selector) = &self.items_selector {
            exprs.push(("items_selector".to_string(), selector.as_str()));
        }
        exprs
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaMap {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    pub mapping: BTreeMap<String, Literal>,
}

impl Metadata for MetaMap {
    const NODE_TYPE: NodeType = NodeType::Map;
    const FIELDS: &'static [&'static str] = &["mapping"];

    fn expressions(&self) -> Vec<(String, &str)> {
        self.mapping
            .iter()
            .filter_map(|(key, value)| match value {
                Literal::Text(expr) => Some((format!("mapping.{}", key), expr.as_str())),
                _ => None,
            })
            .collect()
    }

    fn extra_checks(&self) -> Result<(), String> {
        if self.mapping.is_empty() {
            return Err("mapping cannot be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaIfElse {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    pub predicate: String,
}

impl Metadata for MetaIfElse {
    const NODE_TYPE: NodeType = NodeType::IfElse;
    const FIELDS: &'static [&'static str] = &["predicate"];

    fn expressions(&self) -> Vec<(String, &str)> {
        vec![("predicate".to_string(), self.predicate.as_str())]
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaMerge {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    #[serde(default)]
    pub strategy: MergeStrategy,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub expected_parents: Option<u32>,
}

impl Metadata for MetaMerge {
    const NODE_TYPE: NodeType = NodeType::Merge;
    const FIELDS: &'static [&'static str] = &["strategy", "expected_parents"];
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetaReturn {
    #[serde(flatten)]
    #[validate(nested)]
    pub common: MetaCommon,
    pub payload_selector: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default = "default_status_code")]
    #[validate(range(min = 100, max = 599, message = "must be between 100 and 599"))]
    pub status_code: u16,
}

impl Metadata for MetaReturn {
    const NODE_TYPE: NodeType = NodeType::Return;
    const FIELDS: &'static [&'static str] = &["payload_selector", "content_type", "status_code"];

    fn expressions(&self) -> Vec<(String, &str)> {
        vec![("payload_selector".to_string(), self.payload_selector.as_str())]
    }
}
