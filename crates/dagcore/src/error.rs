use crate::{ExpressionError, NodeId, NodeType, WorkflowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("Invalid workflow: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A node's `metadata` or `structured_output` does not fit its type.
///
/// Fixable by editing the node; never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("metadata must be a JSON object")]
    MetadataNotObject,

    #[error("structured_output must be a JSON object")]
    StructuredOutputNotObject,

    #[error("Invalid JSON schema in structured_output: {0}")]
    InvalidSchema(String),

    #[error("Unknown fields in metadata: {}", .0.join(", "))]
    UnknownFields(Vec<String>),

    #[error("Invalid {node_type} metadata: {reason}")]
    InvalidMetadata { node_type: NodeType, reason: String },

    #[error("Invalid expression in '{field}': {source}")]
    InvalidExpression {
        field: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Node service not implemented - validation not available")]
    NotImplemented,
}

/// A node failed while planning or executing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input '{field}': expected {expected}")]
    InvalidInput { field: String, expected: String },

    #[error("Invalid metadata at execution time: {0}")]
    Metadata(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("No {0} provider configured")]
    ProviderUnavailable(&'static str),

    #[error("{provider} call failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Node service not implemented - {0} not available")]
    NotImplemented(&'static str),
}

/// Failure surfaced by a node service, split by who can fix it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl NodeError {
    /// True when editing the node's configuration is the fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, NodeError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_listed() {
        let err = ValidationError::UnknownFields(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Unknown fields in metadata: a, b");
    }

    #[test]
    fn node_error_kind() {
        let config: NodeError = ValidationError::MetadataNotObject.into();
        let runtime: NodeError = ExecutionError::Timeout { ms: 10 }.into();
        assert!(config.is_configuration());
        assert!(!runtime.is_configuration());
        assert_eq!(runtime.to_string(), "Timeout after 10ms");
    }

    #[test]
    fn not_implemented_messages() {
        assert_eq!(
            ValidationError::NotImplemented.to_string(),
            "Node service not implemented - validation not available"
        );
        assert_eq!(
            ExecutionError::NotImplemented("planning").to_string(),
            "Node service not implemented - planning not available"
        );
    }
}
