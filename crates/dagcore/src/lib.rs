//! Core abstractions for DAG workflow analysis
//!
//! This crate provides the data model, the node service trait, run events
//! and the collaborator interfaces that every other crate depends on. It has
//! no runtime dependencies.

mod error;
pub mod events;
mod node;
pub mod providers;
mod shape;
mod workflow;

pub use error::{DagError, ExecutionError, NodeError, ValidationError};
pub use events::*;
pub use node::{NodeContext, NodeOutput, NodeService};
pub use providers::{
    CompletionProvider, CompletionRequest, ExpressionEngine, ExpressionError, HttpBody,
    HttpMethod, HttpProvider, HttpRequest, HttpResponse, ProviderError, Providers, VectorHit,
    VectorRecord, VectorSearch, VectorStore, VectorUpsert,
};
pub use shape::{flatten_schema, shape_map, Shape, ShapeMap};
pub use workflow::{Edge, Node, NodeId, NodeOptions, NodeType, OnError, Workflow, WorkflowId};

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, DagError>;
