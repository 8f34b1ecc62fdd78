//! Standard node library
//!
//! Built-in services for every node type that has a working implementation,
//! plus the default expression engine and HTTP client they run against.
//! `for_each`, `split`, `advanced` and `workflow` have no service here and
//! resolve to the registry's fallback.

mod ai;
mod checks;
mod control;
pub mod expression;
mod http;
pub mod meta;
mod search;
pub mod template;
mod transform;

pub use ai::{EmbedService, JobService};
pub use checks::{check_structured_output, validate_metadata};
pub use control::{IfElseService, MergeService, ReturnService};
pub use expression::{is_truthy, RhaiExpressionEngine};
pub use http::{AuthPresets, GetApiService, PostApiService, ReqwestHttpClient};
pub use search::{GuruService, VectorQueryService};
pub use transform::{FilterService, MapService};

use dagcore::{ExpressionEngine, Providers};
use dagruntime::NodeServiceRegistry;
use std::sync::Arc;

/// Register all standard node services with a registry
pub fn register_all(registry: &mut NodeServiceRegistry, expressions: Arc<dyn ExpressionEngine>) {
    registry.register(Arc::new(JobService::new(expressions.clone())));
    registry.register(Arc::new(EmbedService::new(expressions.clone())));
    registry.register(Arc::new(GuruService::new(expressions.clone())));
    registry.register(Arc::new(GetApiService::new(expressions.clone())));
    registry.register(Arc::new(PostApiService::new(expressions.clone())));
    registry.register(Arc::new(VectorQueryService::new(expressions.clone())));
    registry.register(Arc::new(FilterService::new(expressions.clone())));
    registry.register(Arc::new(MapService::new(expressions.clone())));
    registry.register(Arc::new(IfElseService::new(expressions.clone())));
    registry.register(Arc::new(MergeService::new(expressions.clone())));
    registry.register(Arc::new(ReturnService::new(expressions)));
}

/// A registry holding every standard service.
pub fn standard_registry(expressions: Arc<dyn ExpressionEngine>) -> NodeServiceRegistry {
    let mut registry = NodeServiceRegistry::new();
    register_all(&mut registry, expressions);
    registry
}

/// Providers with the built-in expression engine and a `reqwest` HTTP client.
///
/// Completion and vector store providers are left unset.
pub fn standard_providers() -> Providers {
    Providers::new(Arc::new(RhaiExpressionEngine::new())).with_http(Arc::new(ReqwestHttpClient::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagcore::NodeType;

    #[test]
    fn registers_implemented_types() {
        let registry = standard_registry(Arc::new(RhaiExpressionEngine::new()));
        let types = registry.list_node_types();
        assert_eq!(types.len(), 11);
        assert!(registry.is_implemented(NodeType::Job));
        assert!(registry.is_implemented(NodeType::Return));
        assert!(!registry.is_implemented(NodeType::ForEach));
        assert!(!registry.is_implemented(NodeType::Workflow));
    }

    #[test]
    fn lookup_returns_matching_service() {
        let registry = standard_registry(Arc::new(RhaiExpressionEngine::new()));
        for node_type in registry.list_node_types() {
            assert_eq!(registry.lookup(node_type).node_type(), node_type);
        }
    }
}
