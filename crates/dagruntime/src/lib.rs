//! Workflow analysis and execution runtime
//!
//! This crate provides the graph analyses (validation, shape planning,
//! available data), the node service registry, the sequential executor and
//! the in-memory run registry that observers stream progress from.

mod available;
mod executor;
pub mod graph;
mod plan;
mod registry;
mod repository;
pub mod runs;
mod runtime;
mod validate;

#[cfg(test)]
mod testing;

pub use available::available_data;
pub use executor::{ExecutionResult, WorkflowExecutor};
pub use graph::GraphModel;
pub use plan::{plan_graph, PlannedStep};
pub use registry::{NodeServiceRegistry, UnimplementedService};
pub use repository::{load_workflow_file, InMemoryWorkflowRepository, WorkflowRepository};
pub use runs::{stream_run, Reclaimer, RunLogger, RunRegistry, RunState, StreamFrame};
pub use runtime::{ConfigError, DagRuntime, RuntimeConfig};
pub use validate::{is_valid_cron, validate_graph, validate_triggers, ValidationResult};
