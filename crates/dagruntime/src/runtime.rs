use crate::available::available_data;
use crate::plan::{plan_graph, PlannedStep};
use crate::registry::NodeServiceRegistry;
use crate::repository::{InMemoryWorkflowRepository, WorkflowRepository};
use crate::runs::{stream_run, Reclaimer, RunLogger, RunRegistry, RunState, StreamFrame};
use crate::validate::{validate_graph, validate_triggers, ValidationResult};
use crate::{ExecutionResult, WorkflowExecutor};
use dagcore::{
    DagError, NodeId, NodeService, NodeType, Providers, RunId, ShapeMap, Workflow, WorkflowId,
};
use futures::Stream;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Main entry point: analysis, execution and run tracking
pub struct DagRuntime {
    config: RuntimeConfig,
    services: Arc<NodeServiceRegistry>,
    providers: Providers,
    runs: Arc<RunRegistry>,
    executor: Arc<WorkflowExecutor>,
    workflows: Arc<dyn WorkflowRepository>,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl DagRuntime {
    /// Build the runtime and start the run reclaimer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RuntimeConfig, services: NodeServiceRegistry, providers: Providers) -> Self {
        let runs = Arc::new(RunRegistry::new(config.run_ttl, config.run_queue_capacity));
        let reclaimer = runs.spawn_reclaimer(config.gc_interval);
        let executor = Arc::new(WorkflowExecutor::new(config.node_timeout));

        Self {
            config,
            services: Arc::new(services),
            providers,
            runs,
            executor,
            workflows: Arc::new(InMemoryWorkflowRepository::new()),
            reclaimer: Mutex::new(Some(reclaimer)),
        }
    }

    /// Replace the in-memory workflow store.
    pub fn with_repository(mut self, workflows: Arc<dyn WorkflowRepository>) -> Self {
        self.workflows = workflows;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn services(&self) -> &Arc<NodeServiceRegistry> {
        &self.services
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    pub fn lookup(&self, node_type: NodeType) -> Arc<dyn NodeService> {
        self.services.lookup(node_type)
    }

    /// Structural validation plus trigger warnings.
    pub fn validate_graph(&self, workflow: &Workflow) -> ValidationResult {
        let mut result = validate_graph(&workflow.nodes, &workflow.edges);
        result.warnings.extend(validate_triggers(workflow));
        result
    }

    pub fn plan_graph(&self, workflow: &Workflow, starting_inputs: &ShapeMap) -> Vec<PlannedStep> {
        plan_graph(&workflow.nodes, &workflow.edges, starting_inputs, &self.services)
    }

    pub fn available_data(&self, workflow: &Workflow) -> BTreeMap<NodeId, ShapeMap> {
        available_data(&workflow.nodes, &workflow.edges, &self.services)
    }

    pub async fn register_workflow(&self, workflow: Workflow) -> Result<(), DagError> {
        tracing::info!("Registering workflow {} ({})", workflow.id, workflow.name);
        self.workflows.save(workflow).await
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Workflow, DagError> {
        self.workflows
            .load(workflow_id)
            .await?
            .ok_or(DagError::WorkflowNotFound(workflow_id))
    }

    /// Execute a stored workflow to completion.
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        inputs: Map<String, Value>,
    ) -> Result<ExecutionResult, DagError> {
        let workflow = self.load(workflow_id).await?;
        self.execute(&workflow, inputs).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
    ) -> Result<ExecutionResult, DagError> {
        let run = self.start_run("workflow");
        self.executor
            .execute(workflow, &self.services, &self.providers, &self.runs, run.run_id, inputs)
            .await
    }

    /// Start a stored workflow in the background and return its run id
    /// right away, so observers can `stream` it.
    pub async fn spawn_workflow(
        &self,
        workflow_id: WorkflowId,
        inputs: Map<String, Value>,
    ) -> Result<(RunId, JoinHandle<Result<ExecutionResult, DagError>>), DagError> {
        let workflow = self.load(workflow_id).await?;
        let run = self.start_run("workflow");

        let executor = self.executor.clone();
        let services = self.services.clone();
        let providers = self.providers.clone();
        let runs = self.runs.clone();
        let run_id = run.run_id;
        let handle = tokio::spawn(async move {
            executor
                .execute(&workflow, &services, &providers, &runs, run_id, inputs)
                .await
        });

        Ok((run_id, handle))
    }

    pub fn start_run(&self, kind: &str) -> RunState {
        self.runs.create(kind)
    }

    pub fn run_logger(&self, run_id: RunId) -> RunLogger {
        RunLogger::new(self.runs.clone(), run_id)
    }

    /// Follow a run with the configured heartbeat interval.
    pub fn stream(&self, run_id: RunId) -> impl Stream<Item = StreamFrame> {
        stream_run(self.runs.clone(), run_id, self.config.stream_poll)
    }

    /// Stop the background reclaimer. Safe to call more than once.
    pub async fn shutdown(&self) {
        let reclaimer = self
            .reclaimer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop().await;
            tracing::info!("Runtime shut down");
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// How long a finished run stays observable.
    pub run_ttl: Duration,
    pub gc_interval: Duration,
    pub run_queue_capacity: usize,
    /// Heartbeat interval for run streams.
    pub stream_poll: Duration,
    /// Per-node timeout when the node sets no `timeout_ms`.
    pub node_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_ttl: Duration::from_secs(900),
            gc_interval: Duration::from_secs(60),
            run_queue_capacity: 1024,
            stream_poll: Duration::from_secs(20),
            node_timeout: Duration::from_millis(60_000),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `DAG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            let Some(raw) = lookup(key) else {
                return Ok(None);
            };
            let invalid = |reason: &str| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: reason.to_string(),
            };
            match raw.trim().parse::<u64>() {
                Ok(0) => Err(invalid("must be greater than zero")),
                Ok(n) => Ok(Some(n)),
                Err(e) => Err(invalid(&e.to_string())),
            }
        };

        if let Some(secs) = read("DAG_RUN_TTL_SECS")? {
            config.run_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = read("DAG_GC_INTERVAL_SECS")? {
            config.gc_interval = Duration::from_secs(secs);
        }
        if let Some(n) = read("DAG_RUN_QUEUE_CAPACITY")? {
            config.run_queue_capacity = usize::try_from(n).unwrap_or(usize::MAX);
        }
        if let Some(secs) = read("DAG_STREAM_POLL_SECS")? {
            config.stream_poll = Duration::from_secs(secs);
        }
        if let Some(ms) = read("DAG_NODE_TIMEOUT_MS")? {
            config.node_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
