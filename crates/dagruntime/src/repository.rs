use async_trait::async_trait;
use dagcore::{DagError, Workflow, WorkflowId};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Where workflows come from.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn load(&self, id: WorkflowId) -> Result<Option<Workflow>, DagError>;

    /// Store or replace a workflow. Read-only backends keep the default.
    async fn save(&self, workflow: Workflow) -> Result<(), DagError> {
        Err(DagError::Config(format!(
            "workflow repository is read-only, cannot save workflow {}",
            workflow.id
        )))
    }
}

/// Workflows held in process memory.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<_> = self.workflows.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn load(&self, id: WorkflowId) -> Result<Option<Workflow>, DagError> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn save(&self, workflow: Workflow) -> Result<(), DagError> {
        self.workflows.write().await.insert(workflow.id, workflow);
        Ok(())
    }
}

/// Read a workflow definition from a JSON file.
pub async fn load_workflow_file(path: impl AsRef<Path>) -> Result<Workflow, DagError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path).await?;
    let workflow: Workflow = serde_json::from_str(&text)?;
    tracing::debug!("Loaded workflow {} from {}", workflow.id, path.display());
    Ok(workflow)
}
