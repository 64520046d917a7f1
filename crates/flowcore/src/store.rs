//! Contracts for the collaborators the engine consumes but does not own:
//! credential storage and persistence. In-memory implementations back the
//! CLI, the server's default configuration and the tests.

use crate::{
    NodeError, RunSummary, Value, WorkflowDefinition, WorkflowError, WorkflowId,
    events::ExecutionId,
};
use async_trait::async_trait;
use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resolves secrets for a node at execution time.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn get_credentials(
        &self,
        credential_type: &str,
        node_id: &str,
    ) -> Result<Map<String, Value>, NodeError>;
}

/// Durable storage for workflow definitions and run summaries.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowDefinition, WorkflowError>;

    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), WorkflowError>;

    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, WorkflowError>;

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, WorkflowError>;

    async fn record_run(&self, summary: &RunSummary) -> Result<(), WorkflowError>;

    async fn load_run(&self, run_id: ExecutionId) -> Result<RunSummary, WorkflowError>;
}

/// Process-local persistence
#[derive(Default, Clone)]
pub struct MemoryStore {
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowDefinition>>>,
    runs: Arc<RwLock<HashMap<ExecutionId, RunSummary>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowDefinition, WorkflowError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), WorkflowError> {
        self.workflows.write().await.insert(workflow.id, workflow);
        Ok(())
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, WorkflowError> {
        Ok(self.workflows.write().await.remove(&id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(workflows)
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), WorkflowError> {
        self.runs.write().await.insert(summary.run_id, summary.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: ExecutionId) -> Result<RunSummary, WorkflowError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))
    }
}

/// Fixed credential table keyed by credential type
#[derive(Default, Clone)]
pub struct StaticCredentials {
    secrets: HashMap<String, Map<String, Value>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential_type: impl Into<String>, secrets: Map<String, Value>) -> Self {
        self.secrets.insert(credential_type.into(), secrets);
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn get_credentials(
        &self,
        credential_type: &str,
        node_id: &str,
    ) -> Result<Map<String, Value>, NodeError> {
        tracing::debug!(credential_type, node_id, "resolving credentials");
        self.secrets
            .get(credential_type)
            .cloned()
            .ok_or_else(|| NodeError::Credentials(credential_type.to_string()))
    }
}
