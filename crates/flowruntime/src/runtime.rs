use crate::coordinator::{RunCoordinator, RunOptions};
use crate::dispatch::{DispatchQueue, RunJob, WorkerPool};
use crate::monitor::{EventStream, ExecutionMonitor, DEFAULT_HEARTBEAT};
use crate::registry::NodeRegistry;
use crate::runner::{NodeRunner, DEFAULT_NODE_TIMEOUT};
use crate::validate;
use flowcore::{
    CredentialResolver, ExecutionId, FlowError, MemoryStore, MonitorEvent, Persistence,
    RunSummary, Value, WorkflowDefinition, WorkflowId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Fan-out ceiling for a single run; workflows may ask for less.
    pub max_parallel_nodes: usize,
    /// Capacity of the all-runs event firehose.
    pub event_buffer_size: usize,
    pub default_node_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            default_node_timeout: DEFAULT_NODE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT,
        }
    }
}

/// Main runtime: owns the registry, coordinator, monitor, persistence and
/// submission queue, and tracks live runs so they can be stopped.
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    coordinator: Arc<RunCoordinator>,
    monitor: Arc<ExecutionMonitor>,
    persistence: Arc<dyn Persistence>,
    queue: Arc<DispatchQueue>,
    active: RwLock<HashMap<ExecutionId, CancellationToken>>,
}

impl FlowRuntime {
    /// Create a new runtime with an empty registry and default settings
    pub fn new() -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), RuntimeConfig::default())
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        RuntimeBuilder::new(registry).config(config).build()
    }

    pub fn builder(registry: Arc<NodeRegistry>) -> RuntimeBuilder {
        RuntimeBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    /// Check a definition before it is stored
    pub fn validate_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), FlowError> {
        validate::validate_definition(workflow, &self.registry)?;
        Ok(())
    }

    /// Validate and store a workflow
    pub async fn register_workflow(&self, workflow: WorkflowDefinition) -> Result<WorkflowId, FlowError> {
        self.validate_workflow(&workflow)?;
        let id = workflow.id;
        self.persistence.save_workflow(workflow).await?;
        Ok(id)
    }

    /// Execute a stored workflow by ID, synchronously
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        inputs: Value,
    ) -> Result<RunSummary, FlowError> {
        let workflow = self.persistence.load_workflow(workflow_id).await?;
        self.execute_with(&workflow, inputs, RunOptions::default()).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(&self, workflow: &WorkflowDefinition, inputs: Value) -> Result<RunSummary, FlowError> {
        self.execute_with(workflow, inputs, RunOptions::default()).await
    }

    pub async fn execute_with(
        &self,
        workflow: &WorkflowDefinition,
        inputs: Value,
        options: RunOptions,
    ) -> Result<RunSummary, FlowError> {
        let run_id = options.run_id.unwrap_or_else(ExecutionId::new_v4);
        let cancel = self.track(run_id).await;

        let result = self
            .coordinator
            .execute_workflow(workflow, inputs, options.with_run_id(run_id), cancel)
            .await;
        self.active.write().await.remove(&run_id);

        let summary = result?;
        if let Err(e) = self.persistence.record_run(&summary).await {
            tracing::warn!(run_id = %run_id, error = %e, "failed to record run summary");
        }
        Ok(summary)
    }

    /// Queue a run for the worker pool and return its id immediately.
    pub async fn submit(&self, job: RunJob) -> Result<ExecutionId, FlowError> {
        let run_id = job.run_id;
        // Track before queueing so a stop request can land before a worker
        // picks the job up.
        self.track(run_id).await;
        match self.queue.submit(job).await {
            Ok(run_id) => Ok(run_id),
            Err(e) => {
                self.active.write().await.remove(&run_id);
                Err(e.into())
            }
        }
    }

    /// Execute a job taken off the queue against its own workflow snapshot
    pub async fn run_job(&self, job: RunJob) -> Result<RunSummary, FlowError> {
        let options = RunOptions {
            run_id: Some(job.run_id),
            priority: Some(job.priority),
            initiator: job.initiator,
        };
        self.execute_with(&job.workflow, job.initial_input, options).await
    }

    /// Request cancellation of a queued or running run. Returns whether the
    /// run was known; the run halts at its next dispatch point.
    pub async fn stop(&self, run_id: ExecutionId) -> bool {
        match self.active.read().await.get(&run_id) {
            Some(token) => {
                tracing::info!(run_id = %run_id, "stop requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, run_id: ExecutionId) -> bool {
        self.active.read().await.contains_key(&run_id)
    }

    pub async fn load_run(&self, run_id: ExecutionId) -> Result<RunSummary, FlowError> {
        Ok(self.persistence.load_run(run_id).await?)
    }

    /// Live events for one run
    pub fn subscribe(&self, run_id: ExecutionId) -> EventStream {
        self.monitor.subscribe(run_id)
    }

    /// Subscribe to execution events of every run
    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.monitor.tap()
    }

    /// Start a fixed pool of workers draining this runtime's queue.
    pub fn start_workers(self: &Arc<Self>, size: usize) -> WorkerPool {
        WorkerPool::spawn(size, Arc::clone(self), Arc::clone(&self.queue))
    }

    async fn track(&self, run_id: ExecutionId) -> CancellationToken {
        self.active
            .write()
            .await
            .entry(run_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles a [`FlowRuntime`] from its collaborators
pub struct RuntimeBuilder {
    registry: Arc<NodeRegistry>,
    config: RuntimeConfig,
    persistence: Option<Arc<dyn Persistence>>,
    queue: Option<DispatchQueue>,
    credentials: Option<Arc<dyn CredentialResolver>>,
}

impl RuntimeBuilder {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            config: RuntimeConfig::default(),
            persistence: None,
            queue: None,
            credentials: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn queue(mut self, queue: DispatchQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn build(self) -> FlowRuntime {
        let mut runner = NodeRunner::new(Arc::clone(&self.registry))
            .with_default_timeout(self.config.default_node_timeout);
        if let Some(credentials) = self.credentials {
            runner = runner.with_credentials(credentials);
        }

        let monitor = Arc::new(ExecutionMonitor::new(
            self.config.heartbeat_interval,
            self.config.event_buffer_size,
        ));
        let coordinator = Arc::new(RunCoordinator::new(
            Arc::new(runner),
            Arc::clone(&monitor),
            self.config.max_parallel_nodes,
        ));

        FlowRuntime {
            registry: self.registry,
            coordinator,
            monitor,
            persistence: self
                .persistence
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            queue: Arc::new(self.queue.unwrap_or_else(DispatchQueue::in_memory)),
            active: RwLock::new(HashMap::new()),
        }
    }
}
