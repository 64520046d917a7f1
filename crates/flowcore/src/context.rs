use crate::{NodeId, NodeResult, Value, WorkflowId, events::ExecutionId};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-run accumulator threaded through execution.
///
/// `node_outputs` is append-only: each node writes its result exactly once,
/// and downstream nodes only read entries of predecessors that already
/// finished. The coordinator loop is the single owner, so no lock is needed.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub initiator: Option<String>,
    pub input: Value,
    node_outputs: HashMap<NodeId, NodeResult>,
    cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(
        run_id: ExecutionId,
        workflow_id: WorkflowId,
        input: Value,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            initiator: None,
            input,
            node_outputs: HashMap::new(),
            cancellation,
        }
    }

    pub fn with_initiator(mut self, initiator: Option<String>) -> Self {
        self.initiator = initiator;
        self
    }

    /// Record a node result. Returns `false` (and keeps the first result)
    /// if the node already has one.
    pub fn record(&mut self, node_id: NodeId, result: NodeResult) -> bool {
        if self.node_outputs.contains_key(&node_id) {
            tracing::warn!(run_id = %self.run_id, node_id = %node_id, "node result already recorded");
            return false;
        }
        self.node_outputs.insert(node_id, result);
        true
    }

    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_outputs.get(node_id)
    }

    pub fn node_outputs(&self) -> &HashMap<NodeId, NodeResult> {
        &self.node_outputs
    }

    pub fn into_node_outputs(self) -> HashMap<NodeId, NodeResult> {
        self.node_outputs
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
