use crate::{NodeError, NodeId, Value, WorkflowId, events::ExecutionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of a node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeErrorKind {
    TypeNotFound,
    Timeout,
    Executor,
    Cancelled,
}

impl From<&NodeError> for NodeErrorKind {
    fn from(err: &NodeError) -> Self {
        match err {
            NodeError::TypeNotFound { .. } => NodeErrorKind::TypeNotFound,
            NodeError::Timeout { .. } => NodeErrorKind::Timeout,
            NodeError::Cancelled => NodeErrorKind::Cancelled,
            _ => NodeErrorKind::Executor,
        }
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeResultMetadata {
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Key the executor was actually found under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_key: Option<String>,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub attempts: u32,
}

/// Outcome of one node in one run. Written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<NodeErrorKind>,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: NodeResultMetadata,
}

impl NodeResult {
    pub fn success(output: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            error_kind: None,
            duration_ms,
            metadata: NodeResultMetadata::default(),
        }
    }

    pub fn failure(error: &NodeError, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.to_string()),
            error_kind: Some(NodeErrorKind::from(error)),
            duration_ms,
            metadata: NodeResultMetadata::default(),
        }
    }

    /// Failure reported by the executor itself through an envelope.
    pub fn reported_failure(message: impl Into<String>, output: Value, duration_ms: u64) -> Self {
        Self {
            success: false,
            output,
            error: Some(message.into()),
            error_kind: Some(NodeErrorKind::Executor),
            duration_ms,
            metadata: NodeResultMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: NodeResultMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(NodeErrorKind::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub node_results: BTreeMap<NodeId, NodeResult>,
    /// Planned dispatch order; identical for identical definitions.
    pub execution_order: Vec<NodeId>,
    /// Nodes not run because a predecessor failed.
    #[serde(default)]
    pub skipped: Vec<NodeId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.get(node_id)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
