use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle events published for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "workflow:start")]
    WorkflowStart,
    #[serde(rename = "node:start")]
    NodeStart,
    #[serde(rename = "node:success")]
    NodeSuccess,
    #[serde(rename = "node:error")]
    NodeError,
    #[serde(rename = "workflow:complete")]
    WorkflowComplete,
    #[serde(rename = "workflow:error")]
    WorkflowError,
    #[serde(rename = "workflow:cancelled")]
    WorkflowCancelled,
    #[serde(rename = "run:complete")]
    RunComplete,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Ping => "ping",
            EventType::WorkflowStart => "workflow:start",
            EventType::NodeStart => "node:start",
            EventType::NodeSuccess => "node:success",
            EventType::NodeError => "node:error",
            EventType::WorkflowComplete => "workflow:complete",
            EventType::WorkflowError => "workflow:error",
            EventType::WorkflowCancelled => "workflow:cancelled",
            EventType::RunComplete => "run:complete",
        }
    }

    /// Events that end a run. Keep-alive events are never terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventType::WorkflowComplete
                | EventType::WorkflowError
                | EventType::WorkflowCancelled
                | EventType::RunComplete
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on a run's channel. Serializes as
/// `{ "event": "node:start", "runId": .., "data": .., "timestamp": .. }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub event: EventType,
    pub run_id: ExecutionId,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl MonitorEvent {
    pub fn new(event: EventType, run_id: ExecutionId, data: Value) -> Self {
        Self {
            event,
            run_id,
            data,
            timestamp: Utc::now(),
        }
    }
}
