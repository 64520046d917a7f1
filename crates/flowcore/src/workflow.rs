use crate::Value;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            triggers: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Add an edge meaning "`target` consumes the output of `source`".
    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        let source = source.into();
        let target = target.into();
        self.edges.push(EdgeSpec {
            id: format!("{}->{}", source, target),
            source,
            target,
        });
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.add_node(node);
        self
    }

    pub fn with_edge(mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        self.connect(source, target);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.triggers.push(TriggerSpec::new(trigger));
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Authored payload of a node: which executor, how it is configured and
/// which schema version the configuration was written against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub options: NodeOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOptions {
    /// Per-node time budget, overriding the workflow default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Run even when a direct predecessor failed.
    #[serde(default)]
    pub continue_on_fail: bool,

    /// A failure of this node fails the whole run.
    #[serde(default)]
    pub fatal: bool,

    /// Explicit input override merged on top of the assembled input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            data: NodeData::default(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.config.insert(key.into(), value.into());
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.data.subtype = Some(subtype.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.data.version = Some(version);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.data.options.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn continue_on_fail(mut self, value: bool) -> Self {
        self.data.options.continue_on_fail = value;
        self
    }

    pub fn fatal(mut self, value: bool) -> Self {
        self.data.options.fatal = value;
        self
    }

    pub fn with_manual_input(mut self, input: Value) -> Self {
        self.data.options.manual_input = Some(input);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.data.options.retry = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            backoff_multiplier: 1.0,
        });
        self
    }
}

/// Directed edge: `target` consumes `source`'s output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Retry policy for node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,
}

fn default_backoff() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Workflow trigger specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub trigger_type: TriggerType,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl TriggerSpec {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_type,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerType {
    Manual,
    #[serde(rename_all = "camelCase")]
    Interval { every_secs: u64 },
    Cron { expression: String },
    Webhook { path: String },
}

/// Global workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    /// Wall-clock limit for the whole run; expiry cancels it.
    pub max_execution_time_ms: Option<u64>,
    /// Fan-out cap: how many nodes may be in flight at once.
    pub max_parallel_nodes: usize,
    /// Node time budget when the node does not declare its own.
    pub default_timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub on_error: ErrorHandling,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_execution_time_ms: None,
            max_parallel_nodes: 10,
            default_timeout_ms: None,
            retry_policy: None,
            on_error: ErrorHandling::ContinueOnError,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorHandling {
    /// Any node failure fails the run and halts further dispatch.
    StopWorkflow,
    /// Node failures are recorded; the rest of the graph keeps running.
    #[default]
    ContinueOnError,
}
