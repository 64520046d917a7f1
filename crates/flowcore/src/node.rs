use crate::{CredentialResolver, NodeError, NodeId, Value, WorkflowId, events::ExecutionId};
use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "transform.set")
    fn node_type(&self) -> &str;

    /// Execute the node with given context.
    ///
    /// The returned value is either a bare payload (treated as success) or a
    /// `{ "success": bool, "output"?: .., "error"?: .. }` envelope.
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Optional: Validate configuration at workflow load time
    fn validate_config(&self, _config: &Map<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,

    /// Type key the executor was resolved under
    pub node_type: String,

    /// Merged input: global input, predecessor outputs keyed by node id,
    /// and any manual override.
    pub input: Value,

    /// Normalized (and possibly migrated) configuration
    pub config: Map<String, Value>,

    pub credentials: Option<Arc<dyn CredentialResolver>>,

    /// Run-level cancellation. Executors may observe it; nobody forces them to.
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            run_id: ExecutionId::new_v4(),
            workflow_id: WorkflowId::new_v4(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            input: Value::Object(Map::new()),
            config: Map::new(),
            credentials: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Get required input field or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.input
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    pub fn require_config_str(&self, name: &str) -> Result<&str, NodeError> {
        self.require_config(name)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: json_type_name(self.config.get(name)).to_string(),
            })
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Fetch secrets for this node from the configured resolver.
    pub async fn credentials(&self, credential_type: &str) -> Result<Map<String, Value>, NodeError> {
        let resolver = self
            .credentials
            .as_ref()
            .ok_or_else(|| NodeError::Credentials(credential_type.to_string()))?;
        resolver.get_credentials(credential_type, &self.node_id).await
    }
}

/// Name of a JSON value's type, for error messages.
pub fn json_type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
