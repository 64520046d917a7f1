use thiserror::Error;

/// Top-level error for operations that can abort a whole run or request.
///
/// Node-level failures never surface here: they are recorded as data in
/// [`crate::NodeResult`]. Only structural and setup errors reach callers.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Malformed graph. Always fatal, raised before anything is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {edge} references unknown node: {node}")]
    UnknownNode { edge: String, node: String },

    #[error("Cyclic dependency detected between nodes: {}", .nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("Invalid type keys: {}", .issues.join("; "))]
    InvalidTypeKeys { issues: Vec<String> },
}

/// Errors raised by or on behalf of a single node.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node type not found (tried: {})", .candidates.join(", "))]
    TypeNotFound { candidates: Vec<String> },

    #[error("Credentials unavailable for '{0}'")]
    Credentials(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}

/// Upgrading a stored configuration failed. Never fatal: the runner logs it
/// and continues with the original configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("No migration path from version {from} (target {to})")]
    MissingStep { from: u32, to: u32 },

    #[error("Cannot downgrade configuration from version {from} to {to}")]
    Downgrade { from: u32, to: u32 },

    #[error("Migration {from}->{to} failed on field '{field}': {message}")]
    Field {
        from: u32,
        to: u32,
        field: String,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Corrupt queue record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}
