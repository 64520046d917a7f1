//! Core abstractions for the flow engine
//!
//! This crate provides the data model, error taxonomy, executor contract and
//! collaborator traits that all other components depend on.

mod context;
mod error;
pub mod events;
mod node;
mod result;
mod store;
mod workflow;

pub use context::RunContext;
pub use error::{DispatchError, FlowError, GraphError, MigrationError, NodeError, WorkflowError};
pub use events::*;
pub use node::{Node, NodeContext, json_type_name};
pub use result::{NodeErrorKind, NodeResult, NodeResultMetadata, RunStatus, RunSummary};
pub use store::{CredentialResolver, MemoryStore, Persistence, StaticCredentials};
pub use workflow::{
    EdgeSpec, ErrorHandling, NodeData, NodeId, NodeOptions, NodeSpec, Position, RetryPolicy,
    TriggerSpec, TriggerType, WorkflowDefinition, WorkflowId, WorkflowSettings,
};

/// Dynamic value type for node inputs, outputs and configuration
pub use serde_json::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
