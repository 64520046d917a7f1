//! Workflow execution runtime
//!
//! This crate provides the execution engine that runs workflows: the
//! planner, the node registry with versioned configuration migration, the
//! node runner, the run coordinator, the live execution monitor and
//! background dispatch.

mod coordinator;
pub mod dispatch;
mod migration;
mod monitor;
mod planner;
mod registry;
mod runner;
mod runtime;
mod schema;
mod validate;

pub use coordinator::{RunCoordinator, RunOptions};
pub use migration::{FieldOp, Migration, MigrationChain};
pub use monitor::{EventStream, ExecutionMonitor, RunPublisher, DEFAULT_HEARTBEAT};
pub use planner::{plan, ExecutionGraph, ExecutionPlan};
pub use registry::{
    DeclarativeNode, ExecutorEntry, ExecutorKind, NodeDescriptor, NodeFactory, NodeMetadata,
    NodeRegistry,
};
pub use runner::{
    candidate_type_keys, normalize_config, normalize_output, NodeInvocation, NodeRunner,
    Resolution, DEFAULT_NODE_TIMEOUT,
};
pub use runtime::{FlowRuntime, RuntimeBuilder, RuntimeConfig};
pub use schema::{ConfigIssue, FieldKind, FieldSchema, NodeDefinition};
pub use validate::{validate_definition, validate_type_keys};
