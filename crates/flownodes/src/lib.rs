//! Standard node library
//!
//! Collection of built-in nodes for common operations. `debug.log` and
//! `time.delay` use the flat factory registration; the rest declare a
//! versioned schema.

mod debug;
mod http;
mod time;
mod transform;

pub use debug::{DebugNode, DebugNodeFactory};
pub use http::HttpRequestNode;
pub use time::{DelayNode, DelayNodeFactory};
pub use transform::{lookup, JsonParseNode, JsonStringifyNode, SetNode};
use flowruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(DebugNodeFactory));
    registry.register(Arc::new(DelayNodeFactory));
    registry.register_declarative(Arc::new(SetNode));
    registry.register_declarative(Arc::new(JsonParseNode));
    registry.register_declarative(Arc::new(JsonStringifyNode));
    registry.register_declarative(Arc::new(HttpRequestNode::new()));
}

/// A registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
