#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, NodeSpec, Value};
use flowruntime::{
    DeclarativeNode, FieldKind, FieldOp, FieldSchema, FlowRuntime, Migration, NodeDefinition,
    NodeFactory, NodeMetadata, NodeRegistry, RuntimeConfig,
};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .try_init();
}

/// Returns its `value` config, or its input when none is set.
pub struct ConstNode;

#[async_trait]
impl DeclarativeNode for ConstNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.const", "test", 1).with_field(FieldSchema::optional("value", FieldKind::Any))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.config.get("value").cloned().unwrap_or(ctx.input))
    }
}

/// Always throws.
pub struct FailNode;

#[async_trait]
impl DeclarativeNode for FailNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.fail", "test", 1)
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

/// Panics inside the executor.
pub struct PanicNode;

#[async_trait]
impl DeclarativeNode for PanicNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.panic", "test", 1)
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        panic!("executor blew up");
    }
}

/// Never returns and ignores cancellation.
pub struct HangNode;

#[async_trait]
impl DeclarativeNode for HangNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.hang", "test", 1)
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

/// Sleeps for `ms`, tracking how many instances run at once.
#[derive(Default)]
pub struct SleepNode {
    pub current: AtomicUsize,
    pub peak: AtomicUsize,
}

#[async_trait]
impl DeclarativeNode for SleepNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.sleep", "test", 1)
            .with_field(FieldSchema::optional("ms", FieldKind::Number).with_default(json!(20)))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let ms = ctx.config.get("ms").and_then(Value::as_u64).unwrap_or(20);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "slept": ms }))
    }
}

/// Fails until it has been called `succeed_on` times.
pub struct FlakyNode {
    pub calls: AtomicU32,
    pub succeed_on: u32,
}

#[async_trait]
impl DeclarativeNode for FlakyNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.flaky", "test", 1)
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.succeed_on {
            Err(NodeError::ExecutionFailed(format!("attempt {} failed", call)))
        } else {
            Ok(json!({ "calls": call }))
        }
    }
}

/// Version 3 executor whose v1 config had `name`, renamed to `label` in v2,
/// then nested under `display` in v3.
pub struct VersionedNode;

#[async_trait]
impl DeclarativeNode for VersionedNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("test.versioned", "test", 3)
            .with_field(FieldSchema::required("display", FieldKind::Object))
            .with_field(FieldSchema::optional("mode", FieldKind::String).with_default(json!("fast")))
            .with_field(FieldSchema::optional("count", FieldKind::Number))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![
            Migration::new(1, 2).with(FieldOp::rename("name", "label")),
            Migration::new(2, 3)
                .with(FieldOp::nest(["label"], "display"))
                .with(FieldOp::remove("legacyFlag")),
        ]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Object(ctx.config))
    }
}

/// Flat executor registered through a factory; echoes its input.
pub struct LegacyEchoNode;

#[async_trait]
impl Node for LegacyEchoNode {
    fn node_type(&self) -> &str {
        "legacy.echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.input)
    }
}

pub struct LegacyEchoFactory;

impl NodeFactory for LegacyEchoFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LegacyEchoNode))
    }

    fn node_type(&self) -> &str {
        "legacy.echo"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Echoes its input".to_string(),
            category: "legacy".to_string(),
        }
    }
}

pub struct TestNodes {
    pub sleep: Arc<SleepNode>,
    pub flaky: Arc<FlakyNode>,
}

pub fn test_registry() -> (NodeRegistry, TestNodes) {
    let sleep = Arc::new(SleepNode::default());
    let flaky = Arc::new(FlakyNode {
        calls: AtomicU32::new(0),
        succeed_on: 3,
    });

    let mut registry = NodeRegistry::new();
    registry.register_declarative(Arc::new(ConstNode));
    registry.register_declarative(Arc::new(FailNode));
    registry.register_declarative(Arc::new(HangNode));
    registry.register_declarative(Arc::new(PanicNode));
    registry.register_declarative(sleep.clone());
    registry.register_declarative(flaky.clone());
    registry.register_declarative(Arc::new(VersionedNode));
    registry.register(Arc::new(LegacyEchoFactory));

    (registry, TestNodes { sleep, flaky })
}

pub fn test_runtime() -> (Arc<FlowRuntime>, TestNodes) {
    init_tracing();
    let (registry, nodes) = test_registry();
    let runtime = FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default());
    (Arc::new(runtime), nodes)
}

pub fn const_node(id: &str, value: Value) -> NodeSpec {
    NodeSpec::new(id, "test.const").with_config("value", value)
}
