use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, Value};
use flowruntime::{NodeFactory, NodeMetadata};
use serde_json::Map;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration, then pass the input through
pub struct DelayNode {
    delay: Duration,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        tracing::debug!(node_id = %ctx.node_id, delay_ms = self.delay.as_millis() as u64, "delaying");

        // Stopping a run halts dispatch only; a started delay runs to completion.
        sleep(self.delay).await;
        Ok(ctx.input)
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let delay_ms = match config.get("delay_ms") {
            None | Some(Value::Null) => DEFAULT_DELAY_MS,
            Some(value) => value.as_u64().ok_or_else(|| NodeError::InvalidInputType {
                field: "delay_ms".to_string(),
                expected: "non-negative integer".to_string(),
                actual: flowcore::json_type_name(Some(value)).to_string(),
            })?,
        };
        Ok(Box::new(DelayNode::new(Duration::from_millis(delay_ms))))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
