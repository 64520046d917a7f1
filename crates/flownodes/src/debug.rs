use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, Value};
use flowruntime::{NodeFactory, NodeMetadata};
use serde_json::{json, Map};

/// Simple debug node that logs its input
pub struct DebugNode {
    label: Option<String>,
}

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = ctx
            .config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(
            run_id = %ctx.run_id,
            node_id = %ctx.node_id,
            label = self.label.as_deref().unwrap_or(""),
            input = %ctx.input,
            "DEBUG: {}",
            message
        );

        Ok(json!({
            "message": message,
            "input": ctx.input,
        }))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let label = match config.get("label") {
            None | Some(Value::Null) => None,
            Some(Value::String(label)) => Some(label.clone()),
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: "label".to_string(),
                    expected: "string".to_string(),
                    actual: flowcore::json_type_name(Some(other)).to_string(),
                })
            }
        };
        Ok(Box::new(DebugNode { label }))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
