use async_trait::async_trait;
use flowcore::{json_type_name, NodeContext, NodeError, Value};
use flowruntime::{DeclarativeNode, FieldKind, FieldOp, FieldSchema, Migration, NodeDefinition};
use serde_json::{json, Map};

/// Follow a dotted path (`a.b.0.c`) into a value. An empty path is the
/// value itself.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Assign fixed values, optionally on top of the incoming input.
///
/// Version 1 set a single `field` to `value`; version 2 takes a `values`
/// object so several fields can be set at once.
pub struct SetNode;

#[async_trait]
impl DeclarativeNode for SetNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("transform.set", "transform", 2)
            .with_display_name("Set")
            .with_description("Assign fixed values to the output")
            .with_field(
                FieldSchema::required("values", FieldKind::Object)
                    .with_default(json!({}))
                    .describe("Fields to write into the output"),
            )
            .with_field(
                FieldSchema::optional("keepInput", FieldKind::Boolean)
                    .with_default(json!(false))
                    .describe("Start from the incoming input instead of an empty object"),
            )
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration::new(1, 2)
            .with(FieldOp::rename("includeInput", "keepInput"))
            .with(FieldOp::custom("values", |config| {
                let Some(field) = config.remove("field") else {
                    return Ok(());
                };
                let field = field
                    .as_str()
                    .ok_or_else(|| format!("'field' must be a string, got {}", json_type_name(Some(&field))))?
                    .to_string();
                let value = config.remove("value").unwrap_or(Value::Null);
                let mut values = Map::new();
                values.insert(field, value);
                config.insert("values".to_string(), Value::Object(values));
                Ok(())
            }))]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let values = match ctx.config.get("values") {
            Some(Value::Object(values)) => values.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: "values".to_string(),
                    expected: "object".to_string(),
                    actual: json_type_name(Some(other)).to_string(),
                })
            }
        };
        let keep_input = ctx
            .config
            .get("keepInput")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut output = match (keep_input, ctx.input) {
            (true, Value::Object(input)) => input,
            _ => Map::new(),
        };
        output.extend(values);
        Ok(Value::Object(output))
    }
}

/// Parse a JSON string found in the input
pub struct JsonParseNode;

#[async_trait]
impl DeclarativeNode for JsonParseNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("transform.json_parse", "transform", 1)
            .with_display_name("Parse JSON")
            .with_description("Parse JSON string")
            .with_field(
                FieldSchema::optional("field", FieldKind::String)
                    .with_default(json!("json"))
                    .describe("Dotted path to the string within the input"),
            )
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let field = ctx.require_config_str("field")?;
        let source = lookup(&ctx.input, field).ok_or_else(|| NodeError::MissingInput(field.to_string()))?;
        let text = source.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: field.to_string(),
            expected: "string".to_string(),
            actual: json_type_name(Some(source)).to_string(),
        })?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(json!({ "parsed": parsed }))
    }
}

/// Serialize part of the input (or all of it) to a JSON string
pub struct JsonStringifyNode;

#[async_trait]
impl DeclarativeNode for JsonStringifyNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("transform.json_stringify", "transform", 1)
            .with_display_name("Stringify JSON")
            .with_description("Convert value to JSON string")
            .with_field(
                FieldSchema::optional("field", FieldKind::String)
                    .describe("Dotted path to the value; the whole input when absent"),
            )
            .with_field(FieldSchema::optional("pretty", FieldKind::Boolean).with_default(json!(false)))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let value = match ctx.config.get("field").and_then(Value::as_str) {
            Some(field) => lookup(&ctx.input, field).ok_or_else(|| NodeError::MissingInput(field.to_string()))?,
            None => &ctx.input,
        };
        let pretty = ctx.config.get("pretty").and_then(Value::as_bool).unwrap_or(false);

        let json_str = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(json!({ "json": json_str }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_paths() {
        let value = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(lookup(&value, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup(&value, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(lookup(&value, ""), Some(&value));
        assert_eq!(lookup(&value, "a.x"), None);
        assert_eq!(lookup(&value, "a.b.nope"), None);
    }
}
