use async_trait::async_trait;
use flowcore::{json_type_name, NodeContext, NodeError, Value};
use flowruntime::{DeclarativeNode, FieldKind, FieldOp, FieldSchema, Migration, NodeDefinition};
use reqwest::Method;
use serde_json::{json, Map};

/// HTTP request node
///
/// Non-2xx responses are reported as failures through the result envelope,
/// with the response still attached as output.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// v1 stored headers as `[{ "name": .., "value": .. }]`
fn headers_list_to_object(config: &mut Map<String, Value>) -> Result<(), String> {
    let Some(Value::Array(list)) = config.get("headers") else {
        return Ok(());
    };
    let mut headers = Map::new();
    for entry in list {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "header entry without a name".to_string())?;
        let value = entry.get("value").cloned().unwrap_or(Value::String(String::new()));
        headers.insert(name.to_string(), value);
    }
    config.insert("headers".to_string(), Value::Object(headers));
    Ok(())
}

#[async_trait]
impl DeclarativeNode for HttpRequestNode {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new("http.request", "http", 2)
            .with_display_name("HTTP Request")
            .with_description("Make HTTP requests")
            .with_field(FieldSchema::required("url", FieldKind::String))
            .with_field(FieldSchema::optional("method", FieldKind::String).with_default(json!("GET")))
            .with_field(FieldSchema::optional("headers", FieldKind::Object).with_default(json!({})))
            .with_field(FieldSchema::optional("body", FieldKind::Any))
            .with_field(
                FieldSchema::optional("credentialType", FieldKind::String)
                    .describe("Credential whose 'token' is sent as a bearer token"),
            )
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration::new(1, 2)
            .with(FieldOp::rename("uri", "url"))
            .with(FieldOp::rename("json", "body"))
            .with(FieldOp::custom("headers", headers_list_to_object))]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let url = ctx.require_config_str("url")?;
        let method_name = ctx
            .config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| NodeError::Configuration(format!("Unsupported method: {}", method_name)))?;

        tracing::debug!(node_id = %ctx.node_id, method = %method, url, "sending request");

        let mut request = self.client.request(method, url);

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                match value {
                    Value::String(text) => request = request.header(key, text),
                    other => request = request.header(key, other.to_string()),
                }
            }
        }

        if let Some(credential_type) = ctx.config.get("credentialType").and_then(Value::as_str) {
            let secrets = ctx.credentials(credential_type).await?;
            let token = secrets.get("token").and_then(Value::as_str).ok_or_else(|| {
                NodeError::InvalidInputType {
                    field: format!("{}.token", credential_type),
                    expected: "string".to_string(),
                    actual: json_type_name(secrets.get("token")).to_string(),
                }
            })?;
            request = request.bearer_auth(token);
        }

        request = match ctx.config.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(body),
        };

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        let output = json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        });

        if status.is_success() {
            Ok(output)
        } else {
            Ok(json!({
                "success": false,
                "error": format!("HTTP {}", status),
                "output": output,
            }))
        }
    }
}
