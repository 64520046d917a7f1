use crate::registry::{ExecutorEntry, NodeRegistry};
use flowcore::{
    CredentialResolver, ExecutionId, NodeContext, NodeError, NodeResult, NodeResultMetadata,
    NodeSpec, RetryPolicy, RunContext, Value, WorkflowId, WorkflowSettings,
};
use serde_json::Map;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Time budget for a node that declares none.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffixes editors and older definitions tend to append to type keys.
const TYPE_SUFFIXES: &[&str] = &["Node", "_node", "-node", ".node", "Trigger", "_trigger"];

/// Ordered, de-duplicated lookup chain for a node: subtype, type, then the
/// same two with known suffixes stripped.
pub fn candidate_type_keys(node: &NodeSpec) -> Vec<String> {
    let primary: Vec<&str> = node
        .data
        .subtype
        .as_deref()
        .into_iter()
        .chain(std::iter::once(node.node_type.as_str()))
        .filter(|k| !k.is_empty())
        .collect();

    let mut candidates: Vec<String> = Vec::new();
    let mut push = |key: &str| {
        if !key.is_empty() && !candidates.iter().any(|c| c == key) {
            candidates.push(key.to_string());
        }
    };

    for key in &primary {
        push(key);
    }
    for key in &primary {
        for suffix in TYPE_SUFFIXES {
            if let Some(stripped) = key.strip_suffix(suffix) {
                push(stripped);
            }
        }
    }
    candidates
}

/// Flatten editor-only structures into the flat shape executors expect.
///
/// - keys starting with `__` are UI state and are dropped
/// - resource locators (`{"__rl": true, "value": v, ..}`) collapse to `v`
/// - a nested `parameters` object is lifted to the top level without
///   overwriting keys already present there
pub fn normalize_config(config: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    let mut lifted = None;

    for (key, value) in config {
        if key.starts_with("__") {
            continue;
        }
        if key == "parameters" {
            if let Value::Object(params) = value {
                lifted = Some(params);
                continue;
            }
        }
        flat.insert(key.clone(), flatten_value(value));
    }

    if let Some(params) = lifted {
        for (key, value) in params {
            if key.starts_with("__") || flat.contains_key(key) {
                continue;
            }
            flat.insert(key.clone(), flatten_value(value));
        }
    }
    flat
}

fn flatten_value(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.get("__rl").and_then(Value::as_bool) == Some(true) => map
            .get("value")
            .map(flatten_value)
            .unwrap_or(Value::Null),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with("__"))
                .map(|(k, v)| (k.clone(), flatten_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(flatten_value).collect()),
        other => other.clone(),
    }
}

/// Turn whatever an executor returned into a [`NodeResult`].
///
/// An object with a boolean `success` is an envelope and passes through
/// (duration filled in when absent); anything else is a bare success value.
pub fn normalize_output(value: Value, elapsed_ms: u64) -> NodeResult {
    let mut envelope = match value {
        Value::Object(envelope) => envelope,
        other => return NodeResult::success(other, elapsed_ms),
    };
    let Some(success) = envelope.get("success").and_then(Value::as_bool) else {
        return NodeResult::success(Value::Object(envelope), elapsed_ms);
    };

    let duration_ms = envelope
        .get("durationMs")
        .or_else(|| envelope.get("duration"))
        .and_then(Value::as_u64)
        .unwrap_or(elapsed_ms);
    let output = envelope
        .remove("output")
        .or_else(|| envelope.remove("data"))
        .unwrap_or(Value::Null);

    if success {
        return NodeResult::success(output, duration_ms);
    }

    let message = match envelope.remove("error") {
        Some(Value::String(s)) => s,
        Some(Value::Object(e)) => e
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(e.clone()).to_string()),
        Some(Value::Null) | None => "node reported failure".to_string(),
        Some(other) => other.to_string(),
    };
    NodeResult::reported_failure(message, output, duration_ms)
}

/// An executor found for a node, and how it was found
#[derive(Clone)]
pub struct Resolution {
    pub entry: ExecutorEntry,
    pub key: String,
    pub fallback_used: bool,
}

/// Everything the runner needs from the run, owned so node futures do not
/// borrow the coordinator's state.
#[derive(Clone)]
pub struct NodeInvocation {
    pub run_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub input: Value,
    pub cancellation: CancellationToken,
    pub default_timeout_ms: Option<u64>,
    pub retry: Option<RetryPolicy>,
}

impl NodeInvocation {
    pub fn new(run: &RunContext, input: Value, settings: &WorkflowSettings) -> Self {
        Self {
            run_id: run.run_id,
            workflow_id: run.workflow_id,
            input,
            cancellation: run.cancellation().clone(),
            default_timeout_ms: settings.default_timeout_ms,
            retry: settings.retry_policy.clone(),
        }
    }
}

/// Invokes one node's executor under a time budget and normalizes the
/// outcome. Never returns an error: failures become failed results.
pub struct NodeRunner {
    registry: Arc<NodeRegistry>,
    default_timeout: Duration,
    credentials: Option<Arc<dyn CredentialResolver>>,
}

impl NodeRunner {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            default_timeout: DEFAULT_NODE_TIMEOUT,
            credentials: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Walk the candidate chain and return the first registered executor.
    pub fn resolve(&self, node: &NodeSpec) -> Result<Resolution, NodeError> {
        let candidates = candidate_type_keys(node);
        for (position, key) in candidates.iter().enumerate() {
            if let Ok(entry) = self.registry.resolve(key) {
                let fallback_used = position > 0;
                if fallback_used {
                    tracing::info!(
                        node_id = %node.id,
                        requested = %candidates[0],
                        resolved = %key,
                        tried = ?&candidates[..position],
                        "resolved node type via fallback"
                    );
                } else {
                    tracing::debug!(node_id = %node.id, node_type = %key, "resolved node type");
                }
                return Ok(Resolution {
                    entry,
                    key: key.clone(),
                    fallback_used,
                });
            }
        }

        tracing::warn!(node_id = %node.id, tried = ?candidates, "node type not found");
        Err(NodeError::TypeNotFound { candidates })
    }

    /// Execute a node against a run, using the run's global input.
    pub async fn execute(&self, node: &NodeSpec, run: &RunContext) -> NodeResult {
        let invocation = NodeInvocation::new(run, run.input.clone(), &WorkflowSettings::default());
        self.invoke(node, invocation).await
    }

    /// Execute a node with an already assembled input.
    pub async fn invoke(&self, node: &NodeSpec, invocation: NodeInvocation) -> NodeResult {
        let mut metadata = NodeResultMetadata {
            node_type: node.node_type.clone(),
            subtype: node.data.subtype.clone(),
            ..NodeResultMetadata::default()
        };

        let resolution = match self.resolve(node) {
            Ok(resolution) => resolution,
            Err(e) => return NodeResult::failure(&e, 0).with_metadata(metadata),
        };
        metadata.version = resolution.entry.version().or(node.data.version);
        metadata.resolved_key = Some(resolution.key.clone());
        metadata.fallback_used = resolution.fallback_used;

        let config = self.prepare_config(node, &resolution.entry);
        let budget = node
            .data
            .options
            .timeout_ms
            .or(invocation.default_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let retry = node.data.options.retry.clone().or(invocation.retry.clone());
        let max_attempts = retry.as_ref().map(|r| r.max_attempts.max(1)).unwrap_or(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let ctx = NodeContext {
                run_id: invocation.run_id,
                workflow_id: invocation.workflow_id,
                node_id: node.id.clone(),
                node_type: resolution.key.clone(),
                input: invocation.input.clone(),
                config: config.clone(),
                credentials: self.credentials.clone(),
                cancellation: invocation.cancellation.clone(),
            };

            let start = Instant::now();
            let outcome = Self::call(&resolution.entry, ctx, budget).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(value) => normalize_output(value, elapsed_ms),
                Err(e) => NodeResult::failure(&e, elapsed_ms),
            };

            if result.success {
                metadata.attempts = attempt;
                return result.with_metadata(metadata);
            }

            tracing::warn!(
                run_id = %invocation.run_id,
                node_id = %node.id,
                node_type = %resolution.key,
                attempt,
                max_attempts,
                error = result.error.as_deref().unwrap_or_default(),
                "node execution failed"
            );

            if attempt >= max_attempts || invocation.cancellation.is_cancelled() {
                metadata.attempts = attempt;
                return result.with_metadata(metadata);
            }

            if let Some(policy) = &retry {
                let factor = policy.backoff_multiplier.max(1.0).powi(attempt as i32 - 1);
                let delay = Duration::from_millis((policy.delay_ms as f64 * factor) as u64);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = invocation.cancellation.cancelled() => {
                        metadata.attempts = attempt;
                        return result.with_metadata(metadata);
                    }
                }
            }
        }
    }

    fn prepare_config(&self, node: &NodeSpec, entry: &ExecutorEntry) -> Map<String, Value> {
        let normalized = normalize_config(&node.data.config);
        let mut config = entry.migrate_config(&node.id, normalized, node.data.version);
        if let ExecutorEntry::Declarative { definition, .. } = entry {
            definition.apply_defaults(&mut config);
        }
        config
    }

    /// Run the executor on its own task and race it against the budget.
    /// When the budget wins, the task is detached rather than aborted.
    async fn call(entry: &ExecutorEntry, ctx: NodeContext, budget: Duration) -> Result<Value, NodeError> {
        let handle = match entry {
            ExecutorEntry::Legacy { factory, .. } => {
                let node = factory.create(&ctx.config)?;
                tokio::spawn(async move { node.execute(ctx).await })
            }
            ExecutorEntry::Declarative { node, .. } => {
                let node = Arc::clone(node);
                tokio::spawn(async move { node.execute(ctx).await })
            }
        };

        match timeout(budget, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(NodeError::ExecutionFailed(format!(
                "executor aborted: {}",
                join_error
            ))),
            Err(_) => Err(NodeError::Timeout {
                millis: budget.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidates_subtype_then_type_then_stripped() {
        let node = NodeSpec::new("a", "httpRequestNode").with_subtype("http.requestTrigger");
        assert_eq!(
            candidate_type_keys(&node),
            vec![
                "http.requestTrigger".to_string(),
                "httpRequestNode".to_string(),
                "http.request".to_string(),
                "httpRequest".to_string(),
            ]
        );
    }

    #[test]
    fn test_candidates_deduplicated() {
        let node = NodeSpec::new("a", "debug.log").with_subtype("debug.log");
        assert_eq!(candidate_type_keys(&node), vec!["debug.log".to_string()]);
    }

    #[test]
    fn test_normalize_config_flattens_ui_structures() {
        let config = json!({
            "__position": [1, 2],
            "url": {"__rl": true, "value": "https://example.com", "mode": "url"},
            "parameters": {"method": "POST", "url": "ignored"},
            "nested": {"__ui": 1, "keep": true}
        });
        let Value::Object(config) = config else { unreachable!() };
        let flat = normalize_config(&config);

        assert_eq!(flat.get("url"), Some(&json!("https://example.com")));
        assert_eq!(flat.get("method"), Some(&json!("POST")));
        assert_eq!(flat.get("nested"), Some(&json!({"keep": true})));
        assert!(!flat.contains_key("__position"));
        assert!(!flat.contains_key("parameters"));
    }

    #[test]
    fn test_normalize_output_envelopes() {
        let ok = normalize_output(json!({"success": true, "output": {"a": 1}}), 7);
        assert!(ok.success);
        assert_eq!(ok.output, json!({"a": 1}));
        assert_eq!(ok.duration_ms, 7);

        let failed = normalize_output(json!({"success": false, "error": "boom", "durationMs": 3}), 7);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.duration_ms, 3);

        let bare = normalize_output(json!({"x": 1}), 1);
        assert!(bare.success);
        assert_eq!(bare.output, json!({"x": 1}));
    }
}
