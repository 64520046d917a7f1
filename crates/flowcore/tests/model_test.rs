use flowcore::{
    CredentialResolver, ErrorHandling, EventType, MemoryStore, MonitorEvent, NodeError,
    NodeErrorKind, NodeResult, Persistence, RunContext, StaticCredentials, TriggerType,
    WorkflowDefinition, WorkflowError,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[test]
fn test_definition_parses_editor_json() {
    let raw = json!({
        "name": "orders",
        "nodes": [
            { "id": "fetch", "type": "http.request", "data": { "version": 1, "config": { "uri": "http://x" } } },
            {
                "id": "log",
                "type": "debug",
                "data": {
                    "subtype": "debug.log",
                    "options": { "continueOnFail": true, "timeoutMs": 500, "manualInput": { "k": 1 } }
                },
                "position": { "x": 10.0, "y": 20.0 }
            }
        ],
        "edges": [{ "source": "fetch", "target": "log" }],
        "triggers": [{ "triggerType": { "type": "interval", "everySecs": 30 } }],
        "settings": { "maxParallelNodes": 3, "onError": "stopWorkflow" }
    });

    let workflow: WorkflowDefinition = serde_json::from_value(raw).unwrap();

    assert_eq!(workflow.nodes.len(), 2);
    assert_eq!(workflow.nodes[0].data.version, Some(1));
    let log = workflow.find_node("log").unwrap();
    assert_eq!(log.data.subtype.as_deref(), Some("debug.log"));
    assert!(log.data.options.continue_on_fail);
    assert_eq!(log.data.options.timeout_ms, Some(500));
    assert_eq!(log.data.options.manual_input, Some(json!({ "k": 1 })));
    assert_eq!(workflow.edges[0].source, "fetch");
    assert!(workflow.triggers[0].enabled);
    assert_eq!(workflow.triggers[0].trigger_type, TriggerType::Interval { every_secs: 30 });
    assert_eq!(workflow.settings.max_parallel_nodes, 3);
    assert_eq!(workflow.settings.on_error, ErrorHandling::StopWorkflow);
    assert_eq!(workflow.settings.max_execution_time_ms, None);
}

#[test]
fn test_connect_labels_edges() {
    let workflow = WorkflowDefinition::new("labels").with_edge("a", "b");
    assert_eq!(workflow.edges[0].id, "a->b");
}

#[test]
fn test_failure_classification() {
    let timeout = NodeResult::failure(&NodeError::Timeout { millis: 5 }, 5);
    assert!(timeout.is_timeout());
    assert!(!timeout.success);

    let missing = NodeResult::failure(&NodeError::MissingInput("json".to_string()), 0);
    assert_eq!(missing.error_kind, Some(NodeErrorKind::Executor));
    assert!(missing.error.unwrap().contains("json"));

    let serialized = serde_json::to_value(NodeResult::success(json!(1), 3)).unwrap();
    assert_eq!(serialized["durationMs"], 3);
    assert!(serialized.get("error").is_none());
}

#[test]
fn test_run_context_keeps_first_result() {
    let mut run = RunContext::new(Uuid::new_v4(), Uuid::new_v4(), json!({}), CancellationToken::new());

    assert!(run.record("a".to_string(), NodeResult::success(json!(1), 0)));
    assert!(!run.record("a".to_string(), NodeResult::success(json!(2), 0)));
    assert_eq!(run.result("a").unwrap().output, json!(1));
}

#[test]
fn test_event_wire_shape() {
    let run_id = Uuid::new_v4();
    let event = MonitorEvent::new(EventType::NodeStart, run_id, json!({ "nodeId": "a" }));
    let wire = serde_json::to_value(&event).unwrap();

    assert_eq!(wire["event"], "node:start");
    assert_eq!(wire["runId"], json!(run_id));
    assert!(EventType::RunComplete.is_terminal());
    assert!(!EventType::Ping.is_terminal());
}

#[tokio::test]
async fn test_memory_store_round_trips_workflows() {
    let store = MemoryStore::new();
    let workflow = WorkflowDefinition::new("stored");
    let id = workflow.id;

    store.save_workflow(workflow).await.unwrap();
    assert_eq!(store.load_workflow(id).await.unwrap().name, "stored");
    assert_eq!(store.list_workflows().await.unwrap().len(), 1);

    assert!(store.delete_workflow(id).await.unwrap());
    assert!(!store.delete_workflow(id).await.unwrap());
    assert!(matches!(
        store.load_workflow(id).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        store.load_run(Uuid::new_v4()).await,
        Err(WorkflowError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn test_static_credentials() {
    let mut secrets = serde_json::Map::new();
    secrets.insert("token".to_string(), json!("abc"));
    let credentials = StaticCredentials::new().with("bearer", secrets);

    let found = credentials.get_credentials("bearer", "node").await.unwrap();
    assert_eq!(found["token"], "abc");
    assert!(matches!(
        credentials.get_credentials("oauth", "node").await,
        Err(NodeError::Credentials(_))
    ));
}
