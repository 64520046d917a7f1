mod common;

use common::{const_node, test_runtime};
use flowcore::{
    ErrorHandling, EventType, FlowError, GraphError, NodeErrorKind, NodeSpec, RunStatus,
    WorkflowDefinition,
};
use flowruntime::RunOptions;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[tokio::test]
async fn test_linear_chain_completes() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("chain")
        .with_node(const_node("A", json!({"x": 1})))
        .with_node(const_node("B", json!({"y": 2})))
        .with_node(const_node("C", json!({"z": 3})))
        .with_edge("A", "B")
        .with_edge("B", "C");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.execution_order, vec!["A", "B", "C"]);
    assert_eq!(summary.result("C").unwrap().output, json!({"z": 3}));
    assert!(summary.node_results.values().all(|r| r.success));
    assert!(summary.error.is_none());
}

#[tokio::test]
async fn test_failed_predecessor_skips_dependent() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("fails")
        .with_node(NodeSpec::new("A", "test.fail"))
        .with_node(const_node("B", json!(1)))
        .with_node(const_node("C", json!(2)))
        .with_edge("A", "B")
        .with_edge("B", "C");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    let a = summary.result("A").unwrap();
    assert!(!a.success);
    assert_eq!(a.error_kind, Some(NodeErrorKind::Executor));
    assert!(summary.result("B").is_none());
    assert!(summary.result("C").is_none());
    assert_eq!(summary.skipped, vec!["B", "C"]);
    assert_eq!(summary.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_continue_on_fail_runs_despite_failures() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("tolerant")
        .with_node(const_node("A", json!({"a": true})))
        .with_node(NodeSpec::new("sibling", "test.fail"))
        .with_node(NodeSpec::new("B", "legacy.echo").continue_on_fail(true))
        .with_node(NodeSpec::new("after_failure", "legacy.echo").continue_on_fail(true))
        .with_edge("A", "B")
        .with_edge("sibling", "after_failure");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    let b = summary.result("B").unwrap();
    assert!(b.success);
    assert_eq!(b.output, json!({"A": {"a": true}}));

    // A failed predecessor contributes nothing to the input
    let after = summary.result("after_failure").unwrap();
    assert!(after.success);
    assert_eq!(after.output, json!({}));
    assert!(summary.skipped.is_empty());
}

#[tokio::test]
async fn test_fan_in_skipped_when_any_predecessor_failed() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("fan in")
        .with_node(const_node("ok", json!({"v": 1})))
        .with_node(NodeSpec::new("bad", "test.fail"))
        .with_node(NodeSpec::new("join", "legacy.echo"))
        .with_edge("ok", "join")
        .with_edge("bad", "join");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert!(summary.result("ok").unwrap().success);
    assert!(!summary.result("bad").unwrap().success);
    assert!(summary.result("join").is_none());
    assert_eq!(summary.skipped, vec!["join"]);
    assert_eq!(summary.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_fan_in_with_continue_on_fail_runs_on_surviving_input() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("fan in tolerant")
        .with_node(const_node("ok", json!({"v": 1})))
        .with_node(NodeSpec::new("bad", "test.fail"))
        .with_node(NodeSpec::new("join", "legacy.echo").continue_on_fail(true))
        .with_edge("ok", "join")
        .with_edge("bad", "join");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    let join = summary.result("join").unwrap();
    assert!(join.success);
    assert_eq!(join.output, json!({"ok": {"v": 1}}));
    assert!(summary.skipped.is_empty());
}

#[tokio::test]
async fn test_panicking_executor_becomes_failed_result() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("panics")
        .with_node(NodeSpec::new("P", "test.panic"))
        .with_node(const_node("after", json!(1)))
        .with_node(const_node("independent", json!(2)))
        .with_edge("P", "after");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    let p = summary.result("P").unwrap();
    assert!(!p.success);
    assert_eq!(p.error_kind, Some(NodeErrorKind::Executor));
    assert!(p.error.as_deref().unwrap().contains("executor aborted"));
    assert_eq!(summary.skipped, vec!["after"]);
    assert!(summary.result("independent").unwrap().success);
    assert_eq!(summary.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_failure_envelope_gates_dependents() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("envelope")
        .with_node(const_node("A", json!({"success": false, "error": "declined"})))
        .with_node(const_node("B", json!(1)))
        .with_node(NodeSpec::new("C", "legacy.echo").continue_on_fail(true))
        .with_edge("A", "B")
        .with_edge("A", "C");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    let a = summary.result("A").unwrap();
    assert!(!a.success);
    assert_eq!(a.error.as_deref(), Some("declined"));
    assert!(summary.result("B").is_none());
    assert_eq!(summary.skipped, vec!["B"]);
    assert!(summary.result("C").unwrap().success);
    assert_eq!(summary.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_input_assembly_merges_global_predecessors_and_override() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("inputs")
        .with_node(const_node("left", json!(1)))
        .with_node(const_node("right", json!(2)))
        .with_node(NodeSpec::new("join", "legacy.echo"))
        .with_node(NodeSpec::new("manual", "legacy.echo").with_manual_input(json!({"tenant": "override"})))
        .with_edge("left", "join")
        .with_edge("right", "join")
        .with_edge("join", "manual");

    let summary = runtime
        .execute(&workflow, json!({"tenant": "acme"}))
        .await
        .unwrap();

    assert_eq!(
        summary.result("join").unwrap().output,
        json!({"tenant": "acme", "left": 1, "right": 2})
    );
    assert_eq!(
        summary.result("manual").unwrap().output,
        json!({"tenant": "override", "join": {"tenant": "acme", "left": 1, "right": 2}})
    );
}

#[tokio::test]
async fn test_timeout_does_not_block_independent_nodes() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("timeouts")
        .with_node(NodeSpec::new("stuck", "test.hang").with_timeout_ms(1))
        .with_node(const_node("free", json!("done")));

    let started = Instant::now();
    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(summary.result("stuck").unwrap().is_timeout());
    assert_eq!(summary.result("free").unwrap().output, json!("done"));
}

#[tokio::test]
async fn test_execution_order_is_idempotent() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("twice")
        .with_node(const_node("d", json!(4)))
        .with_node(const_node("c", json!(3)))
        .with_node(const_node("b", json!(2)))
        .with_node(const_node("a", json!(1)))
        .with_edge("a", "d")
        .with_edge("b", "d");

    let first = runtime.execute(&workflow, json!({"k": 1})).await.unwrap();
    let second = runtime.execute(&workflow, json!({"k": 1})).await.unwrap();

    assert_eq!(first.execution_order, second.execution_order);
    assert_eq!(first.execution_order, vec!["c", "b", "a", "d"]);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_cycle_rejected_before_dispatch() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("cycle")
        .with_node(const_node("a", json!(1)))
        .with_node(const_node("b", json!(2)))
        .with_edge("a", "b")
        .with_edge("b", "a");

    let run_id = Uuid::new_v4();
    let mut events = runtime.subscribe(run_id);
    let result = runtime
        .execute_with(&workflow, json!({}), RunOptions::default().with_run_id(run_id))
        .await;

    assert!(matches!(result, Err(FlowError::Graph(GraphError::Cycle { .. }))));
    // Only the subscription greeting; nothing was dispatched.
    let first = events.recv().await.unwrap();
    assert_eq!(first.event, EventType::Connected);
    assert!(tokio::time::timeout(Duration::from_millis(50), events.recv()).await.is_err());
    assert!(runtime.load_run(run_id).await.is_err());
}

#[tokio::test]
async fn test_fatal_node_fails_run_and_stops_dispatch() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("fatal")
        .with_node(NodeSpec::new("critical", "test.fail").fatal(true))
        .with_node(const_node("later", json!(1)).continue_on_fail(true))
        .with_edge("critical", "later");

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.error.as_ref().unwrap().contains("critical"));
    assert!(summary.result("later").is_none());
    assert!(summary.skipped.is_empty());
}

#[tokio::test]
async fn test_stop_workflow_setting_fails_on_first_error() {
    let (runtime, _) = test_runtime();
    let mut workflow = WorkflowDefinition::new("strict")
        .with_node(NodeSpec::new("bad", "test.fail"))
        .with_node(const_node("next", json!(1)).continue_on_fail(true))
        .with_edge("bad", "next");
    workflow.settings.on_error = ErrorHandling::StopWorkflow;

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.result("next").is_none());
}

#[tokio::test]
async fn test_parallel_fan_out_respects_cap() {
    let (runtime, nodes) = test_runtime();
    let mut workflow = WorkflowDefinition::new("fan-out");
    for i in 0..6 {
        workflow.add_node(NodeSpec::new(format!("sleep{}", i), "test.sleep").with_config("ms", 30));
    }
    workflow.settings.max_parallel_nodes = 2;

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.node_results.len(), 6);
    let peak = nodes.sleep.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {}", peak);
}

#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    let (runtime, nodes) = test_runtime();
    let workflow = WorkflowDefinition::new("parallel")
        .with_node(NodeSpec::new("one", "test.sleep").with_config("ms", 100))
        .with_node(NodeSpec::new("two", "test.sleep").with_config("ms", 100))
        .with_node(NodeSpec::new("three", "test.sleep").with_config("ms", 100));

    runtime.execute(&workflow, json!({})).await.unwrap();
    assert_eq!(nodes.sleep.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stop_cancels_remaining_nodes() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("stoppable")
        .with_node(NodeSpec::new("slow", "test.sleep").with_config("ms", 200))
        .with_node(const_node("next", json!(1)))
        .with_edge("slow", "next");

    let run_id = Uuid::new_v4();
    let mut events = runtime.subscribe(run_id);
    let handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .execute_with(&workflow, json!({}), RunOptions::default().with_run_id(run_id))
                .await
        })
    };

    let started = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if event.event == EventType::NodeStart {
                return true;
            }
        }
        false
    })
    .await;
    assert!(matches!(started, Ok(true)), "slow node never started");
    assert!(runtime.is_active(run_id).await);
    assert!(runtime.stop(run_id).await);

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.status, RunStatus::Cancelled);
    // In-flight work finishes; nothing new is dispatched.
    assert!(summary.result("slow").unwrap().success);
    assert!(summary.result("next").is_none());
    assert!(!runtime.stop(run_id).await);
}

#[tokio::test]
async fn test_time_limit_cancels_run() {
    let (runtime, _) = test_runtime();
    let mut workflow = WorkflowDefinition::new("deadline")
        .with_node(NodeSpec::new("slow", "test.sleep").with_config("ms", 200))
        .with_node(const_node("next", json!(1)))
        .with_edge("slow", "next");
    workflow.settings.max_execution_time_ms = Some(30);

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert!(summary.error.as_ref().unwrap().contains("time limit"));
    assert!(summary.result("next").is_none());
}

#[tokio::test]
async fn test_summary_persisted_by_run_id() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("persisted").with_node(const_node("only", json!("v")));

    let summary = runtime.execute(&workflow, json!({})).await.unwrap();
    let loaded = runtime.load_run(summary.run_id).await.unwrap();

    assert_eq!(loaded.run_id, summary.run_id);
    assert_eq!(loaded.result("only").unwrap().output, json!("v"));
}

#[tokio::test]
async fn test_registered_workflow_executes_by_id() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("stored").with_node(const_node("only", json!(7)));
    let id = runtime.register_workflow(workflow).await.unwrap();

    let summary = runtime.execute_workflow(id, json!({})).await.unwrap();
    assert_eq!(summary.workflow_id, id);
    assert_eq!(summary.result("only").unwrap().output, json!(7));

    let missing = runtime.execute_workflow(Uuid::new_v4(), json!({})).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_register_rejects_fallback_only_type_keys() {
    let (runtime, _) = test_runtime();
    let workflow = WorkflowDefinition::new("sloppy").with_node(NodeSpec::new("n", "test.constNode"));

    let err = runtime.register_workflow(workflow).await.unwrap_err();
    assert!(matches!(err, FlowError::Graph(GraphError::InvalidTypeKeys { .. })));
    assert!(runtime.persistence().list_workflows().await.unwrap().is_empty());
}
