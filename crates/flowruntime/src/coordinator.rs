use crate::monitor::{ExecutionMonitor, RunPublisher};
use crate::planner::{self, ExecutionPlan};
use crate::runner::{NodeInvocation, NodeRunner};
use chrono::Utc;
use flowcore::{
    ErrorHandling, EventType, ExecutionId, FlowError, NodeId, NodeResult, NodeSpec, RunContext,
    RunStatus, RunSummary, Value, WorkflowDefinition,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Caller-supplied knobs for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: Option<ExecutionId>,
    pub priority: Option<i32>,
    pub initiator: Option<String>,
}

impl RunOptions {
    pub fn with_run_id(mut self, run_id: ExecutionId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    fn is_terminal(self) -> bool {
        matches!(self, NodeState::Succeeded | NodeState::Failed | NodeState::Skipped)
    }
}

/// Drives a whole run: plans, assembles inputs, dispatches through the
/// runner with bounded fan-out, aggregates results and decides the final
/// status.
pub struct RunCoordinator {
    runner: Arc<NodeRunner>,
    monitor: Arc<ExecutionMonitor>,
    max_parallel: usize,
}

impl RunCoordinator {
    pub fn new(runner: Arc<NodeRunner>, monitor: Arc<ExecutionMonitor>, max_parallel: usize) -> Self {
        Self {
            runner,
            monitor,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn runner(&self) -> &Arc<NodeRunner> {
        &self.runner
    }

    /// Execute a workflow and return its summary.
    ///
    /// Only structural problems (a malformed graph) return `Err`, and they do
    /// so before any node is dispatched. Node failures are part of the summary.
    pub async fn execute_workflow(
        &self,
        workflow: &WorkflowDefinition,
        initial_input: Value,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunSummary, FlowError> {
        let run_id = options.run_id.unwrap_or_else(ExecutionId::new_v4);

        let plan = planner::plan(workflow).map_err(|e| {
            tracing::error!(run_id = %run_id, workflow_id = %workflow.id, error = %e, "workflow graph rejected");
            e
        })?;

        let run = RunContext::new(run_id, workflow.id, initial_input, cancel)
            .with_initiator(options.initiator);
        let publisher = RunPublisher::new(Arc::clone(&self.monitor), run_id);

        tracing::info!(
            run_id = %run_id,
            workflow_id = %workflow.id,
            nodes = plan.order.len(),
            "starting workflow execution"
        );
        publisher.emit(
            EventType::WorkflowStart,
            json!({
                "workflowId": workflow.id,
                "name": workflow.name,
                "executionOrder": plan.order,
            }),
        );

        let started_at = Utc::now();
        let outcome = self.execute_plan(workflow, &plan, run, &publisher).await;
        let completed_at = Utc::now();

        let summary = RunSummary {
            run_id,
            workflow_id: workflow.id,
            status: outcome.status,
            node_results: outcome.run.into_node_outputs().into_iter().collect(),
            execution_order: plan.order.clone(),
            skipped: outcome.skipped,
            started_at,
            completed_at,
            error: outcome.error,
        };

        match summary.status {
            RunStatus::Completed => {
                tracing::info!(run_id = %run_id, duration_ms = summary.duration_ms(), "workflow completed");
                publisher.emit(
                    EventType::WorkflowComplete,
                    json!({ "durationMs": summary.duration_ms() }),
                );
            }
            RunStatus::Cancelled => {
                tracing::warn!(run_id = %run_id, "workflow cancelled");
                publisher.emit(
                    EventType::WorkflowCancelled,
                    json!({ "reason": summary.error }),
                );
            }
            _ => {
                tracing::error!(run_id = %run_id, error = ?summary.error, "workflow failed");
                publisher.emit(EventType::WorkflowError, json!({ "error": summary.error }));
            }
        }
        publisher.emit(
            EventType::RunComplete,
            serde_json::to_value(&summary).unwrap_or(Value::Null),
        );
        publisher.close();

        Ok(summary)
    }

    async fn execute_plan(
        &self,
        workflow: &WorkflowDefinition,
        plan: &ExecutionPlan,
        mut run: RunContext,
        publisher: &RunPublisher,
    ) -> PlanOutcome {
        let nodes: HashMap<&str, &NodeSpec> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut states: HashMap<NodeId, NodeState> = plan
            .order
            .iter()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();
        let limit = workflow.settings.max_parallel_nodes.clamp(1, self.max_parallel);
        let deadline = workflow
            .settings
            .max_execution_time_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let mut skipped = Vec::new();
        let mut fatal: Option<String> = None;
        let mut cancel_reason: Option<String> = None;
        let mut running = FuturesUnordered::new();

        loop {
            if fatal.is_none() && !run.is_cancelled() {
                for node_id in &plan.order {
                    if running.len() >= limit {
                        break;
                    }
                    if states[node_id] != NodeState::Pending {
                        continue;
                    }
                    let predecessors = plan.graph.predecessors(node_id);
                    if !predecessors.iter().all(|p| states[p].is_terminal()) {
                        continue;
                    }

                    let node = nodes[node_id.as_str()];
                    let blocked = predecessors
                        .iter()
                        .any(|p| matches!(states[p], NodeState::Failed | NodeState::Skipped));
                    if blocked && !node.data.options.continue_on_fail {
                        tracing::info!(run_id = %run.run_id, node_id = %node_id, "skipping node: predecessor failed");
                        states.insert(node_id.clone(), NodeState::Skipped);
                        skipped.push(node_id.clone());
                        continue;
                    }

                    let input = assemble_input(&run, node, &predecessors);
                    states.insert(node_id.clone(), NodeState::Running);
                    publisher.emit(
                        EventType::NodeStart,
                        json!({ "nodeId": node_id, "nodeType": node.node_type }),
                    );

                    let invocation = NodeInvocation::new(&run, input, &workflow.settings);
                    let runner = &self.runner;
                    running.push(async move {
                        let result = runner.invoke(node, invocation).await;
                        (node, result)
                    });
                }
            }

            if running.is_empty() {
                break;
            }

            let next = match deadline.filter(|_| cancel_reason.is_none()) {
                Some(deadline) => tokio::select! {
                    next = running.next() => next,
                    _ = sleep_until(deadline) => {
                        tracing::warn!(run_id = %run.run_id, "workflow exceeded its time limit");
                        cancel_reason = Some("execution time limit exceeded".to_string());
                        run.cancellation().cancel();
                        continue;
                    }
                },
                None => running.next().await,
            };
            let Some((node, result)) = next else {
                break;
            };

            self.record_result(&mut run, node, result, publisher, &mut states, &mut fatal, workflow);
        }

        let unfinished = states.values().any(|s| *s == NodeState::Pending);
        let (status, error) = if let Some(error) = fatal {
            (RunStatus::Failed, Some(error))
        } else if run.is_cancelled() && unfinished {
            (
                RunStatus::Cancelled,
                Some(cancel_reason.unwrap_or_else(|| "stop requested".to_string())),
            )
        } else {
            (RunStatus::Completed, None)
        };

        PlanOutcome {
            run,
            status,
            skipped,
            error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_result(
        &self,
        run: &mut RunContext,
        node: &NodeSpec,
        result: NodeResult,
        publisher: &RunPublisher,
        states: &mut HashMap<NodeId, NodeState>,
        fatal: &mut Option<String>,
        workflow: &WorkflowDefinition,
    ) {
        if result.success {
            tracing::info!(
                run_id = %run.run_id,
                node_id = %node.id,
                duration_ms = result.duration_ms,
                "node completed"
            );
            states.insert(node.id.clone(), NodeState::Succeeded);
            publisher.emit(
                EventType::NodeSuccess,
                json!({ "nodeId": node.id, "result": result }),
            );
        } else {
            let message = result.error.clone().unwrap_or_default();
            tracing::error!(run_id = %run.run_id, node_id = %node.id, error = %message, "node failed");
            states.insert(node.id.clone(), NodeState::Failed);
            publisher.emit(
                EventType::NodeError,
                json!({
                    "nodeId": node.id,
                    "error": message,
                    "errorKind": result.error_kind,
                    "result": result,
                }),
            );

            let run_fatal = node.data.options.fatal
                || workflow.settings.on_error == ErrorHandling::StopWorkflow;
            if run_fatal && fatal.is_none() {
                *fatal = Some(format!("Node {} failed: {}", node.id, message));
            }
        }
        run.record(node.id.clone(), result);
    }
}

struct PlanOutcome {
    run: RunContext,
    status: RunStatus,
    skipped: Vec<NodeId>,
    error: Option<String>,
}

/// Input for a node: global input, then each successful predecessor's
/// output under the predecessor's id, then the node's manual override.
fn assemble_input(run: &RunContext, node: &NodeSpec, predecessors: &[NodeId]) -> Value {
    let mut merged = Map::new();
    match &run.input {
        Value::Object(global) => merged.extend(global.clone()),
        Value::Null => {}
        other => {
            merged.insert("input".to_string(), other.clone());
        }
    }

    for predecessor in predecessors {
        if let Some(result) = run.result(predecessor).filter(|r| r.success) {
            merged.insert(predecessor.clone(), result.output.clone());
        }
    }

    match &node.data.options.manual_input {
        Some(Value::Object(overrides)) => merged.extend(overrides.clone()),
        Some(other) => return other.clone(),
        None => {}
    }
    Value::Object(merged)
}
