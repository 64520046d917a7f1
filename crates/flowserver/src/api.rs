use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use actix_ws::Message;
use flowcore::{FlowError, MonitorEvent, RunStatus, Value, WorkflowDefinition, WorkflowError};
use flowruntime::dispatch::RunJob;
use flowruntime::{FlowRuntime, RunOptions};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<FlowRuntime>,
}

/// Request body for workflow execution
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub initial_input: Value,
    #[serde(default)]
    pub run_options: RunOptionsBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptionsBody {
    pub run_id: Option<Uuid>,
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQuery {
    mode: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: &FlowError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.to_string(),
    };
    match e {
        FlowError::Graph(_) => HttpResponse::BadRequest().json(body),
        FlowError::Workflow(WorkflowError::NotFound(_) | WorkflowError::RunNotFound(_)) => {
            HttpResponse::NotFound().json(body)
        }
        _ => {
            error!(error = %e, "request failed");
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> HttpResponse {
    match data.runtime.persistence().list_workflows().await {
        Ok(workflows) => {
            let list: Vec<_> = workflows
                .iter()
                .map(|w| {
                    json!({
                        "id": w.id,
                        "name": w.name,
                        "description": w.description,
                        "nodes": w.nodes.len(),
                        "edges": w.edges.len(),
                        "triggers": w.triggers.len(),
                    })
                })
                .collect();
            HttpResponse::Ok().json(list)
        }
        Err(e) => error_response(&e.into()),
    }
}

/// Create a new workflow; rejected definitions never reach storage
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<WorkflowDefinition>,
) -> HttpResponse {
    let workflow = workflow.into_inner();
    let name = workflow.name.clone();

    match data.runtime.register_workflow(workflow).await {
        Ok(id) => {
            info!(workflow_id = %id, name = %name, "workflow created");
            HttpResponse::Created().json(json!({ "id": id }))
        }
        Err(e) => {
            warn!(name = %name, error = %e, "workflow rejected");
            error_response(&e)
        }
    }
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(data: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    match data.runtime.persistence().load_workflow(path.into_inner()).await {
        Ok(workflow) => HttpResponse::Ok().json(workflow),
        Err(e) => error_response(&e.into()),
    }
}

/// Delete a workflow
#[delete("/api/workflows/{id}")]
async fn delete_workflow(data: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let workflow_id = path.into_inner();
    match data.runtime.persistence().delete_workflow(workflow_id).await {
        Ok(true) => {
            info!(workflow_id = %workflow_id, "workflow deleted");
            HttpResponse::NoContent().finish()
        }
        Ok(false) => HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Workflow {} not found", workflow_id),
        }),
        Err(e) => error_response(&e.into()),
    }
}

/// Execute a workflow: queued by default, inline with `?mode=sync`
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ExecuteQuery>,
    body: Option<web::Json<ExecuteRequest>>,
) -> HttpResponse {
    let workflow_id = path.into_inner();
    let request = body.map(web::Json::into_inner).unwrap_or_default();

    let workflow = match data.runtime.persistence().load_workflow(workflow_id).await {
        Ok(workflow) => workflow,
        Err(e) => return error_response(&e.into()),
    };

    if query.mode.as_deref() == Some("sync") {
        let options = RunOptions {
            run_id: request.run_options.run_id,
            priority: request.run_options.priority,
            initiator: Some("api".to_string()),
        };
        return match data
            .runtime
            .execute_with(&workflow, request.initial_input, options)
            .await
        {
            Ok(summary) => HttpResponse::Ok().json(summary),
            Err(e) => error_response(&e),
        };
    }

    let mut job = RunJob::new(workflow, request.initial_input)
        .with_priority(request.run_options.priority.unwrap_or(0))
        .with_initiator("api");
    if let Some(run_id) = request.run_options.run_id {
        job = job.with_run_id(run_id);
    }

    match data.runtime.submit(job).await {
        Ok(run_id) => HttpResponse::Accepted().json(json!({ "runId": run_id })),
        Err(e) => error_response(&e),
    }
}

/// Final summary of a run, or its live status while it is in flight
#[get("/api/runs/{id}")]
async fn get_run(data: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let run_id = path.into_inner();
    if data.runtime.is_active(run_id).await {
        return HttpResponse::Ok().json(json!({
            "runId": run_id,
            "status": RunStatus::Running,
        }));
    }
    match data.runtime.load_run(run_id).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => error_response(&e),
    }
}

#[post("/api/runs/{id}/stop")]
async fn stop_run(data: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let run_id = path.into_inner();
    let acknowledged = data.runtime.stop(run_id).await;
    HttpResponse::Ok().json(json!({
        "runId": run_id,
        "acknowledged": acknowledged,
    }))
}

fn sse_frame(event: &MonitorEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: {}\ndata: {}\n\n", event.event, payload))
}

/// Server-sent events for one run. Only events published after the
/// subscription are delivered; a finished run yields the greeting and pings.
#[get("/api/runs/{id}/events")]
async fn run_events(data: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let events = data.runtime.subscribe(path.into_inner());

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(events.map(|event| Ok::<_, Infallible>(sse_frame(&event))))
}

/// WebSocket firehose of every run's events
#[get("/api/events")]
async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "WebSocket client lagging, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.runtime.registry().list())
}

#[get("/api/nodes/categories")]
async fn node_categories(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.runtime.registry().categories())
}

#[get("/api/nodes/{node_type}")]
async fn get_node_type(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let node_type = path.into_inner();
    match data.runtime.registry().get(&node_type) {
        Some(descriptor) => HttpResponse::Ok().json(descriptor),
        None => HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Node type {} not found", node_type),
        }),
    }
}

/// Check a configuration against a node type's schema
#[post("/api/nodes/{node_type}/validate")]
async fn validate_node_config(
    data: web::Data<AppState>,
    path: web::Path<String>,
    config: web::Json<Map<String, Value>>,
) -> HttpResponse {
    let node_type = path.into_inner();
    let registry = data.runtime.registry();
    if !registry.contains(&node_type) {
        return HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Node type {} not found", node_type),
        });
    }

    match registry.validate_config(&node_type, &config) {
        Ok(()) => HttpResponse::Ok().json(json!({ "valid": true, "issues": [] })),
        Err(issues) => HttpResponse::Ok().json(json!({ "valid": false, "issues": issues })),
    }
}

/// Register every route. `/api/nodes/categories` must precede
/// `/api/nodes/{node_type}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(delete_workflow)
        .service(execute_workflow)
        .service(get_run)
        .service(stop_run)
        .service(run_events)
        .service(websocket_events)
        .service(list_node_types)
        .service(node_categories)
        .service(get_node_type)
        .service(validate_node_config);
}
