mod api;
mod config;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use api::AppState;
use config::ServerConfig;
use flowruntime::dispatch::{DispatchQueue, FileQueueStore, FileTriggerState, TriggerScheduler};
use flowruntime::{FlowRuntime, RuntimeConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    info!(?config, "Starting Flow Engine Server");

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let registry = Arc::new(flownodes::standard_registry());
    let queue = FileQueueStore::open(config.queue_path())
        .await
        .context("opening run queue")?;

    let runtime = Arc::new(
        FlowRuntime::builder(registry)
            .config(RuntimeConfig {
                max_parallel_nodes: config.max_parallel_nodes,
                ..RuntimeConfig::default()
            })
            .queue(DispatchQueue::new(queue))
            .build(),
    );

    info!(node_types = runtime.registry().list_node_types().len(), "Runtime initialized with standard nodes");

    let workers = runtime.start_workers(config.workers);
    let trigger_state = FileTriggerState::open(config.trigger_state_path())
        .await
        .context("opening trigger state")?;
    let shutdown = CancellationToken::new();
    let scheduler = Arc::new(
        TriggerScheduler::new(Arc::clone(&runtime), Arc::new(trigger_state)).with_tick(config.scheduler_tick),
    )
    .spawn(shutdown.clone());

    let app_state = web::Data::new(AppState {
        runtime: Arc::clone(&runtime),
    });

    info!(bind_address = %config.bind_address, workers = workers.size(), "Server starting");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    info!("Server stopped, draining workers");
    shutdown.cancel();
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "trigger scheduler panicked");
    }
    workers.shutdown().await;

    Ok(())
}
