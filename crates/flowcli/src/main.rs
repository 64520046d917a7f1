// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{EventType, NodeSpec, RunStatus, RunSummary, Value, WorkflowDefinition};
use flowruntime::{FlowRuntime, RunOptions, RuntimeConfig};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, input, verbose } => {
            let default_level = if verbose { "debug" } else { "warn" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            let summary = run_workflow(&file, input).await?;
            if summary.status != RunStatus::Completed {
                bail!("run {} finished with status {:?}", summary.run_id, summary.status);
            }
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let workflow_json =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&workflow_json).with_context(|| format!("parsing {}", file.display()))
}

async fn run_workflow(file: &Path, input: Option<String>) -> Result<RunSummary> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let inputs: Value = match input {
        Some(input_str) => serde_json::from_str(&input_str).context("input is not valid JSON")?,
        None => json!({}),
    };

    let runtime = FlowRuntime::with_registry(
        Arc::new(flownodes::standard_registry()),
        RuntimeConfig::default(),
    );

    // Subscribe before starting so no event is missed; the stream ends
    // when the run closes its channel.
    let run_id = Uuid::new_v4();
    let mut events = runtime.subscribe(run_id);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let node_id = event.data.get("nodeId").and_then(Value::as_str).unwrap_or("?");
            match event.event {
                EventType::WorkflowStart => println!("▶️  Workflow started"),
                EventType::NodeStart => println!("  ⚡ Starting node: {}", node_id),
                EventType::NodeSuccess => {
                    let duration = event.data.pointer("/result/durationMs").and_then(Value::as_u64).unwrap_or(0);
                    println!("  ✅ Node {} completed in {}ms", node_id, duration);
                }
                EventType::NodeError => {
                    let error = event.data.get("error").and_then(Value::as_str).unwrap_or("unknown error");
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                EventType::WorkflowComplete => println!("✨ Workflow completed"),
                EventType::WorkflowError => println!("💥 Workflow failed"),
                EventType::WorkflowCancelled => println!("🛑 Workflow cancelled"),
                EventType::Connected | EventType::Ping | EventType::RunComplete => {}
            }
        }
    });

    let summary = runtime
        .execute_with(&workflow, inputs, RunOptions::default().with_run_id(run_id).with_initiator("cli"))
        .await?;
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "event printer stopped unexpectedly");
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", summary.run_id);
    println!("   Status: {:?} in {}ms", summary.status, summary.duration_ms());
    println!(
        "   Completed: {}/{} nodes",
        summary.node_results.values().filter(|r| r.success).count(),
        summary.execution_order.len()
    );
    if !summary.skipped.is_empty() {
        println!("   Skipped: {}", summary.skipped.join(", "));
    }

    println!();
    println!("📤 Outputs:");
    for node_id in &summary.execution_order {
        if let Some(result) = summary.result(node_id) {
            match &result.error {
                Some(error) => println!("   {}: error: {}", node_id, error),
                None if result.output.is_null() => println!("   {}: (no output)", node_id),
                None => println!("   {}: {}", node_id, result.output),
            }
        }
    }

    Ok(summary)
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let registry = flownodes::standard_registry();

    flowruntime::validate_definition(&workflow, &registry)?;
    let plan = flowruntime::plan(&workflow)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Execution order: {}", plan.order.join(" -> "));

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");

    let registry = flownodes::standard_registry();
    for (category, nodes) in registry.categories() {
        println!();
        println!("  [{}]", category);
        for node in nodes {
            match node.version {
                Some(version) => println!("  • {} v{}", node.node_type, version),
                None => println!("  • {}", node.node_type),
            }
            if !node.description.is_empty() {
                println!("    {}", node.description);
            }
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("Example Workflow");
    workflow.description = Some("Sets a greeting and logs it".to_string());

    let set_node = NodeSpec::new("greet", "transform.set")
        .with_name("Set Greeting")
        .with_version(2)
        .with_config("values", json!({ "greeting": "hello" }))
        .with_config("keepInput", true)
        .with_position(100.0, 100.0);

    let debug_node = NodeSpec::new("log", "debug.log")
        .with_name("Log Greeting")
        .with_config("message", "greeting ready")
        .with_position(300.0, 100.0);

    let set_id = workflow.add_node(set_node);
    let debug_id = workflow.add_node(debug_node);
    workflow.connect(set_id, debug_id);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {} --input '{{\"name\": \"flow\"}}'", output.display());

    Ok(())
}
