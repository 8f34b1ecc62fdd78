// crates/dagcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dagcore::{Node, NodeType, RunLevel, ShapeMap, Workflow};
use dagnodes::{standard_providers, standard_registry, RhaiExpressionEngine};
use dagruntime::{load_workflow_file, DagRuntime, RuntimeConfig, StreamFrame};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "DAG workflow CLI", long_about = None)]
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

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Show debug logs
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check graph structure, triggers and node metadata
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Print the shape plan of a workflow
    Plan {
        #[arg(short, long)]
        file: PathBuf,

        /// Starting input shapes, e.g. '{"question": "string"}'
        #[arg(short, long)]
        shapes: Option<String>,
    },

    /// Print the data each node can reference
    Available {
        file: PathBuf,
    },

    /// List node types and whether they are implemented
    Nodes,

    /// Write an example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

async fn load_workflow(file: &Path) -> Result<Workflow> {
    load_workflow_file(file)
        .await
        .with_context(|| format!("Failed to load workflow {}", file.display()))
}

fn parse_object(raw: Option<String>, what: &str) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must be a JSON object", what),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, input, verbose } => {
            init_logging(verbose);
            run_workflow(&file, input).await?;
        }
        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file).await?;
        }
        Commands::Plan { file, shapes } => {
            init_logging(false);
            plan_workflow(&file, shapes).await?;
        }
        Commands::Available { file } => {
            init_logging(false);
            show_available(&file).await?;
        }
        Commands::Nodes => list_nodes(),
        Commands::Init { output } => create_example_workflow(&output)?,
    }

    Ok(())
}

fn runtime() -> Result<DagRuntime> {
    let config = RuntimeConfig::from_env()?;
    let services = standard_registry(Arc::new(RhaiExpressionEngine::new()));
    Ok(DagRuntime::new(config, services, standard_providers()))
}

async fn run_workflow(file: &Path, input: Option<String>) -> Result<()> {
    let workflow = load_workflow(file).await?;
    let inputs = parse_object(input, "Input")?;
    println!("Workflow: {} ({} nodes, {} edges)", workflow.name, workflow.nodes.len(), workflow.edges.len());

    let runtime = runtime()?;
    let workflow_id = workflow.id;
    runtime.register_workflow(workflow).await?;
    let (run_id, handle) = runtime.spawn_workflow(workflow_id, inputs).await?;
    println!("Run: {}", run_id);

    let mut frames = Box::pin(runtime.stream(run_id));
    while let Some(frame) = frames.next().await {
        match frame {
            StreamFrame::Log(event) => {
                let marker = match event.level {
                    RunLevel::Info => " ",
                    RunLevel::Warn => "!",
                    RunLevel::Error => "x",
                };
                println!("  {} [{}] {}", marker, event.seq, event.message);
            }
            StreamFrame::Heartbeat { .. } => {}
            StreamFrame::Done { finished_at } => println!("Finished at {}", finished_at),
            StreamFrame::NotFound => println!("Run {} not found", run_id),
        }
    }

    let outcome = handle.await?;
    runtime.shutdown().await;
    let result = outcome?;

    println!();
    println!("Completed in {}ms, {} nodes ran, {} skipped", result.duration_ms, result.outputs.len(), result.skipped.len());
    if let Some(payload) = &result.payload {
        println!("{}", serde_json::to_string_pretty(payload)?);
    }
    Ok(())
}

async fn validate_workflow(file: &Path) -> Result<()> {
    let workflow = load_workflow(file).await?;
    let runtime = runtime()?;
    let result = runtime.validate_graph(&workflow);

    let mut errors = result.errors.clone();
    for node in &workflow.nodes {
        if let Err(e) = runtime
            .lookup(node.node_type)
            .validate(&node.metadata, node.structured_output.as_ref())
        {
            errors.push(format!("Node {} ({}): {}", node.id, node.node_type, e));
        }
    }
    runtime.shutdown().await;

    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &errors {
        println!("error: {}", error);
    }
    if !errors.is_empty() {
        bail!("Workflow {} is invalid ({} errors)", workflow.id, errors.len());
    }

    let order: Vec<String> = result.topo_order.iter().map(ToString::to_string).collect();
    println!("Workflow {} is valid, execution order: {}", workflow.id, order.join(" -> "));
    Ok(())
}

async fn plan_workflow(file: &Path, shapes: Option<String>) -> Result<()> {
    let workflow = load_workflow(file).await?;
    let starting: ShapeMap = serde_json::from_value(Value::Object(parse_object(shapes, "Shapes")?))?;
    let runtime = runtime()?;
    let plan = runtime.plan_graph(&workflow, &starting);
    runtime.shutdown().await;

    if plan.is_empty() && !workflow.nodes.is_empty() {
        bail!("Workflow {} has a cycle, nothing to plan", workflow.id);
    }
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn show_available(file: &Path) -> Result<()> {
    let workflow = load_workflow(file).await?;
    let runtime = runtime()?;
    let available = runtime.available_data(&workflow);
    runtime.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&available)?);
    Ok(())
}

fn list_nodes() {
    let registry = standard_registry(Arc::new(RhaiExpressionEngine::new()));
    println!("Node types:");
    for node_type in NodeType::ALL {
        let service = registry.lookup(node_type);
        if registry.is_implemented(node_type) {
            println!("  {:<13} {}", node_type.as_str(), service.description());
        } else {
            println!("  {:<13} (not implemented)", node_type.as_str());
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new(1, "Example triage workflow");
    workflow.description = Some("Scores a ticket and routes it by urgency".to_string());

    workflow.add_node(Node::new(1, NodeType::Map).with_meta(
        "mapping",
        json!({"urgent": "priority >= 3", "title": "ticket.title"}),
    ));
    workflow.add_node(Node::new(2, NodeType::IfElse).with_meta("predicate", "urgent"));
    workflow.add_node(Node::new(3, NodeType::Map).with_meta("mapping", json!({"queue": "\"pager\""})));
    workflow.add_node(Node::new(4, NodeType::Map).with_meta("mapping", json!({"queue": "\"backlog\""})));
    workflow.add_node(Node::new(5, NodeType::Merge));
    workflow.add_node(Node::new(6, NodeType::Return).with_meta("payload_selector", "merged_data"));
    workflow.connect(1, 2);
    workflow.connect_branch(2, 3, "true");
    workflow.connect_branch(2, 4, "false");
    workflow.connect(3, 5);
    workflow.connect(4, 5);
    workflow.connect(5, 6);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  dag run --file {} --input '{{\"priority\": 4, \"ticket\": {{\"title\": \"db down\"}}}}'",
        output.display()
    );
    Ok(())
}
