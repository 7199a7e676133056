use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ExecutionEvent, NodeEvent, NodeSpec, Value, ValueMap};
use flowruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a node spec file
    Run {
        /// Path to node spec JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check that a node spec file builds
    Validate {
        /// Path to node spec JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example node spec
    Init {
        /// Output file path
        #[arg(short, long, default_value = "node.json")]
        output: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> Arc<NodeRegistry> {
    let registry = NodeRegistry::new();
    flownodes::register_all(&registry);
    Arc::new(registry)
}

fn load_spec(file: &Path) -> Result<NodeSpec> {
    let spec_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&spec_json).with_context(|| format!("parsing {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            verbose,
        } => {
            init_tracing(verbose);
            run_node(&file, input, config).await?;
        }

        Commands::Validate { file } => {
            validate_spec(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_spec(&output)?;
        }
    }

    Ok(())
}

async fn run_node(file: &Path, input: Option<String>, config: Option<PathBuf>) -> Result<()> {
    println!("🚀 Loading node spec from: {}", file.display());
    let spec = load_spec(file)?;
    println!("📋 Node: {} ({})", spec.name.as_deref().unwrap_or("unnamed"), spec.node_type);
    println!();

    let inputs: ValueMap = match input {
        Some(input_str) => {
            let json: serde_json::Value = serde_json::from_str(&input_str).context("parsing --input")?;
            match Value::from(json) {
                Value::Object(map) => map,
                _ => return Err(anyhow::anyhow!("Input must be a JSON object")),
            }
        }
        None => ValueMap::new(),
    };

    let runtime_config: RuntimeConfig = match config {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => RuntimeConfig::default(),
    };
    tracing::debug!("Runtime config: {:?}", runtime_config);

    let runtime = FlowRuntime::with_registry(registry(), runtime_config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            match event {
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                        None => println!("     📊 [{}] {}%", node_id, percent),
                    },
                },
            }
        }
    });

    let result = runtime.execute(&spec, inputs).await;

    // closing the bus ends the listener once it has drained
    drop(runtime);
    event_task.await?;

    let run = result?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", run.execution_id);
    println!("   Duration: {}ms", run.output.metadata.execution_time_ms);
    println!(
        "   Succeeded/failed: {}/{}",
        run.output.metadata.success_count, run.output.metadata.failure_count
    );

    if !run.output.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        let mut keys: Vec<&String> = run.output.outputs.keys().collect();
        keys.sort();
        for key in keys {
            let rendered = serde_json::to_string_pretty(&run.output.outputs[key].to_json())?;
            println!("   {}: {}", key, rendered);
        }
    }

    Ok(())
}

/// Next event off the bus, stepping over any the listener fell behind on.
/// `None` once the bus is closed.
async fn next_event(events: &mut Receiver<ExecutionEvent>) -> Option<ExecutionEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(missed)) => println!("     ⚠️  {} events dropped", missed),
            Err(RecvError::Closed) => return None,
        }
    }
}

fn validate_spec(file: &Path) -> Result<()> {
    println!("🔍 Validating node spec: {}", file.display());

    let spec = load_spec(file)?;
    registry().create_node(&spec.node_type, &spec.config)?;

    println!("✅ Node spec is valid:");
    println!("   Type: {}", spec.node_type);
    println!("   Config keys: {}", spec.config.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for port in &metadata.inputs {
                let marker = if port.required { "required" } else { "optional" };
                println!("      in  {} [{}]: {}", port.name, marker, port.description);
            }
            for port in &metadata.outputs {
                println!("      out {}: {}", port.name, port.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_spec(output: &Path) -> Result<()> {
    let body = serde_json::json!({
        "type": "time.delay",
        "config": {"delay_ms": 250}
    });
    let spec = NodeSpec::new("flow.loop")
        .with_name("Delay each item")
        .with_config("enable_parallel", true)
        .with_config("max_concurrency", 4usize)
        .with_config("timeout_per_item", 5usize)
        .with_config("body", Value::from(body));

    let json = serde_json::to_string_pretty(&spec)?;
    std::fs::write(output, json)?;

    println!("✨ Created example node spec: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --input '{{\"items\": [1, 2, 3, 4, 5, 6, 7, 8]}}'",
        output.display()
    );

    Ok(())
}
