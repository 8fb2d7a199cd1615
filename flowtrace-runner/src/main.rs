use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use flowtrace_core::{ExecutionContext, ExecutionMode, WorkflowRunner};
use flowtrace_instrument::telemetry::sink_for;
use flowtrace_instrument::{
    init_logging, install, InMemorySink, InstrumentationConfig, LogSettings, Telemetry,
};
use flowtrace_runner::{build_runner, load_workflow, routes, AppState, Config, WebhookResponse};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "flowtrace-runner", version, about = "Run workflows with execution tracing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a workflow definition once
    Run {
        /// Path to the workflow JSON file
        workflow: PathBuf,

        /// User the execution runs on behalf of
        #[arg(long)]
        user_id: Option<String>,

        /// Chat session the execution belongs to
        #[arg(long)]
        session_id: Option<String>,

        /// Keep spans in memory and print them as JSON when done
        #[arg(long)]
        print_spans: bool,
    },

    /// Serve webhook-triggered executions
    Serve {
        /// Port to listen on (overrides FLOWTRACE_RUNNER_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory of workflow definitions
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let instrumentation = InstrumentationConfig::load();
    let settings = instrumentation
        .as_ref()
        .map(LogSettings::from)
        .unwrap_or_default();
    init_logging(&settings);
    let instrumentation = instrumentation.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Invalid instrumentation configuration; using defaults");
        InstrumentationConfig::default()
    });

    let config = Config::load().context("Failed to load runner configuration")?;
    tracing::info!("Configuration loaded");

    match cli.command {
        Command::Run {
            workflow,
            user_id,
            session_id,
            print_spans,
        } => {
            let memory = print_spans.then(|| Arc::new(InMemorySink::new()));
            let telemetry = match &memory {
                Some(sink) => install(instrumentation, sink.clone()),
                None if config.disable_instrumentation => None,
                None => install(instrumentation.clone(), sink_for(&instrumentation)),
            };

            let mut context = ExecutionContext::new(ExecutionMode::Cli);
            if let Some(user_id) = user_id {
                context = context.with_user(user_id);
            }
            if let Some(session_id) = session_id {
                context = context.with_session(session_id);
            }

            let outcome = run_once(&config, telemetry.as_ref(), &workflow, &context).await;
            shutdown(telemetry.as_deref());

            if let Some(sink) = memory {
                println!("{}", serde_json::to_string_pretty(&sink.finished())?);
            }
            outcome
        }
        Command::Serve {
            port,
            workflows_dir,
        } => {
            let telemetry = if config.disable_instrumentation {
                None
            } else {
                install(instrumentation.clone(), sink_for(&instrumentation))
            };
            let outcome = serve(&config, telemetry.clone(), port, workflows_dir).await;
            shutdown(telemetry.as_deref());
            outcome
        }
    }
}

async fn run_once(
    config: &Config,
    telemetry: Option<&Arc<Telemetry>>,
    path: &Path,
    context: &ExecutionContext,
) -> Result<()> {
    let workflow = load_workflow(path)?;
    let runner = build_runner(config.engine_config(), telemetry);
    tracing::info!(
        workflow_id = %workflow.id,
        execution_id = %context.execution_id,
        "Running workflow"
    );

    let result = tokio::select! {
        result = runner.run_workflow(&workflow, context) => result?,
        _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
    };

    let succeeded = result.is_success();
    let response = WebhookResponse::from(result);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !succeeded {
        bail!(
            "Execution {} finished with status {}",
            response.execution_id,
            response.status.as_str()
        );
    }
    Ok(())
}

async fn serve(
    config: &Config,
    telemetry: Option<Arc<Telemetry>>,
    port: Option<u16>,
    workflows_dir: Option<PathBuf>,
) -> Result<()> {
    let state = AppState {
        runner: build_runner(config.engine_config(), telemetry.as_ref()),
        telemetry,
        workflows_dir: workflows_dir.unwrap_or_else(|| config.workflows_dir.clone()),
    };
    tracing::info!(workflows_dir = %state.workflows_dir.display(), "Serving workflows");

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, routes(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

fn shutdown(telemetry: Option<&Telemetry>) {
    if let Some(telemetry) = telemetry {
        if let Err(e) = telemetry.shutdown() {
            tracing::warn!(error = %e, "Telemetry shutdown failed");
        }
    }
}
