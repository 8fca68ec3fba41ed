//! Command-line interface for demoflow.
//!
//! Provides commands for compiling recorded traces into workflows,
//! running workflows with parameters, and inspecting persisted runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::{default_catalog, ExecutorRegistry, HttpGenerator, StructuredCallConfig};
use crate::compiler::{CompileOptions, Compiler};
use crate::core::{CancelFlag, Orchestrator, RunStore};
use crate::domain::{RunStatus, StepStatus, Workflow};
use crate::evidence::DemoTrace;

/// demoflow - Compile recorded demonstrations into replayable workflows
#[derive(Parser, Debug)]
#[command(name = "demoflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a recorded trace into a workflow
    Compile {
        /// Trace file (JSON)
        #[arg(short, long)]
        trace: PathBuf,

        /// Output workflow file (defaults to <trace-stem>.workflow.json)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Workflow name (defaults to the trace name)
        #[arg(short, long)]
        name: Option<String>,

        /// Narration describing what the demonstration was doing
        #[arg(long)]
        text: Option<String>,
    },

    /// Run a compiled workflow
    Run {
        /// Workflow file
        #[arg(short, long)]
        workflow: PathBuf,

        /// Value for the canonical user_text parameter
        #[arg(short, long)]
        text: Option<String>,

        /// Additional parameter values as name=value (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        param: Vec<String>,

        /// Also write the run result to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the steps of a workflow
    Steps {
        /// Workflow file
        #[arg(short, long)]
        workflow: PathBuf,
    },

    /// Show a persisted run result
    ShowRun {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Compile {
                trace,
                out,
                name,
                text,
            } => compile_trace(&trace, out, name, text).await,
            Commands::Run {
                workflow,
                text,
                param,
                out,
            } => run_workflow(&workflow, text, param, out).await,
            Commands::Steps { workflow } => list_steps(&workflow),
            Commands::ShowRun { run_id } => show_run(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Compile a trace file into a workflow file
async fn compile_trace(
    trace_path: &PathBuf,
    out: Option<PathBuf>,
    name: Option<String>,
    annotation: Option<String>,
) -> Result<()> {
    let config = crate::config::get()?;

    let trace = DemoTrace::from_file(trace_path)?;
    eprintln!(
        "Compiling trace '{}' ({} events, {:.1}s)",
        trace.name,
        trace.events.len(),
        trace.duration_seconds()
    );

    let api_key = config.api_key();
    if api_key.is_empty() {
        anyhow::bail!(
            "No API key configured. Set DEMOFLOW_API_KEY or OPENAI_API_KEY in the environment"
        );
    }

    let generator = HttpGenerator::new(&config.generator.base_url, &config.generator.model, api_key);
    let call_config = StructuredCallConfig {
        retries: config.generator.retries,
        timeout: config.generator.timeout,
    };
    let compiler = Compiler::new(&generator, default_catalog(), call_config);

    let options = CompileOptions {
        workflow_name: name,
        annotation,
    };
    let workflow = compiler.compile(&trace, &options).await?;

    let out_path = out.unwrap_or_else(|| {
        let stem = trace_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow");
        trace_path.with_file_name(format!("{}.workflow.json", stem))
    });
    workflow.to_file(&out_path)?;

    eprintln!(
        "Compiled workflow '{}' with {} step(s), {} parameter(s)",
        workflow.name,
        workflow.steps.len(),
        workflow.params.len()
    );
    eprintln!("Wrote {}", out_path.display());

    Ok(())
}

/// Parse a name=value pair; the value is JSON when it parses, otherwise
/// a plain string
fn parse_param(pair: &str) -> Result<(String, Value)> {
    let (name, value) = pair
        .split_once('=')
        .with_context(|| format!("Invalid parameter '{}': expected NAME=VALUE", pair))?;
    if name.is_empty() {
        anyhow::bail!("Invalid parameter '{}': empty name", pair);
    }
    let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), parsed))
}

/// Run a workflow file with the given parameters
async fn run_workflow(
    workflow_path: &PathBuf,
    text: Option<String>,
    params: Vec<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = crate::config::get()?;
    let workflow = Workflow::from_file(workflow_path)?;

    let mut supplied: BTreeMap<String, Value> = BTreeMap::new();
    for pair in &params {
        let (name, value) = parse_param(pair)?;
        supplied.insert(name, value);
    }
    if let Some(text) = text {
        supplied.insert("user_text".to_string(), Value::String(text));
    }

    let registry = Arc::new(ExecutorRegistry::from_config(config));
    let orchestrator =
        Orchestrator::new(registry, config.step_timeout).with_store(RunStore::open()?);

    // Ctrl-C requests cooperative cancellation; the in-flight step
    // finishes first
    let cancel = CancelFlag::new();
    let cancel_handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested; finishing the current step");
            cancel_handle.cancel();
        }
    });

    let result = orchestrator.run(&workflow, supplied, &cancel).await?;

    if let Some(out_path) = out {
        let content = serde_json::to_string_pretty(&result)?;
        std::fs::write(&out_path, content)
            .with_context(|| format!("Failed to write run result: {}", out_path.display()))?;
    }

    eprintln!();
    for record in &result.steps {
        let marker = match record.status {
            StepStatus::Succeeded => "ok",
            StepStatus::FailedPermanently => "FAILED",
        };
        eprintln!(
            "  [{:<6}] {} ({} attempt(s), {}ms)",
            marker, record.step_id, record.attempts, record.duration_ms
        );
    }

    match &result.status {
        RunStatus::Succeeded => {
            // The last step's output is the workflow's product
            if let Some(output) = result.steps.last().and_then(|r| r.output.as_ref()) {
                println!("{}", serde_json::to_string_pretty(output)?);
            }
            eprintln!("\n[Run {} completed successfully]", result.id);
        }
        RunStatus::Failed { step_id, error } => {
            eprintln!("\n[Run {} failed at step '{}': {}]", result.id, step_id, error);
            std::process::exit(1);
        }
        RunStatus::Cancelled => {
            eprintln!(
                "\n[Run {} cancelled after {} step(s)]",
                result.id,
                result.steps.len()
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Print a workflow's parameters and steps
fn list_steps(workflow_path: &PathBuf) -> Result<()> {
    let workflow = Workflow::from_file(workflow_path)?;

    println!("Workflow: {}", workflow.name);
    if let Some(sha) = &workflow.trace_sha256 {
        println!("Trace: {}", sha);
    }

    println!("\nParameters:");
    for param in &workflow.params {
        match &param.default {
            Some(default) => println!("  {} ({}) default={}", param.name, param.value_type, default),
            None => println!("  {} ({}) required", param.name, param.value_type),
        }
    }

    println!("\nSteps:");
    for step in &workflow.steps {
        println!("  {} [{}]", step.id, step.kind);
        println!("    goal: {}", step.goal.as_str());
        for (name, expr) in &step.inputs {
            println!("    input {}: {}", name, expr.as_str());
        }
        if !step.output_schema.is_empty() {
            let fields: Vec<String> = step
                .output_schema
                .iter()
                .map(|(name, ty)| format!("{}:{}", name, ty))
                .collect();
            println!("    outputs: {}", fields.join(", "));
        }
        if !step.postconditions.is_empty() {
            println!("    postconditions: {}", step.postconditions.len());
        }
    }

    Ok(())
}

/// Show a persisted run result
async fn show_run(run_id_str: &str) -> Result<()> {
    let run_id =
        Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let store = RunStore::open()?;
    let result = store.load(run_id).await?;

    println!("Run ID: {}", result.id);
    println!("Workflow: {}", result.workflow_name);
    println!("Started: {}", result.started_at);
    if let Some(completed) = result.completed_at {
        println!("Completed: {}", completed);
    }
    match &result.status {
        RunStatus::Succeeded => println!("Status: succeeded"),
        RunStatus::Failed { step_id, error } => {
            println!("Status: failed at '{}': {}", step_id, error)
        }
        RunStatus::Cancelled => println!("Status: cancelled"),
    }

    println!("\nParameters:");
    for (name, value) in &result.params {
        println!("  {} = {}", name, value);
    }

    println!("\nSteps:");
    for record in &result.steps {
        let status = match record.status {
            StepStatus::Succeeded => "succeeded",
            StepStatus::FailedPermanently => "failed",
        };
        println!(
            "  {} [{}] {} ({} attempt(s), {}ms)",
            record.step_id, record.kind, status, record.attempts, record.duration_ms
        );
        for failure in &record.failures {
            if let Some(error) = &failure.error {
                println!("    attempt {}: {}", failure.attempt, error);
            }
            for detail in &failure.verification_failures {
                println!(
                    "    attempt {}: {}({}): {}",
                    failure.attempt, detail.rule, detail.field, detail.reason
                );
            }
        }
        if let Some(output) = &record.output {
            for (field, value) in output {
                println!("    {} = {}", field, value);
            }
        }
    }

    Ok(())
}

/// List recent persisted runs
async fn list_runs(limit: usize) -> Result<()> {
    let store = RunStore::open()?;
    let run_ids = store.list().await?;

    if run_ids.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<12}", "RUN ID", "WORKFLOW", "STATUS");
    println!("{}", "-".repeat(76));

    for run_id in run_ids.into_iter().take(limit) {
        let Ok(result) = store.load(run_id).await else {
            continue;
        };
        let status = match &result.status {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        println!(
            "{:<38} {:<24} {:<12}",
            result.id, result.workflow_name, status
        );
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let config = crate::config::get()?;

    println!("demoflow configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home: {}", config.home.display());
    println!("  Runs: {}", config.runs_dir().display());
    println!();
    println!("Generator:");
    println!("  Base URL: {}", config.generator.base_url);
    println!("  Model:    {}", config.generator.model);
    println!("  Retries:  {}", config.generator.retries);
    println!("  Timeout:  {}s", config.generator.timeout.as_secs());
    println!(
        "  API key:  {}",
        if config.api_key().is_empty() {
            "(not set)"
        } else {
            "(set)"
        }
    );
    println!();
    println!("Executors:");
    let commands = [
        ("web", &config.executors.web),
        ("desktop", &config.executors.desktop),
        ("app_action", &config.executors.app_action),
    ];
    for (kind, command) in commands {
        match command {
            Some(command) => println!("  {:<10} {}", kind, command.join(" ")),
            None => println!("  {:<10} (not configured)", kind),
        }
    }
    println!("  {:<10} (built-in)", "wait");
    println!();
    println!("Step timeout: {}s", config.step_timeout.as_secs());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param_json_value() {
        let (name, value) = parse_param("count=3").unwrap();
        assert_eq!(name, "count");
        assert_eq!(value, json!(3));
    }

    #[test]
    fn test_parse_param_plain_string() {
        let (name, value) = parse_param("city=San Jose").unwrap();
        assert_eq!(name, "city");
        assert_eq!(value, json!("San Jose"));
    }

    #[test]
    fn test_parse_param_rejects_missing_equals() {
        assert!(parse_param("just-a-name").is_err());
        assert!(parse_param("=value").is_err());
    }
}
