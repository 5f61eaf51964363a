use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use conductor::config::Config;
use conductor::core::{validate, Task, TaskGraph};
use conductor::orchestration::{
    create_execution_plan, Orchestrator, OrchestratorEvent, Strategy,
};
use conductor::Result;

/// Conductor - dependency-aware task orchestrator
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.conductor/conductor.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check a task file for cycles and missing dependencies
    Validate {
        /// JSON file holding a list of tasks
        file: PathBuf,
    },

    /// Print the execution plan for a task file
    Plan {
        file: PathBuf,

        /// sequential, parallel or adaptive
        #[arg(short, long)]
        strategy: Option<Strategy>,
    },

    /// Execute a task file with the simulated runner
    Run {
        file: PathBuf,

        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// Keep going after a task fails
        #[arg(long)]
        continue_on_error: bool,

        /// Abort the whole run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Make the named task fail (repeatable)
        #[arg(long = "fail", value_name = "TASK")]
        fail: Vec<String>,

        /// Do not print progress to stderr
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    conductor::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let ok = match cli.command {
        Command::Validate { file } => run_validate(&file)?,
        Command::Plan { file, strategy } => run_plan(&file, strategy.unwrap_or(config.strategy))?,
        Command::Run {
            file,
            strategy,
            continue_on_error,
            timeout,
            fail,
            quiet,
        } => {
            let mut config = config;
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if continue_on_error {
                config.continue_on_error = true;
            }
            if timeout.is_some() {
                config.global_timeout_secs = timeout;
            }
            run_execute(&file, &config, fail, quiet)?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn load_graph(file: &Path) -> Result<TaskGraph> {
    let tasks: Vec<Task> = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    tracing::info!(file = %file.display(), tasks = tasks.len(), "task file loaded");
    TaskGraph::from_tasks(tasks)
}

fn run_validate(file: &Path) -> Result<bool> {
    let graph = load_graph(file)?;
    let report = validate(&graph);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.valid)
}

fn run_plan(file: &Path, strategy: Strategy) -> Result<bool> {
    let graph = load_graph(file)?;
    let report = validate(&graph);
    if !report.valid {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(false);
    }
    let plan = create_execution_plan(&graph, strategy)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(true)
}

fn run_execute(file: &Path, config: &Config, fail: Vec<String>, quiet: bool) -> Result<bool> {
    let graph = load_graph(file)?;
    let runner = config.simulation.runner().failing(fail);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let (tx, rx) = mpsc::channel(256);
        let mut orchestrator =
            Orchestrator::new(graph, Arc::new(runner), config.orchestrator_config())
                .with_events(tx);

        let printer = tokio::spawn(print_events(rx, quiet));
        let outcome = orchestrator.run(config.strategy).await;
        drop(orchestrator);
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
        outcome
    });

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(result.is_success())
        }
        Err(conductor::Error::Graph(report)) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

async fn print_events(mut rx: mpsc::Receiver<OrchestratorEvent>, quiet: bool) {
    while let Some(event) = rx.recv().await {
        if quiet {
            continue;
        }
        match event {
            OrchestratorEvent::PhaseStarted {
                index,
                name,
                parallel,
            } => {
                let mode = if parallel { "parallel" } else { "sequential" };
                eprintln!("phase {} ({}, {})", index + 1, name, mode);
            }
            OrchestratorEvent::WorkerStarted { worker_id, task_id } => {
                eprintln!("  started   {} [{}]", task_id, worker_id.short());
            }
            OrchestratorEvent::ProgressUpdate { .. } => {}
            OrchestratorEvent::TaskCompleted { task_id, .. } => {
                eprintln!("  completed {}", task_id);
            }
            OrchestratorEvent::TaskFailed { task_id, error, .. } => {
                eprintln!("  failed    {}: {}", task_id, error);
            }
            OrchestratorEvent::PhaseCompleted {
                completed, failed, ..
            } => {
                eprintln!("  {} completed, {} failed", completed, failed);
            }
        }
    }
}
