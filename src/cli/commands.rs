// ABOUTME: Command implementations for the automaton CLI
// ABOUTME: Handles run, validate, inspect, oracle and init

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::Config;
use crate::engine::{
    checkpoint, skeptic_score, Confidence, TimeoutOracle, Transit, WorkerHandle, WorkerState,
};
use crate::hub::Hub;
use crate::parser::{WorkflowDefinition, WorkflowParser, WorkflowValidator};
use crate::tasks::provision::{self, ProvisionTimings};
use crate::tasks::ActionRegistry;

/// How long `run --fail` waits for the worker to reach its goal.
const GOAL_WAIT: Duration = Duration::from_secs(30);

/// Run a workflow to completion (or to its unwind)
pub async fn run_workflow(
    workflow_path: PathBuf,
    checkpoint_path: Option<PathBuf>,
    seed: Option<u64>,
    fail: Option<(String, String)>,
    config: &Config,
) -> Result<()> {
    info!("Starting workflow: {}", workflow_path.display());

    let registry = Arc::new(ActionRegistry::new());
    let definition = load_valid(&workflow_path, &registry).await?;
    let hold = definition.hold || fail.is_some();

    let mut settings = config.engine.to_settings();
    if seed.is_some() {
        settings.seed = seed;
    }

    let worker = definition
        .into_worker(settings)
        .context("building worker")?
        .bind(Arc::clone(&registry))
        .await?;
    let handle = worker.handle();
    handle.set_hold(hold).await;

    let hub = Hub::start(Vec::new())?;
    let join = hub.launch(worker).await?;

    if hold && wait_for_goal(&handle, &join).await? {
        match fail {
            Some((task, message)) => {
                info!(task = %task, "injecting failure");
                handle.fail(&task, message)?;
            }
            None => handle.release().await,
        }
    }

    let outcome = join.await.context("worker task panicked")?;
    hub.stop();

    let state = handle.snapshot().await;
    print_summary(&state);

    if let Some(path) = checkpoint_path {
        checkpoint::write_to(&state, &path).await?;
        println!("Checkpoint written to {}", path.display());
    }

    match outcome {
        Ok(_) if state.forward => Ok(()),
        Ok(_) => Err(anyhow!(
            "Worker '{}' unwound: {}",
            state.name,
            state.last_error.as_deref().unwrap_or("no error recorded")
        )),
        Err(error) => Err(anyhow!("Worker '{}' failed: {}", state.name, error)),
    }
}

/// Wait until the worker holds at its goal. False if it stopped first.
async fn wait_for_goal<T>(handle: &WorkerHandle, join: &JoinHandle<T>) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + GOAL_WAIT;
    while !handle.forward_goal_reached().await {
        if join.is_finished() {
            return Ok(false);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("worker did not reach its goal within {:?}", GOAL_WAIT));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(true)
}

async fn load_valid(path: &PathBuf, registry: &Arc<ActionRegistry>) -> Result<WorkflowDefinition> {
    let definition = WorkflowParser::new()
        .parse_file(path)
        .await
        .map_err(|e| anyhow!("Failed to parse workflow: {}", e))?;

    let report = WorkflowValidator::new()
        .with_registry(Arc::clone(registry))
        .validate(&definition)?;
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if report.has_errors() {
        for error in &report.errors {
            eprintln!("  error: {}", error);
        }
        return Err(anyhow!(
            "Workflow '{}' has {} validation error(s)",
            definition.name,
            report.errors.len()
        ));
    }
    Ok(definition)
}

/// Validate a workflow file
pub async fn validate_workflow(workflow_path: PathBuf, _config: &Config) -> Result<()> {
    info!("Validating workflow: {}", workflow_path.display());

    let registry = Arc::new(ActionRegistry::new());
    let definition = load_valid(&workflow_path, &registry).await?;
    definition
        .to_state()
        .map_err(|e| anyhow!("Workflow validation failed: {}", e))?;

    println!("✓ Workflow '{}' is valid", definition.name);
    println!("  Goal: {}", definition.goal);
    println!("  Start tasks: {}", definition.start_tasks().join(", "));
    println!("  Tasks: {}", definition.tasks.len());
    Ok(())
}

/// Print a checkpoint's worker and task state
pub async fn inspect_checkpoint(checkpoint_path: PathBuf, _config: &Config) -> Result<()> {
    let state = checkpoint::read_from(&checkpoint_path)
        .await
        .with_context(|| format!("reading checkpoint {}", checkpoint_path.display()))?;
    print_summary(&state);
    Ok(())
}

/// Report the skeptic score and how often the oracle fires
pub fn run_oracle(
    timeout: Duration,
    elapsed: Duration,
    confidence: &str,
    transit: &str,
    trials: u32,
    seed: Option<u64>,
) -> Result<()> {
    let confidence: Confidence = parse_knob("confidence", confidence)?;
    let transit: Transit = parse_knob("transit", transit)?;
    let oracle = TimeoutOracle::from_seed(seed);

    let fired = (0..trials)
        .filter(|_| oracle.is_timed_out(timeout, elapsed, confidence, transit))
        .count();

    match skeptic_score(timeout, elapsed, confidence, transit) {
        None => println!("Score: none (not overdue)"),
        Some(score) if score.is_infinite() => println!("Score: hard timeout"),
        Some(score) => println!("Score: {:.4}", score),
    }
    println!(
        "Timed out in {}/{} trials ({:.1}%)",
        fired,
        trials,
        if trials == 0 { 0.0 } else { fired as f64 * 100.0 / trials as f64 }
    );
    Ok(())
}

fn parse_knob<T: serde::de::DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    serde_yaml::from_str(&value.to_lowercase()).map_err(|_| anyhow!("Unknown {} '{}'", name, value))
}

/// Write the provisioning workflow as a starter file
pub async fn init_workflow(name: String, output_dir: PathBuf, _config: &Config) -> Result<()> {
    info!("Initializing workflow '{}' in {}", name, output_dir.display());

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir)?;
    }

    let workflow_file = output_dir.join(format!("{}.yaml", name));
    if workflow_file.exists() {
        return Err(anyhow!(
            "Workflow file already exists: {}",
            workflow_file.display()
        ));
    }

    let definition = starter_workflow(&name)?;
    definition.save_to_file(&workflow_file)?;

    println!("Created workflow file: {}", workflow_file.display());
    Ok(())
}

fn starter_workflow(name: &str) -> Result<WorkflowDefinition> {
    let timings = ProvisionTimings {
        timeout: Duration::from_millis(500),
        slow_timeout: Duration::from_secs(1),
    };
    let mut state = provision::provision_worker(name, timings)?;
    state.set_worker_inputs(provision::provision_inputs("Bob", 66, "Small")?)?;
    Ok(WorkflowDefinition::from_state(
        &state,
        Some("Provision, image and boot a container; unwinds on failure".to_string()),
    ))
}

fn print_summary(state: &WorkerState) {
    let direction = if state.forward { "forward" } else { "undo" };
    println!("Worker '{}' ({})", state.name, state.id);
    println!(
        "  Direction: {}  Goal: {} (goal state {})  Elapsed: {:?}",
        direction, state.goal_task, state.goal_state, state.elapsed
    );
    if let Some(error) = &state.last_error {
        println!("  Last error: {}", error);
    }

    for (key, task) in &state.tasks {
        let status = if task.working {
            "working"
        } else if task.has_result {
            "done"
        } else if task.slots().any(|(_, slot)| slot.failed) || !task.forward.errors.is_empty() {
            "failed"
        } else {
            "pending"
        };
        let retries = task.forward.retries + task.fallback.as_ref().map_or(0, |f| f.retries);
        print!("  Task '{}': {}", key, status);
        if retries > 0 {
            print!(" (retries: {})", retries);
        }
        if let Some(text) = task.result.as_ref().and_then(|r| r.text.as_deref()) {
            print!(" -> {}", text.trim());
        }
        println!();
        for error in task.slots().flat_map(|(_, slot)| slot.errors.iter()) {
            println!("      {}", error);
        }
    }
}
