// ABOUTME: Common test utilities and helpers for integration tests
// ABOUTME: Provides workflow builders, provisioning fixtures and polling helpers
#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;

use automaton::engine::{EngineSettings, Worker, WorkerState};
use automaton::tasks::provision::{self, ProvisionTimings};
use automaton::tasks::ActionRegistry;

/// Upper bound for any single scenario before a test gives up.
pub const SCENARIO_LIMIT: Duration = Duration::from_secs(20);

/// Provisioning timings short enough for tests but far above the stub latency.
pub const FAST: ProvisionTimings = ProvisionTimings {
    timeout: Duration::from_millis(50),
    slow_timeout: Duration::from_millis(100),
};

/// Built-in registry with the slow provision stub stalling past `timings`.
pub fn registry(timings: ProvisionTimings) -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    provision::register_with(&mut registry, timings);
    Arc::new(registry)
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        seed: Some(7),
        ..Default::default()
    }
}

/// The provisioning worker with Bob's inputs filled in.
pub fn provision_state(timings: ProvisionTimings) -> WorkerState {
    let mut state = provision::provision_worker("provision", timings).expect("provision graph");
    state
        .set_worker_inputs(provision::provision_inputs("Bob", 66, "Small").expect("inputs"))
        .expect("start tasks exist");
    state
}

pub async fn bound_worker(state: WorkerState, timings: ProvisionTimings) -> Worker {
    Worker::with_settings(state, settings())
        .bind(registry(timings))
        .await
        .expect("every provisioning action is registered")
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Nuid of a task's current result, empty when it has none.
pub fn result_nuid(state: &WorkerState, task: &str) -> String {
    state.tasks[task]
        .result
        .as_ref()
        .map(|result| result.nuid_or_empty().to_string())
        .unwrap_or_default()
}

pub struct TestTask {
    pub id: String,
    pub action: String,
    pub inverse: Option<String>,
    pub depends_on: Vec<String>,
    pub timeout: String,
    pub max_retries: u32,
}

pub struct TestWorkflowBuilder {
    name: String,
    goal: Option<String>,
    undo_on_fail: bool,
    inputs: Vec<(String, String, String)>,
    tasks: Vec<TestTask>,
}

impl TestWorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            goal: None,
            undo_on_fail: false,
            inputs: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_goal(mut self, goal: &str) -> Self {
        self.goal = Some(goal.to_string());
        self
    }

    pub fn undo_on_fail(mut self) -> Self {
        self.undo_on_fail = true;
        self
    }

    pub fn with_input(mut self, task: &str, name: &str, text: &str) -> Self {
        self.inputs
            .push((task.to_string(), name.to_string(), text.to_string()));
        self
    }

    pub fn add_task(mut self, id: &str, action: &str, depends_on: Vec<&str>) -> Self {
        self.tasks.push(TestTask {
            id: id.to_string(),
            action: action.to_string(),
            inverse: Some("noop".to_string()),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            timeout: "500ms".to_string(),
            max_retries: 3,
        });
        self
    }

    pub fn add_failing_task(self, id: &str, depends_on: Vec<&str>) -> Self {
        self.add_task(id, "fail", depends_on)
    }

    /// Goal defaults to the last task added.
    pub fn generate_yaml(&self) -> String {
        let goal = self
            .goal
            .clone()
            .or_else(|| self.tasks.last().map(|task| task.id.clone()))
            .unwrap_or_default();

        let mut yaml = format!("name: {}\ngoal: {}\n", self.name, goal);
        if self.undo_on_fail {
            yaml.push_str("undo_on_fail: true\n");
        }

        if !self.inputs.is_empty() {
            yaml.push_str("inputs:\n");
            for (task, name, text) in &self.inputs {
                yaml.push_str(&format!("  {}:\n    {}:\n      text: \"{}\"\n", task, name, text));
            }
        }

        yaml.push_str("tasks:\n");
        for task in &self.tasks {
            yaml.push_str(&format!("  {}:\n", task.id));
            yaml.push_str(&format!(
                "    forward:\n      action: {}\n      timeout: {}\n      max_retries: {}\n",
                task.action, task.timeout, task.max_retries
            ));
            if let Some(inverse) = &task.inverse {
                yaml.push_str(&format!(
                    "    inverse:\n      action: {}\n      timeout: {}\n",
                    inverse, task.timeout
                ));
            }
            if !task.depends_on.is_empty() {
                yaml.push_str(&format!("    depends_on: [{}]\n", task.depends_on.join(", ")));
            }
        }
        yaml
    }

    pub async fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.generate_yaml()).await
    }
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn workflow_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}.yaml", name))
    }

    pub fn checkpoint_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}.json", name))
    }

    pub async fn create_workflow_file(&self, name: &str, builder: &TestWorkflowBuilder) -> PathBuf {
        let workflow_file = self.workflow_file(name);
        builder
            .write_to_file(&workflow_file)
            .await
            .expect("Failed to write workflow file");
        workflow_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_builder() {
        let yaml = TestWorkflowBuilder::new("builder")
            .with_input("first", "message", "hi")
            .add_task("first", "echo", vec![])
            .add_task("second", "noop", vec!["first"])
            .generate_yaml();

        assert!(yaml.contains("name: builder"));
        assert!(yaml.contains("goal: second"));
        assert!(yaml.contains("depends_on: [first]"));
        assert!(yaml.contains("text: \"hi\""));
    }
}
