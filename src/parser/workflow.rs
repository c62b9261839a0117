// ABOUTME: Workflow definition document: goal, start tasks, inputs and the task graph
// ABOUTME: Parses from YAML and builds an engine WorkerState or an unbound Worker

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use super::error::{ParserError, Result, ValidationError};
use super::task::TaskDefinition;
use crate::engine::{DataMap, EngineSettings, Worker, WorkerState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub goal: String,
    /// Defaults to every task without dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_tasks: Option<Vec<String>>,
    #[serde(default)]
    pub hold: bool,
    #[serde(default)]
    pub undo_on_fail: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: IndexMap<String, DataMap>,
    pub tasks: IndexMap<String, TaskDefinition>,
}

impl WorkflowDefinition {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParserError::IoError)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let workflow: WorkflowDefinition =
            serde_yaml::from_str(content).map_err(ParserError::YamlError)?;
        workflow.validate_structure()?;
        Ok(workflow)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ParserError::MissingField("name".to_string()));
        }
        if self.goal.trim().is_empty() {
            return Err(ParserError::MissingField("goal".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(ValidationError::EmptyWorkflow.into());
        }
        Ok(())
    }

    /// Declared start tasks, or the tasks without dependencies.
    pub fn start_tasks(&self) -> Vec<String> {
        match &self.start_tasks {
            Some(start) => start.clone(),
            None => self
                .tasks
                .iter()
                .filter(|(_, task)| task.depends_on.is_empty())
                .map(|(key, _)| key.clone())
                .collect(),
        }
    }

    pub fn get_dependent_tasks(&self, task_id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.depends_on.iter().any(|dep| dep == task_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Build the engine state: graph validated, closures filled, inputs set.
    pub fn to_state(&self) -> Result<WorkerState> {
        let tasks = self
            .tasks
            .iter()
            .map(|(key, definition)| definition.to_task(key, self.get_dependent_tasks(key)))
            .collect();

        let mut state = WorkerState::new(&self.name, &self.goal, &self.start_tasks(), tasks)?
            .with_hold(self.hold)
            .with_undo_on_fail(self.undo_on_fail);
        if !self.inputs.is_empty() {
            state.set_worker_inputs(self.inputs.clone())?;
        }
        Ok(state)
    }

    /// Build an unbound worker; bind it to an action registry before running.
    pub fn into_worker(self, settings: EngineSettings) -> Result<Worker> {
        let state = self.to_state()?;
        Ok(Worker::with_settings(state, settings))
    }

    /// Describe an existing worker state as a definition.
    pub fn from_state(state: &WorkerState, description: Option<String>) -> Self {
        let inputs = state
            .tasks
            .iter()
            .filter(|(_, task)| !task.inputs.is_empty() && task.depends_on.is_empty())
            .map(|(key, task)| (key.clone(), task.inputs.clone()))
            .collect();

        Self {
            name: state.name.clone(),
            description,
            goal: state.goal.clone(),
            start_tasks: Some(state.start_tasks.clone()),
            hold: state.hold,
            undo_on_fail: state.undo_on_fail,
            inputs,
            tasks: state
                .tasks
                .iter()
                .map(|(key, task)| (key.clone(), TaskDefinition::from(task)))
                .collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ParserError::YamlError)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(path.as_ref(), yaml).map_err(ParserError::IoError)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(ParserError::IoError)?;
        self.parse_string(&content)
    }

    pub fn parse_string(&self, content: &str) -> Result<WorkflowDefinition> {
        WorkflowDefinition::from_yaml(content)
    }
}

impl Default for WorkflowParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PAIR: &str = r#"
name: pair
goal: second
inputs:
  first:
    message:
      text: hello
tasks:
  first:
    forward:
      action: echo
      timeout: 50ms
    inverse:
      action: noop
  second:
    depends_on: [first]
    forward:
      action: noop
"#;

    #[test]
    fn test_parse_and_build_state() {
        let workflow = WorkflowDefinition::from_yaml(PAIR).unwrap();
        assert_eq!(workflow.start_tasks(), vec!["first"]);
        assert_eq!(workflow.get_dependent_tasks("first"), vec!["second"]);

        let state = workflow.to_state().unwrap();
        assert_eq!(state.goal_task, "second");
        assert_eq!(state.tasks["first"].reverse_depends_on, vec!["second"]);
        assert_eq!(state.tasks["second"].all_depends_on, vec!["first"]);
        assert_eq!(state.tasks["first"].inputs["message"].text_or_empty(), "hello");
    }

    #[test]
    fn test_missing_goal_and_empty_tasks_rejected() {
        let no_goal = "name: x\ngoal: \"\"\ntasks:\n  a:\n    forward:\n      action: noop\n";
        assert!(matches!(
            WorkflowDefinition::from_yaml(no_goal),
            Err(ParserError::MissingField(_))
        ));

        let empty = "name: x\ngoal: a\ntasks: {}\n";
        assert!(matches!(
            WorkflowDefinition::from_yaml(empty),
            Err(ParserError::ValidationError(ValidationError::EmptyWorkflow))
        ));
    }

    #[test]
    fn test_unknown_goal_fails_to_build() {
        let yaml = PAIR.replace("goal: second", "goal: third");
        let workflow = WorkflowDefinition::from_yaml(&yaml).unwrap();
        assert!(matches!(workflow.to_state(), Err(ParserError::Worker(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let workflow = WorkflowDefinition::from_yaml(PAIR).unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(workflow.to_yaml().unwrap().as_bytes()).unwrap();

        let loaded = WorkflowDefinition::from_file(file.path()).unwrap();
        assert_eq!(loaded.name, "pair");
        assert_eq!(loaded.tasks.len(), 2);
        assert_eq!(loaded.tasks["first"].forward.timeout, std::time::Duration::from_millis(50));
    }
}
