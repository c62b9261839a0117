// ABOUTME: Workflow validation logic and dependency checking
// ABOUTME: Collects every structural, graph and action-registry problem of a definition into one report

use std::collections::HashSet;
use std::sync::Arc;

use super::error::{Result, ValidationError};
use super::workflow::WorkflowDefinition;
use crate::engine::{DependencyGraph, WorkerError};
use crate::tasks::ActionRegistry;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub struct WorkflowValidator {
    registry: Option<Arc<ActionRegistry>>,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self { registry: None }
    }

    /// Also require every slot's action to be registered.
    pub fn with_registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<ValidationReport> {
        let mut report = ValidationReport::new();

        if workflow.tasks.is_empty() {
            report.errors.push(ValidationError::EmptyWorkflow);
        }
        self.validate_goal_and_start(workflow, &mut report);
        self.validate_dependencies(workflow, &mut report);
        self.validate_slots(workflow, &mut report);
        self.check_unneeded_tasks(workflow, &mut report);

        report.is_valid = report.errors.is_empty();
        Ok(report)
    }

    fn validate_goal_and_start(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        if !workflow.tasks.contains_key(&workflow.goal) {
            report.errors.push(ValidationError::UnknownGoal {
                goal: workflow.goal.clone(),
            });
        }
        for start in workflow.start_tasks() {
            match workflow.tasks.get(&start) {
                None => report
                    .errors
                    .push(ValidationError::UnknownStartTask { task: start }),
                Some(task) if !task.depends_on.is_empty() => report
                    .errors
                    .push(ValidationError::StartTaskHasDependencies { task: start }),
                Some(_) => {}
            }
        }
    }

    fn validate_dependencies(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        let task_ids: HashSet<&String> = workflow.tasks.keys().collect();

        for (task_id, task) in &workflow.tasks {
            let declared = task
                .depends_on
                .iter()
                .chain(task.reverse_depends_on.iter().flatten())
                .chain(task.all_depends_on.iter().flatten());
            for dep in declared {
                if dep == task_id {
                    report.errors.push(ValidationError::InvalidTaskConfig {
                        task: task_id.clone(),
                        reason: "task cannot depend on itself".to_string(),
                    });
                } else if !task_ids.contains(dep) {
                    report.errors.push(ValidationError::UnknownDependency {
                        task: task_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let graph = build_graph(workflow);
        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(WorkerError::CircularDependency { tasks }) => {
                report.errors.push(ValidationError::CircularDependency { tasks });
                return;
            }
            Err(other) => {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: workflow.goal.clone(),
                    reason: other.to_string(),
                });
                return;
            }
        };

        for (task_id, task) in &workflow.tasks {
            let Some(declared) = &task.all_depends_on else {
                continue;
            };
            for upstream in graph.upstream_of(task_id, &order) {
                if !declared.contains(&upstream) {
                    report.errors.push(ValidationError::IncompleteClosure {
                        task: task_id.clone(),
                        missing: upstream,
                    });
                }
            }
        }
    }

    fn validate_slots(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        for (task_id, task) in &workflow.tasks {
            for (role, slot) in task.slots() {
                if slot.action.trim().is_empty() {
                    report.errors.push(ValidationError::InvalidTaskConfig {
                        task: task_id.clone(),
                        reason: format!("{} action name cannot be empty", role),
                    });
                    continue;
                }
                if let Some(registry) = &self.registry {
                    if !registry.contains(&slot.action) {
                        report.errors.push(ValidationError::UnknownAction {
                            task: task_id.clone(),
                            role: role.to_string(),
                            action: slot.action.clone(),
                            supported: registry.names().into_iter().map(String::from).collect(),
                        });
                    }
                }
            }
            if task.inverse.is_none() {
                report.warnings.push(format!(
                    "Task '{}' has no inverse action; undo leaves its effects in place",
                    task_id
                ));
            }
        }
    }

    /// Warn about tasks the goal never needs.
    fn check_unneeded_tasks(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        if !workflow.tasks.contains_key(&workflow.goal) {
            return;
        }
        let graph = build_graph(workflow);
        let Ok(order) = graph.topological_order() else {
            return;
        };
        let needed: HashSet<String> = graph
            .upstream_of(&workflow.goal, &order)
            .into_iter()
            .collect();

        for task_id in workflow.tasks.keys() {
            if task_id != &workflow.goal && !needed.contains(task_id) {
                report
                    .warnings
                    .push(format!("Task '{}' is not needed to reach the goal", task_id));
            }
        }
    }
}

fn build_graph(workflow: &WorkflowDefinition) -> DependencyGraph {
    DependencyGraph::from_edges(
        workflow
            .tasks
            .iter()
            .map(|(task_id, task)| (task_id.as_str(), task.depends_on.as_slice())),
    )
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> WorkflowDefinition {
        WorkflowDefinition::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_circular_dependency_detection() {
        let workflow = parse(
            r#"
name: circular_test
goal: task_a
start_tasks: []
tasks:
  task_a:
    depends_on: [task_b]
    forward: { action: noop }
  task_b:
    depends_on: [task_a]
    forward: { action: noop }
"#,
        );
        let report = WorkflowValidator::new().validate(&workflow).unwrap();

        assert!(report.has_errors());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::CircularDependency { .. })));
    }

    #[test]
    fn test_unknown_dependency_and_goal() {
        let workflow = parse(
            r#"
name: unknown_dep_test
goal: missing
tasks:
  task_a:
    depends_on: [nonexistent_task]
    forward: { action: noop }
"#,
        );
        let report = WorkflowValidator::new().validate(&workflow).unwrap();

        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownDependency { .. })));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownGoal { .. })));
    }

    #[test]
    fn test_incomplete_closure_and_bad_start() {
        let workflow = parse(
            r#"
name: closure_test
goal: c
start_tasks: [a, b]
tasks:
  a:
    forward: { action: noop }
  b:
    depends_on: [a]
    forward: { action: noop }
  c:
    depends_on: [b]
    all_depends_on: [b]
    forward: { action: noop }
"#,
        );
        let report = WorkflowValidator::new().validate(&workflow).unwrap();

        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::IncompleteClosure { task, missing } if task == "c" && missing == "a"
        )));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::StartTaskHasDependencies { task } if task == "b")));
    }

    #[test]
    fn test_registry_checks_actions() {
        let workflow = parse(
            r#"
name: actions
goal: b
tasks:
  a:
    forward: { action: noop }
    inverse: { action: teleport }
  b:
    depends_on: [a]
    forward: { action: echo }
  spare:
    forward: { action: noop }
"#,
        );
        let report = WorkflowValidator::new()
            .with_registry(Arc::new(ActionRegistry::new()))
            .validate(&workflow)
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            ValidationError::UnknownAction { role, action, .. } if role == "inverse" && action == "teleport"
        ));
        assert!(report.warnings.iter().any(|w| w.contains("'spare' is not needed")));
    }

    #[test]
    fn test_valid_workflow() {
        let workflow = parse(
            r#"
name: valid_test
goal: second
tasks:
  first:
    forward: { action: echo }
    inverse: { action: noop }
  second:
    depends_on: [first]
    forward: { action: noop }
    inverse: { action: noop }
"#,
        );
        let report = WorkflowValidator::new()
            .with_registry(Arc::new(ActionRegistry::new()))
            .validate(&workflow)
            .unwrap();

        assert!(!report.has_errors());
        assert!(!report.has_warnings());
        assert!(report.is_valid);
    }
}
