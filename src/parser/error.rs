// ABOUTME: Error types for workflow parsing and validation
// ABOUTME: Defines specific error types for parser module operations

use thiserror::Error;

use crate::engine::WorkerError;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read workflow file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Cannot build worker: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Circular dependency detected in tasks: {tasks:?}")]
    CircularDependency { tasks: Vec<String> },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Invalid task configuration for '{task}': {reason}")]
    InvalidTaskConfig { task: String, reason: String },

    #[error("Goal task '{goal}' is not defined")]
    UnknownGoal { goal: String },

    #[error("Start task '{task}' is not defined")]
    UnknownStartTask { task: String },

    #[error("Start task '{task}' cannot have dependencies")]
    StartTaskHasDependencies { task: String },

    #[error("Task '{task}' declares all_depends_on without upstream task '{missing}'")]
    IncompleteClosure { task: String, missing: String },

    #[error("Empty workflow: no tasks defined")]
    EmptyWorkflow,

    #[error("Unknown {role} action '{action}' in task '{task}'. Registered actions: {supported:?}")]
    UnknownAction {
        task: String,
        role: String,
        action: String,
        supported: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, ParserError>;
