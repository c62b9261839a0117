// ABOUTME: Error types for the worker engine
// ABOUTME: Covers graph validation, dispatch, checkpoint and terminal worker failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Task not found: {task}")]
    TaskNotFound { task: String },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Circular dependency detected: {tasks:?}")]
    CircularDependency { tasks: Vec<String> },

    #[error("Task '{task}' lists '{missing}' upstream but all_depends_on omits it")]
    IncompleteClosure { task: String, missing: String },

    #[error("Invalid task configuration: {task} - {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("Invalid worker configuration: {0}")]
    InvalidWorker(String),

    #[error("Argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("Action '{action}' for task '{task}' is not registered")]
    UnknownAction { task: String, action: String },

    #[error("Worker '{worker}' has no action registry bound")]
    Unbound { worker: String },

    #[error("Retries exhausted for task '{task}': {reason}")]
    RetriesExhausted { task: String, reason: String },

    #[error("Task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("Inconsistent worker state: {0}")]
    Inconsistent(String),

    #[error("Event channel closed for worker '{worker}'")]
    ChannelClosed { worker: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
