// ABOUTME: Error types for the in-process hub
// ABOUTME: Registration, hook installation and launch failures

use thiserror::Error;

use crate::engine::WorkerError;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Hook '{name}' reuses code {code} already taken by '{existing}'")]
    DuplicateHookCode {
        code: i32,
        name: String,
        existing: String,
    },

    #[error("Worker {id} is already registered")]
    AlreadyRegistered { id: String },

    #[error("Hub {id} has been stopped")]
    Stopped { id: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type Result<T> = std::result::Result<T, HubError>;
