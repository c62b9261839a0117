// ABOUTME: Main library module for the automaton saga workflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod hub;
pub mod parser;
pub mod tasks;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{EngineSettings, Event, EventKind, Worker, WorkerError, WorkerHandle, WorkerState};
pub use hub::{Hub, HubHook};
pub use parser::{WorkflowDefinition, WorkflowParser, WorkflowValidator};
pub use tasks::{ActionContext, ActionOutcome, ActionRegistry, TaskAction};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
