// ABOUTME: Saga workflow engine: workers drive a dependency graph of tasks forward and unwind it on failure
// ABOUTME: Re-exports the worker, event, task and timeout types used by the hub, parser and CLI

pub mod checkpoint;
pub mod dependency;
pub mod error;
pub mod event;
mod event_loop;
mod rules;
pub mod task;
pub mod timeout;
pub mod worker;

pub use dependency::DependencyGraph;
pub use error::{Result, WorkerError};
pub use event::{next_nuid, AppValue, Data, DataMap, Event, EventKind, BROADCAST_ID, JSON_DATA_MAP};
pub use task::{ActionSlot, Children, Task, PARTIAL_FRACTION, RESULT_KEY};
pub use timeout::{skeptic_score, Confidence, TimeoutOracle, Transit};
pub use worker::{map_arg_data, CancelToken, EngineSettings, TaskMap, Worker, WorkerHandle, WorkerState};
