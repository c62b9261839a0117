// ABOUTME: Named action implementations invoked by task slots and the registry that binds them
// ABOUTME: Actions run as independent tokio tasks and report back through ActionOutcome or posted events

pub mod basic;
pub mod provision;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::engine::event::{Data, DataMap, Event};
use crate::engine::worker::CancelToken;
use crate::hub::Hub;

/// How an action finished.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Success; becomes GOT for forward/fallback slots and INV for inverse slots.
    Done(Data),
    /// Unrecoverable failure; becomes FAIL.
    Failed(String),
    /// This attempt is lost; becomes TIMEOUT and consumes one retry.
    Retry(String),
    /// The action posts its own events (for example children reporting back).
    Pending,
}

/// Everything an invocation may use.
pub struct ActionContext {
    pub task_key: String,
    pub worker_id: String,
    pub inputs: DataMap,
    /// Self-addressed envelope for the reply, already routed and stamped with its expiry.
    pub sase: Event,
    pub cancel: CancelToken,
    events: mpsc::UnboundedSender<Event>,
    hub: Option<Hub>,
}

impl ActionContext {
    pub fn new(
        task_key: impl Into<String>,
        worker_id: impl Into<String>,
        inputs: DataMap,
        sase: Event,
        cancel: CancelToken,
        events: mpsc::UnboundedSender<Event>,
        hub: Option<Hub>,
    ) -> Self {
        Self {
            task_key: task_key.into(),
            worker_id: worker_id.into(),
            inputs,
            sase,
            cancel,
            events,
            hub,
        }
    }

    pub fn input(&self, name: &str) -> Option<&Data> {
        self.inputs.get(name)
    }

    pub fn input_text(&self, name: &str) -> &str {
        self.input(name).map(Data::text_or_empty).unwrap_or("")
    }

    pub fn input_nuid(&self, name: &str) -> &str {
        self.input(name).map(Data::nuid_or_empty).unwrap_or("")
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.sase.expires
    }

    pub fn hub(&self) -> Option<&Hub> {
        self.hub.as_ref()
    }

    /// Post an event to the owning worker. Returns false once it has stopped.
    pub fn post(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    pub async fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled().await
    }
}

#[async_trait]
pub trait TaskAction: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: ActionContext) -> ActionOutcome;
}

type ActionFn = dyn Fn(ActionContext) -> BoxFuture<'static, ActionOutcome> + Send + Sync;

/// Action backed by a closure, handy for wiring small workflows and tests.
pub struct FnAction {
    name: String,
    call: Box<ActionFn>,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(ActionContext) -> BoxFuture<'static, ActionOutcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Box::new(call),
        }
    }
}

#[async_trait]
impl TaskAction for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: ActionContext) -> ActionOutcome {
        (self.call)(ctx).await
    }
}

pub struct ActionRegistry {
    implementations: HashMap<String, Arc<dyn TaskAction>>,
}

impl ActionRegistry {
    /// Registry holding the built-in actions.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        basic::register(&mut registry);
        provision::register(&mut registry);

        registry
    }

    pub fn empty() -> Self {
        Self {
            implementations: HashMap::new(),
        }
    }

    pub fn register(&mut self, implementation: Arc<dyn TaskAction>) {
        let name = implementation.name().to_string();
        self.implementations.insert(name, implementation);
    }

    pub fn register_fn<F>(&mut self, name: &str, call: F)
    where
        F: Fn(ActionContext) -> BoxFuture<'static, ActionOutcome> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnAction::new(name, call)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskAction>> {
        self.implementations.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.implementations.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.implementations.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
