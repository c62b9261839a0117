// ABOUTME: Worker state, construction API and lifecycle helpers for driving a task graph
// ABOUTME: Shares the checkpointable state behind a read/write lock between the event loop and its handles

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::dependency;
use super::error::{Result, WorkerError};
use super::event::{next_nuid, Data, DataMap, Event, EventKind};
use super::task::{Task, PARTIAL_FRACTION};
use super::timeout::TimeoutOracle;
use crate::hub::Hub;
use crate::tasks::ActionRegistry;

pub type TaskMap = IndexMap<String, Task>;

/// Pair argument names with values into an input map.
pub fn map_arg_data<S: AsRef<str>>(names: &[S], values: Vec<Data>) -> Result<DataMap> {
    if values.is_empty() {
        return Err(WorkerError::ArgumentMismatch(
            "no values found for arguments".to_string(),
        ));
    }
    if names.is_empty() {
        return Err(WorkerError::ArgumentMismatch(
            "no arguments found for values".to_string(),
        ));
    }
    if names.len() != values.len() {
        return Err(WorkerError::ArgumentMismatch(format!(
            "{} argument names for {} values",
            names.len(),
            values.len()
        )));
    }

    Ok(names
        .iter()
        .map(|name| name.as_ref().to_string())
        .zip(values)
        .collect())
}

/// Runtime knobs of the event loop.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Idle interval between timeout scans.
    pub poll_interval: Duration,
    /// Share of expected children that marks a fan-out as partially reported.
    pub partial_fraction: f64,
    /// Checkpoint after every applied event instead of only on termination.
    pub auto_save: bool,
    pub checkpoint_dir: Option<PathBuf>,
    /// Seed for the timeout oracle; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            partial_fraction: PARTIAL_FRACTION,
            auto_save: false,
            checkpoint_dir: None,
            seed: None,
        }
    }
}

/// Everything about a worker that survives a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerState {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub parent_task: Option<String>,
    #[serde(default)]
    pub parent_expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub tasks: TaskMap,
    /// Running forward rules (false while undoing).
    pub forward: bool,
    /// Resume forward once the current reversal reaches its goal.
    pub undo: bool,
    /// Task whose `has_result` defines the current goal.
    pub goal_task: String,
    /// Original forward goal, restored after a transient reversal.
    pub goal: String,
    pub goal_state: bool,
    pub forward_goal: bool,
    pub start_tasks: Vec<String>,
    pub awake: bool,
    pub hold: bool,
    pub terminate: bool,
    pub undo_on_fail: bool,
    #[serde(default)]
    pub auto_save: bool,
    pub origin: DateTime<Utc>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde", default)]
    pub elapsed: Duration,
}

impl WorkerState {
    /// Assemble a worker from its goal, start tasks and task set.
    ///
    /// The graph is validated and any missing `all_depends_on` closure is filled in.
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        goal: impl Into<String>,
        start_tasks: &[S],
        tasks: Vec<Task>,
    ) -> Result<Self> {
        let goal = goal.into();
        let mut map = TaskMap::new();
        for task in tasks {
            let key = task.key.clone();
            if map.insert(key.clone(), task).is_some() {
                return Err(WorkerError::InvalidTask {
                    task: key,
                    reason: "duplicate task key".to_string(),
                });
            }
        }
        let start_tasks: Vec<String> = start_tasks.iter().map(|s| s.as_ref().to_string()).collect();

        dependency::complete_closures(&mut map)?;
        dependency::validate(&map, &goal, &start_tasks)?;

        Ok(Self {
            name: name.into(),
            id: next_nuid(),
            tasks: map,
            forward: true,
            goal_task: goal.clone(),
            goal,
            goal_state: true,
            start_tasks,
            origin: Utc::now(),
            ..Default::default()
        })
    }

    pub fn with_hold(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_undo_on_fail(mut self, undo_on_fail: bool) -> Self {
        self.undo_on_fail = undo_on_fail;
        self
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    /// Deliver the goal result to `task` of worker `parent_id` as a GOTCHILD.
    pub fn with_parent(
        mut self,
        parent_id: impl Into<String>,
        task: impl Into<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Self {
        self.parent_id = Some(parent_id.into());
        self.parent_task = Some(task.into());
        self.parent_expires = expires;
        self
    }

    /// Pre-populate external inputs of one task.
    pub fn set_inputs(&mut self, task: &str, inputs: DataMap) -> Result<()> {
        let task = self.task_mut(task)?;
        task.inputs = inputs;
        Ok(())
    }

    /// Pre-populate inputs for several tasks and issue a fresh worker id.
    pub fn set_worker_inputs(&mut self, inputs: IndexMap<String, DataMap>) -> Result<()> {
        for (key, map) in inputs {
            self.set_inputs(&key, map)?;
        }
        self.id = next_nuid();
        Ok(())
    }

    pub fn task(&self, key: &str) -> Result<&Task> {
        self.tasks.get(key).ok_or_else(|| WorkerError::TaskNotFound {
            task: key.to_string(),
        })
    }

    pub fn task_mut(&mut self, key: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(key)
            .ok_or_else(|| WorkerError::TaskNotFound {
                task: key.to_string(),
            })
    }

    pub fn is_start_task(&self, key: &str) -> bool {
        self.start_tasks.iter().any(|start| start == key)
    }

    pub fn has_parent(&self) -> bool {
        self.parent_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Narrow capability for one task's cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<RwLock<WorkerState>>,
    task: String,
}

impl CancelToken {
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Whether a CANCEL has been applied to this task.
    pub async fn is_cancelled(&self) -> bool {
        let state = self.state.read().await;
        state
            .tasks
            .get(&self.task)
            .is_some_and(|task| task.cancel_requested)
    }
}

/// Runnable worker: shared state, inbound channel, registry and oracle.
///
/// Built from a [`WorkerState`], bound to an [`ActionRegistry`] and then
/// either launched through a [`Hub`] or driven directly with `run`.
pub struct Worker {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) state: Arc<RwLock<WorkerState>>,
    pub(crate) sender: mpsc::UnboundedSender<Event>,
    pub(crate) inbox: mpsc::UnboundedReceiver<Event>,
    pub(crate) hub: Option<Hub>,
    pub(crate) registry: Option<Arc<ActionRegistry>>,
    pub(crate) oracle: TimeoutOracle,
    pub(crate) settings: EngineSettings,
}

impl Worker {
    pub fn new(state: WorkerState) -> Self {
        Self::with_settings(state, EngineSettings::default())
    }

    pub fn with_settings(state: WorkerState, settings: EngineSettings) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        let oracle = TimeoutOracle::from_seed(settings.seed);
        Self {
            id: state.id.clone(),
            name: state.name.clone(),
            state: Arc::new(RwLock::new(state)),
            sender,
            inbox,
            hub: None,
            registry: None,
            oracle,
            settings,
        }
    }

    /// Attach action implementations; every slot's action must be registered.
    pub async fn bind(mut self, registry: Arc<ActionRegistry>) -> Result<Self> {
        {
            let state = self.state.read().await;
            for task in state.tasks.values() {
                for (_, slot) in task.slots() {
                    if !registry.contains(&slot.action) {
                        return Err(WorkerError::UnknownAction {
                            task: task.key.clone(),
                            action: slot.action.clone(),
                        });
                    }
                }
            }
        }
        debug!(worker = %self.name, "bound {} actions", registry.len());
        self.registry = Some(registry);
        Ok(self)
    }

    pub fn with_oracle(mut self, oracle: TimeoutOracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub(crate) fn attach_hub(&mut self, hub: Hub) {
        self.hub = Some(hub);
    }

    pub fn is_bound(&self) -> bool {
        self.registry.is_some()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id.clone(),
            name: self.name.clone(),
            state: Arc::clone(&self.state),
            sender: self.sender.clone(),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.sender.clone()
    }

    pub(crate) fn cancel_token(&self, task: &str) -> CancelToken {
        CancelToken {
            state: Arc::clone(&self.state),
            task: task.to_string(),
        }
    }

    pub(crate) fn post(&self, event: Event) {
        if self.sender.send(event).is_err() {
            debug!(worker = %self.name, "inbox closed, dropping event");
        }
    }
}

/// External control surface of a worker, safe to clone across tasks.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: String,
    name: String,
    state: Arc<RwLock<WorkerState>>,
    sender: mpsc::UnboundedSender<Event>,
}

impl WorkerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, event: Event) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| WorkerError::ChannelClosed {
                worker: self.name.clone(),
            })
    }

    fn control(&self, kind: EventKind) -> Event {
        Event::new(kind).to(self.id.clone()).timeless()
    }

    /// Begin (or resume) dispatching.
    pub fn wake(&self) -> Result<()> {
        self.send(self.control(EventKind::Wake))
    }

    /// Ask a sleeping or released worker to terminate.
    pub fn done(&self) -> Result<()> {
        self.send(self.control(EventKind::Done))
    }

    pub fn fail(&self, task: &str, error: impl std::fmt::Display) -> Result<()> {
        self.send(self.control(EventKind::Fail).task(task).err(error))
    }

    /// Start a reversal back through `task`.
    pub fn remove(&self, task: &str, reason: impl std::fmt::Display) -> Result<()> {
        self.send(self.control(EventKind::Rmv).task(task).err(reason))
    }

    pub fn cancel(&self, task: &str) -> Result<()> {
        self.send(self.control(EventKind::Cancel).task(task))
    }

    pub fn status(&self) -> Result<()> {
        self.send(self.control(EventKind::Status))
    }

    pub fn register_child(&self, task: &str, child_id: &str) -> Result<()> {
        self.send(
            self.control(EventKind::AddChild)
                .task(task)
                .sender(child_id.to_string()),
        )
    }

    pub async fn set_hold(&self, hold: bool) {
        self.state.write().await.hold = hold;
    }

    /// Drop the hold; the next event lets a worker at its goal terminate.
    pub async fn release(&self) {
        self.set_hold(false).await;
    }

    pub async fn forward_goal_reached(&self) -> bool {
        self.state.read().await.forward_goal
    }

    pub async fn is_cancel_requested(&self, task: &str) -> bool {
        self.cancel_token(task).is_cancelled().await
    }

    pub fn cancel_token(&self, task: &str) -> CancelToken {
        CancelToken {
            state: Arc::clone(&self.state),
            task: task.to_string(),
        }
    }

    /// Reset a task's cancellation flag.
    pub async fn clear_cancel(&self, task: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.task_mut(task)?.cancel_requested = false;
        Ok(())
    }

    /// Forget a task's result so it runs forward again.
    pub async fn clear_task(&self, task: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.task_mut(task)?.clear();
        Ok(())
    }

    pub async fn snapshot(&self) -> WorkerState {
        self.state.read().await.clone()
    }

    pub async fn save(&self) -> Result<String> {
        self.state.read().await.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::timeout::{Confidence, Transit};

    fn task(key: &str, deps: &[&str]) -> Task {
        Task::new(key)
            .with_forward("noop", Duration::from_millis(50), Confidence::Hard, Transit::Hard, 2)
            .depends_on(deps)
    }

    #[test]
    fn test_map_arg_data() {
        let map = map_arg_data(&["name", "num"], vec![Data::text("Bob"), Data::int(66)]).unwrap();
        assert_eq!(map["name"].text_or_empty(), "Bob");
        assert_eq!(map["num"].int, Some(66));

        assert!(map_arg_data::<&str>(&[], vec![Data::int(1)]).is_err());
        assert!(map_arg_data(&["a"], vec![]).is_err());
        assert!(matches!(
            map_arg_data(&["a", "b"], vec![Data::int(1)]),
            Err(WorkerError::ArgumentMismatch(_))
        ));
    }

    #[test]
    fn test_new_worker_defaults() {
        let state = WorkerState::new(
            "w",
            "b",
            &["a"],
            vec![task("a", &[]), task("b", &["a"])],
        )
        .unwrap();

        assert!(state.forward);
        assert!(state.goal_state);
        assert!(!state.awake);
        assert_eq!(state.goal_task, "b");
        assert_eq!(state.goal, "b");
        assert!(!state.id.is_empty());
        // closure filled in
        assert_eq!(state.tasks["b"].all_depends_on, vec!["a".to_string()]);
        assert!(state.tasks.values().all(|t| !t.has_result && !t.working));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let result = WorkerState::new("w", "a", &["a"], vec![task("a", &[]), task("a", &[])]);
        assert!(matches!(result, Err(WorkerError::InvalidTask { .. })));
    }

    #[test]
    fn test_set_worker_inputs_reissues_id() {
        let mut state = WorkerState::new("w", "a", &["a"], vec![task("a", &[])]).unwrap();
        let before = state.id.clone();

        let mut inputs = IndexMap::new();
        inputs.insert(
            "a".to_string(),
            map_arg_data(&["size"], vec![Data::text("Small")]).unwrap(),
        );
        state.set_worker_inputs(inputs).unwrap();

        assert_ne!(state.id, before);
        assert_eq!(state.tasks["a"].inputs["size"].text_or_empty(), "Small");

        let mut unknown = IndexMap::new();
        unknown.insert("zzz".to_string(), DataMap::new());
        assert!(state.set_worker_inputs(unknown).is_err());
    }

    #[tokio::test]
    async fn test_handle_reads_under_lock() {
        let state = WorkerState::new("w", "a", &["a"], vec![task("a", &[])])
            .unwrap()
            .with_hold(true);
        let worker = Worker::new(state);
        let handle = worker.handle();

        assert!(!handle.forward_goal_reached().await);
        assert!(!handle.is_cancel_requested("a").await);

        {
            let mut state = worker.state.write().await;
            state.tasks["a"].cancel_requested = true;
        }
        assert!(handle.cancel_token("a").is_cancelled().await);
        handle.clear_cancel("a").await.unwrap();
        assert!(!handle.is_cancel_requested("a").await);

        handle.release().await;
        assert!(!handle.snapshot().await.hold);
    }
}
