// ABOUTME: Integration tests for the in-process hub
// ABOUTME: Covers child worker fan-out and fan-in, broadcast delivery, hooks and deregistration

use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

use automaton::engine::{
    Confidence, Data, Event, EventKind, Task, Transit, Worker, WorkerState, JSON_DATA_MAP,
};
use automaton::hub::{Hub, HubHook};
use automaton::tasks::{ActionOutcome, ActionRegistry};

mod common;
use common::{wait_until, SCENARIO_LIMIT};

const FAN_OUT: usize = 3;

fn slot_timeout() -> Duration {
    Duration::from_secs(2)
}

fn single_task_state(name: &str, action: &str) -> WorkerState {
    WorkerState::new(
        name,
        "only",
        &["only"],
        vec![Task::new("only").with_forward(action, slot_timeout(), Confidence::Hard, Transit::Hard, 1)],
    )
    .unwrap()
}

/// Registry whose `fan_out` action launches child workers through the hub.
fn fan_out_registry() -> Arc<ActionRegistry> {
    let child_registry = Arc::new(ActionRegistry::new());
    let mut registry = ActionRegistry::new();
    registry.register_fn("fan_out", move |ctx| {
        let child_registry = Arc::clone(&child_registry);
        let hub = ctx.hub().cloned();
        async move {
            let Some(hub) = hub else {
                return ActionOutcome::Failed("fan_out needs a hub".to_string());
            };
            let mut children = Vec::new();
            for i in 0..FAN_OUT {
                let mut state = single_task_state(&format!("child-{}", i), "echo")
                    .with_parent(ctx.worker_id.clone(), ctx.task_key.clone(), ctx.expires());
                state.tasks["only"].inputs.insert("message".to_string(), Data::text(format!("child {}", i)));
                match Worker::new(state).bind(Arc::clone(&child_registry)).await {
                    Ok(worker) => children.push(worker),
                    Err(error) => return ActionOutcome::Failed(error.to_string()),
                }
            }
            match hub.launch_children(children).await {
                Ok(_) => ActionOutcome::Pending,
                Err(error) => ActionOutcome::Failed(error.to_string()),
            }
        }
        .boxed()
    });
    Arc::new(registry)
}

#[tokio::test]
async fn test_children_results_merge_into_parent() {
    let hub = Hub::start(Vec::new()).unwrap();
    let parent = Worker::new(single_task_state("parent", "fan_out"))
        .bind(fan_out_registry())
        .await
        .unwrap();
    let parent_id = parent.id().to_string();

    let join = hub.launch(parent).await.unwrap();
    let state = timeout(SCENARIO_LIMIT, join).await.unwrap().unwrap().unwrap();

    let task = &state.tasks["only"];
    assert!(task.has_result);
    let children = task.children.as_ref().unwrap();
    assert_eq!(children.expected.len(), FAN_OUT);
    assert!(children.results.is_empty());

    let result = task.result.as_ref().unwrap();
    assert_eq!(result.encoding, Some(JSON_DATA_MAP));
    let merged = result.json.as_ref().unwrap().as_object().unwrap();
    assert_eq!(merged.len(), FAN_OUT);
    for child_id in &children.expected {
        let text = merged[child_id]["text"].as_str().unwrap();
        assert!(text.starts_with("child "), "unexpected child text {}", text);
    }

    assert!(!hub.is_registered(&parent_id).await);
    let h = &hub;
    assert!(wait_until(SCENARIO_LIMIT, move || async move { h.worker_count().await == 0 }).await);
    hub.stop();
}

#[tokio::test]
async fn test_broadcast_reaches_every_worker() {
    let hub = Hub::start(Vec::new()).unwrap();
    let mut handles = Vec::new();
    let mut joins = Vec::new();
    for name in ["left", "right"] {
        let worker = Worker::new(single_task_state(name, "noop").with_hold(true))
            .bind(Arc::new(ActionRegistry::new()))
            .await
            .unwrap();
        handles.push(worker.handle());
        joins.push(hub.launch(worker).await.unwrap());
    }
    for handle in &handles {
        assert!(wait_until(SCENARIO_LIMIT, move || handle.forward_goal_reached()).await);
    }
    assert_eq!(hub.worker_count().await, 2);

    hub.route(Event::new(EventKind::Cancel).to_all().task("only").timeless());

    for handle in &handles {
        assert!(wait_until(SCENARIO_LIMIT, move || handle.is_cancel_requested("only")).await);
    }

    for handle in &handles {
        handle.release().await;
    }
    for join in joins {
        let state = timeout(SCENARIO_LIMIT, join).await.unwrap().unwrap().unwrap();
        assert!(state.terminate);
    }
    assert_eq!(hub.worker_count().await, 0);
    hub.stop();
}

struct Progress {
    seen: Arc<Mutex<Vec<String>>>,
}

impl HubHook for Progress {
    fn name(&self) -> &str {
        "progress"
    }

    fn code(&self) -> i32 {
        11
    }

    fn handle(&self, event: &Event, _hub: &Hub) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}:{}", event.sender_id, event.data.text_or_empty()));
    }
}

#[tokio::test]
async fn test_actions_reach_hub_hooks_through_their_worker() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hooks: Vec<Arc<dyn HubHook>> = vec![Arc::new(Progress { seen: seen.clone() })];
    let hub = Hub::start(hooks).unwrap();

    let mut registry = ActionRegistry::new();
    registry.register_fn("report", |ctx| {
        async move {
            ctx.post(
                Event::new(EventKind::Status)
                    .sender(ctx.worker_id.clone())
                    .hook(11)
                    .text("halfway"),
            );
            ActionOutcome::Done(Data::text("reported"))
        }
        .boxed()
    });
    let worker = Worker::new(single_task_state("reporter", "report"))
        .bind(Arc::new(registry))
        .await
        .unwrap();
    let worker_id = worker.id().to_string();

    let join = hub.launch(worker).await.unwrap();
    timeout(SCENARIO_LIMIT, join).await.unwrap().unwrap().unwrap();

    let s = &seen;
    assert!(wait_until(SCENARIO_LIMIT, move || async move { !s.lock().unwrap().is_empty() }).await);
    assert_eq!(*seen.lock().unwrap(), vec![format!("{}:halfway", worker_id)]);
    hub.stop();
}

#[tokio::test]
async fn test_stopped_hub_rejects_launch() {
    let hub = Hub::start(Vec::new()).unwrap();
    hub.stop();

    let worker = Worker::new(single_task_state("late", "noop"))
        .bind(Arc::new(ActionRegistry::new()))
        .await
        .unwrap();
    assert!(hub.launch(worker).await.is_err());
}
