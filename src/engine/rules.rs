// ABOUTME: Rules evaluator: goal detection plus forward and undo dispatch of ready tasks
// ABOUTME: Runs under the worker's write lock and spawns each action as its own tokio task

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::error::{Result, WorkerError};
use super::event::{DataMap, Event, EventKind};
use super::task::RESULT_KEY;
use super::worker::{Worker, WorkerState};
use crate::tasks::{ActionContext, ActionOutcome};

/// Which side of a task an invocation serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Inverse,
}

impl Direction {
    fn reply_kind(self) -> EventKind {
        match self {
            Direction::Forward => EventKind::Got,
            Direction::Inverse => EventKind::Inv,
        }
    }
}

/// Results of `depends_on` keyed by dependency name.
fn dependency_inputs(state: &WorkerState, depends_on: &[String]) -> DataMap {
    depends_on
        .iter()
        .filter_map(|dep| {
            state
                .tasks
                .get(dep)
                .and_then(|task| task.result.clone())
                .map(|result| (dep.clone(), result))
        })
        .collect()
}

impl Worker {
    /// Check the goal, then dispatch whatever the current direction allows.
    pub(crate) async fn apply_rules(&self) -> Result<()> {
        let mut state = self.state.write().await;

        self.check_goal(&mut state)?;
        if !state.awake {
            return Ok(());
        }

        if state.forward {
            self.dispatch_forward(&mut state)
        } else {
            self.dispatch_undo(&mut state)
        }
    }

    fn check_goal(&self, state: &mut WorkerState) -> Result<()> {
        if !state.awake {
            return Ok(());
        }
        let goal = state.task(&state.goal_task)?;
        if goal.has_result != state.goal_state {
            return Ok(());
        }

        if state.forward {
            if !state.goal_state || state.undo {
                return Err(WorkerError::Inconsistent(format!(
                    "forward goal '{}' reached with goal_state={} undo={}",
                    state.goal_task, state.goal_state, state.undo
                )));
            }

            if !state.forward_goal {
                let now = Utc::now();
                state.elapsed = state
                    .started
                    .and_then(|started| (now - started).to_std().ok())
                    .unwrap_or_default();
                info!(worker = %state.name, goal = %state.goal_task, elapsed = ?state.elapsed, "worker reached forward goal");
                self.notify_parent(state)?;
            }

            if state.hold {
                debug!(worker = %state.name, "worker at goal - holding");
                state.forward_goal = true;
            } else {
                info!(worker = %state.name, "worker at goal - ending");
                state.terminate = true;
                state.awake = false;
            }
            return Ok(());
        }

        info!(worker = %state.name, goal = %state.goal_task, "worker reached inverse goal");
        if state.is_start_task(&state.goal_task) {
            let mut all_undone = true;
            for start in state.start_tasks.clone() {
                if state.task(&start)?.has_result != state.goal_state {
                    all_undone = false;
                    state.goal_task = start;
                }
            }
            if all_undone {
                info!(worker = %state.name, "worker undone back to start - ending");
                state.awake = false;
                state.terminate = true;
                return Ok(());
            }
        }

        if state.undo {
            info!(worker = %state.name, goal = %state.goal, "worker resuming forward");
            state.forward = true;
            state.undo = false;
            state.goal_task = state.goal.clone();
            state.goal_state = true;
        }
        Ok(())
    }

    /// Send the goal result to the parent worker, if this is a child.
    fn notify_parent(&self, state: &WorkerState) -> Result<()> {
        let (Some(parent_id), Some(parent_task)) = (&state.parent_id, &state.parent_task) else {
            return Ok(());
        };
        if parent_id.is_empty() {
            return Ok(());
        }
        let Some(hub) = &self.hub else {
            warn!(worker = %state.name, parent = %parent_id, "child worker has no hub to reach its parent");
            return Ok(());
        };

        let result = state.task(&state.goal_task)?.result.clone().unwrap_or_default();
        let mut event = Event::new(EventKind::GotChild)
            .to(parent_id.clone())
            .sender(state.id.clone())
            .task(parent_task.clone())
            .with_data(result);
        event.expires = state.parent_expires;

        info!(worker = %state.name, parent = %parent_id, task = %parent_task, "sending result to parent");
        hub.route(event);
        Ok(())
    }

    fn dispatch_forward(&self, state: &mut WorkerState) -> Result<()> {
        let now = Utc::now();
        let keys: Vec<String> = state.tasks.keys().cloned().collect();

        for key in keys {
            let task = state.task(&key)?;
            if task.working || task.has_result {
                continue;
            }
            let ready = task
                .depends_on
                .iter()
                .all(|dep| state.tasks.get(dep).is_some_and(|dep| dep.has_result));
            if !ready {
                continue;
            }

            let inputs = if task.depends_on.is_empty() {
                task.inputs.clone()
            } else {
                dependency_inputs(state, &task.depends_on)
            };

            let worker = state.name.clone();
            let task = state.task_mut(&key)?;
            task.inputs = inputs.clone();
            let Some(slot) = task.active_forward_mut() else {
                error!(worker = %worker, task = %key, "no forward action left to dispatch");
                return Err(WorkerError::Inconsistent(format!(
                    "task '{}' exhausted its forward action without a fallback",
                    key
                )));
            };
            slot.stamp_dispatch(now);
            let action = slot.action.clone();
            let timeout = slot.timeout;
            task.working = true;

            trace!(worker = %worker, task = %key, action = %action, "dispatching forward");
            self.invoke(Direction::Forward, &key, &action, inputs, timeout)?;
        }
        Ok(())
    }

    fn dispatch_undo(&self, state: &mut WorkerState) -> Result<()> {
        let now = Utc::now();
        let goal_task = state.goal_task.clone();
        let keys: Vec<String> = state.tasks.keys().cloned().collect();

        for key in keys {
            let task = state.task(&key)?;
            if task.working || !task.has_result {
                continue;
            }
            if key != goal_task && !task.depends_transitively_on(&goal_task) {
                continue;
            }
            let unwound = task
                .reverse_depends_on
                .iter()
                .all(|rev| state.tasks.get(rev).map_or(true, |rev| !rev.has_result));
            if !unwound {
                continue;
            }

            let mut inputs = if task.depends_on.is_empty() {
                task.inputs.clone()
            } else {
                dependency_inputs(state, &task.depends_on)
            };
            if let Some(result) = &task.result {
                inputs.insert(RESULT_KEY.to_string(), result.clone());
            }

            let worker = state.name.clone();
            let task = state.task_mut(&key)?;
            task.working = true;
            match task.inverse.as_mut() {
                Some(slot) => {
                    slot.stamp_dispatch(now);
                    let action = slot.action.clone();
                    let timeout = slot.timeout;
                    trace!(worker = %worker, task = %key, action = %action, "dispatching inverse");
                    self.invoke(Direction::Inverse, &key, &action, inputs, timeout)?;
                }
                None => {
                    debug!(worker = %worker, task = %key, "no inverse action, undoing in place");
                    self.post(Event::new(EventKind::Inv).to(self.id.clone()).task(key.clone()));
                }
            }
        }
        Ok(())
    }

    /// Spawn an action invocation that replies through the worker's inbox.
    fn invoke(
        &self,
        direction: Direction,
        key: &str,
        action_name: &str,
        inputs: DataMap,
        timeout: Duration,
    ) -> Result<()> {
        let registry = self.registry.as_ref().ok_or_else(|| WorkerError::Unbound {
            worker: self.name.clone(),
        })?;

        let sase = Event::new(EventKind::Status)
            .to(self.id.clone())
            .task(key)
            .expires_in(timeout);

        let Some(action) = registry.get(action_name) else {
            let error = WorkerError::UnknownAction {
                task: key.to_string(),
                action: action_name.to_string(),
            };
            error!("{}", error);
            self.post(sase.fail().err(error).timeless());
            return Ok(());
        };

        let ctx = ActionContext::new(
            key,
            self.id.clone(),
            inputs,
            sase.clone(),
            self.cancel_token(key),
            self.sender(),
            self.hub.clone(),
        );
        let sender = self.sender();
        let task_key = key.to_string();

        tokio::spawn(async move {
            let reply = match action.run(ctx).await {
                ActionOutcome::Done(data) => Some(sase.kind(direction.reply_kind()).with_data(data)),
                ActionOutcome::Failed(error) => Some(sase.fail().err(error)),
                ActionOutcome::Retry(error) => Some(sase.timeout().err(error)),
                ActionOutcome::Pending => None,
            };
            if let Some(reply) = reply {
                if sender.send(reply).is_err() {
                    trace!(task = %task_key, "worker stopped before the reply arrived");
                }
            }
        });
        Ok(())
    }
}
