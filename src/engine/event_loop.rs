// ABOUTME: Worker event loop: drains the inbox, applies each event to the task state and re-runs the rules
// ABOUTME: While idle it scans in-flight tasks for timeouts and turns overdue ones into TIMEOUT events

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

use super::error::{Result, WorkerError};
use super::event::{Data, Event, EventKind, JSON_DATA_MAP};
use super::task::{ActionSlot, Children, Task};
use super::worker::{Worker, WorkerState};

enum Wakeup {
    Event(Option<Event>),
    Tick,
}

/// Which slot of a task has an invocation in flight. A working task holding
/// a result is being undone; one without is being produced.
fn in_flight_is_inverse(task: &Task) -> bool {
    task.has_result
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

impl Worker {
    /// Drive the worker until it terminates or fails.
    ///
    /// Returns the final state on a clean termination. A terminal failure has
    /// already been logged and reported to the hub by the time `Err` returns.
    #[instrument(skip(self), fields(worker = %self.name, id = %self.id))]
    pub async fn run(mut self) -> Result<WorkerState> {
        if self.registry.is_none() {
            return Err(WorkerError::Unbound {
                worker: self.name.clone(),
            });
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("worker event loop started");

        loop {
            let wakeup = tokio::select! {
                biased;
                event = self.inbox.recv() => Wakeup::Event(event),
                _ = ticker.tick() => Wakeup::Tick,
            };

            let step = match wakeup {
                Wakeup::Event(Some(event)) => self.step(event).await,
                Wakeup::Event(None) => Err(WorkerError::ChannelClosed {
                    worker: self.name.clone(),
                }),
                Wakeup::Tick => self.tick().await,
            };

            if let Err(error) = step {
                return Err(self.fail_hard(error).await);
            }

            if self.state.read().await.terminate {
                return self.finish().await;
            }
        }
    }

    /// Relay foreign traffic, otherwise apply the event and re-run the rules.
    async fn step(&self, event: Event) -> Result<()> {
        if event.worker_id != self.id || event.broadcast || event.to_hub {
            self.relay(event);
            return Ok(());
        }

        self.handle_event(event).await?;
        self.apply_rules().await?;

        if self.auto_save_enabled().await {
            self.auto_save(false).await?;
        }
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        if !self.state.read().await.awake {
            return Ok(());
        }
        self.check_timeouts().await;
        self.apply_rules().await
    }

    fn relay(&self, event: Event) {
        match &self.hub {
            Some(hub) => {
                trace!(event = %event, "relaying to hub");
                hub.route(event);
            }
            None => warn!(event = %event, "no hub attached, dropping foreign event"),
        }
    }

    async fn auto_save_enabled(&self) -> bool {
        self.settings.auto_save || self.state.read().await.auto_save
    }

    async fn finish(&self) -> Result<WorkerState> {
        self.auto_save(true).await?;
        let state = self.state.read().await.clone();
        self.notify_hub_done(&state.goal_task);
        info!(forward = state.forward, elapsed = ?state.elapsed, "worker terminated");
        Ok(state)
    }

    /// Record the error, dump the state and tell the hub this worker is gone.
    async fn fail_hard(&self, error: WorkerError) -> WorkerError {
        let goal_task = {
            let mut state = self.state.write().await;
            state.last_error = Some(error.to_string());
            state.awake = false;
            match serde_json::to_string(&*state) {
                Ok(dump) => error!(error = %error, state = %dump, "worker failed"),
                Err(dump_error) => {
                    error!(error = %error, dump_error = %dump_error, "worker failed")
                }
            }
            state.goal_task.clone()
        };
        self.notify_hub_done(&goal_task);
        error
    }

    /// Tell the hub this worker is gone and which goal it ended on.
    fn notify_hub_done(&self, goal_task: &str) {
        if let Some(hub) = &self.hub {
            hub.control(
                Event::new(EventKind::Done)
                    .to(self.id.clone())
                    .sender(self.id.clone())
                    .task(goal_task)
                    .timeless(),
            );
        }
    }

    /// Apply one event addressed to this worker.
    ///
    /// Returns `Err` only for terminal failures (a hard FAIL or exhausted
    /// retries without `undo_on_fail`).
    pub(crate) async fn handle_event(&self, event: Event) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let needs_task = !matches!(
            event.kind,
            EventKind::Wake | EventKind::Done | EventKind::Status
        );
        if needs_task && !state.tasks.contains_key(&event.task_key) {
            error!(kind = %event.kind, task = %event.task_key, "event for unknown task ignored");
            return Ok(());
        }

        if event.is_expired(now) {
            debug!(event = %event, "expired event ignored");
            return Ok(());
        }

        match event.kind {
            EventKind::Wake => {
                info!("worker set to awake");
                state.awake = true;
                state.started = Some(now);
            }
            EventKind::Done => {
                debug!(sender = %event.sender_id, "done requested");
                if !state.awake {
                    state.terminate = true;
                }
            }
            EventKind::AddChild => {
                debug!(task = %event.task_key, child = %event.sender_id, "registering child worker");
                let task = state.task_mut(&event.task_key)?;
                task.children
                    .get_or_insert_with(Children::default)
                    .register(event.sender_id.clone());
            }
            EventKind::GotChild => {
                self.child_result(&mut state, event, now)?;
            }
            EventKind::Got => {
                let task = state.task_mut(&event.task_key)?;
                trace!(task = %event.task_key, result = ?event.data, "result received");
                task.result = Some(event.data);
                task.has_result = true;
                task.working = false;
                let slot = if task.forward.overtry {
                    task.fallback.as_mut()
                } else {
                    Some(&mut task.forward)
                };
                if let Some(slot) = slot {
                    slot.record_elapsed(now);
                }
            }
            EventKind::Inv => {
                if state.forward {
                    warn!(task = %event.task_key, "inverse result while running forward ignored");
                    return Ok(());
                }
                let task = state.task_mut(&event.task_key)?;
                trace!(task = %event.task_key, "inverse completed");
                task.result = None;
                task.has_result = false;
                task.working = false;
                if let Some(inverse) = task.inverse.as_mut() {
                    inverse.record_elapsed(now);
                }
            }
            EventKind::Timeout => {
                self.timed_out(&mut state, &event, now)?;
            }
            EventKind::Cancel => {
                info!(task = %event.task_key, "cancel requested");
                state.task_mut(&event.task_key)?.cancel_requested = true;
            }
            EventKind::Fail => {
                self.failed(&mut state, &event, now)?;
            }
            EventKind::Rmv => {
                self.remove(&mut state, &event)?;
            }
            EventKind::Status => match serde_json::to_string(&*state) {
                Ok(dump) => info!(state = %dump, "status"),
                Err(dump_error) => warn!(error = %dump_error, "status dump failed"),
            },
            EventKind::Add | EventKind::Del => {
                debug!(kind = %event.kind, "hub control event reached a worker; ignored");
            }
        }
        Ok(())
    }

    fn child_result(&self, state: &mut WorkerState, event: Event, now: DateTime<Utc>) -> Result<()> {
        let partial_fraction = self.settings.partial_fraction;
        let task = state.task_mut(&event.task_key)?;
        if task.has_result {
            debug!(task = %event.task_key, child = %event.sender_id, "late child result ignored");
            return Ok(());
        }
        if let Some(slot) = task.active_forward_mut() {
            slot.record_elapsed(now);
        }
        let children = task.children.get_or_insert_with(Children::default);
        debug!(task = %event.task_key, child = %event.sender_id, "child worker reported");
        children.results.insert(event.sender_id.clone(), event.data);

        if children.all_reported() {
            let merged = children.merged()?;
            children.results.clear();
            children.partial = false;
            info!(task = %event.task_key, "all child workers reported");
            task.result = Some(Data {
                encoding: Some(JSON_DATA_MAP),
                json: Some(merged),
                ..Default::default()
            });
            task.has_result = true;
            task.working = false;
        } else if children.reported_fraction() > partial_fraction {
            children.partial = true;
        }
        Ok(())
    }

    fn timed_out(&self, state: &mut WorkerState, event: &Event, now: DateTime<Utc>) -> Result<()> {
        let key = event.task_key.clone();
        let reason = event.error_text().to_string();
        let task = state.task_mut(&key)?;
        if !task.working {
            debug!(task = %key, "timeout for idle task ignored");
            return Ok(());
        }
        task.working = false;

        if in_flight_is_inverse(task) {
            let Some(inverse) = task.inverse.as_mut() else {
                return Ok(());
            };
            if charge_retry(inverse, &reason) {
                warn!(task = %key, retries = inverse.retries, "inverse timed out, retrying");
                return Ok(());
            }
            inverse.overtry = true;
            inverse.failed = true;
            error!(task = %key, "inverse retries exhausted");
            return Err(WorkerError::RetriesExhausted { task: key, reason });
        }

        if !task.forward.overtry {
            if charge_retry(&mut task.forward, &reason) {
                warn!(task = %key, retries = task.forward.retries, "forward timed out, retrying");
                return Ok(());
            }
            task.forward.overtry = true;
            if let Some(fallback) = task.fallback.as_mut() {
                info!(task = %key, action = %fallback.action, "forward retries exhausted, switching to fallback");
                fallback.started = Some(now);
                fallback.retried = Some(now);
                return Ok(());
            }
            task.forward.failed = true;
            error!(task = %key, "forward retries exhausted without a fallback");
            return self.give_up(state, key, reason);
        }

        let Some(fallback) = task.fallback.as_mut() else {
            return Err(WorkerError::Inconsistent(format!(
                "task '{}' timed out past its forward retries without a fallback",
                key
            )));
        };
        if charge_retry(fallback, &reason) {
            warn!(task = %key, retries = fallback.retries, "fallback timed out, retrying");
            return Ok(());
        }
        fallback.overtry = true;
        fallback.failed = true;
        task.forward.failed = true;
        error!(task = %key, "fallback retries exhausted");
        self.give_up(state, key, reason)
    }

    /// Unwind the whole worker when allowed, otherwise fail terminally.
    fn give_up(&self, state: &mut WorkerState, key: String, reason: String) -> Result<()> {
        state.awake = false;
        if state.undo_on_fail {
            let first_start = state.start_tasks.first().cloned().unwrap_or_default();
            info!(task = %key, start = %first_start, "undoing worker after failure");
            self.post(
                Event::new(EventKind::Rmv)
                    .to(self.id.clone())
                    .task(first_start)
                    .timeless()
                    .err(format!("{}: {}", key, reason)),
            );
            return Ok(());
        }
        Err(WorkerError::RetriesExhausted { task: key, reason })
    }

    fn failed(&self, state: &mut WorkerState, event: &Event, now: DateTime<Utc>) -> Result<()> {
        let key = event.task_key.clone();
        let reason = event.error_text().to_string();

        if !state.forward {
            let task = state.task_mut(&key)?;
            warn!(task = %key, error = %reason, "failure while undoing; continuing the unwind");
            if let Some(inverse) = task.inverse.as_mut() {
                inverse.errors.push(reason);
                inverse.record_elapsed(now);
            }
            task.result = None;
            task.has_result = false;
            task.working = false;
            return Ok(());
        }

        let task = state.task_mut(&key)?;
        task.working = false;
        if let Some(slot) = task.active_forward_mut() {
            slot.errors.push(reason.clone());
            slot.record_elapsed(now);
        }
        error!(task = %key, error = %reason, "task failed");
        state.awake = false;

        if state.undo_on_fail {
            let first_start = state.start_tasks.first().cloned().unwrap_or_default();
            self.post(
                Event::new(EventKind::Rmv)
                    .to(self.id.clone())
                    .task(first_start)
                    .timeless()
                    .err(format!("{}: {}", key, reason)),
            );
            return Ok(());
        }
        Err(WorkerError::TaskFailed { task: key, reason })
    }

    fn remove(&self, state: &mut WorkerState, event: &Event) -> Result<()> {
        let key = event.task_key.clone();
        let task = state.task(&key)?;
        if task.depends_transitively_on(&state.goal_task) {
            debug!(task = %key, goal = %state.goal_task, "already unwinding past this task");
            return Ok(());
        }

        info!(task = %key, "reversing worker direction");
        state.goal_task = key.clone();
        state.goal_state = false;
        state.forward_goal = false;
        state.forward = false;
        state.undo = !state.is_start_task(&key);
        state.last_error = Some(format!(
            "Worker: {}, UID: {} Rmv event [{}].",
            state.name,
            state.id,
            event.error_text()
        ));
        state.awake = true;
        Ok(())
    }

    /// Post a TIMEOUT for every in-flight invocation the oracle judges overdue.
    pub(crate) async fn check_timeouts(&self) {
        let state = self.state.read().await;
        if !state.awake {
            return;
        }
        let now = Utc::now();

        for (key, task) in state.tasks.iter().filter(|(_, task)| task.working) {
            let (role, slot) = if in_flight_is_inverse(task) {
                match task.inverse.as_ref() {
                    Some(slot) => ("Inverse", slot),
                    None => continue,
                }
            } else if !task.forward.overtry {
                ("Forward", &task.forward)
            } else {
                match task.fallback.as_ref() {
                    Some(slot) => ("Fallback", slot),
                    None => {
                        warn!(task = %key, "working task has no slot left to time out");
                        continue;
                    }
                }
            };

            let elapsed = slot.since_retry(now);
            if self
                .oracle
                .is_timed_out(slot.timeout, elapsed, slot.confidence, slot.transit)
            {
                let reason = format!(
                    "Timed Out, {}-{}, Elapsed: {:?} At: {}",
                    key,
                    role,
                    elapsed,
                    timestamp(now)
                );
                debug!(task = %key, "{}", reason);
                self.post(
                    Event::new(EventKind::Timeout)
                        .to(self.id.clone())
                        .task(key.clone())
                        .timeless()
                        .err(reason),
                );
            }
        }
    }
}

/// Log the timeout on `slot` and count one more attempt. Returns false once
/// the retry budget is spent.
fn charge_retry(slot: &mut ActionSlot, reason: &str) -> bool {
    slot.errors.push(reason.to_string());
    slot.overtime = true;
    if slot.retries_exhausted() {
        return false;
    }
    slot.retries += 1;
    true
}
