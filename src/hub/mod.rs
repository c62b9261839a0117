// ABOUTME: In-process hub routing events between a family of workers
// ABOUTME: Handles unicast, broadcast, hub hooks, worker launch and deregistration

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::engine::{next_nuid, Event, EventKind, Worker, WorkerError, WorkerState};
pub use error::{HubError, Result};

/// User code hooked into the hub's routing loop, selected by `Event::hook_code`.
///
/// Hooks run inline on the routing loop; they should hand long work off to
/// their own tasks.
pub trait HubHook: Send + Sync {
    fn name(&self) -> &str;

    fn code(&self) -> i32;

    fn handle(&self, event: &Event, hub: &Hub);
}

/// Senders into a running hub.
#[derive(Debug, Clone)]
pub struct HubChannels {
    /// Worker-to-worker, broadcast and hook traffic.
    pub family: mpsc::UnboundedSender<Event>,
    /// Worker deregistration (DONE / DEL).
    pub control: mpsc::UnboundedSender<Event>,
}

struct HubInner {
    id: String,
    workers: RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>,
    hooks: HashMap<i32, Arc<dyn HubHook>>,
    channels: HubChannels,
    stop: watch::Sender<bool>,
}

/// Cheap, cloneable handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").field("id", &self.inner.id).finish()
    }
}

impl Hub {
    /// Spawn the routing loop with the given hooks installed.
    pub fn start(hooks: Vec<Arc<dyn HubHook>>) -> Result<Self> {
        let mut installed: HashMap<i32, Arc<dyn HubHook>> = HashMap::new();
        for hook in hooks {
            if let Some(existing) = installed.get(&hook.code()) {
                return Err(HubError::DuplicateHookCode {
                    code: hook.code(),
                    name: hook.name().to_string(),
                    existing: existing.name().to_string(),
                });
            }
            installed.insert(hook.code(), hook);
        }

        let (family, family_rx) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);

        let hub = Self {
            inner: Arc::new(HubInner {
                id: next_nuid(),
                workers: RwLock::new(HashMap::new()),
                hooks: installed,
                channels: HubChannels { family, control },
                stop,
            }),
        };

        info!(hub = %hub.id(), hooks = hub.inner.hooks.len(), "hub started");
        tokio::spawn(hub.clone().route_loop(family_rx, control_rx, stop_rx));
        Ok(hub)
    }

    /// A hub without a routing loop; whatever workers send lands on `channels`.
    #[cfg(test)]
    pub(crate) fn detached(channels: HubChannels) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                id: next_nuid(),
                workers: RwLock::new(HashMap::new()),
                hooks: HashMap::new(),
                channels,
                stop,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn channels(&self) -> HubChannels {
        self.inner.channels.clone()
    }

    /// Queue an event for routing to its addressee(s).
    pub fn route(&self, event: Event) {
        if self.inner.channels.family.send(event).is_err() {
            debug!(hub = %self.id(), "hub stopped, event dropped");
        }
    }

    /// Queue a control event (DONE / DEL deregister the worker it names).
    pub fn control(&self, event: Event) {
        if self.inner.channels.control.send(event).is_err() {
            debug!(hub = %self.id(), "hub stopped, control event dropped");
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.inner.workers.read().await.len()
    }

    pub async fn is_registered(&self, worker_id: &str) -> bool {
        self.inner.workers.read().await.contains_key(worker_id)
    }

    pub fn hook(&self, code: i32) -> Option<Arc<dyn HubHook>> {
        self.inner.hooks.get(&code).cloned()
    }

    /// End the routing loop. Running workers keep going but can no longer reach each other.
    pub fn stop(&self) {
        if self.inner.stop.send(true).is_err() {
            debug!(hub = %self.id(), "hub already stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Register a bound worker, announce it to its parent, start it and wake it.
    pub async fn launch(
        &self,
        worker: Worker,
    ) -> Result<JoinHandle<std::result::Result<WorkerState, WorkerError>>> {
        self.announce_to_parent(&worker).await;
        self.start_worker(worker).await
    }

    /// Launch a batch of child workers. Every ADDCHILD is queued before the
    /// first child starts, so the parent knows the full fan-out before any
    /// result can arrive.
    pub async fn launch_children(
        &self,
        workers: Vec<Worker>,
    ) -> Result<Vec<JoinHandle<std::result::Result<WorkerState, WorkerError>>>> {
        for worker in &workers {
            self.announce_to_parent(worker).await;
        }
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            handles.push(self.start_worker(worker).await?);
        }
        Ok(handles)
    }

    async fn announce_to_parent(&self, worker: &Worker) {
        let state = worker.state.read().await;
        if let (Some(parent_id), Some(parent_task)) = (&state.parent_id, &state.parent_task) {
            if parent_id.is_empty() {
                return;
            }
            debug!(child = %state.id, parent = %parent_id, task = %parent_task, "announcing child");
            self.route(
                Event::new(EventKind::AddChild)
                    .to(parent_id.clone())
                    .sender(state.id.clone())
                    .task(parent_task.clone())
                    .timeless(),
            );
        }
    }

    async fn start_worker(
        &self,
        mut worker: Worker,
    ) -> Result<JoinHandle<std::result::Result<WorkerState, WorkerError>>> {
        if self.is_stopped() {
            return Err(HubError::Stopped {
                id: self.id().to_string(),
            });
        }
        if !worker.is_bound() {
            return Err(WorkerError::Unbound {
                worker: worker.name().to_string(),
            }
            .into());
        }

        let id = worker.id().to_string();
        {
            let mut workers = self.inner.workers.write().await;
            if workers.contains_key(&id) {
                return Err(HubError::AlreadyRegistered { id });
            }
            workers.insert(id.clone(), worker.sender());
        }
        worker.attach_hub(self.clone());
        let handle = worker.handle();

        let hub = self.clone();
        let join = tokio::spawn(async move {
            let result = worker.run().await;
            hub.deregister(&id).await;
            result
        });

        handle.wake()?;
        info!(hub = %self.id(), worker = %handle.name(), id = %handle.id(), "worker launched");
        Ok(join)
    }

    async fn deregister(&self, worker_id: &str) -> bool {
        self.inner.workers.write().await.remove(worker_id).is_some()
    }

    async fn route_loop(
        self,
        mut family: mpsc::UnboundedReceiver<Event>,
        mut control: mpsc::UnboundedReceiver<Event>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = family.recv() => self.dispatch(event).await,
                Some(event) = control.recv() => self.manage(event).await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!(hub = %self.id(), "hub stopped");
    }

    async fn dispatch(&self, event: Event) {
        if event.broadcast {
            let workers = self.inner.workers.read().await;
            trace!(event = %event, recipients = workers.len(), "broadcasting");
            for (id, sender) in workers.iter() {
                let mut copy = event.clone();
                copy.broadcast = false;
                copy.worker_id = id.clone();
                if sender.send(copy).is_err() {
                    debug!(worker = %id, "broadcast to stopped worker dropped");
                }
            }
            return;
        }

        if event.to_hub {
            match self.inner.hooks.get(&event.hook_code) {
                Some(hook) => {
                    trace!(hook = %hook.name(), "calling hub hook");
                    hook.handle(&event, self);
                }
                None => warn!(code = event.hook_code, "no hub hook registered for code"),
            }
            return;
        }

        let workers = self.inner.workers.read().await;
        match workers.get(&event.worker_id) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    debug!("event for stopped worker dropped");
                }
            }
            None => warn!(event = %event, "no such worker in hub"),
        }
    }

    async fn manage(&self, event: Event) {
        match event.kind {
            EventKind::Done | EventKind::Del => {
                let id = if event.worker_id.is_empty() {
                    &event.sender_id
                } else {
                    &event.worker_id
                };
                if self.deregister(id).await {
                    debug!(worker = %id, "worker deregistered");
                } else {
                    trace!(worker = %id, "worker already deregistered");
                }
            }
            EventKind::Add => {
                warn!(worker = %event.worker_id, "workers join a hub through launch; ADD ignored")
            }
            other => warn!(kind = %other, worker = %event.worker_id, "malformed hub control event"),
        }
    }
}
