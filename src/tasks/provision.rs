// ABOUTME: Six-stage container provisioning workflow with stub actions
// ABOUTME: customer and size feed node and image, which feed provision and finally boot

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ActionContext, ActionOutcome, ActionRegistry, TaskAction};
use crate::engine::error::Result;
use crate::engine::event::{next_nuid, Data, DataMap};
use crate::engine::task::Task;
use crate::engine::timeout::{Confidence, Transit};
use crate::engine::worker::{map_arg_data, WorkerState};

/// Simulated latency of every stub action.
pub const STUB_LATENCY: Duration = Duration::from_micros(100);

pub const GOAL: &str = "boot";
pub const START_TASKS: [&str; 2] = ["customer", "size"];

/// Per-slot timeouts of the provisioning workflow.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionTimings {
    pub timeout: Duration,
    /// Fallback timeout of the provision stage.
    pub slow_timeout: Duration,
}

impl Default for ProvisionTimings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10),
            slow_timeout: Duration::from_millis(20),
        }
    }
}

impl ProvisionTimings {
    /// How long the deliberately slow provision action stalls.
    pub fn stall(&self) -> Duration {
        self.slow_timeout * 4
    }
}

pub fn register(registry: &mut ActionRegistry) {
    register_with(registry, ProvisionTimings::default());
}

/// Register the provisioning actions; the slow variant stalls past `timings`.
pub fn register_with(registry: &mut ActionRegistry, timings: ProvisionTimings) {
    let actions: Vec<Arc<dyn TaskAction>> = vec![
        Arc::new(Stub::new("upsert_customer", Stage::Customer)),
        Arc::new(Stub::new("delete_customer", Stage::Undo)),
        Arc::new(Stub::new("get_size", Stage::Size)),
        Arc::new(Stub::new("delete_size", Stage::Undo)),
        Arc::new(Stub::new("get_image", Stage::Image)),
        Arc::new(Stub::new("delete_image", Stage::Undo)),
        Arc::new(Stub::new("get_node", Stage::Node)),
        Arc::new(Stub::new("delete_node", Stage::Undo)),
        Arc::new(Stub::new("provision", Stage::Provision)),
        Arc::new(Stub::new("undo_provision", Stage::Undo)),
        Arc::new(Stub::new("boot", Stage::Boot)),
        Arc::new(Stub::new("shutdown", Stage::Shutdown)),
        Arc::new(Stub::new("provision_too_slow", Stage::Provision).with_latency(timings.stall())),
    ];
    for action in actions {
        registry.register(action);
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Customer,
    Size,
    Image,
    Node,
    Provision,
    Boot,
    Shutdown,
    Undo,
}

struct Stub {
    name: &'static str,
    stage: Stage,
    latency: Duration,
}

impl Stub {
    fn new(name: &'static str, stage: Stage) -> Self {
        Self {
            name,
            stage,
            latency: STUB_LATENCY,
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl TaskAction for Stub {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: ActionContext) -> ActionOutcome {
        tokio::time::sleep(self.latency).await;

        let result = match self.stage {
            Stage::Customer => {
                let mut data = Data::nuid(next_nuid()).with_text(ctx.input_text("name"));
                data.int = ctx.input("num").and_then(|num| num.int);
                data
            }
            Stage::Size => Data::nuid(next_nuid())
                .with_text(format!("Size: {} ", ctx.input_text("size"))),
            Stage::Image => Data::nuid(next_nuid())
                .with_text(format!("Image For {} ", ctx.input_text("customer"))),
            Stage::Node => {
                let id = next_nuid();
                let text = format!(
                    "Node {} Obtained For {} {} ",
                    id,
                    ctx.input_text("customer"),
                    ctx.input_text("size")
                );
                Data::nuid(id).with_text(text)
            }
            Stage::Provision => Data::nuid(next_nuid())
                .with_text(format!("Provisioning: {} ", ctx.input_text("node"))),
            Stage::Boot => {
                let id = ctx.input_nuid("provision").to_string();
                let text = format!(
                    "Booted container {} -->  {}",
                    id,
                    ctx.input_text("provision")
                );
                Data::nuid(id).with_text(text)
            }
            Stage::Shutdown => Data::text(format!(
                "SHUT DOWN CONTAINER {} - {}",
                ctx.input_nuid("result"),
                ctx.input_text("provision")
            )),
            Stage::Undo => Data::default(),
        };
        ActionOutcome::Done(result)
    }
}

/// The provisioning task graph.
pub fn provision_tasks(timings: ProvisionTimings) -> Vec<Task> {
    let to = timings.timeout;
    let (conf, transit) = (Confidence::Hard, Transit::Hard);
    vec![
        Task::new("boot")
            .with_forward("boot", to, conf, transit, 10)
            .with_inverse("shutdown", to, conf, transit, 10)
            .depends_on(&["provision"])
            .all_depends_on(&["provision", "customer", "size", "node", "image"]),
        Task::new("provision")
            .with_forward("provision", to, conf, transit, 4)
            .with_inverse("undo_provision", to, conf, transit, 4)
            .with_fallback("provision", timings.slow_timeout, conf, transit, 4)
            .depends_on(&["node", "image"])
            .reverse_depends_on(&["boot"])
            .all_depends_on(&["customer", "size", "node", "image"]),
        Task::new("node")
            .with_forward("get_node", to, conf, transit, 10)
            .with_inverse("delete_node", to, conf, transit, 10)
            .depends_on(&["customer", "size"])
            .reverse_depends_on(&["provision"])
            .all_depends_on(&["customer", "size"]),
        Task::new("image")
            .with_forward("get_image", to, conf, transit, 10)
            .with_inverse("delete_image", to, conf, transit, 10)
            .depends_on(&["customer"])
            .reverse_depends_on(&["provision"])
            .all_depends_on(&["customer"]),
        Task::new("size")
            .with_forward("get_size", to, conf, transit, 10)
            .with_inverse("delete_size", to, conf, transit, 10)
            .reverse_depends_on(&["node"]),
        Task::new("customer")
            .with_forward("upsert_customer", to, conf, transit, 10)
            .with_inverse("delete_customer", to, conf, transit, 10)
            .reverse_depends_on(&["node", "image"]),
    ]
}

/// A provisioning worker that undoes everything on a hard failure.
pub fn provision_worker(name: &str, timings: ProvisionTimings) -> Result<WorkerState> {
    let state = WorkerState::new(name, GOAL, &START_TASKS, provision_tasks(timings))?;
    Ok(state.with_undo_on_fail(true))
}

/// External inputs for the start tasks.
pub fn provision_inputs(customer: &str, num: i64, size: &str) -> Result<IndexMap<String, DataMap>> {
    let mut inputs = IndexMap::new();
    inputs.insert(
        "customer".to_string(),
        map_arg_data(&["name", "num"], vec![Data::text(customer), Data::int(num)])?,
    );
    inputs.insert(
        "size".to_string(),
        map_arg_data(&["size"], vec![Data::text(size)])?,
    );
    Ok(inputs)
}

/// Swap the provision stage's forward action for one that always stalls.
pub fn slow_provision(state: &mut WorkerState) -> Result<()> {
    state.task_mut("provision")?.forward.action = "provision_too_slow".to_string();
    Ok(())
}

/// Make both the forward and fallback provision actions stall.
pub fn slow_provision_fallback(state: &mut WorkerState, timings: ProvisionTimings) -> Result<()> {
    let task = state.task_mut("provision")?;
    task.forward.action = "provision_too_slow".to_string();
    if let Some(fallback) = task.fallback.as_mut() {
        fallback.action = "provision_too_slow".to_string();
        fallback.timeout = timings.slow_timeout;
    }
    Ok(())
}
