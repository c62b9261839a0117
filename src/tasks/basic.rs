// ABOUTME: General purpose actions usable from any workflow definition
// ABOUTME: noop succeeds immediately, echo returns text built from its inputs, fail always fails

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ActionContext, ActionOutcome, ActionRegistry, TaskAction};
use crate::engine::event::{next_nuid, Data};

pub fn register(registry: &mut ActionRegistry) {
    registry.register(Arc::new(NoopAction));
    registry.register(Arc::new(EchoAction));
    registry.register(Arc::new(FailAction));
}

pub struct NoopAction;

#[async_trait]
impl TaskAction for NoopAction {
    fn name(&self) -> &str {
        "noop"
    }

    async fn run(&self, _ctx: ActionContext) -> ActionOutcome {
        ActionOutcome::Done(Data::nuid(next_nuid()))
    }
}

/// Replies with the `message` input, or every text input joined in key order.
pub struct EchoAction;

#[async_trait]
impl TaskAction for EchoAction {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(&self, ctx: ActionContext) -> ActionOutcome {
        let message = match ctx.input("message") {
            Some(message) => message.text_or_empty().to_string(),
            None => ctx
                .inputs
                .values()
                .filter_map(|data| data.text.as_deref())
                .collect::<Vec<_>>()
                .join(" "),
        };
        debug!(task = %ctx.task_key, "echo: {}", message);
        ActionOutcome::Done(Data::text(message).with_nuid(next_nuid()))
    }
}

pub struct FailAction;

#[async_trait]
impl TaskAction for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, ctx: ActionContext) -> ActionOutcome {
        let message = ctx.input_text("message");
        if message.is_empty() {
            ActionOutcome::Failed(format!("task '{}' failed on request", ctx.task_key))
        } else {
            ActionOutcome::Failed(message.to_string())
        }
    }
}
