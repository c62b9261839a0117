// ABOUTME: Task and action-slot definitions as they appear in workflow YAML
// ABOUTME: Converts a definition into the engine's Task with its forward, fallback and inverse slots

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::{ActionSlot, Confidence, Task, Transit};

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub action: String,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub transit: Transit,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl SlotDefinition {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            timeout: default_timeout(),
            confidence: Confidence::default(),
            transit: Transit::default(),
            max_retries: default_max_retries(),
        }
    }

    pub fn to_slot(&self) -> ActionSlot {
        ActionSlot::new(
            self.action.clone(),
            self.timeout,
            self.confidence,
            self.transit,
            self.max_retries,
        )
    }
}

impl From<&ActionSlot> for SlotDefinition {
    fn from(slot: &ActionSlot) -> Self {
        Self {
            action: slot.action.clone(),
            timeout: slot.timeout,
            confidence: slot.confidence,
            transit: slot.transit,
            max_retries: slot.max_retries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub forward: SlotDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<SlotDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<SlotDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Derived from the other tasks' `depends_on` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_depends_on: Option<Vec<String>>,
    /// Computed from the graph when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_depends_on: Option<Vec<String>>,
}

impl TaskDefinition {
    pub fn new(forward: SlotDefinition) -> Self {
        Self {
            description: None,
            forward,
            fallback: None,
            inverse: None,
            depends_on: Vec::new(),
            reverse_depends_on: None,
            all_depends_on: None,
        }
    }

    /// Every slot with its role, for action checks.
    pub fn slots(&self) -> impl Iterator<Item = (&'static str, &SlotDefinition)> {
        std::iter::once(("forward", &self.forward))
            .chain(self.fallback.iter().map(|slot| ("fallback", slot)))
            .chain(self.inverse.iter().map(|slot| ("inverse", slot)))
    }

    pub fn to_task(&self, key: &str, dependents: Vec<String>) -> Task {
        let mut task = Task::new(key).depends_on(&self.depends_on);
        task.forward = self.forward.to_slot();
        task.fallback = self.fallback.as_ref().map(SlotDefinition::to_slot);
        task.inverse = self.inverse.as_ref().map(SlotDefinition::to_slot);
        task.reverse_depends_on = self.reverse_depends_on.clone().unwrap_or(dependents);
        task.all_depends_on = self.all_depends_on.clone().unwrap_or_default();
        task
    }
}

impl From<&Task> for TaskDefinition {
    fn from(task: &Task) -> Self {
        Self {
            description: None,
            forward: SlotDefinition::from(&task.forward),
            fallback: task.fallback.as_ref().map(SlotDefinition::from),
            inverse: task.inverse.as_ref().map(SlotDefinition::from),
            depends_on: task.depends_on.clone(),
            reverse_depends_on: Some(task.reverse_depends_on.clone()),
            all_depends_on: None,
        }
    }
}
