// ABOUTME: Task record, its forward/fallback/inverse action slots and child-worker bookkeeping
// ABOUTME: Action slots name a registered action instead of holding a callable, so tasks checkpoint cleanly

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::event::{Data, DataMap};
use super::timeout::{Confidence, Transit};

/// Default fraction of expected children that marks a fan-out as partially reported.
pub const PARTIAL_FRACTION: f64 = 0.18;

/// Reserved input key carrying a task's own forward result into its inverse action.
pub const RESULT_KEY: &str = "result";

/// One invocable action of a task with its timing and retry bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSlot {
    /// Name of the action in the registry.
    pub action: String,
    /// First invocation of this slot.
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    /// Most recent (re)invocation.
    #[serde(default)]
    pub retried: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde", default)]
    pub timeout: Duration,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub transit: Transit,
    #[serde(with = "humantime_serde", default)]
    pub elapsed: Duration,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub overtime: bool,
    #[serde(default)]
    pub overtry: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ActionSlot {
    pub fn new(
        action: impl Into<String>,
        timeout: Duration,
        confidence: Confidence,
        transit: Transit,
        max_retries: u32,
    ) -> Self {
        Self {
            action: action.into(),
            timeout,
            confidence,
            transit,
            max_retries,
            ..Default::default()
        }
    }

    /// Stamp a dispatch. The first-invocation time survives retries.
    pub fn stamp_dispatch(&mut self, now: DateTime<Utc>) {
        if !self.overtime || self.started.is_none() {
            self.started = Some(now);
        }
        self.retried = Some(now);
    }

    /// Time since the last (re)invocation.
    pub fn since_retry(&self, now: DateTime<Utc>) -> Duration {
        since(self.retried, now)
    }

    /// Record completion time measured from the first invocation.
    pub fn record_elapsed(&mut self, now: DateTime<Utc>) {
        self.elapsed = since(self.started, now);
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }
}

fn since(from: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    from.and_then(|from| (now - from).to_std().ok())
        .unwrap_or_default()
}

/// Results reported by child workers a task has fanned out to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Children {
    #[serde(default)]
    pub results: BTreeMap<String, Data>,
    /// Child worker ids in registration order.
    #[serde(default)]
    pub expected: Vec<String>,
    #[serde(default)]
    pub partial: bool,
}

impl Children {
    pub fn register(&mut self, child_id: impl Into<String>) {
        let child_id = child_id.into();
        if !self.expected.contains(&child_id) {
            self.expected.push(child_id);
        }
    }

    pub fn all_reported(&self) -> bool {
        !self.expected.is_empty()
            && self
                .expected
                .iter()
                .all(|child| self.results.contains_key(child))
    }

    pub fn reported_fraction(&self) -> f64 {
        if self.expected.is_empty() {
            return 0.0;
        }
        let reported = self
            .expected
            .iter()
            .filter(|child| self.results.contains_key(*child))
            .count();
        reported as f64 / self.expected.len() as f64
    }

    /// Merge child results into a single JSON object keyed by child id.
    pub fn merged(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.results)
    }
}

/// A named node of a worker's dependency graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub key: String,
    #[serde(default)]
    pub inputs: DataMap,
    #[serde(default)]
    pub result: Option<Data>,
    #[serde(default)]
    pub has_result: bool,
    #[serde(default)]
    pub working: bool,
    #[serde(default)]
    pub cancel_requested: bool,
    pub forward: ActionSlot,
    #[serde(default)]
    pub fallback: Option<ActionSlot>,
    #[serde(default)]
    pub inverse: Option<ActionSlot>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub reverse_depends_on: Vec<String>,
    #[serde(default)]
    pub all_depends_on: Vec<String>,
    #[serde(default)]
    pub children: Option<Children>,
}

impl Task {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_forward(
        mut self,
        action: impl Into<String>,
        timeout: Duration,
        confidence: Confidence,
        transit: Transit,
        max_retries: u32,
    ) -> Self {
        self.forward = ActionSlot::new(action, timeout, confidence, transit, max_retries);
        self
    }

    pub fn with_fallback(
        mut self,
        action: impl Into<String>,
        timeout: Duration,
        confidence: Confidence,
        transit: Transit,
        max_retries: u32,
    ) -> Self {
        self.fallback = Some(ActionSlot::new(
            action,
            timeout,
            confidence,
            transit,
            max_retries,
        ));
        self
    }

    pub fn with_inverse(
        mut self,
        action: impl Into<String>,
        timeout: Duration,
        confidence: Confidence,
        transit: Transit,
        max_retries: u32,
    ) -> Self {
        self.inverse = Some(ActionSlot::new(
            action,
            timeout,
            confidence,
            transit,
            max_retries,
        ));
        self
    }

    pub fn depends_on<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.depends_on = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self
    }

    pub fn reverse_depends_on<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.reverse_depends_on = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self
    }

    pub fn all_depends_on<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.all_depends_on = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Data) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Slot answering forward dispatch: the primary action until it exhausts
    /// its retries, then the fallback.
    pub fn active_forward(&self) -> Option<&ActionSlot> {
        if !self.forward.overtry {
            Some(&self.forward)
        } else {
            self.fallback.as_ref()
        }
    }

    pub fn active_forward_mut(&mut self) -> Option<&mut ActionSlot> {
        if !self.forward.overtry {
            Some(&mut self.forward)
        } else {
            self.fallback.as_mut()
        }
    }

    /// Every slot with the role it plays, for registry binding and reporting.
    pub fn slots(&self) -> impl Iterator<Item = (&'static str, &ActionSlot)> {
        std::iter::once(("forward", &self.forward))
            .chain(self.fallback.iter().map(|slot| ("fallback", slot)))
            .chain(self.inverse.iter().map(|slot| ("inverse", slot)))
    }

    pub fn depends_transitively_on(&self, key: &str) -> bool {
        self.all_depends_on.iter().any(|dep| dep == key)
    }

    /// Forget the current result so the task runs forward again.
    pub fn clear(&mut self) {
        self.result = None;
        self.has_result = false;
        self.working = false;
        self.cancel_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_builder_sets_slots_and_edges() {
        let task = Task::new("provision")
            .with_forward("provision", ms(10), Confidence::Hard, Transit::Hard, 4)
            .with_fallback("provision", ms(20), Confidence::Known, Transit::Lan, 4)
            .with_inverse("undo_provision", ms(10), Confidence::Hard, Transit::Hard, 4)
            .depends_on(&["node", "image"])
            .reverse_depends_on(&["boot"])
            .all_depends_on(&["customer", "size", "node", "image"]);

        assert_eq!(task.forward.max_retries, 4);
        assert_eq!(task.fallback.as_ref().unwrap().timeout, ms(20));
        assert_eq!(task.slots().count(), 3);
        assert!(task.depends_transitively_on("customer"));
        assert!(!task.depends_transitively_on("boot"));
    }

    #[test]
    fn test_active_forward_switches_to_fallback() {
        let mut task = Task::new("t")
            .with_forward("a", ms(10), Confidence::Hard, Transit::Hard, 1)
            .with_fallback("b", ms(10), Confidence::Hard, Transit::Hard, 1);
        assert_eq!(task.active_forward().unwrap().action, "a");

        task.forward.overtry = true;
        assert_eq!(task.active_forward().unwrap().action, "b");

        task.fallback = None;
        assert!(task.active_forward().is_none());
    }

    #[test]
    fn test_stamp_keeps_first_invocation_across_retries() {
        let mut slot = ActionSlot::new("a", ms(10), Confidence::Hard, Transit::Hard, 3);
        let first = Utc::now();
        slot.stamp_dispatch(first);

        slot.overtime = true;
        let retry = first + chrono::Duration::milliseconds(15);
        slot.stamp_dispatch(retry);

        assert_eq!(slot.started, Some(first));
        assert_eq!(slot.retried, Some(retry));
        assert_eq!(slot.since_retry(retry), Duration::ZERO);

        slot.record_elapsed(retry + chrono::Duration::milliseconds(5));
        assert_eq!(slot.elapsed, ms(20));
    }

    #[test]
    fn test_children_completion_and_fraction() {
        let mut children = Children::default();
        assert!(!children.all_reported());

        for id in ["c1", "c2", "c3", "c4", "c5"] {
            children.register(id);
        }
        children.register("c1");
        assert_eq!(children.expected.len(), 5);

        children.results.insert("c1".into(), Data::text("one"));
        assert!((children.reported_fraction() - 0.2).abs() < 1e-9);
        assert!(!children.all_reported());

        for id in ["c2", "c3", "c4", "c5"] {
            children.results.insert(id.into(), Data::int(1));
        }
        assert!(children.all_reported());

        let merged = children.merged().unwrap();
        assert_eq!(merged["c1"]["text"], "one");
    }

    #[test]
    fn test_slot_serializes_durations_readably() {
        let slot = ActionSlot::new("a", ms(1500), Confidence::Known, Transit::Lan, 2);
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["timeout"], "1s 500ms");
        assert_eq!(json["confidence"], "known");
    }
}
