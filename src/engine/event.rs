// ABOUTME: Event envelope and typed payload exchanged between tasks, workers and the hub
// ABOUTME: Events are plain values; builder methods consume and return a modified copy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::worker::CancelToken;

/// Encoding tag for a JSON object of child-worker results keyed by child id.
pub const JSON_DATA_MAP: u32 = 1;

/// Destination id used for broadcast events before the hub personalises them.
pub const BROADCAST_ID: &str = "0000000000000000000000";

pub type DataMap = BTreeMap<String, Data>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Wake,
    Done,
    AddChild,
    GotChild,
    Got,
    Inv,
    Timeout,
    Cancel,
    Fail,
    Rmv,
    #[default]
    Status,
    Add,
    Del,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Wake => "WAKE",
            EventKind::Done => "DONE",
            EventKind::AddChild => "ADDCHILD",
            EventKind::GotChild => "GOTCHILD",
            EventKind::Got => "GOT",
            EventKind::Inv => "INV",
            EventKind::Timeout => "TIMEOUT",
            EventKind::Cancel => "CANCEL",
            EventKind::Fail => "FAIL",
            EventKind::Rmv => "RMV",
            EventKind::Status => "STATUS",
            EventKind::Add => "ADD",
            EventKind::Del => "DEL",
        };
        f.write_str(name)
    }
}

/// Arbitrary in-process application value. Never checkpointed.
#[derive(Clone)]
pub struct AppValue(pub Arc<dyn Any + Send + Sync>);

impl AppValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for AppValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppValue(..)")
    }
}

/// Typed payload carried by an event and stored as a task result or input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Data {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Discriminant describing how `json` is to be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    #[serde(skip)]
    pub value: Option<AppValue>,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Data {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn int(value: i64) -> Self {
        Self {
            int: Some(value),
            ..Default::default()
        }
    }

    pub fn flag(value: bool) -> Self {
        Self {
            flag: Some(value),
            ..Default::default()
        }
    }

    pub fn nuid(id: impl Into<String>) -> Self {
        Self {
            nuid: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_int(mut self, value: i64) -> Self {
        self.int = Some(value);
        self
    }

    pub fn with_nuid(mut self, id: impl Into<String>) -> Self {
        self.nuid = Some(id.into());
        self
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn nuid_or_empty(&self) -> &str {
        self.nuid.as_deref().unwrap_or("")
    }
}

/// Fresh unique id for results and workers.
pub fn next_nuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Addressed message for a worker, its tasks or the hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub worker_id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub task_key: String,
    /// Absolute deadline; `None` means the event never expires.
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub to_hub: bool,
    /// Selects a hub hook when `to_hub` is set.
    #[serde(default)]
    pub hook_code: i32,
    #[serde(default)]
    pub data: Data,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn wake(self) -> Self {
        self.kind(EventKind::Wake)
    }

    pub fn done(self) -> Self {
        self.kind(EventKind::Done)
    }

    pub fn got(self) -> Self {
        self.kind(EventKind::Got)
    }

    pub fn got_child(self) -> Self {
        self.kind(EventKind::GotChild)
    }

    pub fn add_child(self) -> Self {
        self.kind(EventKind::AddChild)
    }

    pub fn inv(self) -> Self {
        self.kind(EventKind::Inv)
    }

    pub fn timeout(self) -> Self {
        self.kind(EventKind::Timeout)
    }

    pub fn cancel(self) -> Self {
        self.kind(EventKind::Cancel)
    }

    pub fn fail(self) -> Self {
        self.kind(EventKind::Fail)
    }

    pub fn rmv(self) -> Self {
        self.kind(EventKind::Rmv)
    }

    pub fn status(self) -> Self {
        self.kind(EventKind::Status)
    }

    pub fn to(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn to_all(mut self) -> Self {
        self.broadcast = true;
        self.worker_id = BROADCAST_ID.to_string();
        self
    }

    pub fn sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn task(mut self, key: impl Into<String>) -> Self {
        self.task_key = key.into();
        self
    }

    /// Route to the hub hook registered under `code`.
    pub fn hook(mut self, code: i32) -> Self {
        self.to_hub = true;
        self.hook_code = code;
        self
    }

    pub fn expires_at(mut self, deadline: DateTime<Utc>) -> Self {
        self.expires = Some(deadline);
        self
    }

    /// Expire `after` from now. A zero duration leaves the event timeless.
    pub fn expires_in(self, after: Duration) -> Self {
        if after.is_zero() {
            return self.timeless();
        }
        match chrono::Duration::from_std(after) {
            Ok(after) => self.expires_at(Utc::now() + after),
            Err(_) => self.timeless(),
        }
    }

    pub fn timeless(mut self) -> Self {
        self.expires = None;
        self
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.data = data;
        self
    }

    pub fn flag(mut self, value: bool) -> Self {
        self.data.flag = Some(value);
        self
    }

    pub fn int(mut self, value: i64) -> Self {
        self.data.int = Some(value);
        self
    }

    pub fn nuid(mut self, id: impl Into<String>) -> Self {
        self.data.nuid = Some(id.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.data.text = Some(text.into());
        self
    }

    pub fn err(mut self, error: impl fmt::Display) -> Self {
        self.data.error = Some(error.to_string());
        self
    }

    pub fn json(mut self, value: serde_json::Value, encoding: u32) -> Self {
        self.data.json = Some(value);
        self.data.encoding = Some(encoding);
        self
    }

    pub fn value(mut self, value: AppValue) -> Self {
        self.data.value = Some(value);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.data.cancel = Some(token);
        self
    }

    pub fn is_timeless(&self) -> bool {
        self.expires.is_none()
    }

    /// Broadcasts and timeless events never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.broadcast {
            return false;
        }
        self.expires.map_or(false, |deadline| now > deadline)
    }

    pub fn error_text(&self) -> &str {
        self.data.error.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.kind, self.worker_id)?;
        if !self.task_key.is_empty() {
            write!(f, " [{}]", self.task_key)?;
        }
        Ok(())
    }
}
