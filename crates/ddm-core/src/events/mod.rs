//! Event fan-out: per-subscriber delta compression, batching, and
//! heartbeats (2-char `EventType` tags, minified wire format, `EventBatcher`,
//! `DeltaCompressor`), built on `tokio::sync::mpsc` per-subscriber channels
//! and a background flush task per subscriber — explicit channel plumbing
//! over shared mutable state, the same preference `downloader::run`'s
//! progress channel follows.

pub mod batch;
pub mod bus;
pub mod delta;
pub mod wire;

pub use batch::EventBatcher;
pub use bus::{EventBus, Subscriber, SubscriptionSet};
pub use delta::DeltaCompressor;
pub use wire::task_event_map;

use serde_json::{json, Value};

/// Two-character event tags kept on the wire to minimize payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TaskAdded,
    TaskUpdated,
    TaskRemoved,
    EngineStats,
    AccountStatus,
    LogMessage,
    Heartbeat,
    Connected,
    Subscribed,
    SyncAll,
    Error,
    Batch,
}

impl EventType {
    pub fn tag(self) -> &'static str {
        match self {
            EventType::TaskAdded => "ta",
            EventType::TaskUpdated => "tu",
            EventType::TaskRemoved => "tr",
            EventType::EngineStats => "es",
            EventType::AccountStatus => "as",
            EventType::LogMessage => "lm",
            EventType::Heartbeat => "hb",
            EventType::Connected => "cn",
            EventType::Subscribed => "sb",
            EventType::SyncAll => "sa",
            EventType::Error => "er",
            EventType::Batch => "batch",
        }
    }
}

/// A single outbound wire message: `{"t": "<tag>", "d": <data>}`.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub task_id: Option<String>,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Event {
            event_type,
            task_id: None,
            data,
        }
    }

    pub fn for_task(event_type: EventType, task_id: String, data: Value) -> Self {
        Event {
            event_type,
            task_id: Some(task_id),
            data,
        }
    }

    /// Minified JSON for a single, un-batched message.
    pub fn to_json(&self) -> String {
        let mut msg = json!({ "t": self.event_type.tag() });
        if !self.data.is_null() {
            msg["d"] = self.data.clone();
        }
        serde_json::to_string(&msg).unwrap_or_default()
    }
}

pub fn heartbeat_frame() -> &'static str {
    r#"{"t":"hb"}"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_frame_is_minimal() {
        assert_eq!(heartbeat_frame(), r#"{"t":"hb"}"#);
    }

    #[test]
    fn event_to_json_omits_d_when_data_is_null() {
        let e = Event::new(EventType::Heartbeat, Value::Null);
        assert_eq!(e.to_json(), r#"{"t":"hb"}"#);
    }

    #[test]
    fn event_to_json_includes_minified_data() {
        let e = Event::new(EventType::TaskAdded, json!({"i": "abc"}));
        assert_eq!(e.to_json(), r#"{"d":{"i":"abc"},"t":"ta"}"#);
    }
}
