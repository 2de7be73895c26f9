//! Coalesces events produced within a flush interval into one batch frame.

use super::Event;

/// Batches messages until the cap fills or `flush` is called. A batch of
/// size 1 is sent bare; larger batches are wrapped as `{"t":"batch","d":[...]}`.
pub struct EventBatcher {
    max_batch_size: usize,
    pending: Vec<Event>,
}

impl EventBatcher {
    pub fn new(max_batch_size: usize) -> Self {
        EventBatcher {
            max_batch_size: max_batch_size.max(1),
            pending: Vec::new(),
        }
    }

    /// Returns `Some(frame)` if the batch just filled, else `None`.
    pub fn add(&mut self, event: Event) -> Option<String> {
        self.pending.push(event);
        if self.pending.len() >= self.max_batch_size {
            self.flush()
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        if self.pending.len() == 1 {
            return Some(self.pending.remove(0).to_json());
        }
        let items: Vec<serde_json::Value> = self
            .pending
            .drain(..)
            .map(|e| {
                let mut obj = serde_json::Map::new();
                obj.insert("t".to_string(), serde_json::Value::String(e.event_type.tag().to_string()));
                if !e.data.is_null() {
                    obj.insert("d".to_string(), e.data);
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        let frame = serde_json::json!({ "t": "batch", "d": items });
        Some(serde_json::to_string(&frame).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use serde_json::json;

    #[test]
    fn single_message_batch_is_sent_bare() {
        let mut b = EventBatcher::new(50);
        b.add(Event::new(EventType::Heartbeat, serde_json::Value::Null));
        let frame = b.flush().unwrap();
        assert_eq!(frame, r#"{"t":"hb"}"#);
    }

    #[test]
    fn multiple_messages_wrap_in_batch_envelope() {
        let mut b = EventBatcher::new(50);
        b.add(Event::new(EventType::TaskAdded, json!({"i": "a"})));
        b.add(Event::new(EventType::TaskAdded, json!({"i": "b"})));
        let frame = b.flush().unwrap();
        assert!(frame.starts_with(r#"{"d":[{"#) || frame.contains(r#""t":"batch""#));
        assert!(frame.contains(r#""t":"batch""#));
    }

    #[test]
    fn batch_flushes_automatically_at_cap() {
        let mut b = EventBatcher::new(2);
        assert!(b.add(Event::new(EventType::Heartbeat, serde_json::Value::Null)).is_none());
        let frame = b.add(Event::new(EventType::Heartbeat, serde_json::Value::Null));
        assert!(frame.is_some());
        assert!(!b.has_pending());
    }

    #[test]
    fn empty_flush_returns_none() {
        let mut b = EventBatcher::new(10);
        assert!(b.flush().is_none());
    }
}
