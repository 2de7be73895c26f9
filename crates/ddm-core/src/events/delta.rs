//! Per-subscriber delta compression: only send fields that changed.

use std::collections::HashMap;
use serde_json::{Map, Value};

/// Tracks the last state sent per task id for one subscriber and computes
/// deltas against it. An update whose delta would be "id only" is suppressed
/// (returns `None`).
#[derive(Default)]
pub struct DeltaCompressor {
    previous: HashMap<String, Map<String, Value>>,
}

impl DeltaCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `current` must include the id under `"i"`. Returns the delta object
    /// (always containing `"i"`) or `None` if nothing besides the id changed.
    pub fn compress(&mut self, task_id: &str, current: &Map<String, Value>) -> Option<Map<String, Value>> {
        let previous = self.previous.get(task_id);
        let mut delta = Map::new();
        delta.insert("i".to_string(), Value::String(task_id.to_string()));

        for (key, value) in current {
            if key == "i" {
                continue;
            }
            let changed = match previous.and_then(|p| p.get(key)) {
                Some(prev_value) => prev_value != value,
                None => true,
            };
            if changed {
                delta.insert(key.clone(), value.clone());
            }
        }

        self.previous.insert(task_id.to_string(), current.clone());

        if delta.len() > 1 {
            Some(delta)
        } else {
            None
        }
    }

    pub fn clear(&mut self, task_id: Option<&str>) {
        match task_id {
            Some(id) => {
                self.previous.remove(id);
            }
            None => self.previous.clear(),
        }
    }
}
