//! Stats and listing filters exposed through `getStats`/`listTasks`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::rate_limiter::RateLimiterStats;
use crate::task::{Priority, TaskState};

/// Optional filter for `listTasks`; `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub category: Option<String>,
    pub group: Option<String>,
}

impl TaskFilter {
    pub fn matches_state(&self, state: TaskState) -> bool {
        self.state.map(|s| s == state).unwrap_or(true)
    }

    pub fn matches_category(&self, category: Option<&str>) -> bool {
        match &self.category {
            None => true,
            Some(want) => category == Some(want.as_str()),
        }
    }

    pub fn matches_group(&self, group: Option<&str>) -> bool {
        match &self.group {
            None => true,
            Some(want) => group == Some(want.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub queue_depth: usize,
    pub worker_count: usize,
    pub subscriber_count: usize,
    pub rate_limiter: RateLimiterStats,
}

impl EngineStats {
    /// Flattened map used by `events::bus::EventBus::publish_engine_stats`,
    /// which diffs per subscriber field-by-field the same way task updates
    /// do.
    pub fn to_wire_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("total".into(), Value::from(self.total_tasks));
        m.insert("active".into(), Value::from(self.active_tasks));
        m.insert("queued".into(), Value::from(self.queued_tasks));
        m.insert("qdepth".into(), Value::from(self.queue_depth));
        m.insert("workers".into(), Value::from(self.worker_count));
        m.insert("subscribers".into(), Value::from(self.subscriber_count));
        m.insert("rate_enabled".into(), Value::from(self.rate_limiter.enabled));
        if let Some(r) = self.rate_limiter.rate_bytes_per_sec {
            m.insert("rate_bps".into(), Value::from(r));
        }
        m
    }
}

/// Small-file/high-priority auto-boost default, used when a caller submits
/// without an explicit priority.
pub fn default_priority_for(filename: &str, size_hint: u64, category: &str) -> Priority {
    crate::priority_queue::auto_prioritize(filename, size_hint, category)
}
