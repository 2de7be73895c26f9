//! The durable mirror row: enough to rebuild a task minus its
//! transient signals (cancel/pause flags, in-memory atomics).

use crate::task::{Priority, Task, TaskId, TaskSignals, TaskState, TaskProgress};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct MirrorRow {
    pub id: TaskId,
    pub url: String,
    pub filename: String,
    pub destination: PathBuf,
    pub headers: HashMap<String, String>,
    pub state: TaskState,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub category: Option<String>,
    pub group: Option<String>,
    pub priority: Priority,
    pub created_at: SystemTime,
    pub retry_count: u32,
    pub wait_until: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl From<&Task> for MirrorRow {
    fn from(t: &Task) -> Self {
        MirrorRow {
            id: t.id.clone(),
            url: t.url.clone(),
            filename: t.filename.clone(),
            destination: t.destination.clone(),
            headers: t.headers.clone(),
            state: t.state,
            downloaded: t.progress.downloaded(),
            total: t.progress.total(),
            category: t.category.clone(),
            group: t.group.clone(),
            priority: t.priority,
            created_at: t.created_at,
            retry_count: t.retry_count,
            wait_until: t.wait_until,
            last_error: t.last_error.clone(),
        }
    }
}

impl MirrorRow {
    /// Reconstructs an in-memory task in its persisted state, the first step
    /// of recovery. `started_at`/`completed_at` are not mirrored columns and
    /// are left unset; the worker sets `started_at` again on first run.
    pub fn into_task(self) -> Task {
        let progress = TaskProgress::new(self.total.unwrap_or(0));
        progress.add_downloaded(self.downloaded);
        Task {
            id: self.id,
            url: self.url,
            filename: self.filename,
            destination: self.destination,
            headers: self.headers,
            category: self.category,
            group: self.group,
            priority: self.priority,
            state: self.state,
            progress: Arc::new(progress),
            signals: Arc::new(TaskSignals::default()),
            segment_count: 1,
            retry_count: self.retry_count,
            wait_until: self.wait_until,
            last_error: self.last_error,
            created_at: self.created_at,
            started_at: None,
            completed_at: None,
            etag: None,
            last_modified: None,
            expected_sha256: None,
        }
    }
}
