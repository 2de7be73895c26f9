//! The task: the unit the engine schedules.
//!
//! A task is owned by the engine for its entire life (`engine::DownloadEngine`
//! holds the table); every other component references it by [`TaskId`], never
//! by pointer, to keep the ownership graph acyclic.

pub mod registry;
pub mod state;

pub use registry::TaskRegistry;
pub use state::{Action, TaskState};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque task identifier, generated at submission (lowercase hex).
pub type TaskId = String;

pub fn new_task_id() -> TaskId {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Single-letter code used on the event wire (`L`/`N`/`H`/`U`).
    pub fn code(self) -> &'static str {
        match self {
            Priority::Low => "L",
            Priority::Normal => "N",
            Priority::High => "H",
            Priority::Urgent => "U",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Small-file boost threshold used by both the priority queue tie-break and
/// the segment-count heuristic: 100 MiB.
pub const SMALL_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Lock-free progress counters, shared with segment-download worker threads
/// so a chunk write never has to take the task's coarse lock.
#[derive(Debug, Default)]
pub struct TaskProgress {
    pub downloaded: AtomicU64,
    /// 0 means "unknown until first response"
    pub total: AtomicU64,
    pub speed_bps: AtomicU64,
}

impl TaskProgress {
    pub fn new(total: u64) -> Self {
        TaskProgress {
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(total),
            speed_bps: AtomicU64::new(0),
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn percentage(&self) -> u8 {
        match self.total() {
            Some(t) if t > 0 => {
                let d = self.downloaded();
                ((d.min(t) * 100) / t) as u8
            }
            _ => 0,
        }
    }

    pub fn eta_secs(&self) -> Option<u64> {
        let speed = self.speed_bps.load(Ordering::Relaxed);
        let total = self.total()?;
        let downloaded = self.downloaded();
        if speed == 0 || downloaded >= total {
            return None;
        }
        Some((total - downloaded) / speed)
    }

    pub fn add_downloaded(&self, n: u64) -> u64 {
        self.downloaded.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Sets the absolute downloaded count, used by the live-progress monitor
    /// to reconcile with the fetcher's own running total rather than
    /// double-adding deltas.
    pub fn set_downloaded(&self, n: u64) {
        self.downloaded.store(n, Ordering::Relaxed);
    }

    /// Learned lazily once the HEAD probe (or a resumed GET's headers)
    /// reports the real size; `0` means still unknown.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn set_speed_bps(&self, bps: u64) {
        self.speed_bps.store(bps, Ordering::Relaxed);
    }
}

/// Cooperative cancel/pause signals, checked between chunks and between
/// segment writes.
#[derive(Debug, Default)]
pub struct TaskSignals {
    pub cancel: AtomicBool,
    pub pause: AtomicBool,
}

impl TaskSignals {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.cancel.store(false, Ordering::Relaxed);
        self.pause.store(false, Ordering::Relaxed);
    }
}

/// The task record. Coarse fields (state, retry bookkeeping, timestamps) are
/// expected to live behind a lock at the store layer; `progress` and
/// `signals` are separately `Arc`-shared so hot paths never block on it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub filename: String,
    pub destination: PathBuf,
    /// Custom headers fixed at resolution time, reused
    /// unchanged on every retry and resume attempt.
    pub headers: HashMap<String, String>,
    pub category: Option<String>,
    pub group: Option<String>,
    pub priority: Priority,
    pub state: TaskState,
    pub progress: Arc<TaskProgress>,
    pub signals: Arc<TaskSignals>,
    pub segment_count: u32,
    pub retry_count: u32,
    pub wait_until: Option<SystemTime>,
    pub last_error: Option<String>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    /// Learned from the first successful HEAD probe, not persisted: used by
    /// `safe_resume` to detect a changed remote before trusting a resume.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Caller-supplied SHA-256 to verify against the finished file, checked
    /// only when `DdmConfig::verify_checksum` is set.
    pub expected_sha256: Option<String>,
}

impl Task {
    pub fn new(
        url: String,
        filename: String,
        destination: PathBuf,
        headers: HashMap<String, String>,
        category: Option<String>,
        group: Option<String>,
        priority: Priority,
    ) -> Self {
        Task {
            id: new_task_id(),
            url,
            filename,
            destination,
            headers,
            category,
            group,
            priority,
            state: TaskState::Queued,
            progress: Arc::new(TaskProgress::default()),
            signals: Arc::new(TaskSignals::default()),
            segment_count: 1,
            retry_count: 0,
            wait_until: None,
            last_error: None,
            created_at: SystemTime::now(),
            started_at: None,
            completed_at: None,
            etag: None,
            last_modified: None,
            expected_sha256: None,
        }
    }

    pub fn size_hint(&self) -> u64 {
        self.progress.total().unwrap_or(0)
    }

    /// Fresh attempt for the same id: resets signals/progress but keeps history.
    pub fn reset_for_retry(&mut self) {
        self.signals = Arc::new(TaskSignals::default());
        self.progress = Arc::new(TaskProgress::default());
        self.retry_count = 0;
        self.wait_until = None;
        self.last_error = None;
        self.started_at = None;
        self.completed_at = None;
        self.state = TaskState::Queued;
    }
}

/// Immutable point-in-time view used for listing, events, and persistence.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub url: String,
    pub filename: String,
    pub destination: PathBuf,
    pub category: Option<String>,
    pub group: Option<String>,
    pub priority: Priority,
    pub state: TaskState,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub speed_bps: u64,
    pub percentage: u8,
    pub eta_secs: Option<u64>,
    pub retry_count: u32,
    pub wait_until: Option<SystemTime>,
    pub last_error: Option<String>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
}

impl From<&Task> for TaskSnapshot {
    fn from(t: &Task) -> Self {
        TaskSnapshot {
            id: t.id.clone(),
            url: t.url.clone(),
            filename: t.filename.clone(),
            destination: t.destination.clone(),
            category: t.category.clone(),
            group: t.group.clone(),
            priority: t.priority,
            state: t.state,
            downloaded: t.progress.downloaded(),
            total: t.progress.total(),
            speed_bps: t.progress.speed_bps.load(Ordering::Relaxed),
            percentage: t.progress.percentage(),
            eta_secs: t.progress.eta_secs(),
            retry_count: t.retry_count,
            wait_until: t.wait_until,
            last_error: t.last_error.clone(),
            created_at: t.created_at,
            started_at: t.started_at,
            completed_at: t.completed_at,
        }
    }
}

pub fn unix_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub fn from_unix_secs(secs: i64) -> SystemTime {
    if secs <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + std::time::Duration::from_secs(secs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_id_is_hex_and_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn progress_percentage_and_invariant() {
        let p = TaskProgress::new(1000);
        p.add_downloaded(250);
        assert_eq!(p.percentage(), 25);
        assert!(p.downloaded() <= p.total().unwrap());
    }

    #[test]
    fn progress_unknown_total_is_zero_percent() {
        let p = TaskProgress::new(0);
        p.add_downloaded(500);
        assert_eq!(p.percentage(), 0);
        assert_eq!(p.total(), None);
    }

    #[test]
    fn signals_default_to_not_cancelled_not_paused() {
        let s = TaskSignals::default();
        assert!(!s.is_cancelled());
        assert!(!s.is_paused());
        s.request_cancel();
        assert!(s.is_cancelled());
    }

    #[test]
    fn reset_for_retry_clears_progress_and_state() {
        let mut t = Task::new(
            "https://example.com/f".into(),
            "f".into(),
            "/tmp/f".into(),
            HashMap::new(),
            None,
            None,
            Priority::Normal,
        );
        t.progress.add_downloaded(500);
        t.state = TaskState::Failed;
        t.retry_count = 3;
        t.reset_for_retry();
        assert_eq!(t.progress.downloaded(), 0);
        assert_eq!(t.retry_count, 0);
        assert_eq!(t.state, TaskState::Queued);
    }
}
