//! Priority queue: priority + small-file boost + FIFO.
//!
//! `original_source/.../core/priority_queue.py`'s `PriorityTask`
//! ordering and `auto_prioritize` heuristic, reimplemented over
//! `std::collections::BinaryHeap` with `tokio::sync::Notify` for the
//! blocking-dequeue-until-enqueued-or-cancelled contract.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::sync::Arc;

use crate::task::{Priority, TaskId, SMALL_FILE_THRESHOLD};

#[derive(Debug, Clone, Eq, PartialEq)]
struct Entry {
    task_id: TaskId,
    priority: Priority,
    size_bytes: u64,
    sequence: u64,
}

/// Reverse size ordering (`true` wins ties) so `BinaryHeap`'s max-heap natively
/// produces the intended dequeue order: higher priority, then small-file
/// boost, then FIFO by ascending sequence.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| {
                let self_small = self.size_bytes < SMALL_FILE_THRESHOLD;
                let other_small = other.size_bytes < SMALL_FILE_THRESHOLD;
                // Small-file boost outranks non-boosted at the same priority.
                self_small.cmp(&other_small)
            })
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Thread-safe priority queue of task ids. Dequeue blocks (async) until a
/// task is enqueued or the queue is shut down (cancellation).
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: tokio::sync::Notify,
    sequence: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        PriorityQueue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: tokio::sync::Notify::new(),
            sequence: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl PriorityQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueue a task. Re-enqueuing an id already queued is allowed (e.g. the
    /// scheduler promoting WAITING → QUEUED); dequeue order depends only on
    /// priority/size/sequence, never identity.
    pub fn push(&self, task_id: TaskId, priority: Priority, size_bytes: u64) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().unwrap().push(Entry {
            task_id,
            priority,
            size_bytes,
            sequence,
        });
        self.notify.notify_one();
    }

    /// Non-blocking pop; `None` if empty.
    pub fn try_pop(&self) -> Option<TaskId> {
        self.heap.lock().unwrap().pop().map(|e| e.task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until a task is available, the queue is closed, or `cancel`
    /// fires. Returns `None` on close/cancel.
    pub async fn pop(self: &Arc<Self>, cancel: &tokio::sync::Notify) -> Option<TaskId> {
        loop {
            if let Some(id) = self.try_pop() {
                return Some(id);
            }
            if self.closed.load(AtomicOrdering::Relaxed) {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.notified() => return None,
            }
        }
    }

    /// Wake every waiting dequeuer with no task available; used at shutdown.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Relaxed);
        self.notify.notify_waiters();
    }
}

/// `original_source/.../core/priority_queue.py`'s `auto_prioritize`: never
/// overrides an explicit priority, only fills in a default when the caller
/// omits one.
pub fn auto_prioritize(filename: &str, size_bytes: u64, category: &str) -> Priority {
    if size_bytes > 0 && size_bytes < SMALL_FILE_THRESHOLD {
        return Priority::High;
    }
    let lower = filename.to_ascii_lowercase();
    let season_pack = ["season", "complete", "pack", "s01-s", "batch"]
        .iter()
        .any(|needle| lower.contains(needle));
    if season_pack {
        return Priority::Low;
    }
    let _ = category;
    Priority::Normal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_dequeues_first() {
        let q = PriorityQueue::new();
        q.push("a".into(), Priority::Low, 0);
        q.push("b".into(), Priority::Urgent, 0);
        q.push("c".into(), Priority::Normal, 0);
        assert_eq!(q.try_pop().as_deref(), Some("b"));
        assert_eq!(q.try_pop().as_deref(), Some("c"));
        assert_eq!(q.try_pop().as_deref(), Some("a"));
    }

    #[test]
    fn small_file_boost_within_same_priority() {
        let q = PriorityQueue::new();
        q.push("big".into(), Priority::Normal, 500 * 1024 * 1024);
        q.push("small".into(), Priority::Normal, 10 * 1024 * 1024);
        assert_eq!(q.try_pop().as_deref(), Some("small"));
        assert_eq!(q.try_pop().as_deref(), Some("big"));
    }

    #[test]
    fn fifo_within_same_priority_and_size_class() {
        let q = PriorityQueue::new();
        q.push("first".into(), Priority::Normal, 1024);
        q.push("second".into(), Priority::Normal, 1024);
        q.push("third".into(), Priority::Normal, 1024);
        assert_eq!(q.try_pop().as_deref(), Some("first"));
        assert_eq!(q.try_pop().as_deref(), Some("second"));
        assert_eq!(q.try_pop().as_deref(), Some("third"));
    }

    #[test]
    fn auto_prioritize_small_file_is_high() {
        assert_eq!(auto_prioritize("movie.mkv", 50 * 1024 * 1024, ""), Priority::High);
    }

    #[test]
    fn auto_prioritize_season_pack_is_low() {
        assert_eq!(
            auto_prioritize("Show.Season.01.Complete", 2_000_000_000, "tv"),
            Priority::Low
        );
    }

    #[test]
    fn auto_prioritize_default_normal() {
        assert_eq!(
            auto_prioritize("movie.mkv", 2_000_000_000, "movies"),
            Priority::Normal
        );
    }

    #[tokio::test]
    async fn pop_blocks_until_pushed() {
        let q = PriorityQueue::new();
        let cancel = Arc::new(tokio::sync::Notify::new());
        let q2 = Arc::clone(&q);
        let cancel2 = Arc::clone(&cancel);
        let handle = tokio::spawn(async move { q2.pop(&cancel2).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.push("late".into(), Priority::Normal, 0);
        let got = handle.await.unwrap();
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn pop_returns_none_on_cancel() {
        let q = PriorityQueue::new();
        let cancel = Arc::new(tokio::sync::Notify::new());
        let q2 = Arc::clone(&q);
        let cancel2 = Arc::clone(&cancel);
        let handle = tokio::spawn(async move { q2.pop(&cancel2).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.notify_waiters();
        assert_eq!(handle.await.unwrap(), None);
    }
}
