//! Resizable worker pool: N identical dequeue-and-process loops.
//!
//! Same thread-per-segment fan-out idea as `downloader::run::run_concurrent`,
//! lifted one layer: instead of threads racing over segments of one task,
//! `tokio::task`s race over the shared priority queue, each driving one task
//! at a time through [`super::fetch::run_task`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::priority_queue::PriorityQueue;

use super::fetch::WorkerContext;

struct Handle {
    stop: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Owns the live set of worker loops. Resizing spawns or retires loops
/// without disturbing the ones left running.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    queue: Arc<PriorityQueue>,
    shutdown: Arc<Notify>,
    handles: Mutex<Vec<Handle>>,
    count: AtomicUsize,
}

impl WorkerPool {
    /// Starts with `initial` workers already running.
    pub fn start(ctx: Arc<WorkerContext>, queue: Arc<PriorityQueue>, shutdown: Arc<Notify>, initial: usize) -> Arc<Self> {
        let pool = Arc::new(WorkerPool {
            ctx,
            queue,
            shutdown,
            handles: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        pool.resize(initial.max(1));
        pool
    }

    fn spawn_one(self: &Arc<Self>) -> Handle {
        let stop = Arc::new(Notify::new());
        let ctx = Arc::clone(&self.ctx);
        let queue = Arc::clone(&self.queue);
        let shutdown = Arc::clone(&self.shutdown);
        let worker_stop = Arc::clone(&stop);
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    popped = queue.pop(&shutdown) => {
                        match popped {
                            Some(task_id) => super::fetch::run_task(Arc::clone(&ctx), task_id).await,
                            None => return,
                        }
                    }
                    _ = worker_stop.notified() => return,
                }
            }
        });
        Handle { stop, join }
    }

    /// Grows or shrinks the pool to `n` workers (minimum 1). Shrinking
    /// signals the excess workers to stop after their current task finishes
    /// and drops their handles without waiting for them.
    pub fn resize(self: &Arc<Self>, n: usize) {
        let n = n.max(1);
        let mut handles = self.handles.lock().unwrap();
        while handles.len() < n {
            handles.push(self.spawn_one());
        }
        while handles.len() > n {
            if let Some(h) = handles.pop() {
                h.stop.notify_one();
                // Intentionally not joined: the in-flight task this worker
                // may be running completes on its own.
                drop(h.join);
            }
        }
        self.count.store(handles.len(), Ordering::Relaxed);
    }

    pub fn worker_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Stops every worker and waits for the ones between tasks to exit.
    /// Workers mid-task still run to completion in the background.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown.notify_waiters();
        let handles = {
            let mut guard = self.handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for h in handles {
            h.stop.notify_one();
            let _ = tokio::time::timeout(std::time::Duration::from_millis(50), h.join).await;
        }
        self.count.store(0, Ordering::Relaxed);
    }
}
