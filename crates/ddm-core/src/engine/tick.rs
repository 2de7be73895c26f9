//! The scheduler tick: promotes WAITING → QUEUED on a fixed cadence and
//! writes a durable snapshot of every transiently-active task.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

use crate::events::EventBus;
use crate::priority_queue::PriorityQueue;
use crate::rate_limiter::RateLimiter;
use crate::store::{MirrorRow, TaskStore};
use crate::task::{TaskRegistry, TaskState};
use crate::worker::pool::WorkerPool;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Runs until `shutdown` is set to `true`. One instance per engine.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    registry: Arc<TaskRegistry>,
    store: Arc<TaskStore>,
    queue: Arc<PriorityQueue>,
    events: Arc<EventBus>,
    rate_limiter: Arc<RateLimiter>,
    pool: Arc<WorkerPool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick_once(&registry, &store, &queue, &events).await;
                publish_stats(&registry, &queue, &events, &rate_limiter, &pool);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// `engine_stats` is pushed on the same cadence as the scheduler tick; the
/// bus's own delta discipline (diffed per subscriber) suppresses frames
/// where nothing changed.
fn publish_stats(
    registry: &Arc<TaskRegistry>,
    queue: &Arc<PriorityQueue>,
    events: &Arc<EventBus>,
    rate_limiter: &Arc<RateLimiter>,
    pool: &Arc<WorkerPool>,
) {
    let tasks = registry.list();
    let active = tasks.iter().filter(|t| t.state.is_active_transient()).count();
    let queued = tasks.iter().filter(|t| t.state == TaskState::Queued).count();
    let stats = crate::engine::EngineStats {
        total_tasks: tasks.len(),
        active_tasks: active,
        queued_tasks: queued,
        queue_depth: queue.len(),
        worker_count: pool.worker_count(),
        subscriber_count: events.subscriber_count(),
        rate_limiter: rate_limiter.stats(),
    };
    events.publish_engine_stats(stats.to_wire_map());
}

async fn tick_once(registry: &Arc<TaskRegistry>, store: &Arc<TaskStore>, queue: &Arc<PriorityQueue>, events: &Arc<EventBus>) {
    let now = SystemTime::now();
    for task in registry.list() {
        if task.state == TaskState::Waiting {
            let due = task.wait_until.map(|w| now >= w).unwrap_or(true);
            if due {
                let priority = task.priority;
                let size_hint = task.size_hint();
                registry.update(&task.id, |t| {
                    t.state = TaskState::Queued;
                    t.wait_until = None;
                });
                queue.push(task.id.clone(), priority, size_hint);
                if let Some(t) = registry.get(&task.id) {
                    let _ = store.upsert(&MirrorRow::from(&t)).await;
                    events.publish_task_updated(&task.id, crate::events::task_event_map(&t));
                }
            }
            continue;
        }

        // Periodic persistence of active transient state bounds write
        // amplification: non-active tasks persist only at their own
        // transition points.
        if task.state.is_active_transient() {
            let _ = store.upsert(&MirrorRow::from(&task)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, Task};
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn waiting_task_past_wait_until_is_promoted_to_queued() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open_path(&dir.path().join("t.db")).await.unwrap());
        let registry = TaskRegistry::new();
        let queue = PriorityQueue::new();
        let events = EventBus::with_defaults();

        let mut task = Task::new("https://x/f".into(), "f".into(), dir.path().join("f"), HashMap::new(), None, None, Priority::Normal);
        task.state = TaskState::Waiting;
        task.wait_until = Some(SystemTime::now() - StdDuration::from_secs(5));
        let id = task.id.clone();
        store.insert(&MirrorRow::from(&task)).await.unwrap();
        registry.insert(task);

        tick_once(&registry, &store, &queue, &events).await;

        assert_eq!(registry.get(&id).unwrap().state, TaskState::Queued);
        assert_eq!(queue.try_pop().as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn waiting_task_not_yet_due_stays_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open_path(&dir.path().join("t.db")).await.unwrap());
        let registry = TaskRegistry::new();
        let queue = PriorityQueue::new();
        let events = EventBus::with_defaults();

        let mut task = Task::new("https://x/f".into(), "f".into(), dir.path().join("f"), HashMap::new(), None, None, Priority::Normal);
        task.state = TaskState::Waiting;
        task.wait_until = Some(SystemTime::now() + StdDuration::from_secs(300));
        let id = task.id.clone();
        registry.insert(task);

        tick_once(&registry, &store, &queue, &events).await;

        assert_eq!(registry.get(&id).unwrap().state, TaskState::Waiting);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn publish_stats_sends_a_frame_to_subscribers() {
        let registry = TaskRegistry::new();
        let queue = PriorityQueue::new();
        // Batch cap 1 so the stats frame is sent immediately rather than
        // waiting for the flush-interval loop, which this test does not run.
        let events = EventBus::new(Duration::from_millis(100), Duration::from_secs(30), 1);
        let rate_limiter = Arc::new(RateLimiter::disabled());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open_path(&dir.path().join("t.db")).await.unwrap());
        let ctx = Arc::new(crate::worker::fetch::WorkerContext {
            registry: Arc::clone(&registry),
            store,
            events: Arc::clone(&events),
            rate_limiter: Arc::clone(&rate_limiter),
            host_policy: Arc::new(std::sync::Mutex::new(crate::host_policy::HostPolicy::new(1, 8))),
            config: crate::config::DdmConfig::default(),
            resolver: None,
            balancer: None,
            account_source: None,
        });
        let pool = WorkerPool::start(ctx, Arc::clone(&queue), Arc::new(tokio::sync::Notify::new()), 1);

        let mut sub = events.subscribe(crate::events::SubscriptionSet::All);
        let _ = sub.receiver.try_recv(); // connected

        publish_stats(&registry, &queue, &events, &rate_limiter, &pool);
        assert!(sub.receiver.try_recv().is_ok());

        pool.shutdown().await;
    }
}
