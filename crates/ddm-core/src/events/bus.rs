//! Event bus: per-subscriber delta + batch + heartbeat fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::{Event, EventBatcher, EventType};

/// Zero subscription entries means "everything".
#[derive(Debug, Clone)]
pub enum SubscriptionSet {
    All,
    Tasks(HashSet<String>),
}

impl SubscriptionSet {
    fn matches(&self, task_id: &str) -> bool {
        match self {
            SubscriptionSet::All => true,
            SubscriptionSet::Tasks(ids) => ids.contains(task_id),
        }
    }
}

struct SubscriberState {
    subscription: SubscriptionSet,
    deltas: super::DeltaCompressor,
    stats_prev: Option<Map<String, Value>>,
    batcher: EventBatcher,
    sender: mpsc::UnboundedSender<String>,
    last_ack: Instant,
}

/// Handle returned by [`EventBus::subscribe`]: a long-lived connection.
pub struct Subscriber {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, SubscriberState>>,
    flush_interval: Duration,
    heartbeat_interval: Duration,
    batch_cap: usize,
}

impl EventBus {
    pub fn new(flush_interval: Duration, heartbeat_interval: Duration, batch_cap: usize) -> Arc<Self> {
        Arc::new(EventBus {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            flush_interval,
            heartbeat_interval,
            batch_cap,
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(Duration::from_millis(100), Duration::from_secs(30), 50)
    }

    pub fn subscribe(&self, subscription: SubscriptionSet) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Event::new(EventType::Connected, json!({"id": id})).to_json());
        self.subscribers.lock().unwrap().insert(
            id,
            SubscriberState {
                subscription,
                deltas: super::DeltaCompressor::new(),
                stats_prev: None,
                batcher: EventBatcher::new(self.batch_cap),
                sender: tx,
                last_ack: Instant::now(),
            },
        );
        Subscriber { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    /// Resets the heartbeat drop timer; call whenever a subscriber frame is
    /// acknowledged (e.g. a ping response on the transport).
    pub fn ack(&self, id: u64) {
        if let Some(sub) = self.subscribers.lock().unwrap().get_mut(&id) {
            sub.last_ack = Instant::now();
        }
    }

    pub fn confirm_subscribed(&self, id: u64) {
        if let Some(sub) = self.subscribers.lock().unwrap().get_mut(&id) {
            enqueue(sub, Event::new(EventType::Subscribed, json!({"id": id})));
        }
    }

    /// `state` must include `"i"` (the task id). Suppressed if the delta
    /// would be id-only.
    pub fn publish_task_updated(&self, task_id: &str, state: Map<String, Value>) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            if !sub.subscription.matches(task_id) {
                continue;
            }
            if let Some(delta) = sub.deltas.compress(task_id, &state) {
                enqueue(
                    sub,
                    Event::for_task(EventType::TaskUpdated, task_id.to_string(), Value::Object(delta)),
                );
            }
        }
    }

    pub fn publish_task_added(&self, task_id: &str, state: Map<String, Value>) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            if !sub.subscription.matches(task_id) {
                continue;
            }
            sub.deltas.compress(task_id, &state);
            enqueue(
                sub,
                Event::for_task(EventType::TaskAdded, task_id.to_string(), Value::Object(state.clone())),
            );
        }
    }

    pub fn publish_task_removed(&self, task_id: &str) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            if !sub.subscription.matches(task_id) {
                continue;
            }
            sub.deltas.clear(Some(task_id));
            enqueue(
                sub,
                Event::for_task(EventType::TaskRemoved, task_id.to_string(), json!({"i": task_id})),
            );
        }
    }

    /// Diffed against a single per-subscriber previous value, same discipline
    /// as `task_updated`.
    pub fn publish_engine_stats(&self, stats: Map<String, Value>) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            let changed: Map<String, Value> = match &sub.stats_prev {
                None => stats.clone(),
                Some(prev) => stats
                    .iter()
                    .filter(|(k, v)| prev.get(*k) != Some(*v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            };
            sub.stats_prev = Some(stats.clone());
            if !changed.is_empty() {
                enqueue(sub, Event::new(EventType::EngineStats, Value::Object(changed)));
            }
        }
    }

    pub fn publish_account_status(&self, status: Map<String, Value>) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            enqueue(sub, Event::new(EventType::AccountStatus, Value::Object(status.clone())));
        }
    }

    pub fn publish_log(&self, message: &str) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            enqueue(sub, Event::new(EventType::LogMessage, json!({"m": message})));
        }
    }

    pub fn publish_error(&self, id: u64, message: &str) {
        if let Some(sub) = self.subscribers.lock().unwrap().get_mut(&id) {
            enqueue(sub, Event::new(EventType::Error, json!({"m": message})));
        }
    }

    /// Full minimal state of every task, sent to `id` alone on connect.
    pub fn sync_all(&self, id: u64, tasks: Vec<Map<String, Value>>) {
        if let Some(sub) = self.subscribers.lock().unwrap().get_mut(&id) {
            for t in &tasks {
                if let Some(task_id) = t.get("i").and_then(|v| v.as_str()) {
                    sub.deltas.compress(task_id, t);
                }
            }
            let items: Vec<Value> = tasks.into_iter().map(Value::Object).collect();
            enqueue(sub, Event::new(EventType::SyncAll, Value::Array(items)));
        }
    }

    fn flush_all(&self) {
        let mut subs = self.subscribers.lock().unwrap();
        for sub in subs.values_mut() {
            if let Some(frame) = sub.batcher.flush() {
                let _ = sub.sender.send(frame);
            }
        }
    }

    /// Sends a heartbeat to every subscriber and drops any that have not
    /// acknowledged within 3 heartbeat intervals.
    fn heartbeat_all(&self) {
        let mut subs = self.subscribers.lock().unwrap();
        let now = Instant::now();
        let drop_after = self.heartbeat_interval * 3;
        subs.retain(|_, sub| {
            if now.duration_since(sub.last_ack) > drop_after {
                return false;
            }
            let _ = sub.sender.send(super::heartbeat_frame().to_string());
            true
        });
    }

    /// Background flush + heartbeat loop. Run once per `EventBus` on the
    /// engine's runtime; returns only when the last clone of `self` is
    /// dropped (loop body observes `Arc::strong_count`).
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut flush_tick = tokio::time::interval(self.flush_interval);
        let mut hb_tick = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = flush_tick.tick() => self.flush_all(),
                _ = hb_tick.tick() => self.heartbeat_all(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

fn enqueue(sub: &mut SubscriberState, event: Event) {
    if let Some(frame) = sub.batcher.add(event) {
        let _ = sub.sender.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_updated_suppressed_when_id_only_delta() {
        let bus = EventBus::with_defaults();
        let mut sub = bus.subscribe(SubscriptionSet::All);
        bus.publish_task_added("t1", serde_json::from_value(json!({"i": "t1", "s": "queued"})).unwrap());
        let _ = sub.receiver.try_recv(); // drain "connected"
        let _ = sub.receiver.try_recv(); // drain task_added
        bus.publish_task_updated("t1", serde_json::from_value(json!({"i": "t1", "s": "queued"})).unwrap());
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn subscription_filters_unrelated_tasks() {
        let bus = EventBus::with_defaults();
        let mut ids = HashSet::new();
        ids.insert("t1".to_string());
        let mut sub = bus.subscribe(SubscriptionSet::Tasks(ids));
        let _ = sub.receiver.try_recv(); // connected
        bus.publish_task_added("t2", serde_json::from_value(json!({"i": "t2", "s": "queued"})).unwrap());
        assert!(sub.receiver.try_recv().is_err());
        bus.publish_task_added("t1", serde_json::from_value(json!({"i": "t1", "s": "queued"})).unwrap());
        assert!(sub.receiver.try_recv().is_ok());
    }

    #[test]
    fn engine_stats_diffed_per_subscriber() {
        let bus = EventBus::with_defaults();
        let mut sub = bus.subscribe(SubscriptionSet::All);
        let _ = sub.receiver.try_recv();
        bus.publish_engine_stats(serde_json::from_value(json!({"a": 1, "q": 2})).unwrap());
        assert!(sub.receiver.try_recv().is_ok());
        bus.publish_engine_stats(serde_json::from_value(json!({"a": 1, "q": 2})).unwrap());
        assert!(sub.receiver.try_recv().is_err());
        bus.publish_engine_stats(serde_json::from_value(json!({"a": 2, "q": 2})).unwrap());
        assert!(sub.receiver.try_recv().is_ok());
    }

    #[test]
    fn heartbeat_drops_unacknowledged_subscriber() {
        let bus = EventBus::new(Duration::from_millis(10), Duration::from_millis(5), 50);
        let sub = bus.subscribe(SubscriptionSet::All);
        assert_eq!(bus.subscriber_count(), 1);
        // Force last_ack far enough in the past.
        {
            let mut subs = bus.subscribers.lock().unwrap();
            subs.get_mut(&sub.id).unwrap().last_ack = Instant::now() - Duration::from_secs(10);
        }
        bus.heartbeat_all();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn sync_all_sends_full_state_and_seeds_delta_cache() {
        let bus = EventBus::with_defaults();
        let mut sub = bus.subscribe(SubscriptionSet::All);
        let _ = sub.receiver.try_recv();
        let tasks = vec![serde_json::from_value(json!({"i": "t1", "s": "queued"})).unwrap()];
        bus.sync_all(sub.id, tasks);
        let frame = sub.receiver.try_recv().unwrap();
        assert!(frame.contains("\"sa\""));
        bus.publish_task_updated("t1", serde_json::from_value(json!({"i": "t1", "s": "queued"})).unwrap());
        assert!(sub.receiver.try_recv().is_err());
    }
}
