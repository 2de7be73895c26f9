//! In-memory task table.
//!
//! A single `Mutex<HashMap>` guards the coarse fields: one lock per shared
//! table rather than per-field atomics (the hot counters already live
//! outside the lock, in `Task::progress`/`Task::signals`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Task, TaskId, TaskSnapshot};

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(id)
    }

    /// Applies `f` to the task in place, returning its result, or `None` if
    /// the task no longer exists (it may have been deleted concurrently).
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.get_mut(id).map(f)
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .map(TaskSnapshot::from)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, TaskState};

    fn sample(url: &str) -> Task {
        Task::new(url.into(), "f".into(), "/tmp/f".into(), HashMap::new(), None, None, Priority::Normal)
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let reg = TaskRegistry::new();
        let task = sample("https://example.com/a");
        let id = task.id.clone();
        reg.insert(task);
        assert!(reg.get(&id).is_some());
        assert_eq!(reg.len(), 1);
        let removed = reg.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(reg.get(&id).is_none());
    }

    #[test]
    fn update_mutates_in_place() {
        let reg = TaskRegistry::new();
        let task = sample("https://example.com/b");
        let id = task.id.clone();
        reg.insert(task);
        reg.update(&id, |t| t.state = TaskState::Downloading);
        assert_eq!(reg.get(&id).unwrap().state, TaskState::Downloading);
    }

    #[test]
    fn update_on_missing_task_returns_none() {
        let reg = TaskRegistry::new();
        assert!(reg.update("missing", |t| t.state = TaskState::Failed).is_none());
    }

    #[test]
    fn snapshots_reflect_current_progress() {
        let reg = TaskRegistry::new();
        let task = sample("https://example.com/c");
        task.progress.add_downloaded(42);
        reg.insert(task);
        let snaps = reg.snapshots();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].downloaded, 42);
    }
}
