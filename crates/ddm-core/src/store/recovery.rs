//! Startup recovery: reconstructs in-memory tasks from the durable mirror
//! and classifies each row into one of three buckets (passthrough, orphaned,
//! inert) rather than a single blanket reset rule.

use anyhow::Result;

use super::db::TaskStore;
use crate::task::{Task, TaskState};

/// Result of a recovery pass, partitioned so the caller can drive each
/// bucket without re-inspecting state.
#[derive(Debug, Default)]
pub struct RecoveryPlan {
    /// QUEUED/PAUSED rows, reconstructed verbatim and (if QUEUED) ready to
    /// be pushed onto the priority queue.
    pub passthrough: Vec<Task>,
    /// STARTING/DOWNLOADING/EXTRACTING rows: the process died mid-flight.
    /// Forced to PAUSED, on-disk progress kept, never auto-resumed.
    pub orphaned: Vec<Task>,
    /// Everything else (terminal states, WAITING, TEMP_OFFLINE): left as-is,
    /// not re-enqueued.
    pub inert: Vec<Task>,
}

pub async fn recover(store: &TaskStore) -> Result<RecoveryPlan> {
    let rows = store.list().await?;
    let mut plan = RecoveryPlan::default();

    for row in rows {
        let orphan = row.state.is_active_transient();
        let passthrough = row.state.is_recoverable_passthrough();
        let mut task = row.into_task();

        if orphan {
            task.state = TaskState::Paused;
            plan.orphaned.push(task);
        } else if passthrough {
            plan.passthrough.push(task);
        } else {
            plan.inert.push(task);
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::MirrorRow;
    use crate::task::{Priority, Task};
    use std::collections::HashMap;

    async fn temp_store() -> (TaskStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open_path(&dir.path().join("tasks.db")).await.unwrap();
        (store, dir)
    }

    fn task_with_state(state: TaskState) -> Task {
        let mut t = Task::new("https://x/f".into(), "f".into(), "/tmp/f".into(), HashMap::new(), None, None, Priority::Normal);
        t.state = state;
        t
    }

    #[tokio::test]
    async fn queued_and_paused_pass_through_unchanged() {
        let (store, _dir) = temp_store().await;
        let queued = task_with_state(TaskState::Queued);
        let paused = task_with_state(TaskState::Paused);
        store.insert(&MirrorRow::from(&queued)).await.unwrap();
        store.insert(&MirrorRow::from(&paused)).await.unwrap();

        let plan = recover(&store).await.unwrap();
        assert_eq!(plan.passthrough.len(), 2);
        assert!(plan.orphaned.is_empty());
    }

    #[tokio::test]
    async fn active_transient_rows_are_forced_to_paused() {
        let (store, _dir) = temp_store().await;
        for state in [TaskState::Starting, TaskState::Downloading, TaskState::Extracting] {
            let t = task_with_state(state);
            store.insert(&MirrorRow::from(&t)).await.unwrap();
        }

        let plan = recover(&store).await.unwrap();
        assert_eq!(plan.orphaned.len(), 3);
        assert!(plan.orphaned.iter().all(|t| t.state == TaskState::Paused));
    }

    #[tokio::test]
    async fn terminal_and_waiting_rows_are_left_inert() {
        let (store, _dir) = temp_store().await;
        for state in [TaskState::Completed, TaskState::Failed, TaskState::Waiting, TaskState::TempOffline] {
            let t = task_with_state(state);
            store.insert(&MirrorRow::from(&t)).await.unwrap();
        }

        let plan = recover(&store).await.unwrap();
        assert_eq!(plan.inert.len(), 4);
        assert!(plan.passthrough.is_empty());
        assert!(plan.orphaned.is_empty());
    }
}
