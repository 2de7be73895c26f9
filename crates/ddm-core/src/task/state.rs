//! Task state machine: states, actions, and the allowed-action table.

/// Every state a task can occupy during its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Starting,
    Downloading,
    Waiting,
    Paused,
    Extracting,
    Completed,
    Finished,
    Failed,
    Cancelled,
    Skipped,
    TempOffline,
    Offline,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Starting => "starting",
            TaskState::Downloading => "downloading",
            TaskState::Waiting => "waiting",
            TaskState::Paused => "paused",
            TaskState::Extracting => "extracting",
            TaskState::Completed => "completed",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
            TaskState::Skipped => "skipped",
            TaskState::TempOffline => "temp_offline",
            TaskState::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => TaskState::Queued,
            "starting" => TaskState::Starting,
            "downloading" => TaskState::Downloading,
            "waiting" => TaskState::Waiting,
            "paused" => TaskState::Paused,
            "extracting" => TaskState::Extracting,
            "completed" => TaskState::Completed,
            "finished" => TaskState::Finished,
            "failed" => TaskState::Failed,
            "cancelled" => TaskState::Cancelled,
            "skipped" => TaskState::Skipped,
            "temp_offline" => TaskState::TempOffline,
            "offline" => TaskState::Offline,
            _ => TaskState::Failed,
        }
    }

    /// A task in a terminal state never leaves it except via an explicit retry,
    /// which creates a fresh attempt rather than transitioning in place.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Finished
                | TaskState::Failed
                | TaskState::Cancelled
                | TaskState::Skipped
                | TaskState::Offline
        )
    }

    /// True for STARTING/DOWNLOADING/EXTRACTING: the transient "active" states
    /// the scheduler persists on every tick rather than only at transitions.
    pub fn is_active_transient(self) -> bool {
        matches!(
            self,
            TaskState::Starting | TaskState::Downloading | TaskState::Extracting
        )
    }

    /// True for QUEUED/PAUSED: states recovery reconstructs verbatim.
    pub fn is_recoverable_passthrough(self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Paused)
    }
}

/// User/engine-initiated actions the state machine may accept or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pause,
    Resume,
    Cancel,
    Retry,
    Delete,
}

/// The table from: which actions are accepted in which state.
pub fn allowed(state: TaskState, action: Action) -> bool {
    use Action::*;
    use TaskState::*;
    match (state, action) {
        (Queued, Pause) | (Queued, Cancel) | (Queued, Delete) => true,
        (Starting, Cancel) => true,
        (Downloading, Pause) | (Downloading, Cancel) => true,
        (Waiting, Pause) | (Waiting, Resume) | (Waiting, Cancel) | (Waiting, Retry) => true,
        (Paused, Resume) | (Paused, Cancel) | (Paused, Delete) => true,
        (Extracting, Cancel) => true,
        (Completed, Retry) | (Completed, Delete) => true,
        (Finished, Retry) | (Finished, Delete) => true,
        (Failed, Retry) | (Failed, Delete) => true,
        (Cancelled, Retry) | (Cancelled, Delete) => true,
        (Skipped, Resume) | (Skipped, Retry) | (Skipped, Delete) => true,
        (TempOffline, Pause)
        | (TempOffline, Resume)
        | (TempOffline, Cancel)
        | (TempOffline, Retry) => true,
        (Offline, Retry) | (Offline, Delete) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_accepts_pause_cancel_delete_only() {
        assert!(allowed(TaskState::Queued, Action::Pause));
        assert!(allowed(TaskState::Queued, Action::Cancel));
        assert!(allowed(TaskState::Queued, Action::Delete));
        assert!(!allowed(TaskState::Queued, Action::Resume));
        assert!(!allowed(TaskState::Queued, Action::Retry));
    }

    #[test]
    fn terminal_states_reject_pause_resume_cancel() {
        for s in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert!(!allowed(s, Action::Pause));
            assert!(!allowed(s, Action::Resume));
            assert!(!allowed(s, Action::Cancel));
            assert!(allowed(s, Action::Retry));
            assert!(allowed(s, Action::Delete));
        }
    }

    #[test]
    fn waiting_supports_skip_wait_via_resume() {
        assert!(allowed(TaskState::Waiting, Action::Resume));
    }

    #[test]
    fn roundtrip_as_str_from_str() {
        for s in [
            TaskState::Queued,
            TaskState::Starting,
            TaskState::Downloading,
            TaskState::Waiting,
            TaskState::Paused,
            TaskState::Extracting,
            TaskState::Completed,
            TaskState::Finished,
            TaskState::Failed,
            TaskState::Cancelled,
            TaskState::Skipped,
            TaskState::TempOffline,
            TaskState::Offline,
        ] {
            assert_eq!(TaskState::from_str(s.as_str()), s);
        }
    }

    #[test]
    fn is_active_transient_covers_starting_downloading_extracting() {
        assert!(TaskState::Starting.is_active_transient());
        assert!(TaskState::Downloading.is_active_transient());
        assert!(TaskState::Extracting.is_active_transient());
        assert!(!TaskState::Queued.is_active_transient());
        assert!(!TaskState::Paused.is_active_transient());
    }
}
