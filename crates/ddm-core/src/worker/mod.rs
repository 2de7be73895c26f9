//! The worker: everything involved in actually moving bytes for one task.
//!
//! `progress` samples a live byte counter from the blocking fetch thread onto
//! the task's async-visible `TaskProgress`; `fetch` is the per-task driver
//! that turns a queued task into a finished (or failed) one; `pool` owns the
//! resizable set of tokio tasks that pull from the shared priority queue and
//! call into `fetch`.

pub mod fetch;
pub mod pool;
pub mod progress;

pub use fetch::{run_task, WorkerContext};
