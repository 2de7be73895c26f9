//! Durable mirror: a single-writer SQLite store that rebuilds tasks across
//! restarts, addressed by opaque string task ids across the full state
//! space a task can occupy.

pub mod db;
pub mod recovery;
pub mod types;

pub use db::TaskStore;
pub use recovery::{recover, RecoveryPlan};
pub use types::MirrorRow;
