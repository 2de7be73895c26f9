//! Task → wire-map conversion, grounded on `original_source/.../websocket/
//! events.py`'s `TaskEvent` dataclass field-for-field (`i`/`s`/`p`/`d`/`t`/
//! `sp`/`e`/`er`/`pr`/`a`).

use serde_json::{json, Map, Value};

use crate::task::{unix_secs, Task};

/// Full minimal state map for one task, used for `task_added`/`sync_all`
/// and as the "current state" fed through [`super::DeltaCompressor`] for
/// `task_updated`.
pub fn task_event_map(task: &Task) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("i".into(), json!(task.id));
    map.insert("n".into(), json!(task.filename));
    map.insert("s".into(), json!(task.state.as_str()));
    map.insert("p".into(), json!(task.progress.percentage()));
    map.insert("d".into(), json!(task.progress.downloaded()));
    if let Some(t) = task.progress.total() {
        map.insert("t".into(), json!(t));
    }
    map.insert(
        "sp".into(),
        json!(task.progress.speed_bps.load(std::sync::atomic::Ordering::Relaxed)),
    );
    if let Some(e) = task.progress.eta_secs() {
        map.insert("e".into(), json!(e));
    }
    if let Some(err) = &task.last_error {
        map.insert("er".into(), json!(err));
    }
    map.insert("pr".into(), json!(task.priority.code()));
    map.insert("a".into(), json!(unix_secs(task.created_at)));
    map
}
