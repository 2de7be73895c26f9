//! SQLite-backed durable mirror of every task: XDG state dir, `sqlx`
//! connection pool, migration on open, opaque string task ids and the
//! full task state space.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;

use super::types::MirrorRow;
use crate::task::{from_unix_secs, unix_secs, Priority, Task, TaskId, TaskState};

/// Handle to the SQLite-backed durable mirror.
///
/// The database file lives under the XDG state directory:
/// `~/.local/state/ddm/tasks.db` on Debian.
#[derive(Clone)]
pub struct TaskStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl TaskStore {
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        let db_path = state_dir.join("tasks.db");
        Self::open_path(&db_path).await
    }

    pub async fn open_path(db_path: &std::path::Path) -> Result<Self> {
        let uri = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&uri).await?;
        let store = TaskStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Shared connection pool, reused by [`crate::facade::JobFacade`] for its
    /// own job-id mapping table so the two stay in one database file.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                filename TEXT NOT NULL,
                destination TEXT NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                state TEXT NOT NULL,
                downloaded INTEGER NOT NULL DEFAULT 0,
                total INTEGER,
                category TEXT,
                group_name TEXT,
                priority TEXT NOT NULL DEFAULT 'normal',
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                wait_until INTEGER,
                last_error TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a brand-new row.
    pub async fn insert(&self, row: &MirrorRow) -> Result<()> {
        let headers_json = serde_json::to_string(&row.headers)?;
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, url, filename, destination, headers, state, downloaded, total,
                 category, group_name, priority, created_at, retry_count,
                 wait_until, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&row.id)
        .bind(&row.url)
        .bind(&row.filename)
        .bind(row.destination.to_string_lossy().to_string())
        .bind(headers_json)
        .bind(row.state.as_str())
        .bind(row.downloaded as i64)
        .bind(row.total.map(|t| t as i64))
        .bind(&row.category)
        .bind(&row.group)
        .bind(row.priority.as_str())
        .bind(unix_secs(row.created_at))
        .bind(row.retry_count as i64)
        .bind(row.wait_until.map(unix_secs))
        .bind(&row.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rewrites the full row. Called on every state transition and on a
    /// fixed cadence for active tasks.
    pub async fn upsert(&self, row: &MirrorRow) -> Result<()> {
        let headers_json = serde_json::to_string(&row.headers)?;
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, url, filename, destination, headers, state, downloaded, total,
                 category, group_name, priority, created_at, retry_count,
                 wait_until, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                downloaded = excluded.downloaded,
                total = excluded.total,
                priority = excluded.priority,
                retry_count = excluded.retry_count,
                wait_until = excluded.wait_until,
                last_error = excluded.last_error
            "#,
        )
        .bind(&row.id)
        .bind(&row.url)
        .bind(&row.filename)
        .bind(row.destination.to_string_lossy().to_string())
        .bind(headers_json)
        .bind(row.state.as_str())
        .bind(row.downloaded as i64)
        .bind(row.total.map(|t| t as i64))
        .bind(&row.category)
        .bind(&row.group)
        .bind(row.priority.as_str())
        .bind(unix_secs(row.created_at))
        .bind(row.retry_count as i64)
        .bind(row.wait_until.map(unix_secs))
        .bind(&row.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<MirrorRow>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(row_to_mirror))
    }

    pub async fn list(&self) -> Result<Vec<MirrorRow>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at DESC").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_mirror).collect())
    }

    /// Deletions happen only on explicit user delete.
    pub async fn delete(&self, id: &TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_mirror(row: sqlx::sqlite::SqliteRow) -> MirrorRow {
    let id: String = row.get("id");
    let url: String = row.get("url");
    let filename: String = row.get("filename");
    let destination: String = row.get("destination");
    let headers_json: String = row.get("headers");
    let headers: HashMap<String, String> = serde_json::from_str(&headers_json).unwrap_or_default();
    let state_str: String = row.get("state");
    let downloaded: i64 = row.get("downloaded");
    let total: Option<i64> = row.get("total");
    let category: Option<String> = row.get("category");
    let group: Option<String> = row.get("group_name");
    let priority_str: String = row.get("priority");
    let created_at: i64 = row.get("created_at");
    let retry_count: i64 = row.get("retry_count");
    let wait_until: Option<i64> = row.get("wait_until");
    let last_error: Option<String> = row.get("last_error");

    MirrorRow {
        id,
        url,
        filename,
        destination: destination.into(),
        state: TaskState::from_str(&state_str),
        downloaded: downloaded.max(0) as u64,
        total: total.map(|t| t.max(0) as u64),
        category,
        group,
        priority: Priority::from_str(&priority_str),
        created_at: from_unix_secs(created_at),
        retry_count: retry_count.max(0) as u32,
        wait_until: wait_until.map(from_unix_secs),
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    async fn temp_store() -> (TaskStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open_path(&dir.path().join("tasks.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let (store, _dir) = temp_store().await;
        let task = Task::new("https://x/f".into(), "f".into(), "/tmp/f".into(), HashMap::new(), None, None, Priority::High);
        let row = MirrorRow::from(&task);
        store.insert(&row).await.unwrap();
        let fetched = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.priority, Priority::High);
        assert_eq!(fetched.state, TaskState::Queued);
    }

    #[tokio::test]
    async fn upsert_updates_mutable_fields_only() {
        let (store, _dir) = temp_store().await;
        let mut task = Task::new("https://x/f".into(), "f".into(), "/tmp/f".into(), HashMap::new(), None, None, Priority::Normal);
        store.insert(&MirrorRow::from(&task)).await.unwrap();

        task.state = TaskState::Downloading;
        task.progress.add_downloaded(500);
        store.upsert(&MirrorRow::from(&task)).await.unwrap();

        let fetched = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::Downloading);
        assert_eq!(fetched.downloaded, 500);
        assert_eq!(fetched.url, "https://x/f");
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let (store, _dir) = temp_store().await;
        let task = Task::new("https://x/f".into(), "f".into(), "/tmp/f".into(), HashMap::new(), None, None, Priority::Normal);
        store.insert(&MirrorRow::from(&task)).await.unwrap();
        store.delete(&task.id).await.unwrap();
        assert!(store.get(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let (store, _dir) = temp_store().await;
        let t1 = Task::new("https://x/a".into(), "a".into(), "/tmp/a".into(), HashMap::new(), None, None, Priority::Normal);
        store.insert(&MirrorRow::from(&t1)).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
