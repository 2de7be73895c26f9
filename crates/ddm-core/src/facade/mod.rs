//! Job facade: the integer job-id surface the CLI presents (`ddm pause 3`),
//! layered over `engine::DownloadEngine`'s opaque string task ids. Jobs are
//! addressed by a small auto-incrementing integer so command-line users
//! never have to type a task id; the mapping lives alongside the task
//! mirror in the same database file.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};

use crate::engine::{DownloadEngine, EngineStats, SubmitRequest, TaskFilter};
use crate::task::{Priority, TaskId, TaskSnapshot};

/// A task snapshot tagged with the integer id the CLI addresses it by.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: i64,
    pub task: TaskSnapshot,
}

pub struct JobFacade {
    engine: Arc<DownloadEngine>,
    pool: Pool<Sqlite>,
}

impl JobFacade {
    /// `pool` is expected to be [`crate::store::TaskStore::pool`]: the
    /// mapping table lives in the same database file as the task mirror.
    pub async fn new(engine: Arc<DownloadEngine>, pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_map (
                job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(JobFacade { engine, pool })
    }

    async fn map_new(&self, task_id: &TaskId) -> Result<i64> {
        let row = sqlx::query("INSERT INTO job_map (task_id) VALUES (?1) RETURNING job_id")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("job_id"))
    }

    /// Resolves a job id to its task id, failing with a message the CLI can
    /// print directly ("no task mapped to job N").
    pub async fn task_id_for(&self, job_id: i64) -> Result<TaskId> {
        let row = sqlx::query("SELECT task_id FROM job_map WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .with_context(|| format!("no task mapped to job {job_id}"))?;
        Ok(row.get::<String, _>("task_id"))
    }

    pub async fn job_id_for(&self, task_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT job_id FROM job_map WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("job_id")))
    }

    pub async fn submit(&self, req: SubmitRequest) -> Result<i64> {
        let task_id = self.engine.submit(req).await?;
        self.map_new(&task_id).await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobSnapshot>> {
        let task_id = self.task_id_for(job_id).await?;
        Ok(self.engine.get_task(&task_id).map(|task| JobSnapshot { job_id, task }))
    }

    /// Lists every mapped job matching `filter`, in job-id order (the order
    /// CLI has always listed jobs in).
    pub async fn list_jobs(&self, filter: &TaskFilter) -> Result<Vec<JobSnapshot>> {
        let rows = sqlx::query("SELECT job_id, task_id FROM job_map ORDER BY job_id")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: i64 = row.get("job_id");
            let task_id: String = row.get("task_id");
            if let Some(task) = self.engine.get_task(&task_id) {
                if filter.matches_state(task.state)
                    && filter.matches_category(task.category.as_deref())
                    && filter.matches_group(task.group.as_deref())
                {
                    out.push(JobSnapshot { job_id, task });
                }
            }
        }
        Ok(out)
    }

    pub fn get_stats(&self) -> EngineStats {
        self.engine.get_stats()
    }

    pub async fn pause(&self, job_id: i64) -> Result<()> {
        let task_id = self.task_id_for(job_id).await?;
        self.engine.pause(&task_id).await
    }

    pub async fn resume(&self, job_id: i64) -> Result<()> {
        let task_id = self.task_id_for(job_id).await?;
        self.engine.resume(&task_id).await
    }

    pub async fn cancel(&self, job_id: i64) -> Result<()> {
        let task_id = self.task_id_for(job_id).await?;
        self.engine.cancel(&task_id).await
    }

    pub async fn retry(&self, job_id: i64) -> Result<()> {
        let task_id = self.task_id_for(job_id).await?;
        self.engine.retry(&task_id).await
    }

    /// Deletes the task from the engine and drops the job-id mapping itself.
    pub async fn delete(&self, job_id: i64) -> Result<()> {
        let task_id = self.task_id_for(job_id).await?;
        self.engine.delete(&task_id).await?;
        sqlx::query("DELETE FROM job_map WHERE job_id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_priority(&self, job_id: i64, priority: Priority) -> Result<()> {
        let task_id = self.task_id_for(job_id).await?;
        self.engine.set_priority(&task_id, priority).await
    }
}
