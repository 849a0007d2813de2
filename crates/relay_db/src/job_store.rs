//! The durable, two-scope Job Store (§4.F).
//!
//! Every job is written to both `jobs_global` (worker-level queries: list
//! running, lookup by backend-correlation-id) and `jobs_client` (per-client
//! listings ordered by recency). Both rows are written inside one
//! transaction on create and on every status update, so the two scopes
//! never observably diverge within this process — there is no separate
//! replication path to go stale.

use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_ids::{ClientId, JobId, NodeId};
use relay_protocol::error::{FailureKind, JobError};
use relay_protocol::job::{ArtifactLocator, Job, JobKind, JobStatus, SourceTag};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;

/// A partial update to a job's mutable fields (§4.F "updates accept a
/// partial record; any field not in the update is preserved"). `Option<Option<T>>`
/// distinguishes "leave as-is" (`None`) from "explicitly clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f32>,
    pub message: Option<String>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub error: Option<Option<JobError>>,
    pub assigned_node: Option<Option<NodeId>>,
    pub backend_correlation_id: Option<Option<String>>,
    /// True on a rerun: clears the results side table in the same transaction.
    pub clear_results: bool,
}

impl JobUpdate {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Some(Utc::now()));
        self
    }
    pub fn completed_now(mut self) -> Self {
        self.completed_at = Some(Some(Utc::now()));
        self
    }
    pub fn error(mut self, error: JobError) -> Self {
        self.error = Some(Some(error));
        self
    }
    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }
    pub fn assigned_node(mut self, node: Option<NodeId>) -> Self {
        self.assigned_node = Some(node);
        self
    }
    pub fn backend_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.backend_correlation_id = Some(Some(id.into()));
        self
    }
    /// §3 Lifecycles: rerun resets to queued, preserving priority/parameters,
    /// clearing everything else.
    pub fn rerun() -> Self {
        Self {
            status: Some(JobStatus::Queued),
            progress: Some(0.0),
            message: Some(String::new()),
            started_at: Some(None),
            completed_at: Some(None),
            error: Some(None),
            assigned_node: Some(None),
            backend_correlation_id: Some(None),
            clear_results: true,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), DbError>;
    async fn read_by_id(&self, id: &JobId) -> Result<Job, DbError>;
    async fn update_status(&self, id: &JobId, update: JobUpdate) -> Result<(), DbError>;
    async fn list_by_owner(&self, owner: &ClientId) -> Result<Vec<Job>, DbError>;
    async fn list_running(&self) -> Result<Vec<Job>, DbError>;
    async fn attach_results(&self, id: &JobId, results: &[ArtifactLocator]) -> Result<(), DbError>;
    async fn delete(&self, id: &JobId) -> Result<(), DbError>;
}

/// SQLite-backed implementation (§10.2: library crate, typed errors, no
/// stringly-typed failures escape this module).
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.initialize_tables().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn initialize_tables(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs_global (
                numeric_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL UNIQUE,
                backend_correlation_id TEXT,
                kind TEXT NOT NULL,
                owner TEXT NOT NULL,
                source TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL,
                error_json TEXT,
                assigned_node TEXT,
                priority INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_global_status ON jobs_global(status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_global_correlation ON jobs_global(backend_correlation_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs_client (
                job_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                kind TEXT NOT NULL,
                source TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL,
                error_json TEXT,
                assigned_node TEXT,
                priority INTEGER NOT NULL,
                backend_correlation_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_client_owner ON jobs_client(owner, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_params (
                numeric_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value_json TEXT NOT NULL,
                PRIMARY KEY (numeric_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_results (
                numeric_id INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                locator_json TEXT NOT NULL,
                PRIMARY KEY (numeric_id, idx)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn numeric_id_of(&self, id: &JobId) -> Result<i64, DbError> {
        let row = sqlx::query("SELECT numeric_id FROM jobs_global WHERE job_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::JobNotFound(id.to_string()))?;
        Ok(row.try_get::<i64, _>("numeric_id")?)
    }

    async fn row_to_job(
        &self,
        numeric_id: i64,
        job_id: String,
        backend_correlation_id: Option<String>,
        kind: String,
        owner: String,
        source: String,
        workflow_name: String,
        status: String,
        progress: f64,
        message: String,
        created_at: String,
        started_at: Option<String>,
        completed_at: Option<String>,
        updated_at: String,
        error_json: Option<String>,
        assigned_node: Option<String>,
        priority: i64,
    ) -> Result<Job, DbError> {
        let params_rows = sqlx::query("SELECT key, value_json FROM job_params WHERE numeric_id = ?")
            .bind(numeric_id)
            .fetch_all(&self.pool)
            .await?;
        let mut parameters = BTreeMap::new();
        for row in params_rows {
            let key: String = row.try_get("key")?;
            let value_json: String = row.try_get("value_json")?;
            let value: serde_json::Value = serde_json::from_str(&value_json)
                .map_err(|e| DbError::Corrupt(format!("param {key}: {e}")))?;
            parameters.insert(key, value);
        }

        let result_rows =
            sqlx::query("SELECT locator_json FROM job_results WHERE numeric_id = ? ORDER BY idx ASC")
                .bind(numeric_id)
                .fetch_all(&self.pool)
                .await?;
        let mut results = Vec::with_capacity(result_rows.len());
        for row in result_rows {
            let locator_json: String = row.try_get("locator_json")?;
            let locator: ArtifactLocator = serde_json::from_str(&locator_json)
                .map_err(|e| DbError::Corrupt(format!("result locator: {e}")))?;
            results.push(locator);
        }

        Ok(Job {
            id: JobId::parse(&job_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            backend_correlation_id,
            kind: parse_kind(&kind)?,
            owner: ClientId::parse(&owner).map_err(|e| DbError::Corrupt(e.to_string()))?,
            source: parse_source(&source)?,
            workflow_name,
            parameters,
            status: parse_status(&status)?,
            progress: progress as f32,
            message,
            created_at: parse_timestamp(&created_at)?,
            started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
            updated_at: parse_timestamp(&updated_at)?,
            error: error_json
                .as_deref()
                .map(|s| {
                    serde_json::from_str(s).map_err(|e| DbError::Corrupt(format!("error: {e}")))
                })
                .transpose()?,
            results,
            assigned_node: assigned_node
                .map(|s| NodeId::new(s).map_err(|e| DbError::Corrupt(e.to_string())))
                .transpose()?,
            priority: priority as i32,
        })
    }
}

fn parse_kind(s: &str) -> Result<JobKind, DbError> {
    match s {
        "image-from-text" => Ok(JobKind::ImageFromText),
        "video-from-image" => Ok(JobKind::VideoFromImage),
        other => Err(DbError::Corrupt(format!("unknown job kind `{other}`"))),
    }
}

fn parse_source(s: &str) -> Result<SourceTag, DbError> {
    match s {
        "client" => Ok(SourceTag::Client),
        "system" => Ok(SourceTag::System),
        other => Err(DbError::Corrupt(format!("unknown source tag `{other}`"))),
    }
}

fn parse_status(s: &str) -> Result<JobStatus, DbError> {
    match s {
        "queued" => Ok(JobStatus::Queued),
        "processing" => Ok(JobStatus::Processing),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        other => Err(DbError::Corrupt(format!("unknown job status `{other}`"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("timestamp `{s}`: {e}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &Job) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let error_json = job
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Corrupt(e.to_string()))?;

        let numeric_id: i64 = sqlx::query(
            r#"
            INSERT INTO jobs_global
                (job_id, backend_correlation_id, kind, owner, source, workflow_name, status,
                 progress, message, created_at, started_at, completed_at, updated_at,
                 error_json, assigned_node, priority)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.backend_correlation_id)
        .bind(job.kind.as_str())
        .bind(job.owner.as_str())
        .bind(source_str(job.source))
        .bind(&job.workflow_name)
        .bind(job.status.as_str())
        .bind(job.progress as f64)
        .bind(&job.message)
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(job.updated_at.to_rfc3339())
        .bind(&error_json)
        .bind(job.assigned_node.as_ref().map(|n| n.as_str().to_string()))
        .bind(job.priority as i64)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO jobs_client
                (job_id, owner, kind, source, workflow_name, status, progress, message,
                 created_at, started_at, completed_at, updated_at, error_json, assigned_node,
                 priority, backend_correlation_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.owner.as_str())
        .bind(job.kind.as_str())
        .bind(source_str(job.source))
        .bind(&job.workflow_name)
        .bind(job.status.as_str())
        .bind(job.progress as f64)
        .bind(&job.message)
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(job.updated_at.to_rfc3339())
        .bind(&error_json)
        .bind(job.assigned_node.as_ref().map(|n| n.as_str().to_string()))
        .bind(job.priority as i64)
        .bind(&job.backend_correlation_id)
        .execute(&mut *tx)
        .await?;

        for (key, value) in &job.parameters {
            let value_json =
                serde_json::to_string(value).map_err(|e| DbError::Corrupt(e.to_string()))?;
            sqlx::query(
                "INSERT INTO job_params (numeric_id, key, value_json) VALUES (?, ?, ?)",
            )
            .bind(numeric_id)
            .bind(key)
            .bind(value_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn read_by_id(&self, id: &JobId) -> Result<Job, DbError> {
        // "reads are satisfied preferentially from global-scope, falling back
        // to client-scope" (§4.F) — both rows always exist post-create, but
        // the fallback keeps the contract honest if they ever diverge.
        let row = sqlx::query(
            r#"SELECT numeric_id, job_id, backend_correlation_id, kind, owner, source,
                      workflow_name, status, progress, message, created_at, started_at,
                      completed_at, updated_at, error_json, assigned_node, priority
               FROM jobs_global WHERE job_id = ?"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                return Err(DbError::JobNotFound(id.to_string()));
            }
        };

        self.row_to_job(
            row.try_get("numeric_id")?,
            row.try_get("job_id")?,
            row.try_get("backend_correlation_id")?,
            row.try_get("kind")?,
            row.try_get("owner")?,
            row.try_get("source")?,
            row.try_get("workflow_name")?,
            row.try_get("status")?,
            row.try_get("progress")?,
            row.try_get("message")?,
            row.try_get("created_at")?,
            row.try_get("started_at")?,
            row.try_get("completed_at")?,
            row.try_get("updated_at")?,
            row.try_get("error_json")?,
            row.try_get("assigned_node")?,
            row.try_get("priority")?,
        )
        .await
    }

    async fn update_status(&self, id: &JobId, update: JobUpdate) -> Result<(), DbError> {
        let numeric_id = self.numeric_id_of(id).await?;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        macro_rules! apply {
            ($table:expr) => {{
                if let Some(status) = update.status {
                    sqlx::query(&format!("UPDATE {} SET status = ? WHERE job_id = ?", $table))
                        .bind(status.as_str())
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(progress) = update.progress {
                    sqlx::query(&format!("UPDATE {} SET progress = ? WHERE job_id = ?", $table))
                        .bind(progress as f64)
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(ref message) = update.message {
                    sqlx::query(&format!("UPDATE {} SET message = ? WHERE job_id = ?", $table))
                        .bind(message)
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(started_at) = update.started_at {
                    sqlx::query(&format!("UPDATE {} SET started_at = ? WHERE job_id = ?", $table))
                        .bind(started_at.map(|t| t.to_rfc3339()))
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(completed_at) = update.completed_at {
                    sqlx::query(&format!("UPDATE {} SET completed_at = ? WHERE job_id = ?", $table))
                        .bind(completed_at.map(|t| t.to_rfc3339()))
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(ref error) = update.error {
                    let error_json = error
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()
                        .map_err(|e| DbError::Corrupt(e.to_string()))?;
                    sqlx::query(&format!("UPDATE {} SET error_json = ? WHERE job_id = ?", $table))
                        .bind(error_json)
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(ref assigned_node) = update.assigned_node {
                    sqlx::query(&format!("UPDATE {} SET assigned_node = ? WHERE job_id = ?", $table))
                        .bind(assigned_node.as_ref().map(|n| n.as_str().to_string()))
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                if let Some(ref bcid) = update.backend_correlation_id {
                    sqlx::query(&format!(
                        "UPDATE {} SET backend_correlation_id = ? WHERE job_id = ?",
                        $table
                    ))
                    .bind(bcid)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
                sqlx::query(&format!("UPDATE {} SET updated_at = ? WHERE job_id = ?", $table))
                    .bind(&now)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
            }};
        }

        apply!("jobs_global");
        apply!("jobs_client");

        if update.clear_results {
            sqlx::query("DELETE FROM job_results WHERE numeric_id = ?")
                .bind(numeric_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: &ClientId) -> Result<Vec<Job>, DbError> {
        let rows = sqlx::query(
            r#"SELECT j.job_id FROM jobs_client j WHERE j.owner = ? ORDER BY j.created_at DESC"#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: String = row.try_get("job_id")?;
            let id = JobId::parse(&job_id).map_err(|e| DbError::Corrupt(e.to_string()))?;
            jobs.push(self.read_by_id(&id).await?);
        }
        Ok(jobs)
    }

    async fn list_running(&self) -> Result<Vec<Job>, DbError> {
        let rows = sqlx::query("SELECT job_id FROM jobs_global WHERE status = 'processing'")
            .fetch_all(&self.pool)
            .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: String = row.try_get("job_id")?;
            let id = JobId::parse(&job_id).map_err(|e| DbError::Corrupt(e.to_string()))?;
            jobs.push(self.read_by_id(&id).await?);
        }
        Ok(jobs)
    }

    async fn attach_results(&self, id: &JobId, results: &[ArtifactLocator]) -> Result<(), DbError> {
        let numeric_id = self.numeric_id_of(id).await?;
        let mut tx = self.pool.begin().await?;
        // Idempotent on retry: a full replace means attaching the same list
        // twice (at-least-once harvest) leaves identical rows (§9).
        sqlx::query("DELETE FROM job_results WHERE numeric_id = ?")
            .bind(numeric_id)
            .execute(&mut *tx)
            .await?;
        for (idx, locator) in results.iter().enumerate() {
            let locator_json =
                serde_json::to_string(locator).map_err(|e| DbError::Corrupt(e.to_string()))?;
            sqlx::query(
                "INSERT INTO job_results (numeric_id, idx, locator_json) VALUES (?, ?, ?)",
            )
            .bind(numeric_id)
            .bind(idx as i64)
            .bind(locator_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<(), DbError> {
        let numeric_id = self.numeric_id_of(id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM job_params WHERE numeric_id = ?")
            .bind(numeric_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM job_results WHERE numeric_id = ?")
            .bind(numeric_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobs_global WHERE job_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobs_client WHERE job_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn source_str(source: SourceTag) -> &'static str {
    match source {
        SourceTag::Client => "client",
        SourceTag::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::error::FailureKind;
    use std::collections::BTreeMap;

    async fn store() -> SqliteJobStore {
        SqliteJobStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_job() -> Job {
        Job::new_queued(
            JobKind::ImageFromText,
            ClientId::new(),
            "sd_basic",
            BTreeMap::from([("width".to_string(), serde_json::json!(512))]),
            3,
        )
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let store = store().await;
        let job = sample_job();
        store.create(&job).await.unwrap();

        let read = store.read_by_id(&job.id).await.unwrap();
        assert_eq!(read.id, job.id);
        assert_eq!(read.priority, 3);
        assert_eq!(read.parameters.get("width"), Some(&serde_json::json!(512)));
    }

    #[tokio::test]
    async fn list_by_owner_returns_only_that_owners_jobs() {
        let store = store().await;
        let job_a = sample_job();
        let owner_a = job_a.owner.clone();
        store.create(&job_a).await.unwrap();
        store.create(&sample_job()).await.unwrap();

        let jobs = store.list_by_owner(&owner_a).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_a.id);
    }

    #[tokio::test]
    async fn update_status_preserves_unset_fields() {
        let store = store().await;
        let job = sample_job();
        store.create(&job).await.unwrap();

        store
            .update_status(&job.id, JobUpdate::default().status(JobStatus::Processing).progress(10.0))
            .await
            .unwrap();

        let read = store.read_by_id(&job.id).await.unwrap();
        assert_eq!(read.status, JobStatus::Processing);
        assert_eq!(read.progress, 10.0);
        assert_eq!(read.parameters.get("width"), Some(&serde_json::json!(512)));
        assert_eq!(read.priority, 3);
    }

    #[tokio::test]
    async fn attach_results_is_idempotent_under_retry() {
        let store = store().await;
        let job = sample_job();
        store.create(&job).await.unwrap();

        let results = vec![ArtifactLocator::Local {
            path: "/out/1.png".to_string(),
        }];
        store.attach_results(&job.id, &results).await.unwrap();
        store.attach_results(&job.id, &results).await.unwrap();

        let read = store.read_by_id(&job.id).await.unwrap();
        assert_eq!(read.results.len(), 1);
    }

    #[tokio::test]
    async fn rerun_clears_error_and_results_but_keeps_parameters() {
        let store = store().await;
        let job = sample_job();
        store.create(&job).await.unwrap();
        store
            .update_status(
                &job.id,
                JobUpdate::default()
                    .status(JobStatus::Failed)
                    .error(JobError::new(FailureKind::Transport, "boom")),
            )
            .await
            .unwrap();
        store
            .attach_results(&job.id, &[])
            .await
            .unwrap();

        store.update_status(&job.id, JobUpdate::rerun()).await.unwrap();

        let read = store.read_by_id(&job.id).await.unwrap();
        assert_eq!(read.status, JobStatus::Queued);
        assert!(read.error.is_none());
        assert!(read.results.is_empty());
        assert_eq!(read.parameters.get("width"), Some(&serde_json::json!(512)));
    }

    #[tokio::test]
    async fn delete_removes_params_and_results() {
        let store = store().await;
        let job = sample_job();
        store.create(&job).await.unwrap();
        store
            .attach_results(
                &job.id,
                &[ArtifactLocator::Local {
                    path: "/out/1.png".to_string(),
                }],
            )
            .await
            .unwrap();

        store.delete(&job.id).await.unwrap();
        assert!(matches!(
            store.read_by_id(&job.id).await,
            Err(DbError::JobNotFound(_))
        ));
    }
}
