//! Queue (§4.G): a durable FIFO-with-priority of pending job executions,
//! partitioned by job-kind. Backed by SQLite when reachable; falls back to
//! an in-process, restart-volatile queue ("degraded mode") when it isn't.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_ids::JobId;
use relay_protocol::job::JobKind;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// One pending dispatch (§4.G "the producer enqueues `{job-id, kind,
/// parameters}`"; the parameter map itself lives in the Job Store, so only
/// the identity and dispatch-relevant fields travel through the queue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub job_id: JobId,
    pub kind: JobKind,
    pub priority: i32,
}

#[async_trait]
trait QueueBackend: Send + Sync {
    async fn enqueue(&self, job_id: &JobId, kind: JobKind, priority: i32) -> Result<(), QueueError>;
    async fn dequeue(&self, kind: JobKind) -> Result<Option<QueueEntry>, QueueError>;
    async fn ack(&self, entry_id: i64) -> Result<(), QueueError>;
    async fn depth(&self, kind: JobKind) -> Result<usize, QueueError>;
}

fn kind_str(kind: JobKind) -> &'static str {
    match kind {
        JobKind::ImageFromText => "image_from_text",
        JobKind::VideoFromImage => "video_from_image",
    }
}

struct SqliteBackend {
    pool: SqlitePool,
    // SQLite write concurrency is poor under contention; a local mutex keeps
    // the select-then-update dequeue sequence atomic without requiring
    // `SELECT ... FOR UPDATE SKIP LOCKED`, which SQLite has no equivalent of.
    dequeue_lock: Mutex<()>,
}

impl SqliteBackend {
    async fn new(pool: SqlitePool) -> Result<Self, QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                priority INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL,
                acked INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_pending ON queue_entries(kind, acked, priority DESC, id ASC)")
            .execute(&pool)
            .await?;
        Ok(Self { pool, dequeue_lock: Mutex::new(()) })
    }
}

#[async_trait]
impl QueueBackend for SqliteBackend {
    async fn enqueue(&self, job_id: &JobId, kind: JobKind, priority: i32) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO queue_entries (job_id, kind, priority, enqueued_at, acked) VALUES (?, ?, ?, ?, 0)")
            .bind(job_id.as_str())
            .bind(kind_str(kind))
            .bind(priority)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, kind: JobKind) -> Result<Option<QueueEntry>, QueueError> {
        let _guard = self.dequeue_lock.lock().await;
        let row = sqlx::query(
            "SELECT id, job_id, priority FROM queue_entries WHERE kind = ? AND acked = 0 ORDER BY priority DESC, id ASC LIMIT 1",
        )
        .bind(kind_str(kind))
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.try_get("id")?;
        let job_id: String = row.try_get("job_id")?;
        let priority: i32 = row.try_get("priority")?;
        sqlx::query("UPDATE queue_entries SET acked = 1 WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(Some(QueueEntry {
            id,
            job_id: JobId::parse(&job_id).unwrap_or_else(|_| JobId::new()),
            kind,
            priority,
        }))
    }

    async fn ack(&self, _entry_id: i64) -> Result<(), QueueError> {
        // dequeue already marks the row acked (claimed); a later explicit ack
        // after terminal status is a no-op against this table on purpose,
        // since re-delivery is keyed off `acked`, not off worker completion.
        Ok(())
    }

    async fn depth(&self, kind: JobKind) -> Result<usize, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM queue_entries WHERE kind = ? AND acked = 0")
            .bind(kind_str(kind))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("c")? as usize)
    }
}

#[derive(Eq, PartialEq)]
struct HeapItem {
    priority: i32,
    seq: u64,
    entry: QueueEntry,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on priority; within equal priority, lower seq (older) first.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct InProcessBackend {
    partitions: Mutex<HashMap<&'static str, BinaryHeap<HeapItem>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl InProcessBackend {
    fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl QueueBackend for InProcessBackend {
    async fn enqueue(&self, job_id: &JobId, kind: JobKind, priority: i32) -> Result<(), QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as i64;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = QueueEntry { id, job_id: job_id.clone(), kind, priority };
        let mut partitions = self.partitions.lock().await;
        partitions.entry(kind_str(kind)).or_default().push(HeapItem { priority, seq, entry });
        Ok(())
    }

    async fn dequeue(&self, kind: JobKind) -> Result<Option<QueueEntry>, QueueError> {
        let mut partitions = self.partitions.lock().await;
        Ok(partitions.get_mut(kind_str(kind)).and_then(|heap| heap.pop()).map(|item| item.entry))
    }

    async fn ack(&self, _entry_id: i64) -> Result<(), QueueError> {
        Ok(())
    }

    async fn depth(&self, kind: JobKind) -> Result<usize, QueueError> {
        let partitions = self.partitions.lock().await;
        Ok(partitions.get(kind_str(kind)).map(|h| h.len()).unwrap_or(0))
    }
}

/// The Queue facade: tries the durable backend first, falls back to the
/// in-process backend and latches there once a durable-backend error is
/// observed (§4.G degraded mode: "logged prominently; the API still accepts
/// submissions").
pub struct Queue {
    durable: Option<Arc<SqliteBackend>>,
    fallback: Arc<InProcessBackend>,
    degraded: AtomicBool,
}

impl Queue {
    pub async fn connect(database_url: &str) -> Self {
        match SqlitePool::connect(database_url).await {
            Ok(pool) => match SqliteBackend::new(pool).await {
                Ok(backend) => {
                    return Self {
                        durable: Some(Arc::new(backend)),
                        fallback: Arc::new(InProcessBackend::new()),
                        degraded: AtomicBool::new(false),
                    };
                }
                Err(e) => error!(error = %e, "queue durable backend failed to initialize tables"),
            },
            Err(e) => error!(error = %e, "queue durable backend unreachable at startup"),
        }
        Self::in_process_only()
    }

    pub fn in_process_only() -> Self {
        warn!("queue operating in degraded (in-process, non-durable) mode");
        Self { durable: None, fallback: Arc::new(InProcessBackend::new()), degraded: AtomicBool::new(true) }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn active_durable(&self) -> Option<&SqliteBackend> {
        if self.degraded.load(Ordering::Relaxed) {
            None
        } else {
            self.durable.as_deref()
        }
    }

    pub async fn enqueue(&self, job_id: &JobId, kind: JobKind, priority: i32) -> Result<(), QueueError> {
        if let Some(backend) = self.active_durable() {
            if let Err(e) = backend.enqueue(job_id, kind, priority).await {
                error!(error = %e, "durable enqueue failed, falling back to in-process queue");
                self.degraded.store(true, Ordering::Relaxed);
                return self.fallback.enqueue(job_id, kind, priority).await;
            }
            return Ok(());
        }
        self.fallback.enqueue(job_id, kind, priority).await
    }

    pub async fn dequeue(&self, kind: JobKind) -> Result<Option<QueueEntry>, QueueError> {
        if let Some(backend) = self.active_durable() {
            return match backend.dequeue(kind).await {
                Ok(entry) => Ok(entry),
                Err(e) => {
                    error!(error = %e, "durable dequeue failed, falling back to in-process queue");
                    self.degraded.store(true, Ordering::Relaxed);
                    self.fallback.dequeue(kind).await
                }
            };
        }
        self.fallback.dequeue(kind).await
    }

    pub async fn ack(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        if let Some(backend) = self.active_durable() {
            return backend.ack(entry.id).await;
        }
        self.fallback.ack(entry.id).await
    }

    pub async fn depth(&self, kind: JobKind) -> Result<usize, QueueError> {
        if let Some(backend) = self.active_durable() {
            return backend.depth(kind).await;
        }
        self.fallback.depth(kind).await
    }
}

/// Exponential backoff for an idle worker polling an empty partition
/// (§4.H "sleeps with exponential backoff ... a successfully dispatched job
/// resets the backoff").
pub struct PollBackoff {
    base: std::time::Duration,
    cap: std::time::Duration,
    attempt: u32,
}

impl PollBackoff {
    pub fn new(base: std::time::Duration, cap: std::time::Duration) -> Self {
        Self { base, cap, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Next delay, with jitter in `[0.5x, 1.5x)` of the doubled base.
    pub fn next_delay(&mut self) -> std::time::Duration {
        let multiplier = 1u64 << self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let nominal = self.base.saturating_mul(multiplier as u32).min(self.cap);
        let jitter = 0.5 + rand::random::<f64>();
        nominal.mul_f64(jitter).min(self.cap)
    }
}

#[allow(unused)]
fn _suppress_unused(_: DateTime<Utc>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn durable_queue_respects_priority_then_fifo() {
        let queue = Queue::connect("sqlite::memory:").await;
        assert!(!queue.is_degraded());

        let low = JobId::new();
        let high_first = JobId::new();
        let high_second = JobId::new();
        queue.enqueue(&low, JobKind::ImageFromText, 0).await.unwrap();
        queue.enqueue(&high_first, JobKind::ImageFromText, 5).await.unwrap();
        queue.enqueue(&high_second, JobKind::ImageFromText, 5).await.unwrap();

        let first = queue.dequeue(JobKind::ImageFromText).await.unwrap().unwrap();
        assert_eq!(first.job_id, high_first);
        let second = queue.dequeue(JobKind::ImageFromText).await.unwrap().unwrap();
        assert_eq!(second.job_id, high_second);
        let third = queue.dequeue(JobKind::ImageFromText).await.unwrap().unwrap();
        assert_eq!(third.job_id, low);
    }

    #[tokio::test]
    async fn partitions_are_independent_by_kind() {
        let queue = Queue::connect("sqlite::memory:").await;
        let image_job = JobId::new();
        queue.enqueue(&image_job, JobKind::ImageFromText, 0).await.unwrap();
        assert!(queue.dequeue(JobKind::VideoFromImage).await.unwrap().is_none());
        assert!(queue.dequeue(JobKind::ImageFromText).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn in_process_fallback_behaves_like_the_durable_queue() {
        let queue = Queue::in_process_only();
        assert!(queue.is_degraded());
        let job = JobId::new();
        queue.enqueue(&job, JobKind::ImageFromText, 1).await.unwrap();
        let entry = queue.dequeue(JobKind::ImageFromText).await.unwrap().unwrap();
        assert_eq!(entry.job_id, job);
    }

    #[tokio::test]
    async fn depth_reflects_pending_not_dequeued_entries() {
        let queue = Queue::connect("sqlite::memory:").await;
        queue.enqueue(&JobId::new(), JobKind::ImageFromText, 0).await.unwrap();
        queue.enqueue(&JobId::new(), JobKind::ImageFromText, 0).await.unwrap();
        assert_eq!(queue.depth(JobKind::ImageFromText).await.unwrap(), 2);
        queue.dequeue(JobKind::ImageFromText).await.unwrap();
        assert_eq!(queue.depth(JobKind::ImageFromText).await.unwrap(), 1);
    }

    #[test]
    fn poll_backoff_grows_and_resets() {
        let mut backoff = PollBackoff::new(std::time::Duration::from_millis(100), std::time::Duration::from_secs(5));
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert!(second >= first / 2);
        backoff.reset();
        assert_eq!(backoff.attempt, 0);
    }
}
