//! Worker Pool (§4.H): a fixed number of concurrent slots per job kind,
//! each pulling from the Queue, driving one job through the Execution
//! Driver, and writing its terminal state back to the Job Store.

use crate::cancel::{CancelReason, CancellationToken};
use crate::driver::{ExecutionDriver, ExecutionOutcome};
use futures_util::future::BoxFuture;
use relay_db::job_store::{JobStore, JobUpdate};
use relay_dispatch::{NodeManager, Queue, TemplateRegistry};
use relay_ids::JobId;
use relay_protocol::job::{JobKind, JobStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Tracks the cancellation token for every job a slot is currently running,
/// so a client-initiated cancel or a node-failure event can reach it.
#[derive(Clone, Default)]
pub struct InFlightJobs {
    tokens: Arc<RwLock<HashMap<JobId, CancellationToken>>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    async fn track(&self, job_id: JobId, token: CancellationToken) {
        self.tokens.write().await.insert(job_id, token);
    }

    async fn untrack(&self, job_id: &JobId) {
        self.tokens.write().await.remove(job_id);
    }

    /// Used by the `DELETE /jobs/{id}` handler (§4.L).
    pub async fn cancel(&self, job_id: &JobId, reason: CancelReason) -> bool {
        if let Some(token) = self.tokens.read().await.get(job_id) {
            token.cancel(reason);
            true
        } else {
            false
        }
    }

    async fn cancel_all_on_node(&self, job_ids: &[JobId]) {
        let tokens = self.tokens.read().await;
        for job_id in job_ids {
            if let Some(token) = tokens.get(job_id) {
                token.cancel(CancelReason::NodeFailure);
            }
        }
    }
}

pub struct WorkerPool {
    queue: Arc<Queue>,
    job_store: Arc<dyn JobStore>,
    node_manager: Arc<NodeManager>,
    template_registry: Arc<TemplateRegistry>,
    driver: Arc<ExecutionDriver>,
    in_flight: InFlightJobs,
    workers_per_kind: u32,
}

const KINDS: &[JobKind] = &[JobKind::ImageFromText, JobKind::VideoFromImage];

impl WorkerPool {
    pub fn new(
        queue: Arc<Queue>,
        job_store: Arc<dyn JobStore>,
        node_manager: Arc<NodeManager>,
        template_registry: Arc<TemplateRegistry>,
        driver: Arc<ExecutionDriver>,
        workers_per_kind: u32,
    ) -> Self {
        Self {
            queue,
            job_store,
            node_manager,
            template_registry,
            driver,
            in_flight: InFlightJobs::new(),
            workers_per_kind,
        }
    }

    pub fn in_flight(&self) -> InFlightJobs {
        self.in_flight.clone()
    }

    /// Spawns `workers_per_kind` slots for every job kind, plus one task
    /// that cancels in-flight jobs orphaned by a node dropping offline
    /// (§4.D "assignments are released and their jobs cancelled").
    pub fn spawn(self: &Arc<Self>) {
        for &kind in KINDS {
            for slot in 0..self.workers_per_kind {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.run_slot(kind, slot).await });
            }
        }
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.watch_node_failures().await });
    }

    async fn watch_node_failures(self: Arc<Self>) {
        let mut failures = self.node_manager.subscribe_failures();
        loop {
            match failures.recv().await {
                Ok(event) => self.in_flight.cancel_all_on_node(&event.job_ids).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "node failure broadcast lagged, some cancellations may be delayed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// One slot's lifetime loop: park while no node of this kind is online
    /// (so a job with nowhere to run stays `queued` instead of bouncing
    /// through `processing` into a doomed no-node failure), otherwise
    /// dequeue-execute-finalize.
    async fn run_slot(self: Arc<Self>, kind: JobKind, slot: u32) {
        let mut backoff = relay_dispatch::queue::PollBackoff::new(
            std::time::Duration::from_millis(250),
            std::time::Duration::from_secs(10),
        );
        loop {
            if self.node_manager.available_nodes(Some(kind)).await.is_empty() {
                tokio::time::sleep(backoff.next_delay()).await;
                continue;
            }

            let entry = match self.queue.dequeue(kind).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    tokio::time::sleep(backoff.next_delay()).await;
                    continue;
                }
                Err(e) => {
                    error!(kind = ?kind, slot, error = %e, "queue dequeue failed");
                    tokio::time::sleep(backoff.next_delay()).await;
                    continue;
                }
            };
            backoff.reset();

            if let Err(e) = self.run_one(entry.job_id.clone()).await {
                error!(job_id = %entry.job_id, error = %e, "failed to finalize job");
            }
            if let Err(e) = self.queue.ack(&entry).await {
                warn!(job_id = %entry.job_id, error = %e, "queue ack failed");
            }
        }
    }

    async fn run_one(&self, job_id: JobId) -> Result<(), relay_db::error::DbError> {
        let job = self.job_store.read_by_id(&job_id).await?;
        if job.status != JobStatus::Queued {
            // Raced with a cancel or a concurrent rerun; nothing to do.
            return Ok(());
        }

        let template = match self.template_registry.get(&job.workflow_name).await {
            Ok(t) => t,
            Err(e) => {
                self.job_store
                    .update_status(
                        &job_id,
                        JobUpdate::default()
                            .status(JobStatus::Failed)
                            .completed_now()
                            .error(relay_protocol::error::JobError::new(
                                relay_protocol::error::FailureKind::Internal,
                                format!("template `{}` unavailable: {e}", job.workflow_name),
                            )),
                    )
                    .await?;
                return Ok(());
            }
        };

        self.job_store
            .update_status(&job_id, JobUpdate::default().status(JobStatus::Processing).started_now())
            .await?;

        let token = CancellationToken::new();
        self.in_flight.track(job_id.clone(), token.clone()).await;

        let job_store = Arc::clone(&self.job_store);
        let progress_job_id = job_id.clone();
        // Awaited in place by the driver's monitor loop (not detached), so a
        // progress write can never land after the terminal
        // `progress=100, status=completed` write below (§8 "progress=100 iff
        // completed").
        let on_progress = move |fraction: f32| -> BoxFuture<'static, ()> {
            let store = Arc::clone(&job_store);
            let id = progress_job_id.clone();
            let pct = (fraction * 100.0).clamp(0.0, 99.0);
            Box::pin(async move {
                let _ = store.update_status(&id, JobUpdate::default().progress(pct)).await;
            })
        };

        let outcome = self.driver.execute(&job, &template, &token, on_progress).await;
        self.in_flight.untrack(&job_id).await;

        match outcome {
            ExecutionOutcome::Completed(results) => {
                self.job_store.attach_results(&job_id, &results).await?;
                self.job_store
                    .update_status(
                        &job_id,
                        JobUpdate::default().status(JobStatus::Completed).progress(100.0).completed_now(),
                    )
                    .await?;
            }
            ExecutionOutcome::Failed(err) => {
                self.job_store
                    .update_status(
                        &job_id,
                        JobUpdate::default().status(JobStatus::Failed).completed_now().error(err),
                    )
                    .await?;
            }
            ExecutionOutcome::Cancelled => {
                self.job_store
                    .update_status(&job_id, JobUpdate::default().status(JobStatus::Cancelled).completed_now())
                    .await?;
            }
        }

        info!(job_id = %job_id, "job finished");
        Ok(())
    }
}
