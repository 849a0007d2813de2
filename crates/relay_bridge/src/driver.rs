//! Execution Driver (§4.J): the per-job state machine run by one Worker
//! Pool slot. Resolves parameters, picks a node, submits the graph,
//! monitors the run, harvests results, and always releases the node's
//! assignment slot before returning.

use crate::cancel::{CancelReason, CancellationToken};
use crate::client::{NodeClient, NodeClientError};
use crate::monitor::{self, MonitorOutcome};
use futures_util::future::BoxFuture;
use relay_db::uploads::UploadRegistry;
use relay_dispatch::queue::PollBackoff;
use relay_dispatch::{LoadBalancer, NodeManager};
use relay_protocol::error::{FailureKind, JobError};
use relay_protocol::job::{ArtifactLocator, Job, JobKind};
use relay_protocol::node::Node;
use relay_protocol::node_protocol::FileDownloadInstruction;
use relay_protocol::template::{InputValue, TemplateGraph};
use relay_security::DownloadToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const SUBMIT_MAX_ATTEMPTS: u32 = 3;
const HARVEST_MAX_ATTEMPTS: u32 = 3;

/// What became of one job's execution attempt. The Worker Pool translates
/// this into the job's final status write.
pub enum ExecutionOutcome {
    Completed(Vec<ArtifactLocator>),
    Failed(JobError),
    Cancelled,
}

/// A progress-report callback that the driver `.await`s in place, so the
/// Worker Pool's progress write for report N is guaranteed to have landed
/// before the driver moves on to report N+1 or returns a terminal outcome —
/// a detached write could otherwise land after the terminal
/// `progress=100, status=completed` write and violate the invariant that
/// `progress=100` iff `status=completed`.
pub type ProgressFn<'a> = dyn FnMut(f32) -> BoxFuture<'static, ()> + Send + 'a;

/// Everything the driver needs to run one job, owned by the Worker Pool and
/// shared across every slot (§4.J, §10.1 crate boundaries: this is the only
/// place in the bridge that talks to both the dispatch "brains" and the
/// node-protocol HTTP/WS client).
pub struct ExecutionDriver {
    pub node_manager: Arc<NodeManager>,
    pub load_balancer: Arc<LoadBalancer>,
    pub template_registry: Arc<relay_dispatch::TemplateRegistry>,
    pub uploads: Arc<dyn UploadRegistry>,
    pub fleet_mode: bool,
    pub download_token_key: Vec<u8>,
    pub download_token_ttl_secs: u64,
    /// Base URL this process is reachable at, used to build the
    /// `download_url` a node fetches an uploaded input from.
    pub public_base_url: String,
    /// Upper bound on how long select-node retries before giving up with
    /// kind `no-node` (§4.J step 2). Short, because the Worker Pool already
    /// holds a job back from dequeue while its kind has zero online nodes
    /// at all (see worker_pool) — this only covers the race where a node
    /// goes offline between that check and actual assignment.
    pub node_select_timeout: Duration,
    /// How often progress writes are flushed to the Job Store while
    /// monitoring a run (§4.J step 5 "rate-limited").
    pub progress_flush_interval: Duration,
}

impl ExecutionDriver {
    /// Runs the full pipeline for one job. `job` is read-only here; the
    /// Worker Pool owns writing the resulting status back to the Job Store.
    pub async fn execute(
        &self,
        job: &Job,
        graph_source: &relay_protocol::template::Template,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(f32) -> BoxFuture<'static, ()> + Send,
    ) -> ExecutionOutcome {
        let mut graph = match relay_dispatch::resolve_parameters(graph_source, &job.parameters) {
            Ok(g) => g,
            Err(e) => return ExecutionOutcome::Failed(e),
        };

        if job.kind == JobKind::VideoFromImage {
            let file_downloads = match self.prepare_file_downloads(job, &mut graph).await {
                Ok(d) => d,
                Err(e) => return ExecutionOutcome::Failed(e),
            };
            return self.run_with_node(job, graph, file_downloads, cancel, &mut on_progress).await;
        }

        self.run_with_node(job, graph, Vec::new(), cancel, &mut on_progress).await
    }

    async fn run_with_node(
        &self,
        job: &Job,
        graph: TemplateGraph,
        file_downloads: Vec<FileDownloadInstruction>,
        cancel: &CancellationToken,
        on_progress: &mut ProgressFn<'_>,
    ) -> ExecutionOutcome {
        let node = match self.select_node_with_backoff(job.kind, cancel).await {
            Ok(Some(n)) => n,
            Ok(None) => return cancellation_outcome(cancel),
            Err(e) => return ExecutionOutcome::Failed(e),
        };
        self.node_manager.assign(node.id.as_str(), job.id.clone()).await;

        let outcome = self.run_on_assigned_node(job, &node, graph, file_downloads, cancel, on_progress).await;

        self.node_manager.release(node.id.as_str(), &job.id).await;
        outcome
    }

    /// §4.J step 2: candidates come pre-filtered (online, capacity, kind) by
    /// the Node Manager; this only retries the race where the candidate set
    /// is momentarily empty.
    async fn select_node_with_backoff(
        &self,
        kind: JobKind,
        cancel: &CancellationToken,
    ) -> Result<Option<Node>, JobError> {
        let started = Instant::now();
        let mut backoff = PollBackoff::new(Duration::from_millis(200), Duration::from_secs(5));
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let candidates = self.node_manager.available_nodes(Some(kind)).await;
            if let Some(node) = self.load_balancer.select(&candidates) {
                return Ok(Some(node.clone()));
            }
            if started.elapsed() >= self.node_select_timeout {
                return Err(JobError::new(
                    FailureKind::NoNode,
                    "no node became available for this job kind before the backoff cap",
                ));
            }
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    /// §4.J step 3 (video-from-image only): resolve the client's uploaded
    /// image to its registry row, mint a scoped download token, rewrite the
    /// graph's `LoadImage` node to reference the eventual local path, and
    /// build the `file_downloads` instruction the node fetches it with.
    async fn prepare_file_downloads(
        &self,
        job: &Job,
        graph: &mut TemplateGraph,
    ) -> Result<Vec<FileDownloadInstruction>, JobError> {
        let image_ref = job
            .parameters
            .get("image")
            .and_then(|v| v.as_str())
            .ok_or_else(|| JobError::new(FailureKind::Validation, "video-from-image requires an `image` parameter"))?;

        let upload = self
            .uploads
            .get_by_relative_path(image_ref)
            .await
            .map_err(|e| JobError::new(FailureKind::NotFound, format!("input image not found: {e}")))?;

        let (node_id, input_field) = find_load_image_target(graph).ok_or_else(|| {
            JobError::new(FailureKind::Internal, "template has no LoadImage node for video-from-image")
        })?;

        if let Some(node) = graph.get_mut(&node_id) {
            node.inputs.insert(
                input_field.clone(),
                InputValue::Literal(serde_json::Value::String(upload.relative_path.clone())),
            );
        }

        let token = DownloadToken::mint(&self.download_token_key, upload.file_id.as_str(), self.download_token_ttl_secs);
        let download_url = format!(
            "{}/files/upload/path/{}?token={}",
            self.public_base_url.trim_end_matches('/'),
            upload.relative_path,
            token
        );

        Ok(vec![FileDownloadInstruction {
            download_url,
            local_path: upload.relative_path.clone(),
            filename: upload.original_name.clone(),
            file_size: upload.size,
            target_field: format!("{node_id}.inputs.{input_field}"),
        }])
    }

    async fn run_on_assigned_node(
        &self,
        job: &Job,
        node: &Node,
        graph: TemplateGraph,
        file_downloads: Vec<FileDownloadInstruction>,
        cancel: &CancellationToken,
        on_progress: &mut ProgressFn<'_>,
    ) -> ExecutionOutcome {
        if cancel.is_cancelled() {
            return cancellation_outcome(cancel);
        }

        let client = NodeClient::new(node.base_url());

        let prompt_id = match self.submit_with_retry(&client, graph, job, file_downloads, cancel).await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        if let Err(outcome) = self.monitor_run(&client, job, cancel, on_progress).await {
            return outcome;
        }
        if cancel.is_cancelled() {
            return cancellation_outcome(cancel);
        }

        match self.harvest_with_retry(&client, node, &prompt_id, cancel).await {
            Ok(locators) => ExecutionOutcome::Completed(locators),
            Err(outcome) => outcome,
        }
    }

    /// §4.J step 4: non-200 is retriable only when it looks like a transport
    /// problem (connection failure, or the node itself erroring with a
    /// 5xx) — a 4xx means the node rejected the graph and retrying it would
    /// just fail again.
    async fn submit_with_retry(
        &self,
        client: &NodeClient,
        graph: TemplateGraph,
        job: &Job,
        file_downloads: Vec<FileDownloadInstruction>,
        cancel: &CancellationToken,
    ) -> Result<String, ExecutionOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(cancellation_outcome(cancel));
            }
            let submit = client.submit(graph.clone(), job.id.as_str(), file_downloads.clone());
            let result = tokio::select! {
                r = submit => r,
                _ = cancel.cancelled() => return Err(cancellation_outcome(cancel)),
            };
            match result {
                Ok(prompt_id) => return Ok(prompt_id),
                Err(NodeClientError::Transport(e)) => {
                    warn!(job_id = %job.id, attempt, error = %e, "submit transport error");
                    if attempt >= SUBMIT_MAX_ATTEMPTS {
                        return Err(ExecutionOutcome::Failed(JobError::new(
                            FailureKind::Submit,
                            format!("submit failed after {attempt} attempts: {e}"),
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(NodeClientError::BadStatus { status, body }) if status >= 500 => {
                    warn!(job_id = %job.id, attempt, status, "node returned a server error on submit");
                    if attempt >= SUBMIT_MAX_ATTEMPTS {
                        return Err(ExecutionOutcome::Failed(JobError::new(
                            FailureKind::Submit,
                            format!("node returned {status} after {attempt} attempts: {body}"),
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(NodeClientError::BadStatus { status, body }) => {
                    return Err(ExecutionOutcome::Failed(JobError::new(
                        FailureKind::Submit,
                        format!("node rejected graph: {status} {body}"),
                    )));
                }
            }
        }
    }

    /// §4.J step 5: stream progress frames until a terminal event, a socket
    /// close, cancellation, or the job kind's monitor deadline, whichever
    /// comes first. Progress writes go through `on_progress`, rate-limited
    /// by a ticker so a fast-progressing run doesn't flood the Job Store.
    async fn monitor_run(
        &self,
        client: &NodeClient,
        job: &Job,
        cancel: &CancellationToken,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), ExecutionOutcome> {
        let base_url = client.base_url().to_string();
        let latest = Arc::new(AtomicU64::new(0));
        let latest_for_cb = Arc::clone(&latest);
        let cb = move |value: u64, max: u64| {
            let pct = if max > 0 { (100.0 * value as f64 / max as f64).clamp(0.0, 100.0) } else { 0.0 };
            latest_for_cb.fetch_max((pct * 100.0) as u64, Ordering::Relaxed);
        };

        let deadline = job.kind.monitor_deadline();
        let job_id = job.id.as_str().to_string();
        let run = tokio::spawn(async move { monitor::watch(&base_url, &job_id, cb).await });

        let mut interval = tokio::time::interval(self.progress_flush_interval);
        interval.tick().await; // first tick fires immediately, skip it
        let mut last_written = u64::MAX;
        let deadline_sleep = tokio::time::sleep(deadline);
        tokio::pin!(run, deadline_sleep);

        let result = loop {
            tokio::select! {
                r = &mut run => break r,
                _ = &mut deadline_sleep => {
                    run.abort();
                    return Err(ExecutionOutcome::Failed(JobError::new(FailureKind::Timeout, "monitor loop exceeded its deadline")));
                }
                _ = cancel.cancelled() => {
                    run.abort();
                    return Err(cancellation_outcome(cancel));
                }
                _ = interval.tick() => {
                    let current = latest.load(Ordering::Relaxed);
                    if current != last_written {
                        on_progress(current as f32 / 100.0).await;
                        last_written = current;
                    }
                }
            }
        };

        on_progress(latest.load(Ordering::Relaxed) as f32 / 100.0).await;

        match result {
            Err(join_err) => Err(ExecutionOutcome::Failed(JobError::new(FailureKind::Internal, format!("monitor task panicked: {join_err}")))),
            Ok(Err(e)) => Err(ExecutionOutcome::Failed(JobError::new(FailureKind::Transport, format!("websocket connect failed: {e}")))),
            Ok(Ok(MonitorOutcome::Finished)) => Ok(()),
            Ok(Ok(MonitorOutcome::ExecutionError(msg))) => Err(ExecutionOutcome::Failed(JobError::new(
                FailureKind::Execution,
                msg.unwrap_or_else(|| "node reported an execution error".to_string()),
            ))),
            Ok(Ok(MonitorOutcome::ClosedEarly)) => {
                Err(ExecutionOutcome::Failed(JobError::new(FailureKind::Transport, "connection closed before the run completed")))
            }
        }
    }

    /// §4.J step 6: extract every output image across every node in the
    /// harvested history entry, in node-id order (the history response is
    /// keyed by node id, which sorts deterministically). Zero artifacts on
    /// an otherwise-successful run is its own failure kind.
    async fn harvest_with_retry(
        &self,
        client: &NodeClient,
        node: &Node,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactLocator>, ExecutionOutcome> {
        let mut attempt = 0u32;
        let history = loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(cancellation_outcome(cancel));
            }
            let fetch = client.history(prompt_id);
            let result = tokio::select! {
                r = fetch => r,
                _ = cancel.cancelled() => return Err(cancellation_outcome(cancel)),
            };
            match result {
                Ok(h) => break h,
                Err(e) if attempt < HARVEST_MAX_ATTEMPTS => {
                    warn!(prompt_id = %prompt_id, attempt, error = %e, "harvest attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(ExecutionOutcome::Failed(JobError::new(
                        FailureKind::Transport,
                        format!("harvest failed after {attempt} attempts: {e}"),
                    )))
                }
            }
        };

        let mut locators = Vec::new();
        if let Some(entry) = history.get(prompt_id) {
            for output in entry.outputs.values() {
                for image in &output.images {
                    let relative_path = if image.subfolder.is_empty() {
                        image.filename.clone()
                    } else {
                        format!("{}/{}", image.subfolder, image.filename)
                    };
                    locators.push(if self.fleet_mode {
                        ArtifactLocator::Remote { node_id: node.id.clone(), relative_path }
                    } else {
                        ArtifactLocator::Local { path: relative_path }
                    });
                }
            }
        }

        if locators.is_empty() {
            return Err(ExecutionOutcome::Failed(JobError::new(FailureKind::NoOutput, "run completed with no output artifacts")));
        }
        Ok(locators)
    }
}

/// Maps a latched cancellation to its job-facing outcome (§7 "health-driven
/// aborts produce status failed with kind transport"): an explicit
/// client-requested cancel ends the job `cancelled`, but a node dropping
/// offline mid-run is a failure the client didn't ask for.
fn cancellation_outcome(cancel: &CancellationToken) -> ExecutionOutcome {
    match cancel.reason() {
        Some(CancelReason::NodeFailure) => ExecutionOutcome::Failed(JobError::new(
            FailureKind::Transport,
            "assigned node dropped offline while the job was in flight",
        )),
        _ => ExecutionOutcome::Cancelled,
    }
}

/// Finds the first `LoadImage` node and its `image` input field, in
/// ascending node-id order (the graph's `BTreeMap` already sorts it).
fn find_load_image_target(graph: &TemplateGraph) -> Option<(String, String)> {
    graph
        .nodes
        .iter()
        .find(|(_, node)| node.class_type == "LoadImage")
        .map(|(id, _)| (id.clone(), "image".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::template::GraphNode;
    use std::collections::BTreeMap;

    #[test]
    fn finds_the_load_image_node_by_class_type() {
        let mut nodes = BTreeMap::new();
        nodes.insert("3".to_string(), GraphNode { class_type: "KSampler".to_string(), inputs: BTreeMap::new() });
        nodes.insert("7".to_string(), GraphNode { class_type: "LoadImage".to_string(), inputs: BTreeMap::new() });
        let graph = TemplateGraph { nodes };
        let target = find_load_image_target(&graph).unwrap();
        assert_eq!(target, ("7".to_string(), "image".to_string()));
    }

    #[test]
    fn no_load_image_node_returns_none() {
        let mut nodes = BTreeMap::new();
        nodes.insert("3".to_string(), GraphNode { class_type: "KSampler".to_string(), inputs: BTreeMap::new() });
        let graph = TemplateGraph { nodes };
        assert!(find_load_image_target(&graph).is_none());
    }

    #[test]
    fn user_requested_cancellation_yields_cancelled_outcome() {
        let token = CancellationToken::new();
        token.cancel(CancelReason::UserRequested);
        assert!(matches!(cancellation_outcome(&token), ExecutionOutcome::Cancelled));
    }

    #[test]
    fn node_failure_cancellation_yields_a_transport_failure() {
        let token = CancellationToken::new();
        token.cancel(CancelReason::NodeFailure);
        match cancellation_outcome(&token) {
            ExecutionOutcome::Failed(err) => assert_eq!(err.kind, FailureKind::Transport),
            _ => panic!("expected a Failed outcome for a node-failure cancellation"),
        }
    }
}
