//! Job domain types (§3 Data Model: Job).

use crate::error::JobError;
use chrono::{DateTime, Utc};
use relay_ids::{ClientId, JobId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The category of inference a job requests. Closed sum per the Design Notes
/// ("polymorphism in place of class hierarchies"): new kinds are added by
/// extending this enum and its exhaustive match arms, not by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ImageFromText,
    VideoFromImage,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::ImageFromText => "image-from-text",
            JobKind::VideoFromImage => "video-from-image",
        }
    }

    /// Upper bound for the monitor loop (§4.J step 5), kind-dependent.
    pub fn monitor_deadline(self) -> std::time::Duration {
        match self {
            JobKind::ImageFromText => std::time::Duration::from_secs(120),
            JobKind::VideoFromImage => std::time::Duration::from_secs(900),
        }
    }
}

/// Job lifecycle status (§3 Lifecycles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Who originated a job: a client request, or the system itself (e.g. rerun).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Client,
    System,
}

/// Where a result artifact lives (§3 Artifact Locator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ArtifactLocator {
    /// Single-node mode: an absolute path on the shared filesystem.
    Local { path: String },
    /// Fleet mode: the node that produced it, and its own relative path
    /// (separator preserved verbatim — never re-parsed or normalised).
    Remote {
        node_id: NodeId,
        relative_path: String,
    },
}

/// A single job's full record (§3 Job entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub backend_correlation_id: Option<String>,
    pub kind: JobKind,
    pub owner: ClientId,
    pub source: SourceTag,
    pub workflow_name: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<JobError>,
    pub results: Vec<ArtifactLocator>,
    pub assigned_node: Option<NodeId>,
    pub priority: i32,
}

impl Job {
    /// Construct a freshly-queued job from a validated submission.
    pub fn new_queued(
        kind: JobKind,
        owner: ClientId,
        workflow_name: impl Into<String>,
        parameters: BTreeMap<String, serde_json::Value>,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            backend_correlation_id: None,
            kind,
            owner,
            source: SourceTag::Client,
            workflow_name: workflow_name.into(),
            parameters,
            status: JobStatus::Queued,
            progress: 0.0,
            message: String::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error: None,
            results: Vec::new(),
            assigned_node: None,
            priority,
        }
    }

    /// Reset a terminal job back to `queued` for a rerun (§3 Lifecycles),
    /// preserving priority and parameters and clearing everything else.
    pub fn rerun(&mut self) {
        self.status = JobStatus::Queued;
        self.progress = 0.0;
        self.message = String::new();
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        self.results.clear();
        self.assigned_node = None;
        self.backend_correlation_id = None;
        self.updated_at = Utc::now();
    }

    /// §8 invariant: progress=100 iff status=completed.
    pub fn invariants_hold(&self) -> bool {
        let progress_ok = (0.0..=100.0).contains(&self.progress)
            && (self.progress == 100.0) == (self.status == JobStatus::Completed);
        let completed_ok = self.status != JobStatus::Completed
            || (!self.results.is_empty() && self.error.is_none());
        let failed_ok =
            self.status != JobStatus::Failed || (self.error.is_some() && self.results.is_empty());
        progress_ok && completed_ok && failed_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_satisfies_invariants() {
        let job = Job::new_queued(
            JobKind::ImageFromText,
            ClientId::new(),
            "sd_basic",
            BTreeMap::new(),
            1,
        );
        assert!(job.invariants_hold());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn rerun_preserves_priority_and_parameters_clears_rest() {
        let mut job = Job::new_queued(
            JobKind::ImageFromText,
            ClientId::new(),
            "sd_basic",
            BTreeMap::from([("width".to_string(), serde_json::json!(512))]),
            5,
        );
        job.status = JobStatus::Failed;
        job.error = Some(JobError::new(crate::error::FailureKind::Transport, "boom"));
        job.assigned_node = Some(NodeId::new("gpu-01").unwrap());

        job.rerun();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.priority, 5);
        assert_eq!(job.parameters.get("width"), Some(&serde_json::json!(512)));
        assert!(job.error.is_none());
        assert!(job.results.is_empty());
        assert!(job.assigned_node.is_none());
    }
}
