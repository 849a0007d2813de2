//! HTTP API types for the client-facing surface (§6 Client surface).
//!
//! These are the request/response bodies the thin HTTP handlers bind to;
//! all types use serde for JSON serialization with strict enum tagging.

use crate::error::{FailureKind, JobError};
use crate::job::{ArtifactLocator, Job, JobKind, JobStatus};
use relay_ids::{FileId, JobId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST /jobs/text-to-image` and `POST /jobs/image-to-video` request body.
/// The parameter map is opaque here; the Parameter Engine validates it
/// against the named workflow's binding schema.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    pub workflow_name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: &'static str,
    pub estimated_time_s: u64,
}

impl SubmitJobResponse {
    pub fn queued(job_id: JobId, kind: JobKind) -> Self {
        let estimated_time_s = match kind {
            JobKind::ImageFromText => 15,
            JobKind::VideoFromImage => 180,
        };
        Self {
            job_id,
            status: "queued",
            estimated_time_s,
        }
    }
}

/// `GET /jobs/{id}` response body.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub result_urls: Vec<String>,
}

impl JobView {
    /// Build the client-facing view, resolving each artifact locator to a
    /// URL under `/jobs/{id}/artifacts?index=N` (the File Plane owns the
    /// actual byte-serving logic; this just names the index).
    pub fn from_job(job: &Job) -> Self {
        let result_urls = (0..job.results.len())
            .map(|index| format!("/jobs/{}/artifacts?index={}", job.id, index))
            .collect();
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            error: job.error.clone(),
            result_urls,
        }
    }
}

/// `POST /uploads` response body.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub file_id: FileId,
    pub relative_path: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// `GET /fleet` response body (§4.D cluster-stats, ambient diagnostics).
pub type FleetResponse = crate::node::ClusterStats;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub protocol_version: &'static str,
}

/// Uniform error body for every non-2xx client response (§7).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn http_status(&self) -> u16 {
        match self.kind {
            FailureKind::Validation => 400,
            FailureKind::Auth => 401,
            FailureKind::NotFound => 404,
            FailureKind::Internal => 500,
            FailureKind::NoNode
            | FailureKind::Submit
            | FailureKind::Execution
            | FailureKind::Timeout
            | FailureKind::NoOutput
            | FailureKind::Transport => 409,
        }
    }
}

impl From<JobError> for ErrorResponse {
    fn from(err: JobError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
            details: err.details,
        }
    }
}

/// `ArtifactLocator` is re-exported for HTTP layer convenience, since it
/// appears verbatim in some diagnostics responses.
pub type Locator = ArtifactLocator;

#[cfg(test)]
mod tests {
    use super::*;
    use relay_ids::ClientId;
    use std::collections::BTreeMap;

    #[test]
    fn submit_job_request_flattens_extra_params() {
        let json = r#"{"workflow_name":"sd_basic","priority":1,"prompt":"a cat","width":512}"#;
        let req: SubmitJobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.workflow_name, "sd_basic");
        assert_eq!(req.priority, 1);
        assert_eq!(req.params.get("prompt"), Some(&serde_json::json!("a cat")));
        assert_eq!(req.params.get("width"), Some(&serde_json::json!(512)));
    }

    #[test]
    fn job_view_result_urls_index_each_artifact() {
        let mut job = Job::new_queued(
            JobKind::ImageFromText,
            ClientId::new(),
            "sd_basic",
            BTreeMap::new(),
            0,
        );
        job.results.push(ArtifactLocator::Local {
            path: "/out/1.png".to_string(),
        });
        job.results.push(ArtifactLocator::Local {
            path: "/out/2.png".to_string(),
        });
        job.status = JobStatus::Completed;
        job.progress = 100.0;

        let view = JobView::from_job(&job);
        assert_eq!(view.result_urls.len(), 2);
        assert!(view.result_urls[0].ends_with("index=0"));
        assert!(view.result_urls[1].ends_with("index=1"));
    }

    #[test]
    fn error_response_maps_kind_to_http_status() {
        let resp = ErrorResponse::new(FailureKind::NotFound, "unknown job");
        assert_eq!(resp.http_status(), 404);

        let resp = ErrorResponse::new(FailureKind::Validation, "bad param");
        assert_eq!(resp.http_status(), 400);
    }

    #[test]
    fn error_response_serializes_without_details_when_absent() {
        let resp = ErrorResponse::new(FailureKind::Auth, "missing token");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("details").is_none());
    }
}
