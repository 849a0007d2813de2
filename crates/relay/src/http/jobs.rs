//! `POST /jobs/text-to-image`, `POST /jobs/image-to-video`, and the
//! per-job read/cancel/rerun/artifact surface (§6 Client surface).

use crate::app::Core;
use crate::http::client_id::ClientIdentity;
use crate::http::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_bridge::CancelReason;
use relay_db::job_store::JobUpdate;
use relay_ids::JobId;
use relay_protocol::http_types::{JobView, SubmitJobRequest, SubmitJobResponse};
use relay_protocol::job::{ArtifactLocator, Job, JobKind, JobStatus};
use serde::Deserialize;
use std::sync::Arc;

async fn submit_job(
    core: &Arc<Core>,
    kind: JobKind,
    owner: relay_ids::ClientId,
    request: SubmitJobRequest,
) -> Result<SubmitJobResponse, ApiError> {
    // Fail fast on an unknown template rather than accepting a job this
    // kind's workers can never run (§4.C step 1).
    let template = core.template_registry.get(&request.workflow_name).await?;
    relay_dispatch::resolve_parameters(&template, &request.params)
        .map_err(ApiError::from)?;

    let job = Job::new_queued(kind, owner, request.workflow_name, request.params, request.priority);
    core.job_store.create(&job).await?;
    core.queue.enqueue(&job.id, kind, job.priority).await?;

    Ok(SubmitJobResponse::queued(job.id, kind))
}

pub async fn submit_text_to_image(
    State(core): State<Arc<Core>>,
    ClientIdentity(owner): ClientIdentity,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    Ok(Json(submit_job(&core, JobKind::ImageFromText, owner, request).await?))
}

pub async fn submit_image_to_video(
    State(core): State<Arc<Core>>,
    ClientIdentity(owner): ClientIdentity,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    Ok(Json(submit_job(&core, JobKind::VideoFromImage, owner, request).await?))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(ApiError::from)
}

pub async fn get_job(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = core.job_store.read_by_id(&job_id).await?;
    Ok(Json(JobView::from_job(&job)))
}

/// `DELETE /jobs/{id}`: idempotent on terminal jobs (§6).
pub async fn cancel_job(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = core.job_store.read_by_id(&job_id).await?;

    if job.status.is_terminal() {
        return Ok(Json(JobView::from_job(&job)));
    }

    core.worker_pool
        .in_flight()
        .cancel(&job_id, CancelReason::UserRequested)
        .await;

    if job.status == JobStatus::Queued {
        // Not yet picked up by a worker slot: there is no in-flight
        // cancellation token to signal, so mark it cancelled directly.
        core.job_store
            .update_status(&job_id, JobUpdate::default().status(JobStatus::Cancelled).completed_now())
            .await?;
    }

    let job = core.job_store.read_by_id(&job_id).await?;
    Ok(Json(JobView::from_job(&job)))
}

/// `POST /jobs/{id}/rerun`: resubmit with the stored parameters (§3 Lifecycles).
pub async fn rerun_job(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = core.job_store.read_by_id(&job_id).await?;

    if !job.status.is_terminal() {
        return Err(ApiError::validation("only a terminal job can be rerun"));
    }

    core.job_store.update_status(&job_id, JobUpdate::rerun()).await?;
    core.queue.enqueue(&job_id, job.kind, job.priority).await?;

    Ok(Json(SubmitJobResponse::queued(job_id, job.kind)))
}

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    #[serde(default)]
    index: usize,
}

/// `GET /jobs/{id}/artifacts[?index=N]`: stream the Nth artifact (§6).
pub async fn get_artifact(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = core.job_store.read_by_id(&job_id).await?;

    let locator = job
        .results
        .get(query.index)
        .ok_or_else(|| ApiError::not_found(format!("job {job_id} has no artifact at index {}", query.index)))?;

    let (bytes, node_content_type) = core.file_plane.read_result(locator).await?;
    let filename = artifact_filename(locator);
    let content_type = node_content_type.unwrap_or_else(|| guess_content_type(&filename));
    let is_video = content_type.starts_with("video/");

    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
    headers.insert(
        header::CACHE_CONTROL,
        if is_video { "public, max-age=7200" } else { "public, max-age=3600" }
            .parse()
            .unwrap(),
    );
    if is_video {
        headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    }
    Ok(response)
}

fn artifact_filename(locator: &ArtifactLocator) -> String {
    let path = match locator {
        ArtifactLocator::Local { path } => path.as_str(),
        ArtifactLocator::Remote { relative_path, .. } => relative_path.as_str(),
    };
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Derives Content-Type from extension (§6 "Content-Type of outputs is
/// derived from extension (image/*, video/*)").
fn guess_content_type(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
    .to_string()
}
