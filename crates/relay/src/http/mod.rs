//! The client-facing HTTP surface (§6). Every handler takes `State<Arc<Core>>`
//! and nothing else reaches into global state.

pub mod client_id;
pub mod error;
pub mod files;
pub mod jobs;
pub mod ops;
pub mod uploads;

use crate::app::Core;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub fn router(core: Arc<Core>) -> Router {
    let max_upload_bytes = core.config.uploads.max_upload_bytes as usize;

    Router::new()
        .route("/jobs/text-to-image", post(jobs::submit_text_to_image))
        .route("/jobs/image-to-video", post(jobs::submit_image_to_video))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/jobs/:id/rerun", post(jobs::rerun_job))
        .route("/jobs/:id/artifacts", get(jobs::get_artifact))
        .route("/files/:file_id", get(files::get_file_by_id))
        .route("/files/upload/path/*path", get(files::get_upload_by_path))
        .route("/uploads", post(uploads::upload_file))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/version", get(ops::version))
        .route("/fleet", get(ops::fleet))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}
