//! `GET /files/{file-id}` and `GET /files/upload/path/<path>` (§4.I egress,
//! §6): serving uploaded inputs back to clients and to backend nodes.

use crate::app::Core;
use crate::http::client_id::ClientIdentity;
use crate::http::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use relay_ids::FileId;
use serde::Deserialize;
use std::sync::Arc;

/// `GET /files/{file-id}`: serves an upload back to its owning client, for
/// preview. No token is involved (§4.I "serve to the owning client" vs. node
/// egress below) — the caller's identity is checked against the upload's
/// recorded owner instead.
pub async fn get_file_by_id(
    State(core): State<Arc<Core>>,
    ClientIdentity(owner): ClientIdentity,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let file_id = FileId::parse(&file_id).map_err(ApiError::from)?;
    let (record, bytes) = core.file_plane.read_upload_for_owner(&file_id).await?;
    if record.owner != owner {
        return Err(ApiError::not_found("file not found"));
    }
    let mut response = bytes.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, record.mime_type.parse().unwrap_or(header::HeaderValue::from_static("application/octet-stream")));
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct DownloadTokenQuery {
    token: String,
}

/// `GET /files/upload/path/<path>`: a node's egress for the `file_downloads`
/// instruction it was handed at submit time (§4.J step 3, §6). The token
/// travels as a query parameter because it is embedded directly in a URL
/// this orchestrator constructs for the node to fetch, not presented as a
/// header by a caller that read it out-of-band.
pub async fn get_upload_by_path(
    State(core): State<Arc<Core>>,
    Path(path): Path<String>,
    Query(query): Query<DownloadTokenQuery>,
) -> Result<Vec<u8>, ApiError> {
    Ok(core.file_plane.read_upload_for_node(&path, &query.token).await?)
}
