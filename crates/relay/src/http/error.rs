//! Collapses every library error into the client-facing failure taxonomy
//! (§7): the HTTP boundary is the one place these get turned into a status
//! code and a uniform JSON body, never earlier.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_protocol::error::{FailureKind, JobError};
use relay_protocol::http_types::ErrorResponse;

pub struct ApiError(JobError);

impl ApiError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self(JobError::new(kind, message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from(self.0);
        let status = StatusCode::from_u16(body.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self(err)
    }
}

impl From<relay_db::DbError> for ApiError {
    fn from(err: relay_db::DbError) -> Self {
        use relay_db::DbError;
        match err {
            DbError::JobNotFound(id) => Self::not_found(format!("job {id} not found")),
            DbError::UploadNotFound(id) => Self::not_found(format!("upload {id} not found")),
            DbError::Sql(e) => Self::internal(format!("database error: {e}")),
            DbError::Corrupt(reason) => Self::internal(format!("stored data is corrupt: {reason}")),
        }
    }
}

impl From<relay_dispatch::TemplateError> for ApiError {
    fn from(err: relay_dispatch::TemplateError) -> Self {
        use relay_dispatch::TemplateError;
        match err {
            TemplateError::NotFound(name) => Self::not_found(format!("unknown workflow template `{name}`")),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<relay_dispatch::QueueError> for ApiError {
    fn from(err: relay_dispatch::QueueError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<relay_bridge::FilePlaneError> for ApiError {
    fn from(err: relay_bridge::FilePlaneError) -> Self {
        use relay_bridge::FilePlaneError;
        match err {
            FilePlaneError::NotFound => Self::not_found("file not found"),
            FilePlaneError::PathTraversal => Self::validation("path escapes the upload root"),
            FilePlaneError::Token(e) => Self::new(FailureKind::Auth, e.to_string()),
            FilePlaneError::Db(e) => e.into(),
            FilePlaneError::AllNodesFailed => Self::new(FailureKind::Transport, "all nodes failed to serve the file"),
        }
    }
}

impl From<relay_ids::IdParseError> for ApiError {
    fn from(err: relay_ids::IdParseError) -> Self {
        Self::validation(err.to_string())
    }
}
