//! Errors raised by the persistence layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("upload {0} not found")]
    UploadNotFound(String),
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("malformed stored data: {0}")]
    Corrupt(String),
}
