//! SQLite-backed persistence for the relay orchestrator: the Job Store
//! (two-scope, client + global) and the upload file registry.
//!
//! This crate owns durable state only. Node state, the template cache, and
//! the queue's in-memory fallback live elsewhere — the Job Store is the
//! only component treated as an external ACID backend.

pub mod error;
pub mod job_store;
pub mod uploads;

pub use error::DbError;
pub use job_store::{JobStore, SqliteJobStore};
pub use uploads::{SqliteUploadRegistry, UploadRecord, UploadRegistry};
