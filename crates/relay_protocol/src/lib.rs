//! Domain types and wire protocol shared across the relay orchestrator.
//!
//! This crate is deliberately free of I/O: the Job Store, Node Manager,
//! Execution Driver, and HTTP handlers all build on the types declared here,
//! but none of that behavior lives in this crate.

pub mod config;
pub mod error;
pub mod http_types;
pub mod job;
pub mod node;
pub mod node_protocol;
pub mod template;

pub use config::{ConfigError, SystemConfig};
pub use error::{FailureKind, JobError};
pub use http_types::{ErrorResponse, JobView, SubmitJobRequest, SubmitJobResponse, UploadResponse};
pub use job::{ArtifactLocator, Job, JobKind, JobStatus, SourceTag};
pub use node::{ClusterStats, Node, NodeStatus};
pub use node_protocol::{NodeEvent, PromptRequest, PromptResponse};
pub use template::{BindingSchema, Template, TemplateGraph};
