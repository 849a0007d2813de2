//! Node-protocol bridge and Execution Driver (§4.H, §4.I, §4.J) for the
//! relay orchestrator.
//!
//! This crate is the only place that both talks to the dispatch "brains"
//! layer (`relay_dispatch`) and speaks the backend node's wire protocol
//! over HTTP/WebSocket. It owns three things: the Execution Driver (the
//! per-job state machine), the Worker Pool (fixed concurrent slots per job
//! kind pulling from the queue), and the File Plane (upload ingest and
//! result egress, including the fleet-mode proxy path).

pub mod cancel;
pub mod client;
pub mod driver;
pub mod file_plane;
pub mod health_probe;
pub mod monitor;
pub mod worker_pool;

pub use cancel::{CancelReason, CancellationToken};
pub use client::{NodeClient, NodeClientError};
pub use driver::{ExecutionDriver, ExecutionOutcome};
pub use file_plane::{FilePlane, FilePlaneError};
pub use health_probe::HttpHealthProbe;
pub use monitor::{watch, MonitorOutcome};
pub use worker_pool::{InFlightJobs, WorkerPool};
