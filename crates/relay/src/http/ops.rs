//! Ambient operational endpoints (§6, §9): liveness, readiness, version, and
//! fleet status. None of these touch job or file state.

use crate::app::Core;
use axum::extract::State;
use axum::Json;
use relay_protocol::http_types::{FleetResponse, HealthResponse, ReadyResponse, VersionResponse};
use std::sync::Arc;

/// `GET /healthz`: the process is up and serving. Does not check
/// downstream dependencies; that is `/readyz`'s job.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `GET /readyz`: by the time the router is accepting connections,
/// `Core::build` has already succeeded in connecting the Job Store, Queue
/// and Upload Registry, so readiness here just confirms the Node Manager
/// has at least one registered node to dispatch to.
pub async fn readyz(State(core): State<Arc<Core>>) -> Json<ReadyResponse> {
    let stats = core.node_manager.cluster_stats().await;
    if stats.total_nodes == 0 {
        return Json(ReadyResponse {
            ready: false,
            reason: Some("no nodes registered".to_string()),
        });
    }
    Json(ReadyResponse { ready: true, reason: None })
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: "1",
    })
}

/// `GET /fleet`: aggregate node/capacity view (§4.D).
pub async fn fleet(State(core): State<Arc<Core>>) -> Json<FleetResponse> {
    Json(core.node_manager.cluster_stats().await)
}
