//! Node heartbeat + admin handlers (spec.md §6).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use fleetd_shared::models::{HeartbeatInput, Node, NodeCapacity, NodeStatus};
use fleetd_shared::resilience::CircuitState;
use fleetd_shared::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::AppState;

#[derive(Serialize)]
pub struct HeartbeatAck {
    pub status: &'static str,
}

/// Mirrors `HeartbeatInput` but with `node_id` optional, so a request body
/// that omits it fails validation (400) rather than JSON deserialization
/// (422, via axum's default rejection).
#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: Option<Uuid>,
    pub status: Option<NodeStatus>,
    pub labels: Option<HashMap<String, String>>,
    pub capacity: Option<NodeCapacity>,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatRequest>,
) -> FleetResult<Json<HeartbeatAck>> {
    let node_id = match body.node_id {
        Some(id) if !id.is_nil() => id,
        _ => return Err(FleetError::validation("missing node_id")),
    };
    let input = HeartbeatInput {
        node_id,
        status: body.status,
        labels: body.labels,
        capacity: body.capacity,
    };
    state.liveness.heartbeat(input).await?;
    Ok(Json(HeartbeatAck { status: "ok" }))
}

pub async fn list_nodes(State(state): State<AppState>) -> FleetResult<Json<Vec<Node>>> {
    let nodes = state.liveness.list_fused().await?;
    Ok(Json(nodes))
}

#[derive(Deserialize)]
pub struct SetAdminStatusRequest {
    pub status: NodeStatus,
}

pub async fn set_admin_status(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
    Json(body): Json<SetAdminStatusRequest>,
) -> FleetResult<Json<Node>> {
    state.liveness.set_admin_status(node_id, body.status).await?;
    let node = state.liveness.get_fused(node_id).await?;
    Ok(Json(node))
}

#[derive(Serialize)]
pub struct HealthReport {
    pub database_connected: bool,
    pub scheduler_circuit_state: CircuitState,
}

/// Reports database connectivity and the scheduler's storage circuit
/// breaker state, grounded on the teacher's `health::db_status` evaluator.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let database_connected = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();
    let scheduler_circuit_state = state.scheduler.storage_breaker_state();

    let status = if database_connected && scheduler_circuit_state != CircuitState::Open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthReport {
            database_connected,
            scheduler_circuit_state,
        }),
    )
}
