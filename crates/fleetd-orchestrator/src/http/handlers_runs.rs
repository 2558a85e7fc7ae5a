//! Run + Event handlers (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use fleetd_shared::models::{Event, EventInput, Run, RunStatus};
use fleetd_shared::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::state::AppState;

#[derive(Deserialize)]
pub struct UpdateRunStatusRequest {
    pub status: RunStatus,
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> FleetResult<(StatusCode, Json<Run>)> {
    let run = state.lifecycle.create_run(task_id).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> FleetResult<Json<Run>> {
    let run = state.gateway.run_store().get(run_id).await?;
    Ok(Json(run))
}

pub async fn update_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<UpdateRunStatusRequest>,
) -> FleetResult<Json<Run>> {
    let run = state.lifecycle.update_run_status(run_id, body.status).await?;
    Ok(Json(run))
}

pub async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> FleetResult<Json<Run>> {
    let run = state.lifecycle.cancel_run(run_id).await?;
    Ok(Json(run))
}

#[derive(Serialize)]
pub struct CreatedCount {
    pub created: usize,
}

pub async fn post_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(inputs): Json<Vec<EventInput>>,
) -> FleetResult<(StatusCode, Json<CreatedCount>)> {
    if inputs.is_empty() {
        return Err(FleetError::validation("event batch must not be empty"));
    }
    for input in &inputs {
        input
            .validate()
            .map_err(|e| FleetError::validation(e.to_string()))?;
    }
    let created = state.gateway.post_events(run_id, inputs).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedCount {
            created: created.len(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub from_seq: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Serialize)]
pub struct EventsPage {
    pub events: Vec<Event>,
    pub count: usize,
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<ListEventsQuery>,
) -> FleetResult<Json<EventsPage>> {
    let events = state.gateway.list_events(run_id, query.from_seq, query.limit).await?;
    Ok(Json(EventsPage {
        count: events.len(),
        events,
    }))
}
