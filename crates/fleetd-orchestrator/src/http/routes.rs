use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use super::{handlers_nodes, handlers_runs, ws};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers_nodes::health))
        .route("/api/v1/tasks/{id}/runs", post(handlers_runs::create_run))
        .route(
            "/api/v1/runs/{id}",
            get(handlers_runs::get_run).patch(handlers_runs::update_run_status),
        )
        .route("/api/v1/runs/{id}/cancel", post(handlers_runs::cancel_run))
        .route(
            "/api/v1/runs/{id}/events",
            post(handlers_runs::post_events).get(handlers_runs::list_events),
        )
        .route("/ws/runs/{id}/events", get(ws::subscribe_run_events))
        .route("/api/v1/nodes/heartbeat", post(handlers_nodes::heartbeat))
        .route("/api/v1/nodes", get(handlers_nodes::list_nodes))
        .route("/api/v1/nodes/{id}", patch(handlers_nodes::set_admin_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
