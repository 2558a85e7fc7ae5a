//! Shared handler state, grounded on the teacher's axum `AppState` pattern:
//! one `Arc`-wrapped struct of already-constructed services, cloned cheaply
//! per request.

use std::sync::Arc;

use fleetd_shared::config::EventGatewayConfig;
use sqlx::PgPool;

use crate::event_gateway::EventGateway;
use crate::lifecycle::RunLifecycle;
use crate::node_liveness::NodeLiveness;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<RunLifecycle>,
    pub gateway: Arc<EventGateway>,
    pub liveness: Arc<NodeLiveness>,
    pub scheduler: Arc<Scheduler>,
    pub db_pool: PgPool,
    pub eventgateway_config: EventGatewayConfig,
}
