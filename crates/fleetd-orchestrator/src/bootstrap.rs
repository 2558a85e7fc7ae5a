//! Wires every component into a running process and owns graceful shutdown
//! (Design Note 3): background loops are each handed their own
//! `CancellationToken`, and `stop()` cancels and joins them in the reverse
//! of the order they were spawned. Grounded on the teacher's
//! `OrchestrationBootstrap`/`bin/server.rs` pair.

use std::sync::Arc;
use std::time::Duration;

use fleetd_shared::config::FleetConfig;
use fleetd_shared::queue::bus::{EventBus, PostgresEventBus};
use fleetd_shared::queue::postgres::PostgresDispatchQueue;
use fleetd_shared::queue::{DispatchQueue, StreamRouterKind};
use fleetd_shared::store::postgres::{PostgresEventStore, PostgresNodeStore, PostgresRunStore, PostgresTaskStore};
use fleetd_shared::store::{EventStore, NodeStore, RunStore, TaskStore};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::event_gateway::EventGateway;
use crate::http::{self, AppState};
use crate::lifecycle::RunLifecycle;
use crate::node_liveness::NodeLiveness;
use crate::scheduler::fallback::FallbackPoller;
use crate::scheduler::Scheduler;

/// Handle to a fully running orchestrator process. Dropping it does not
/// stop anything; callers must await [`OrchestratorHandle::stop`].
pub struct OrchestratorHandle {
    config: FleetConfig,
    background: Vec<(CancellationToken, JoinHandle<()>)>,
    http_server: JoinHandle<std::io::Result<()>>,
    http_shutdown: tokio::sync::oneshot::Sender<()>,
}

impl OrchestratorHandle {
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Cancels background loops in LIFO order, then shuts the HTTP server
    /// down, bounding each step so a stuck task cannot hang the process.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        let _ = self.http_shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(5), self.http_server).await;

        while let Some((cancel, handle)) = self.background.pop() {
            cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        Ok(())
    }
}

pub async fn bootstrap(config: FleetConfig) -> anyhow::Result<OrchestratorHandle> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let dispatch_queue = PostgresDispatchQueue::new(pool.clone());
    dispatch_queue.ensure_schema().await?;

    let task_store: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(pool.clone()));
    let run_store: Arc<dyn RunStore> = Arc::new(PostgresRunStore::new(pool.clone()));
    let event_store: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(pool.clone()));
    let node_store: Arc<dyn NodeStore> = Arc::new(PostgresNodeStore::new(pool.clone()));
    let queue: Arc<dyn DispatchQueue> = Arc::new(dispatch_queue);
    let bus: Arc<dyn EventBus> = Arc::new(PostgresEventBus::new(pool.clone()));
    let router = StreamRouterKind::default();

    let lifecycle = Arc::new(RunLifecycle::new(
        task_store.clone(),
        run_store.clone(),
        queue.clone(),
        router.clone(),
    ));

    let gateway = Arc::new(EventGateway::new(
        event_store,
        run_store.clone(),
        task_store,
        bus,
        lifecycle.clone(),
    ));

    let freshness_window = Duration::from_secs(config.node.heartbeat.freshness_window_secs);
    let liveness = Arc::new(NodeLiveness::new(node_store.clone(), freshness_window));

    let scheduler = Arc::new(Scheduler::new(
        run_store.clone(),
        node_store.clone(),
        queue,
        router,
        config.scheduler.clone(),
        config.node.heartbeat.freshness_window_secs,
    ));

    let fallback = FallbackPoller::new(
        scheduler.clone(),
        run_store,
        config.scheduler.fallback.stale_threshold_secs as i64,
        Duration::from_millis(config.scheduler.fallback.interval_ms),
        config.scheduler.circuit_breaker.to_resilience_config(),
    );

    let mut background = Vec::new();

    let scheduler_cancel = CancellationToken::new();
    let scheduler_loop = scheduler.clone();
    let cancel = scheduler_cancel.clone();
    background.push((
        scheduler_cancel,
        tokio::spawn(async move { run_scheduler_loop(scheduler_loop, cancel).await }),
    ));

    let fallback_cancel = CancellationToken::new();
    let cancel = fallback_cancel.clone();
    background.push((
        fallback_cancel,
        tokio::spawn(async move { fallback.run(cancel).await }),
    ));

    let sweep_cancel = CancellationToken::new();
    let sweep_liveness = liveness.clone();
    let cancel = sweep_cancel.clone();
    let sweep_interval = Duration::from_secs(config.node.stale_sweep_interval_secs);
    background.push((
        sweep_cancel,
        tokio::spawn(async move {
            sweep_liveness
                .run_sweep(sweep_interval, config.node.heartbeat.freshness_window_secs as i64, cancel)
                .await
        }),
    ));

    let state = AppState {
        lifecycle,
        gateway,
        liveness,
        scheduler: scheduler.clone(),
        db_pool: pool.clone(),
        eventgateway_config: config.eventgateway.clone(),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.bind_address).await?;
    info!(address = %config.http.bind_address, "http server listening");

    let (http_shutdown_tx, http_shutdown_rx) = tokio::sync::oneshot::channel();
    let http_server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = http_shutdown_rx.await;
            })
            .await
    });

    Ok(OrchestratorHandle {
        config,
        background,
        http_server,
        http_shutdown: http_shutdown_tx,
    })
}

async fn run_scheduler_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler loop shutting down");
                break;
            }
            result = scheduler.run_cycle() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "scheduler cycle failed");
                }
            }
        }
    }
}
