//! Scheduler: the cooperative control loop matching queued Runs to Nodes
//! (spec.md §4.2).

pub mod fallback;
pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use fleetd_shared::config::SchedulerConfig;
use fleetd_shared::models::{Node, NodeStatus, RunStatus};
use fleetd_shared::queue::{DispatchQueue, StreamRouterKind};
use fleetd_shared::resilience::{CircuitBreaker, CircuitState};
use fleetd_shared::store::{NodeStore, RunStore};
use fleetd_shared::FleetResult;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use strategies::RoundRobinCursor;

pub struct Scheduler {
    run_store: Arc<dyn RunStore>,
    node_store: Arc<dyn NodeStore>,
    queue: Arc<dyn DispatchQueue>,
    router: StreamRouterKind,
    config: SchedulerConfig,
    node_freshness_secs: u64,
    round_robin: RoundRobinCursor,
    storage_breaker: Arc<CircuitBreaker>,
}

impl Scheduler {
    pub fn new(
        run_store: Arc<dyn RunStore>,
        node_store: Arc<dyn NodeStore>,
        queue: Arc<dyn DispatchQueue>,
        router: StreamRouterKind,
        config: SchedulerConfig,
        node_freshness_secs: u64,
    ) -> Self {
        let storage_breaker = Arc::new(CircuitBreaker::new(
            "scheduler_storage".to_string(),
            config.circuit_breaker.to_resilience_config(),
        ));
        Self {
            run_store,
            node_store,
            queue,
            router,
            config,
            node_freshness_secs,
            round_robin: RoundRobinCursor::new(),
            storage_breaker,
        }
    }

    /// Current state of the storage-access circuit breaker, for the health
    /// endpoint.
    pub fn storage_breaker_state(&self) -> CircuitState {
        self.storage_breaker.state()
    }

    /// Candidate set for eligibility: Node status fused with heartbeat
    /// freshness per spec.md §4.4's online predicate.
    async fn eligible_nodes(&self) -> FleetResult<Vec<Node>> {
        let nodes = self.node_store.list().await?;
        let freshness_window = chrono::Duration::from_std(Duration::from_secs(self.node_freshness_secs))
            .unwrap_or_default();
        Ok(nodes
            .into_iter()
            .filter(|n| {
                n.status == NodeStatus::Online
                    && n.last_heartbeat
                        .map(|hb| chrono::Utc::now() - hb <= freshness_window)
                        .unwrap_or(false)
            })
            .collect())
    }

    async fn active_counts(&self, nodes: &[Node]) -> FleetResult<Vec<(Uuid, i64)>> {
        let mut counts = Vec::with_capacity(nodes.len());
        for node in nodes {
            let count = self.run_store.count_active_for_node(node.id).await?;
            counts.push((node.id, count));
        }
        Ok(counts)
    }

    /// Attempts to place `run_id` (already loaded as `queued`).
    #[instrument(skip(self))]
    pub(crate) async fn try_assign(&self, run_id: Uuid) -> FleetResult<AssignOutcome> {
        let run = self.run_store.get(run_id).await?;
        if run.status != RunStatus::Queued {
            // Idempotency: already moved on, nothing to do.
            return Ok(AssignOutcome::AlreadySettled);
        }

        let candidates = self.eligible_nodes().await?;
        let active_counts = self.active_counts(&candidates).await?;
        let candidates = strategies::apply_capacity_filter(candidates, &active_counts);

        let chosen = strategies::run_strategy_chain(
            &self.config.strategy.chain,
            &candidates,
            &run.snapshot,
            &active_counts,
            self.config.strategy.label_match_load_balance,
            &self.round_robin,
        );

        let Some(node) = chosen else {
            if run.snapshot.labels.is_empty() {
                info!(%run_id, "scheduler.run.no_nodes");
            } else {
                info!(%run_id, "scheduler.run.no_match");
            }
            return Ok(AssignOutcome::NoMatch);
        };

        let assigned = self.run_store.assign_if_queued(run_id, node.id).await?;
        if !assigned {
            // Another scheduler won the race; nothing further to publish.
            return Ok(AssignOutcome::LostRace);
        }

        let node_stream = self.router.node_stream(node.id);
        self.queue.publish(&node_stream, run_id, run.task_id).await?;
        Ok(AssignOutcome::Assigned(node.id))
    }

    /// One push-driven cycle: read a batch, reload each Run, attempt
    /// assignment, ack or leave pending per spec.md §4.2 step 5-6.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> FleetResult<usize> {
        if !self.storage_breaker.should_allow() {
            warn!("scheduler storage circuit open, skipping cycle");
            return Ok(0);
        }

        let stream = self.router.scheduler_stream();
        let group = self.router.scheduler_group();
        self.queue.ensure_consumer_group(&stream, &group).await?;

        let start = std::time::Instant::now();
        let batch = match self
            .queue
            .consume(&stream, &group, self.config.read_count, self.config.read_timeout())
            .await
        {
            Ok(batch) => {
                self.storage_breaker.record_success(start.elapsed());
                batch
            }
            Err(err) => {
                self.storage_breaker.record_failure(start.elapsed());
                return Err(err);
            }
        };

        let mut processed = 0;
        for message in &batch {
            // Reload-then-decide handles duplicates and lost races; both
            // outcomes ack the scheduler message. A genuine no-match leaves
            // the message unacked so the visibility timeout redelivers it
            // (spec.md §4.2 step 5, §8's at-least-once law).
            let outcome = self.try_assign(message.run_id).await?;
            if outcome.should_ack() {
                self.queue.ack(&stream, &group, message.message_id).await?;
            }
            processed += 1;
        }
        Ok(processed)
    }
}

/// Result of a single placement attempt, distinguishing the no-match case
/// (message stays pending for redelivery) from everything else (ack it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOutcome {
    Assigned(Uuid),
    AlreadySettled,
    LostRace,
    NoMatch,
}

impl AssignOutcome {
    pub(crate) fn node_id(self) -> Option<Uuid> {
        match self {
            AssignOutcome::Assigned(node_id) => Some(node_id),
            _ => None,
        }
    }

    fn should_ack(self) -> bool {
        !matches!(self, AssignOutcome::NoMatch)
    }
}
