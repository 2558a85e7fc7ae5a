//! The fallback polling path (spec.md §4.2): covers queue unavailability at
//! enqueue time, consumer-group lag, and message loss at the queue by
//! scanning durable storage directly. Grounded on the teacher's
//! `TaskReadinessCircuitBreaker`-guarded poller.

use std::sync::Arc;
use std::time::Duration;

use fleetd_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};
use fleetd_shared::store::RunStore;
use fleetd_shared::FleetResult;
use tracing::{info, instrument, warn};

use super::Scheduler;

pub struct FallbackPoller {
    scheduler: Arc<Scheduler>,
    run_store: Arc<dyn RunStore>,
    stale_threshold_secs: i64,
    interval: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl FallbackPoller {
    pub fn new(
        scheduler: Arc<Scheduler>,
        run_store: Arc<dyn RunStore>,
        stale_threshold_secs: i64,
        interval: Duration,
        circuit_breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            "scheduler_fallback_poll".to_string(),
            circuit_breaker_config,
        ));
        Self {
            scheduler,
            run_store,
            stale_threshold_secs,
            interval,
            breaker,
        }
    }

    #[instrument(skip(self))]
    async fn poll_once(&self) -> FleetResult<usize> {
        if !self.breaker.should_allow() {
            warn!("fallback poll circuit open, skipping sweep");
            return Ok(0);
        }

        let start = std::time::Instant::now();
        let stale = match self.run_store.list_stale_queued(self.stale_threshold_secs).await {
            Ok(runs) => {
                self.breaker.record_success(start.elapsed());
                runs
            }
            Err(err) => {
                self.breaker.record_failure(start.elapsed());
                return Err(err);
            }
        };

        let mut hits = 0;
        for run in stale {
            info!(run_id = %run.id, "scheduler.fallback.found");
            if self.scheduler.try_assign(run.id).await?.node_id().is_some() {
                hits += 1;
            }
        }
        Ok(hits)
    }

    /// Runs until `cancel` fires, per Design Note 3's cancellable-background-task model.
    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("fallback poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_once().await {
                        warn!(error = %err, "fallback poll cycle failed");
                    }
                }
            }
        }
    }
}
