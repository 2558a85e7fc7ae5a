//! NodeLiveness: heartbeat fusion and the stale-node sweep (spec.md §4.4).
//! The online predicate itself lives on `NodeStore::upsert_heartbeat`'s
//! sticky-administrative-status rule; this module owns the request-facing
//! API and the background sweep.

use std::sync::Arc;
use std::time::Duration;

use fleetd_shared::models::{HeartbeatInput, Node, NodeStatus};
use fleetd_shared::store::NodeStore;
use fleetd_shared::FleetResult;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct NodeLiveness {
    node_store: Arc<dyn NodeStore>,
    freshness_window: Duration,
}

impl NodeLiveness {
    pub fn new(node_store: Arc<dyn NodeStore>, freshness_window: Duration) -> Self {
        Self {
            node_store,
            freshness_window,
        }
    }

    #[instrument(skip(self))]
    pub async fn heartbeat(&self, input: HeartbeatInput) -> FleetResult<Node> {
        self.node_store
            .upsert_heartbeat(input.node_id, input.status, input.labels, input.capacity)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_admin_status(&self, node_id: Uuid, status: NodeStatus) -> FleetResult<()> {
        self.node_store.set_admin_status(node_id, status).await
    }

    /// List Nodes with their fused (heartbeat-aware) status: an Node with
    /// `status==online` but a stale heartbeat reads back as `offline`.
    #[instrument(skip(self))]
    pub async fn list_fused(&self) -> FleetResult<Vec<Node>> {
        let nodes = self.node_store.list().await?;
        let window = chrono::Duration::from_std(self.freshness_window).unwrap_or_default();
        Ok(nodes
            .into_iter()
            .map(|mut n| {
                if n.status == NodeStatus::Online {
                    let fresh = n
                        .last_heartbeat
                        .map(|hb| chrono::Utc::now() - hb <= window)
                        .unwrap_or(false);
                    if !fresh {
                        n.status = NodeStatus::Offline;
                    }
                }
                n
            })
            .collect())
    }

    pub async fn get_fused(&self, node_id: Uuid) -> FleetResult<Node> {
        let mut node = self.node_store.get(node_id).await?;
        let window = chrono::Duration::from_std(self.freshness_window).unwrap_or_default();
        if node.status == NodeStatus::Online {
            let fresh = node
                .last_heartbeat
                .map(|hb| chrono::Utc::now() - hb <= window)
                .unwrap_or(false);
            if !fresh {
                node.status = NodeStatus::Offline;
            }
        }
        Ok(node)
    }

    /// Background sweep durably downgrading stale online Nodes to offline,
    /// so reads stay correct even without heartbeat-fusion applied at read
    /// time (spec.md §4.4's stale-deactivation note).
    pub async fn run_sweep(
        self: Arc<Self>,
        interval: Duration,
        stale_threshold_secs: i64,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("node liveness sweep shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.node_store.deactivate_stale(stale_threshold_secs).await {
                        Ok(count) if count > 0 => info!(count, "node_liveness.sweep.deactivated"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "node liveness sweep failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_shared::store::memory::InMemoryNodeStore;

    #[tokio::test]
    async fn stale_heartbeat_reads_as_offline() {
        let store = Arc::new(InMemoryNodeStore::new());
        let liveness = NodeLiveness::new(store.clone(), Duration::from_secs(45));
        let node_id = Uuid::new_v4();
        store
            .upsert_heartbeat(node_id, Some(NodeStatus::Online), None, None)
            .await
            .unwrap();

        // Freshness window of zero makes any heartbeat instantly stale.
        let liveness = NodeLiveness::new(store, Duration::from_secs(0));
        let node = liveness.get_fused(node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Offline);
        let _ = liveness;
    }

    #[tokio::test]
    async fn admin_status_excludes_from_scheduling_even_when_fresh() {
        let store = Arc::new(InMemoryNodeStore::new());
        let node_id = Uuid::new_v4();
        store
            .upsert_heartbeat(node_id, Some(NodeStatus::Online), None, None)
            .await
            .unwrap();
        store.set_admin_status(node_id, NodeStatus::Draining).await.unwrap();
        let liveness = NodeLiveness::new(store, Duration::from_secs(45));
        let node = liveness.get_fused(node_id).await.unwrap();
        assert_eq!(node.status, NodeStatus::Draining);
    }
}
