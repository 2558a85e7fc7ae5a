//! Narrow per-entity storage capability traits (Design Note 2): a concrete
//! process composes them behind one value rather than depending on one
//! combined "cache store" façade.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::FleetResult;
use crate::models::{Event, EventInput, Node, NodeStatus, Run, RunStatus, Task, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: Task) -> FleetResult<Task>;
    async fn get(&self, id: Uuid) -> FleetResult<Task>;
    async fn set_status(&self, id: Uuid, status: TaskStatus) -> FleetResult<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: Run) -> FleetResult<Run>;
    async fn get(&self, id: Uuid) -> FleetResult<Run>;

    /// Unconditional status update, used by lifecycle transitions that have
    /// already validated the FSM edge.
    async fn set_status(&self, id: Uuid, status: RunStatus) -> FleetResult<()>;

    /// `queued -> assigned` conditional on the current status still being
    /// `queued`. Returns `true` if this call performed the transition.
    async fn assign_if_queued(&self, id: Uuid, node_id: Uuid) -> FleetResult<bool>;

    /// Marks `started_at` on first transition to running.
    async fn mark_started(&self, id: Uuid) -> FleetResult<()>;

    /// Marks `finished_at` on first terminal transition.
    async fn mark_finished(&self, id: Uuid, error: Option<String>) -> FleetResult<()>;

    /// Runs in `queued` older than `stale_threshold_secs`, for the fallback poller.
    async fn list_stale_queued(&self, stale_threshold_secs: i64) -> FleetResult<Vec<Run>>;

    /// Count of Runs in `{assigned, running, paused}` for a given node, for the capacity filter.
    async fn count_active_for_node(&self, node_id: Uuid) -> FleetResult<i64>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// All-or-nothing per batch (spec.md §9's pinned open-question answer).
    async fn append_batch(&self, run_id: Uuid, events: Vec<EventInput>) -> FleetResult<Vec<Event>>;

    async fn list_from_seq(&self, run_id: Uuid, from_seq: i64, limit: i64) -> FleetResult<Vec<Event>>;

    async fn count_for_run(&self, run_id: Uuid) -> FleetResult<i64>;
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Creates the Node if absent, otherwise updates heartbeat/labels/capacity
    /// and status per the sticky-administrative-status rule (spec.md §4.4).
    async fn upsert_heartbeat(
        &self,
        node_id: Uuid,
        incoming_status: Option<NodeStatus>,
        labels: Option<std::collections::HashMap<String, String>>,
        capacity: Option<crate::models::NodeCapacity>,
    ) -> FleetResult<Node>;

    async fn get(&self, id: Uuid) -> FleetResult<Node>;
    async fn list(&self) -> FleetResult<Vec<Node>>;

    /// Administrative status change; always overwrites (not sticky against itself).
    async fn set_admin_status(&self, id: Uuid, status: NodeStatus) -> FleetResult<()>;

    /// Downgrade Nodes whose heartbeat exceeds `stale_threshold_secs` to `offline`.
    async fn deactivate_stale(&self, stale_threshold_secs: i64) -> FleetResult<u64>;
}
