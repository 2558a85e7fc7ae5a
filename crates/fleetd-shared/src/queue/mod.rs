//! Durable dispatch queues: the `scheduler:runs` stream feeding the
//! Scheduler and the per-node `nodes:{id}:runs` streams feeding workers.
//! Consumer-group semantics (at-most-one consumer per message, visibility
//! timeout, explicit ack) follow the teacher's PGMQ provider.

pub mod bus;
pub mod memory;
pub mod postgres;
pub mod router;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::FleetResult;

pub use router::{StreamRouter, StreamRouterKind};

/// A message read from a stream, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message_id: i64,
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

/// Durable, ordered, at-least-once message delivery with consumer groups,
/// per spec.md §4.3's per-stream contract.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Append to the tail of `stream`, returning the new message's id.
    async fn publish(&self, stream: &str, run_id: Uuid, task_id: Uuid) -> FleetResult<i64>;

    /// Idempotent; double-creation of the same group is not an error.
    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> FleetResult<()>;

    /// Read up to `count` unclaimed messages for `group`, blocking up to
    /// `block_timeout` if none are immediately available. Claimed messages
    /// become invisible to other consumers in the group until the
    /// visibility timeout elapses.
    async fn consume(
        &self,
        stream: &str,
        group: &str,
        count: i64,
        block_timeout: Duration,
    ) -> FleetResult<Vec<QueuedMessage>>;

    /// Remove a message from the pending set permanently.
    async fn ack(&self, stream: &str, group: &str, message_id: i64) -> FleetResult<()>;

    /// Total message count on the stream.
    async fn length(&self, stream: &str) -> FleetResult<i64>;

    /// Unacknowledged (claimed-but-not-acked) message count for `group`.
    async fn pending_count(&self, stream: &str, group: &str) -> FleetResult<i64>;
}
