//! Postgres-table-backed dispatch queue: PGMQ-style visibility timeout,
//! ack-by-delete, nack-by-making-visible-again. Grounded on the teacher's
//! `PgmqMessagingService` (visibility timeout + ack/nack semantics), minus
//! the `tasker-pgmq` crate's own internals, which are not part of the
//! retrieval pack.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::FleetResult;

use super::{DispatchQueue, QueuedMessage};

/// Default visibility timeout: how long a claimed-but-unacked message stays
/// invisible to other consumers in the same group.
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PostgresDispatchQueue {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl PostgresDispatchQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Creates the backing table if it doesn't exist. Migrations own the
    /// canonical schema; this is a defensive no-op in environments that
    /// run tests against a fresh database without migrations wired up.
    pub async fn ensure_schema(&self) -> FleetResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_queue_messages (
                message_id BIGSERIAL PRIMARY KEY,
                stream TEXT NOT NULL,
                consumer_group TEXT,
                run_id UUID NOT NULL,
                task_id UUID NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                claimed BOOLEAN NOT NULL DEFAULT false
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dispatch_queue_stream_visible \
             ON dispatch_queue_messages (stream, visible_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for PostgresDispatchQueue {
    #[instrument(skip(self))]
    async fn publish(&self, stream: &str, run_id: Uuid, task_id: Uuid) -> FleetResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO dispatch_queue_messages (stream, run_id, task_id) \
             VALUES ($1, $2, $3) RETURNING message_id",
        )
        .bind(stream)
        .bind(run_id)
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    #[instrument(skip(self))]
    async fn ensure_consumer_group(&self, _stream: &str, _group: &str) -> FleetResult<()> {
        // Consumer groups have no separate existence in this table-backed
        // scheme; any consumer polling with a group name participates.
        Ok(())
    }

    #[instrument(skip(self))]
    async fn consume(
        &self,
        stream: &str,
        _group: &str,
        count: i64,
        _block_timeout: Duration,
    ) -> FleetResult<Vec<QueuedMessage>> {
        let visible_until =
            Utc::now() + chrono::Duration::from_std(self.visibility_timeout).unwrap_or_default();

        let rows: Vec<(i64, Uuid, Uuid, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE dispatch_queue_messages
            SET visible_at = $1, claimed = true
            WHERE message_id IN (
                SELECT message_id FROM dispatch_queue_messages
                WHERE stream = $2 AND visible_at <= now()
                ORDER BY message_id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING message_id, run_id, task_id, enqueued_at
            "#,
        )
        .bind(visible_until)
        .bind(stream)
        .bind(count)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(message_id, run_id, task_id, enqueued_at)| QueuedMessage {
                message_id,
                run_id,
                task_id,
                enqueued_at,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn ack(&self, stream: &str, _group: &str, message_id: i64) -> FleetResult<()> {
        sqlx::query("DELETE FROM dispatch_queue_messages WHERE stream = $1 AND message_id = $2")
            .bind(stream)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn length(&self, stream: &str) -> FleetResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT count(*) FROM dispatch_queue_messages WHERE stream = $1")
                .bind(stream)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    #[instrument(skip(self))]
    async fn pending_count(&self, stream: &str, _group: &str) -> FleetResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM dispatch_queue_messages \
             WHERE stream = $1 AND claimed = true AND visible_at > now()",
        )
        .bind(stream)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

impl PostgresDispatchQueue {
    /// Make a claimed message immediately visible again (nack / requeue).
    #[instrument(skip(self))]
    pub async fn nack(&self, stream: &str, message_id: i64) -> FleetResult<()> {
        sqlx::query(
            "UPDATE dispatch_queue_messages SET visible_at = now(), claimed = false \
             WHERE stream = $1 AND message_id = $2",
        )
        .bind(stream)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
