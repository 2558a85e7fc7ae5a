//! Postgres-backed storage: the source of truth per spec.md §5's
//! shared-resource policy (queues and the bus are caches/transports; this
//! is where the fallback poller reconciles any gap).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};
use crate::models::{
    Event, EventInput, EventPayload, Node, NodeCapacity, NodeStatus, Run, RunSnapshot, RunStatus,
    Task, TaskStatus, TaskType,
};

use super::{EventStore, NodeStore, RunStore, TaskStore};

#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task))]
    async fn create(&self, task: Task) -> FleetResult<Task> {
        sqlx::query(
            "INSERT INTO tasks (id, name, task_type, status, spec, parent_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(task.task_type)
        .bind(task.status)
        .bind(serde_json::to_value(&task.spec).map_err(|e| FleetError::internal(e.to_string()))?)
        .bind(task.parent_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> FleetResult<Task> {
        let row: (Uuid, String, TaskType, TaskStatus, serde_json::Value, Option<Uuid>, chrono::DateTime<Utc>, chrono::DateTime<Utc>) =
            sqlx::query_as(
                "SELECT id, name, task_type, status, spec, parent_id, created_at, updated_at \
                 FROM tasks WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Task {
            id: row.0,
            name: row.1,
            task_type: row.2,
            status: row.3,
            spec: serde_json::from_value(row.4).map_err(|e| FleetError::internal(e.to_string()))?,
            parent_id: row.5,
            created_at: row.6,
            updated_at: row.7,
        })
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: Uuid, status: TaskStatus) -> FleetResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $1, updated_at = now() WHERE id = $2",
        )
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FleetError::not_found(format!("task {id}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_run(
        row: (
            Uuid,
            Uuid,
            RunStatus,
            Option<Uuid>,
            serde_json::Value,
            Option<chrono::DateTime<Utc>>,
            Option<chrono::DateTime<Utc>>,
            Option<String>,
            chrono::DateTime<Utc>,
            chrono::DateTime<Utc>,
        ),
    ) -> FleetResult<Run> {
        Ok(Run {
            id: row.0,
            task_id: row.1,
            status: row.2,
            node_id: row.3,
            snapshot: serde_json::from_value(row.4).map_err(|e| FleetError::internal(e.to_string()))?,
            started_at: row.5,
            finished_at: row.6,
            error: row.7,
            created_at: row.8,
            updated_at: row.9,
        })
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, run))]
    async fn create(&self, run: Run) -> FleetResult<Run> {
        sqlx::query(
            "INSERT INTO runs (id, task_id, status, node_id, snapshot, started_at, finished_at, error, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(run.id)
        .bind(run.task_id)
        .bind(run.status)
        .bind(run.node_id)
        .bind(serde_json::to_value(&run.snapshot).map_err(|e| FleetError::internal(e.to_string()))?)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> FleetResult<Run> {
        let row = sqlx::query_as(
            "SELECT id, task_id, status, node_id, snapshot, started_at, finished_at, error, created_at, updated_at \
             FROM runs WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_run(row)
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: Uuid, status: RunStatus) -> FleetResult<()> {
        let result = sqlx::query("UPDATE runs SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FleetError::not_found(format!("run {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn assign_if_queued(&self, id: Uuid, node_id: Uuid) -> FleetResult<bool> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'assigned', node_id = $1, updated_at = now() \
             WHERE id = $2 AND status = 'queued'",
        )
        .bind(node_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn mark_started(&self, id: Uuid) -> FleetResult<()> {
        sqlx::query(
            "UPDATE runs SET started_at = COALESCE(started_at, now()), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_finished(&self, id: Uuid, error: Option<String>) -> FleetResult<()> {
        sqlx::query(
            "UPDATE runs SET finished_at = COALESCE(finished_at, now()), error = $1, updated_at = now() \
             WHERE id = $2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_stale_queued(&self, stale_threshold_secs: i64) -> FleetResult<Vec<Run>> {
        let rows = sqlx::query_as(
            "SELECT id, task_id, status, node_id, snapshot, started_at, finished_at, error, created_at, updated_at \
             FROM runs WHERE status = 'queued' AND created_at <= now() - ($1 || ' seconds')::interval",
        )
        .bind(stale_threshold_secs.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_run).collect()
    }

    #[instrument(skip(self))]
    async fn count_active_for_node(&self, node_id: Uuid) -> FleetResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM runs WHERE node_id = $1 AND status IN ('assigned', 'running', 'paused')",
        )
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, inputs))]
    async fn append_batch(&self, run_id: Uuid, inputs: Vec<EventInput>) -> FleetResult<Vec<Event>> {
        for input in &inputs {
            if input.seq < 1 {
                return Err(FleetError::validation("event seq must be >= 1"));
            }
        }

        // All-or-nothing: a unique-constraint violation on (run_id, seq)
        // rolls back the whole batch, per spec.md §9.
        let mut tx = self.pool.begin().await?;
        let mut appended = Vec::with_capacity(inputs.len());
        for input in inputs {
            let id = Uuid::new_v4();
            let result = sqlx::query(
                "INSERT INTO events (id, run_id, seq, event_type, timestamp, payload, raw) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(id)
            .bind(run_id)
            .bind(input.seq)
            .bind(&input.event_type)
            .bind(input.timestamp)
            .bind(&input.payload)
            .bind(&input.raw)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => appended.push(Event {
                    id,
                    run_id,
                    seq: input.seq,
                    event_type: input.event_type,
                    timestamp: input.timestamp,
                    payload: EventPayload(input.payload),
                    raw: input.raw,
                }),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    return Err(FleetError::conflict(format!(
                        "duplicate seq {} for run {run_id}",
                        input.seq
                    )));
                }
                Err(err) => return Err(FleetError::from(err)),
            }
        }
        tx.commit().await?;
        Ok(appended)
    }

    #[instrument(skip(self))]
    async fn list_from_seq(&self, run_id: Uuid, from_seq: i64, limit: i64) -> FleetResult<Vec<Event>> {
        let rows: Vec<(Uuid, Uuid, i64, String, chrono::DateTime<Utc>, serde_json::Value, Option<String>)> =
            sqlx::query_as(
                "SELECT id, run_id, seq, event_type, timestamp, payload, raw FROM events \
                 WHERE run_id = $1 AND seq >= $2 ORDER BY seq ASC LIMIT $3",
            )
            .bind(run_id)
            .bind(from_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Event {
                id: r.0,
                run_id: r.1,
                seq: r.2,
                event_type: r.3,
                timestamp: r.4,
                payload: EventPayload(r.5),
                raw: r.6,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn count_for_run(&self, run_id: Uuid) -> FleetResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM events WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresNodeStore {
    pool: PgPool,
}

impl PostgresNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_node(
        row: (Uuid, NodeStatus, serde_json::Value, serde_json::Value, Option<chrono::DateTime<Utc>>),
    ) -> FleetResult<Node> {
        Ok(Node {
            id: row.0,
            status: row.1,
            labels: serde_json::from_value(row.2).map_err(|e| FleetError::internal(e.to_string()))?,
            capacity: serde_json::from_value(row.3).map_err(|e| FleetError::internal(e.to_string()))?,
            last_heartbeat: row.4,
        })
    }
}

#[async_trait]
impl NodeStore for PostgresNodeStore {
    #[instrument(skip(self, labels, capacity))]
    async fn upsert_heartbeat(
        &self,
        node_id: Uuid,
        incoming_status: Option<NodeStatus>,
        labels: Option<HashMap<String, String>>,
        capacity: Option<NodeCapacity>,
    ) -> FleetResult<Node> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid, NodeStatus, serde_json::Value, serde_json::Value, Option<chrono::DateTime<Utc>>)> =
            sqlx::query_as("SELECT id, status, labels, capacity, last_heartbeat FROM nodes WHERE id = $1 FOR UPDATE")
                .bind(node_id)
                .fetch_optional(&mut *tx)
                .await?;

        let node = if let Some(row) = existing {
            let mut node = Self::row_to_node(row)?;
            node.last_heartbeat = Some(Utc::now());
            if let Some(labels) = labels {
                node.labels = labels;
            }
            if let Some(capacity) = capacity {
                node.capacity = capacity;
            }
            if let Some(incoming) = incoming_status {
                let transitioning_online_offline =
                    matches!(incoming, NodeStatus::Online | NodeStatus::Offline);
                if !node.status.is_administrative() && transitioning_online_offline {
                    node.status = incoming;
                }
            }
            sqlx::query(
                "UPDATE nodes SET status = $1, labels = $2, capacity = $3, last_heartbeat = $4 WHERE id = $5",
            )
            .bind(node.status)
            .bind(serde_json::to_value(&node.labels).map_err(|e| FleetError::internal(e.to_string()))?)
            .bind(serde_json::to_value(&node.capacity).map_err(|e| FleetError::internal(e.to_string()))?)
            .bind(node.last_heartbeat)
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
            node
        } else {
            let node = Node {
                id: node_id,
                status: incoming_status.unwrap_or(NodeStatus::Online),
                labels: labels.unwrap_or_default(),
                capacity: capacity.unwrap_or_default(),
                last_heartbeat: Some(Utc::now()),
            };
            sqlx::query(
                "INSERT INTO nodes (id, status, labels, capacity, last_heartbeat) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(node.id)
            .bind(node.status)
            .bind(serde_json::to_value(&node.labels).map_err(|e| FleetError::internal(e.to_string()))?)
            .bind(serde_json::to_value(&node.capacity).map_err(|e| FleetError::internal(e.to_string()))?)
            .bind(node.last_heartbeat)
            .execute(&mut *tx)
            .await?;
            node
        };

        tx.commit().await?;
        Ok(node)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> FleetResult<Node> {
        let row = sqlx::query_as(
            "SELECT id, status, labels, capacity, last_heartbeat FROM nodes WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_node(row)
    }

    #[instrument(skip(self))]
    async fn list(&self) -> FleetResult<Vec<Node>> {
        let rows = sqlx::query_as("SELECT id, status, labels, capacity, last_heartbeat FROM nodes")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_node).collect()
    }

    #[instrument(skip(self))]
    async fn set_admin_status(&self, id: Uuid, status: NodeStatus) -> FleetResult<()> {
        let result = sqlx::query("UPDATE nodes SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FleetError::not_found(format!("node {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate_stale(&self, stale_threshold_secs: i64) -> FleetResult<u64> {
        let result = sqlx::query(
            "UPDATE nodes SET status = 'offline' \
             WHERE status = 'online' AND last_heartbeat <= now() - ($1 || ' seconds')::interval",
        )
        .bind(stale_threshold_secs.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
