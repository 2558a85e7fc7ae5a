//! In-memory store implementations for fast unit tests of scheduler,
//! lifecycle, and gateway logic that don't need a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};
use crate::models::{
    Event, EventInput, EventPayload, Node, NodeCapacity, NodeStatus, Run, RunStatus, Task,
    TaskStatus,
};

use super::{EventStore, NodeStore, RunStore, TaskStore};

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> FleetResult<Task> {
        let mut tasks = self.tasks.lock().expect("mutex poisoned");
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> FleetResult<Task> {
        let tasks = self.tasks.lock().expect("mutex poisoned");
        tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(format!("task {id}")))
    }

    async fn set_status(&self, id: Uuid, status: TaskStatus) -> FleetResult<()> {
        let mut tasks = self.tasks.lock().expect("mutex poisoned");
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| FleetError::not_found(format!("task {id}")))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: Run) -> FleetResult<Run> {
        let mut runs = self.runs.lock().expect("mutex poisoned");
        runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: Uuid) -> FleetResult<Run> {
        let runs = self.runs.lock().expect("mutex poisoned");
        runs.get(&id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(format!("run {id}")))
    }

    async fn set_status(&self, id: Uuid, status: RunStatus) -> FleetResult<()> {
        let mut runs = self.runs.lock().expect("mutex poisoned");
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| FleetError::not_found(format!("run {id}")))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn assign_if_queued(&self, id: Uuid, node_id: Uuid) -> FleetResult<bool> {
        let mut runs = self.runs.lock().expect("mutex poisoned");
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| FleetError::not_found(format!("run {id}")))?;
        if run.status != RunStatus::Queued {
            return Ok(false);
        }
        run.status = RunStatus::Assigned;
        run.node_id = Some(node_id);
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_started(&self, id: Uuid) -> FleetResult<()> {
        let mut runs = self.runs.lock().expect("mutex poisoned");
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| FleetError::not_found(format!("run {id}")))?;
        if run.started_at.is_none() {
            run.started_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_finished(&self, id: Uuid, error: Option<String>) -> FleetResult<()> {
        let mut runs = self.runs.lock().expect("mutex poisoned");
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| FleetError::not_found(format!("run {id}")))?;
        if run.finished_at.is_none() {
            run.finished_at = Some(Utc::now());
        }
        run.error = error;
        Ok(())
    }

    async fn list_stale_queued(&self, stale_threshold_secs: i64) -> FleetResult<Vec<Run>> {
        let runs = self.runs.lock().expect("mutex poisoned");
        let cutoff = Utc::now() - chrono::Duration::seconds(stale_threshold_secs);
        Ok(runs
            .values()
            .filter(|r| r.status == RunStatus::Queued && r.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn count_active_for_node(&self, node_id: Uuid) -> FleetResult<i64> {
        let runs = self.runs.lock().expect("mutex poisoned");
        Ok(runs
            .values()
            .filter(|r| r.node_id == Some(node_id) && r.capacity_counts_toward_node())
            .count() as i64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<HashMap<Uuid, Vec<Event>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_batch(&self, run_id: Uuid, inputs: Vec<EventInput>) -> FleetResult<Vec<Event>> {
        let mut events = self.events.lock().expect("mutex poisoned");
        let existing = events.entry(run_id).or_default();
        let existing_seqs: std::collections::HashSet<i64> =
            existing.iter().map(|e| e.seq).collect();

        for input in &inputs {
            if input.seq < 1 {
                return Err(FleetError::validation("event seq must be >= 1"));
            }
            if existing_seqs.contains(&input.seq) {
                return Err(FleetError::conflict(format!(
                    "duplicate seq {} for run {run_id}",
                    input.seq
                )));
            }
        }

        let mut appended = Vec::with_capacity(inputs.len());
        for input in inputs {
            let event = Event {
                id: Uuid::new_v4(),
                run_id,
                seq: input.seq,
                event_type: input.event_type,
                timestamp: input.timestamp,
                payload: EventPayload(input.payload),
                raw: input.raw,
            };
            existing.push(event.clone());
            appended.push(event);
        }
        existing.sort_by_key(|e| e.seq);
        Ok(appended)
    }

    async fn list_from_seq(&self, run_id: Uuid, from_seq: i64, limit: i64) -> FleetResult<Vec<Event>> {
        let events = self.events.lock().expect("mutex poisoned");
        Ok(events
            .get(&run_id)
            .map(|evs| {
                evs.iter()
                    .filter(|e| e.seq >= from_seq)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_for_run(&self, run_id: Uuid) -> FleetResult<i64> {
        let events = self.events.lock().expect("mutex poisoned");
        Ok(events.get(&run_id).map(|evs| evs.len() as i64).unwrap_or(0))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    nodes: Mutex<HashMap<Uuid, Node>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn upsert_heartbeat(
        &self,
        node_id: Uuid,
        incoming_status: Option<NodeStatus>,
        labels: Option<HashMap<String, String>>,
        capacity: Option<NodeCapacity>,
    ) -> FleetResult<Node> {
        let mut nodes = self.nodes.lock().expect("mutex poisoned");
        let now = Utc::now();
        let is_new = !nodes.contains_key(&node_id);
        let node = nodes.entry(node_id).or_insert_with(|| Node {
            id: node_id,
            status: incoming_status.unwrap_or(NodeStatus::Online),
            labels: HashMap::new(),
            capacity: NodeCapacity::default(),
            last_heartbeat: None,
        });

        node.last_heartbeat = Some(now);
        if let Some(labels) = labels {
            node.labels = labels;
        }
        if let Some(capacity) = capacity {
            node.capacity = capacity;
        }
        if !is_new {
            if let Some(incoming) = incoming_status {
                let transitioning_online_offline =
                    matches!(incoming, NodeStatus::Online | NodeStatus::Offline);
                if !node.status.is_administrative() && transitioning_online_offline {
                    node.status = incoming;
                }
            }
        }
        Ok(node.clone())
    }

    async fn get(&self, id: Uuid) -> FleetResult<Node> {
        let nodes = self.nodes.lock().expect("mutex poisoned");
        nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(format!("node {id}")))
    }

    async fn list(&self) -> FleetResult<Vec<Node>> {
        let nodes = self.nodes.lock().expect("mutex poisoned");
        Ok(nodes.values().cloned().collect())
    }

    async fn set_admin_status(&self, id: Uuid, status: NodeStatus) -> FleetResult<()> {
        let mut nodes = self.nodes.lock().expect("mutex poisoned");
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| FleetError::not_found(format!("node {id}")))?;
        node.status = status;
        Ok(())
    }

    async fn deactivate_stale(&self, stale_threshold_secs: i64) -> FleetResult<u64> {
        let mut nodes = self.nodes.lock().expect("mutex poisoned");
        let cutoff = Utc::now() - chrono::Duration::seconds(stale_threshold_secs);
        let mut count = 0;
        for node in nodes.values_mut() {
            if node.status == NodeStatus::Online {
                if let Some(last) = node.last_heartbeat {
                    if last <= cutoff {
                        node.status = NodeStatus::Offline;
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_preserves_administrative_status() {
        let store = InMemoryNodeStore::new();
        let node_id = Uuid::new_v4();
        store
            .upsert_heartbeat(node_id, Some(NodeStatus::Online), None, None)
            .await
            .unwrap();
        store.set_admin_status(node_id, NodeStatus::Draining).await.unwrap();

        let node = store
            .upsert_heartbeat(node_id, Some(NodeStatus::Online), None, None)
            .await
            .unwrap();
        assert_eq!(node.status, NodeStatus::Draining);
    }

    #[tokio::test]
    async fn duplicate_seq_rejects_whole_batch() {
        let store = InMemoryEventStore::new();
        let run_id = Uuid::new_v4();
        store
            .append_batch(
                run_id,
                vec![EventInput {
                    seq: 1,
                    event_type: "run_started".into(),
                    timestamp: Utc::now(),
                    payload: serde_json::json!({}),
                    raw: None,
                }],
            )
            .await
            .unwrap();

        let result = store
            .append_batch(
                run_id,
                vec![
                    EventInput {
                        seq: 2,
                        event_type: "progress".into(),
                        timestamp: Utc::now(),
                        payload: serde_json::json!({}),
                        raw: None,
                    },
                    EventInput {
                        seq: 1,
                        event_type: "dup".into(),
                        timestamp: Utc::now(),
                        payload: serde_json::json!({}),
                        raw: None,
                    },
                ],
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.count_for_run(run_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn assign_if_queued_is_conditional() {
        let store = InMemoryRunStore::new();
        let run_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let run = Run {
            id: run_id,
            task_id,
            status: RunStatus::Queued,
            node_id: None,
            snapshot: crate::models::RunSnapshot {
                prompt: None,
                workspace: None,
                labels: HashMap::new(),
                node_hint: None,
                agent_binding: None,
                extra: serde_json::json!({}),
            },
            started_at: None,
            finished_at: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create(run).await.unwrap();

        let node_a = Uuid::new_v4();
        let node_b = Uuid::new_v4();
        assert!(store.assign_if_queued(run_id, node_a).await.unwrap());
        assert!(!store.assign_if_queued(run_id, node_b).await.unwrap());

        let run = store.get(run_id).await.unwrap();
        assert_eq!(run.node_id, Some(node_a));
    }
}
