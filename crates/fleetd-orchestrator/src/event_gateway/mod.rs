//! EventGateway: ingest, push-bus mirroring, and live subscription serving
//! (spec.md §4.6).

pub mod subscribers;

use std::sync::Arc;

use fleetd_shared::models::{is_terminal_event_type, Event, EventInput, EVENT_RUN_STARTED};
use fleetd_shared::queue::bus::EventBus;
use fleetd_shared::store::{EventStore, RunStore, TaskStore};
use fleetd_shared::FleetResult;
use tokio::sync::broadcast;
use tracing::instrument;
use uuid::Uuid;

use crate::lifecycle::RunLifecycle;

pub struct EventGateway {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    task_store: Arc<dyn TaskStore>,
    bus: Arc<dyn EventBus>,
    lifecycle: Arc<RunLifecycle>,
}

impl EventGateway {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        task_store: Arc<dyn TaskStore>,
        bus: Arc<dyn EventBus>,
        lifecycle: Arc<RunLifecycle>,
    ) -> Self {
        Self {
            event_store,
            run_store,
            task_store,
            bus,
            lifecycle,
        }
    }

    /// Persists a batch of events (all-or-nothing, per spec.md §9), mirrors
    /// each onto the push bus, and applies the first-event Task/Run
    /// promotion at most once per call.
    #[instrument(skip(self, inputs))]
    pub async fn post_events(&self, run_id: Uuid, inputs: Vec<EventInput>) -> FleetResult<Vec<Event>> {
        let existing_count = self.event_store.count_for_run(run_id).await?;
        let is_first_batch = existing_count == 0;

        let qualifies = inputs
            .iter()
            .any(|e| e.seq == 1 || e.event_type == EVENT_RUN_STARTED);

        let appended = self.event_store.append_batch(run_id, inputs).await?;

        for event in &appended {
            self.bus.publish(event).await?;
        }

        if is_first_batch && qualifies {
            let run = self.run_store.get(run_id).await?;
            let task = self.task_store.get(run.task_id).await?;
            self.lifecycle
                .maybe_promote_on_first_event(run_id, true, &task)
                .await?;
        }

        Ok(appended)
    }

    pub async fn list_events(&self, run_id: Uuid, from_seq: i64, limit: i64) -> FleetResult<Vec<Event>> {
        self.event_store.list_from_seq(run_id, from_seq, limit).await
    }

    /// Opens a push-bus subscription for `run_id`. Callers that also need
    /// the polling fallback should use [`subscribers::spawn_polling_fallback`].
    pub async fn subscribe(&self, run_id: Uuid) -> FleetResult<broadcast::Receiver<Event>> {
        self.bus.subscribe(run_id).await
    }

    pub fn run_store(&self) -> Arc<dyn RunStore> {
        self.run_store.clone()
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.event_store.clone()
    }
}

pub fn is_terminal(event_type: &str) -> bool {
    is_terminal_event_type(event_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetd_shared::models::{Run, RunSnapshot, RunStatus, Task, TaskSpec, TaskStatus, TaskType};
    use fleetd_shared::queue::bus::InMemoryEventBus;
    use fleetd_shared::queue::memory::InMemoryDispatchQueue;
    use fleetd_shared::queue::StreamRouterKind;
    use fleetd_shared::store::memory::{InMemoryEventStore, InMemoryRunStore, InMemoryTaskStore};
    use std::collections::HashMap;

    async fn gateway() -> (
        EventGateway,
        Arc<InMemoryRunStore>,
        Arc<InMemoryTaskStore>,
        Uuid,
        Uuid,
    ) {
        let event_store = Arc::new(InMemoryEventStore::new());
        let run_store = Arc::new(InMemoryRunStore::new());
        let task_store = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = Arc::new(InMemoryDispatchQueue::new());
        let lifecycle = Arc::new(RunLifecycle::new(
            task_store.clone(),
            run_store.clone(),
            queue,
            StreamRouterKind::default(),
        ));

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            name: "demo".into(),
            task_type: TaskType::General,
            status: TaskStatus::Pending,
            spec: TaskSpec::default(),
            parent_id: None,
            created_at: now,
            updated_at: now,
        };
        task_store.create(task.clone()).await.unwrap();

        let run = Run {
            id: Uuid::new_v4(),
            task_id: task.id,
            status: RunStatus::Assigned,
            node_id: Some(Uuid::new_v4()),
            snapshot: RunSnapshot {
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
            created_at: now,
            updated_at: now,
        };
        run_store.create(run.clone()).await.unwrap();

        let gateway = EventGateway::new(event_store, run_store.clone(), task_store.clone(), bus, lifecycle);
        (gateway, run_store, task_store, run.id, task.id)
    }

    #[tokio::test]
    async fn first_event_promotes_run_and_task() {
        let (gateway, run_store, task_store, run_id, task_id) = gateway().await;
        gateway
            .post_events(
                run_id,
                vec![EventInput {
                    seq: 1,
                    event_type: EVENT_RUN_STARTED.to_string(),
                    timestamp: Utc::now(),
                    payload: serde_json::json!({}),
                    raw: None,
                }],
            )
            .await
            .unwrap();

        let run = run_store.get(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        let task = task_store.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn subscriber_sees_published_events() {
        let (gateway, _run_store, _task_store, run_id, _task_id) = gateway().await;
        let mut rx = gateway.subscribe(run_id).await.unwrap();
        gateway
            .post_events(
                run_id,
                vec![EventInput {
                    seq: 1,
                    event_type: EVENT_RUN_STARTED.to_string(),
                    timestamp: Utc::now(),
                    payload: serde_json::json!({}),
                    raw: None,
                }],
            )
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.seq, 1);
    }
}
