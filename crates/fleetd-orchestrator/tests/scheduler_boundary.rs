//! Boundary scenarios from spec.md §8, exercised end-to-end against the
//! in-memory stores (no database required).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fleetd_orchestrator::lifecycle::RunLifecycle;
use fleetd_orchestrator::scheduler::Scheduler;
use fleetd_shared::config::SchedulerConfig;
use fleetd_shared::models::{
    Node, NodeCapacity, NodeStatus, Run, RunSnapshot, RunStatus, Task, TaskSpec, TaskStatus,
    TaskType,
};
use fleetd_shared::queue::memory::InMemoryDispatchQueue;
use fleetd_shared::queue::{DispatchQueue, StreamRouterKind};
use fleetd_shared::store::memory::{InMemoryNodeStore, InMemoryRunStore, InMemoryTaskStore};
use fleetd_shared::store::{NodeStore, RunStore, TaskStore};
use uuid::Uuid;

fn node(id: Uuid, labels: &[(&str, &str)], max_concurrent: i64) -> Node {
    Node {
        id,
        status: NodeStatus::Online,
        labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        capacity: NodeCapacity {
            values: HashMap::from([("max_concurrent".to_string(), max_concurrent)]),
        },
        last_heartbeat: Some(Utc::now()),
    }
}

fn task(id: Uuid) -> Task {
    let now = Utc::now();
    Task {
        id,
        name: "demo".into(),
        task_type: TaskType::General,
        status: TaskStatus::Pending,
        spec: TaskSpec::default(),
        parent_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn run_with_labels(task_id: Uuid, labels: &[(&str, &str)]) -> Run {
    let now = Utc::now();
    Run {
        id: Uuid::new_v4(),
        task_id,
        status: RunStatus::Queued,
        node_id: None,
        snapshot: RunSnapshot {
            prompt: None,
            workspace: None,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            node_hint: None,
            agent_binding: None,
            extra: serde_json::json!({}),
        },
        started_at: None,
        finished_at: None,
        error: None,
        created_at: now,
        updated_at: now,
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    node_store: Arc<InMemoryNodeStore>,
    run_store: Arc<InMemoryRunStore>,
    queue: Arc<InMemoryDispatchQueue>,
    router: StreamRouterKind,
}

fn harness() -> Harness {
    let run_store = Arc::new(InMemoryRunStore::new());
    let node_store = Arc::new(InMemoryNodeStore::new());
    let queue = Arc::new(InMemoryDispatchQueue::new());
    let router = StreamRouterKind::default();

    let scheduler = Arc::new(Scheduler::new(
        run_store.clone(),
        node_store.clone(),
        queue.clone(),
        router.clone(),
        SchedulerConfig::default(),
        45,
    ));

    Harness {
        scheduler,
        node_store,
        run_store,
        queue,
        router,
    }
}

#[tokio::test]
async fn basic_dispatch_assigns_matching_node() {
    let h = harness();
    let n1 = node(Uuid::new_v4(), &[("env", "prod")], 5);
    h.node_store
        .upsert_heartbeat(n1.id, Some(NodeStatus::Online), Some(n1.labels.clone()), Some(n1.capacity.clone()))
        .await
        .unwrap();

    let t = task(Uuid::new_v4());
    let run = run_with_labels(t.id, &[("env", "prod")]);
    let run_id = run.id;
    h.run_store.create(run).await.unwrap();

    h.queue.publish(&h.router.scheduler_stream(), run_id, t.id).await.unwrap();

    h.scheduler.run_cycle().await.unwrap();

    let updated = h.run_store.get(run_id).await.unwrap();
    assert_eq!(updated.status, RunStatus::Assigned);
    assert_eq!(updated.node_id, Some(n1.id));
    assert_eq!(h.queue.length(&h.router.node_stream(n1.id)).await.unwrap(), 1);
}

#[tokio::test]
async fn no_matching_node_leaves_run_queued() {
    let h = harness();
    let n1 = node(Uuid::new_v4(), &[("env", "staging")], 5);
    h.node_store
        .upsert_heartbeat(n1.id, Some(NodeStatus::Online), Some(n1.labels.clone()), Some(n1.capacity.clone()))
        .await
        .unwrap();

    let t = task(Uuid::new_v4());
    let run = run_with_labels(t.id, &[("env", "prod")]);
    let run_id = run.id;
    h.run_store.create(run).await.unwrap();
    h.queue.publish(&h.router.scheduler_stream(), run_id, t.id).await.unwrap();

    h.scheduler.run_cycle().await.unwrap();

    let updated = h.run_store.get(run_id).await.unwrap();
    assert_eq!(updated.status, RunStatus::Queued);
    assert_eq!(updated.node_id, None);
    // The scheduler message must stay unacked so the next cycle retries it.
    assert_eq!(h.queue.length(&h.router.scheduler_stream()).await.unwrap(), 1);
}

#[tokio::test]
async fn replaying_scheduler_message_after_assignment_is_idempotent() {
    let h = harness();
    let n1 = node(Uuid::new_v4(), &[], 5);
    h.node_store
        .upsert_heartbeat(n1.id, Some(NodeStatus::Online), Some(n1.labels.clone()), Some(n1.capacity.clone()))
        .await
        .unwrap();

    let t = task(Uuid::new_v4());
    let run = run_with_labels(t.id, &[]);
    let run_id = run.id;
    h.run_store.create(run).await.unwrap();

    h.queue.publish(&h.router.scheduler_stream(), run_id, t.id).await.unwrap();
    h.scheduler.run_cycle().await.unwrap();
    let assigned = h.run_store.get(run_id).await.unwrap();
    assert_eq!(assigned.status, RunStatus::Assigned);
    assert_eq!(assigned.node_id, Some(n1.id));

    let node_stream_len_before = h.queue.length(&h.router.node_stream(n1.id)).await.unwrap();

    // Replay: a second SchedulerMessage for the same Run arrives.
    h.queue.publish(&h.router.scheduler_stream(), run_id, t.id).await.unwrap();
    h.scheduler.run_cycle().await.unwrap();

    let still_assigned = h.run_store.get(run_id).await.unwrap();
    assert_eq!(still_assigned.status, RunStatus::Assigned);
    assert_eq!(still_assigned.node_id, Some(n1.id));
    assert_eq!(
        h.queue.length(&h.router.node_stream(n1.id)).await.unwrap(),
        node_stream_len_before
    );
    // The replayed message was acknowledged, not left pending.
    assert_eq!(h.queue.length(&h.router.scheduler_stream()).await.unwrap(), 0);
}

#[tokio::test]
async fn heartbeat_preserves_administrative_status_and_excludes_node_from_scheduling() {
    let h = harness();
    let n1_id = Uuid::new_v4();
    h.node_store
        .upsert_heartbeat(n1_id, Some(NodeStatus::Online), Some(HashMap::new()), None)
        .await
        .unwrap();
    h.node_store.set_admin_status(n1_id, NodeStatus::Draining).await.unwrap();

    // Worker keeps heartbeating as online; administrative status must stick.
    h.node_store
        .upsert_heartbeat(n1_id, Some(NodeStatus::Online), None, None)
        .await
        .unwrap();

    let stored = h.node_store.get(n1_id).await.unwrap();
    assert_eq!(stored.status, NodeStatus::Draining);

    let t = task(Uuid::new_v4());
    let run = run_with_labels(t.id, &[]);
    let run_id = run.id;
    h.run_store.create(run).await.unwrap();
    h.queue.publish(&h.router.scheduler_stream(), run_id, t.id).await.unwrap();

    h.scheduler.run_cycle().await.unwrap();

    let updated = h.run_store.get(run_id).await.unwrap();
    assert_eq!(updated.status, RunStatus::Queued, "draining node must not receive work");
}

#[tokio::test]
async fn first_event_promotes_run_and_task_via_lifecycle() {
    let task_store = Arc::new(InMemoryTaskStore::new());
    let run_store = Arc::new(InMemoryRunStore::new());
    let queue = Arc::new(InMemoryDispatchQueue::new());
    let router = StreamRouterKind::default();

    let lifecycle = RunLifecycle::new(task_store.clone(), run_store.clone(), queue, router);

    let t = task(Uuid::new_v4());
    task_store.create(t.clone()).await.unwrap();

    let run = lifecycle.create_run(t.id).await.unwrap();
    // manually assign, bypassing the scheduler, as the scenario describes
    run_store.assign_if_queued(run.id, Uuid::new_v4()).await.unwrap();

    lifecycle.maybe_promote_on_first_event(run.id, true, &task_store.get(t.id).await.unwrap()).await.unwrap();

    let promoted_run = run_store.get(run.id).await.unwrap();
    assert_eq!(promoted_run.status, RunStatus::Running);
    let promoted_task = task_store.get(t.id).await.unwrap();
    assert_eq!(promoted_task.status, TaskStatus::InProgress);

    // A second promotion call must not regress either.
    lifecycle.maybe_promote_on_first_event(run.id, true, &task_store.get(t.id).await.unwrap()).await.unwrap();
    let after_second = run_store.get(run.id).await.unwrap();
    assert_eq!(after_second.status, RunStatus::Running);
}
