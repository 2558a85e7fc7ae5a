//! `RunLifecycle`: owns Run creation and FSM-governed status mutation,
//! writing storage first and treating a queue-publish failure as
//! non-fatal (the Scheduler's fallback poll recovers it), per spec.md §4.1.

use std::sync::Arc;

use chrono::Utc;
use fleetd_shared::models::{Run, RunSnapshot, RunStatus, Task, TaskStatus};
use fleetd_shared::queue::{DispatchQueue, StreamRouterKind};
use fleetd_shared::store::{RunStore, TaskStore};
use fleetd_shared::{FleetError, FleetResult};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::state_machine::{validate_intervention, Intervention};

pub struct RunLifecycle {
    task_store: Arc<dyn TaskStore>,
    run_store: Arc<dyn RunStore>,
    queue: Arc<dyn DispatchQueue>,
    router: StreamRouterKind,
}

impl RunLifecycle {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        run_store: Arc<dyn RunStore>,
        queue: Arc<dyn DispatchQueue>,
        router: StreamRouterKind,
    ) -> Self {
        Self {
            task_store,
            run_store,
            queue,
            router,
        }
    }

    /// Loads the Task, freezes its spec into a new Run's snapshot, persists
    /// the Run as `queued`, then attempts to publish a SchedulerMessage.
    /// Publish failure is logged and swallowed: the Run is already durable
    /// and will be picked up by the fallback poll.
    #[instrument(skip(self))]
    pub async fn create_run(&self, task_id: Uuid) -> FleetResult<Run> {
        let task = self.task_store.get(task_id).await?;

        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            task_id,
            status: RunStatus::Queued,
            node_id: None,
            snapshot: RunSnapshot::from(&task.spec),
            started_at: None,
            finished_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let run = self.run_store.create(run).await?;

        let stream = self.router.scheduler_stream();
        if let Err(err) = self.queue.publish(&stream, run.id, run.task_id).await {
            warn!(
                run_id = %run.id,
                task_id = %run.task_id,
                error = %err,
                "run.create.queue.failed"
            );
        }

        Ok(run)
    }

    /// External-triggered status update (REST `PATCH /runs/{id}`), validated
    /// against the FSM. Scheduler assignment and event-driven promotion use
    /// their own dedicated paths since they carry extra conditions.
    #[instrument(skip(self))]
    pub async fn update_run_status(&self, run_id: Uuid, new_status: RunStatus) -> FleetResult<Run> {
        let run = self.run_store.get(run_id).await?;
        if !run.status.can_transition_to(new_status) {
            return Err(FleetError::conflict(format!(
                "cannot transition run {run_id} from {:?} to {new_status:?}",
                run.status
            )));
        }
        self.run_store.set_status(run_id, new_status).await?;
        if new_status.is_terminal() {
            self.run_store.mark_finished(run_id, None).await?;
        }
        self.run_store.get(run_id).await
    }

    #[instrument(skip(self))]
    pub async fn apply_intervention(&self, run_id: Uuid, intervention: Intervention) -> FleetResult<Run> {
        let run = self.run_store.get(run_id).await?;
        let next = validate_intervention(run.status, intervention)?;
        self.run_store.set_status(run_id, next).await?;
        if next.is_terminal() {
            self.run_store.mark_finished(run_id, None).await?;
        }
        self.run_store.get(run_id).await
    }

    pub async fn cancel_run(&self, run_id: Uuid) -> FleetResult<Run> {
        self.apply_intervention(run_id, Intervention::Cancel).await
    }

    /// Invoked once per ingested event batch by the EventGateway. Promotes
    /// `Assigned -> Running` on the first qualifying event and cascades the
    /// Task `Pending -> InProgress` promotion; idempotent on subsequent calls.
    #[instrument(skip(self, task))]
    pub async fn maybe_promote_on_first_event(
        &self,
        run_id: Uuid,
        is_first_qualifying_event: bool,
        task: &Task,
    ) -> FleetResult<()> {
        if !is_first_qualifying_event {
            return Ok(());
        }
        let run = self.run_store.get(run_id).await?;
        if run.status == RunStatus::Assigned {
            self.run_store.set_status(run_id, RunStatus::Running).await?;
            self.run_store.mark_started(run_id).await?;
        }
        if task.can_promote_to_in_progress() {
            self.task_store
                .set_status(task.id, TaskStatus::InProgress)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_shared::models::{TaskSpec, TaskType};
    use fleetd_shared::queue::memory::InMemoryDispatchQueue;
    use fleetd_shared::store::memory::{InMemoryRunStore, InMemoryTaskStore};

    fn lifecycle() -> (RunLifecycle, Arc<InMemoryTaskStore>, Arc<InMemoryRunStore>) {
        let task_store = Arc::new(InMemoryTaskStore::new());
        let run_store = Arc::new(InMemoryRunStore::new());
        let queue = Arc::new(InMemoryDispatchQueue::new());
        let lifecycle = RunLifecycle::new(
            task_store.clone(),
            run_store.clone(),
            queue,
            StreamRouterKind::default(),
        );
        (lifecycle, task_store, run_store)
    }

    async fn seed_task(task_store: &InMemoryTaskStore) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            name: "demo".to_string(),
            task_type: TaskType::General,
            status: TaskStatus::Pending,
            spec: TaskSpec::default(),
            parent_id: None,
            created_at: now,
            updated_at: now,
        };
        task_store.create(task).await.unwrap()
    }

    #[tokio::test]
    async fn create_run_persists_queued_run_and_enqueues() {
        let (lifecycle, task_store, _run_store) = lifecycle();
        let task = seed_task(&task_store).await;
        let run = lifecycle.create_run(task.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.task_id, task.id);
    }

    #[tokio::test]
    async fn create_run_missing_task_is_not_found() {
        let (lifecycle, _, _) = lifecycle();
        let err = lifecycle.create_run(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn first_event_promotes_run_and_task() {
        let (lifecycle, task_store, run_store) = lifecycle();
        let task = seed_task(&task_store).await;
        let run = lifecycle.create_run(task.id).await.unwrap();
        run_store.assign_if_queued(run.id, Uuid::new_v4()).await.unwrap();

        lifecycle
            .maybe_promote_on_first_event(run.id, true, &task)
            .await
            .unwrap();

        let run = run_store.get(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
        let task = task_store.get(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn cancel_terminal_run_is_conflict() {
        let (lifecycle, task_store, run_store) = lifecycle();
        let task = seed_task(&task_store).await;
        let run = lifecycle.create_run(task.id).await.unwrap();
        run_store.set_status(run.id, RunStatus::Done).await.unwrap();

        let err = lifecycle.cancel_run(run.id).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict(_)));
    }
}
