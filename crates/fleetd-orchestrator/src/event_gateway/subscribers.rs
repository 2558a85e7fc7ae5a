//! Polling-fallback subscription path (spec.md §4.6): used when a caller
//! cannot hold a push-bus receiver (single-process bus restart, or a
//! process that never got a NOTIFY) by polling durable storage directly.
//! Grounded on the stream-channel pattern in
//! `other_examples/334536cb_filipelabs-taskrun__crates-taskrun-control-plane-src-state.rs.rs`,
//! generalized to a pull loop since this core treats the bus as best-effort.

use std::sync::Arc;
use std::time::Duration;

use fleetd_shared::models::{Event, RunStatus};
use fleetd_shared::store::{EventStore, RunStore};
use tokio::sync::mpsc;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::is_terminal;

/// Spawns a task that polls `event_store` for new events on `run_id` every
/// `poll_interval`, forwarding each to the returned channel, until the Run
/// reaches a terminal status or the channel's last receiver is dropped.
#[instrument(skip(event_store, run_store))]
pub fn spawn_polling_fallback(
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    run_id: Uuid,
    from_seq: i64,
    poll_interval: Duration,
) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut cursor = from_seq;
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;

            let batch = match event_store.list_from_seq(run_id, cursor, 100).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(%run_id, error = %err, "event_gateway.poll.list_failed");
                    continue;
                }
            };

            let mut saw_terminal = false;
            for event in &batch {
                cursor = event.seq + 1;
                if is_terminal(&event.event_type) {
                    saw_terminal = true;
                }
                if tx.send(event.clone()).await.is_err() {
                    // Receiver gone; stop polling.
                    return;
                }
            }

            if saw_terminal {
                break;
            }

            match run_store.get(run_id).await {
                Ok(run) if run_is_settled(run.status) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%run_id, error = %err, "event_gateway.poll.run_lookup_failed");
                    break;
                }
            }
        }
    });
    rx
}

/// Whether a Run's current status means no further events will arrive.
pub fn run_is_settled(status: RunStatus) -> bool {
    status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetd_shared::models::{EventInput, Run, RunSnapshot, EVENT_RUN_STARTED};
    use fleetd_shared::store::memory::{InMemoryEventStore, InMemoryRunStore};
    use std::collections::HashMap;

    #[tokio::test]
    async fn polling_fallback_forwards_events_and_stops_on_terminal() {
        let event_store = Arc::new(InMemoryEventStore::new());
        let run_store = Arc::new(InMemoryRunStore::new());
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            status: RunStatus::Running,
            node_id: Some(Uuid::new_v4()),
            snapshot: RunSnapshot {
                prompt: None,
                workspace: None,
                labels: HashMap::new(),
                node_hint: None,
                agent_binding: None,
                extra: serde_json::json!({}),
            },
            started_at: Some(now),
            finished_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        run_store.create(run.clone()).await.unwrap();
        event_store
            .append_batch(
                run.id,
                vec![EventInput {
                    seq: 1,
                    event_type: EVENT_RUN_STARTED.to_string(),
                    timestamp: now,
                    payload: serde_json::json!({}),
                    raw: None,
                }],
            )
            .await
            .unwrap();
        event_store
            .append_batch(
                run.id,
                vec![EventInput {
                    seq: 2,
                    event_type: "run_completed".to_string(),
                    timestamp: now,
                    payload: serde_json::json!({}),
                    raw: None,
                }],
            )
            .await
            .unwrap();

        let mut rx = spawn_polling_fallback(event_store, run_store, run.id, 1, Duration::from_millis(10));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.seq, 2);
        assert!(rx.recv().await.is_none());
    }
}
