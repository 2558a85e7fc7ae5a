//! In-memory `DispatchQueue` for unit tests that don't need Postgres,
//! mirroring the teacher's `MessagingProvider::new_in_memory()` test double.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::FleetResult;

use super::{DispatchQueue, QueuedMessage};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: i64,
    run_id: Uuid,
    task_id: Uuid,
    enqueued_at: chrono::DateTime<Utc>,
    claimed: bool,
}

#[derive(Debug, Default)]
struct Stream {
    messages: Vec<StoredMessage>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryDispatchQueue {
    streams: Mutex<HashMap<String, Stream>>,
}

impl InMemoryDispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn publish(&self, stream: &str, run_id: Uuid, task_id: Uuid) -> FleetResult<i64> {
        let mut streams = self.streams.lock().expect("in-memory queue mutex poisoned");
        let s = streams.entry(stream.to_string()).or_default();
        s.next_id += 1;
        let message_id = s.next_id;
        s.messages.push(StoredMessage {
            message_id,
            run_id,
            task_id,
            enqueued_at: Utc::now(),
            claimed: false,
        });
        Ok(message_id)
    }

    async fn ensure_consumer_group(&self, _stream: &str, _group: &str) -> FleetResult<()> {
        Ok(())
    }

    async fn consume(
        &self,
        stream: &str,
        _group: &str,
        count: i64,
        _block_timeout: Duration,
    ) -> FleetResult<Vec<QueuedMessage>> {
        let mut streams = self.streams.lock().expect("in-memory queue mutex poisoned");
        let Some(s) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for msg in s.messages.iter_mut() {
            if out.len() as i64 >= count {
                break;
            }
            if !msg.claimed {
                msg.claimed = true;
                out.push(QueuedMessage {
                    message_id: msg.message_id,
                    run_id: msg.run_id,
                    task_id: msg.task_id,
                    enqueued_at: msg.enqueued_at,
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, _group: &str, message_id: i64) -> FleetResult<()> {
        let mut streams = self.streams.lock().expect("in-memory queue mutex poisoned");
        if let Some(s) = streams.get_mut(stream) {
            s.messages.retain(|m| m.message_id != message_id);
        }
        Ok(())
    }

    async fn length(&self, stream: &str) -> FleetResult<i64> {
        let streams = self.streams.lock().expect("in-memory queue mutex poisoned");
        Ok(streams.get(stream).map(|s| s.messages.len() as i64).unwrap_or(0))
    }

    async fn pending_count(&self, stream: &str, _group: &str) -> FleetResult<i64> {
        let streams = self.streams.lock().expect("in-memory queue mutex poisoned");
        Ok(streams
            .get(stream)
            .map(|s| s.messages.iter().filter(|m| m.claimed).count() as i64)
            .unwrap_or(0))
    }
}

impl InMemoryDispatchQueue {
    pub fn nack(&self, stream: &str, message_id: i64) {
        let mut streams = self.streams.lock().expect("in-memory queue mutex poisoned");
        if let Some(s) = streams.get_mut(stream) {
            if let Some(m) = s.messages.iter_mut().find(|m| m.message_id == message_id) {
                m.claimed = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume_claims_message() {
        let q = InMemoryDispatchQueue::new();
        let run_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        q.publish("scheduler:runs", run_id, task_id).await.unwrap();

        let batch = q
            .consume("scheduler:runs", "schedulers", 10, Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].run_id, run_id);

        // A second consume sees nothing new since the message is claimed.
        let batch2 = q
            .consume("scheduler:runs", "schedulers", 10, Duration::from_millis(0))
            .await
            .unwrap();
        assert!(batch2.is_empty());
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let q = InMemoryDispatchQueue::new();
        let run_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let id = q.publish("scheduler:runs", run_id, task_id).await.unwrap();
        q.ack("scheduler:runs", "schedulers", id).await.unwrap();
        assert_eq!(q.length("scheduler:runs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nack_makes_message_consumable_again() {
        let q = InMemoryDispatchQueue::new();
        let run_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let id = q.publish("scheduler:runs", run_id, task_id).await.unwrap();
        q.consume("scheduler:runs", "schedulers", 10, Duration::from_millis(0))
            .await
            .unwrap();
        q.nack("scheduler:runs", id);
        let batch = q
            .consume("scheduler:runs", "schedulers", 10, Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
    }
}
