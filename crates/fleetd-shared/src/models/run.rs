use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Assigned,
    Running,
    Paused,
    Done,
    Failed,
    Cancelled,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled | Self::Timeout)
    }

    /// Whether a legal FSM edge exists from `self` to `next`. Scheduler
    /// assignment (`Queued -> Assigned`) and event-driven promotion
    /// (`Assigned -> Running`) are validated by their own call sites since
    /// they carry extra conditions beyond plain reachability.
    pub fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Queued, Assigned)
                | (Queued, Cancelled)
                | (Assigned, Running)
                | (Assigned, Cancelled)
                | (Running, Paused)
                | (Running, Cancelled)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Timeout)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Paused, Done)
                | (Paused, Failed)
                | (Paused, Timeout)
        )
    }
}

/// Frozen copy of the owning Task's spec at enqueue time, plus the Run's
/// own resolved placement hints. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub prompt: Option<String>,
    pub workspace: Option<String>,
    pub labels: std::collections::HashMap<String, String>,
    pub node_hint: Option<String>,
    pub agent_binding: Option<String>,
    pub extra: serde_json::Value,
}

impl From<&TaskSpec> for RunSnapshot {
    fn from(spec: &TaskSpec) -> Self {
        Self {
            prompt: spec.prompt.clone(),
            workspace: spec.workspace.clone(),
            labels: spec.labels.clone(),
            node_hint: spec.node_hint.clone(),
            agent_binding: spec.agent_binding.clone(),
            extra: spec.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: RunStatus,
    pub node_id: Option<Uuid>,
    pub snapshot: RunSnapshot,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn capacity_counts_toward_node(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Assigned | RunStatus::Running | RunStatus::Paused
        )
    }
}
