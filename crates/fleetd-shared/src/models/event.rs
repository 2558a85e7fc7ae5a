use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Newtype escape hatch around the opaque per-event payload, with typed
/// accessors for the handful of fields the lifecycle state machine cares
/// about.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventPayload(pub serde_json::Value);

/// Event types the RunLifecycle treats specially. Anything else is an
/// opaque tag carried through untouched.
pub const EVENT_RUN_STARTED: &str = "run_started";
pub const TERMINAL_EVENT_TYPES: &[&str] = &[
    "run_completed",
    "run_failed",
    "run_cancelled",
    "run_timeout",
];

pub fn is_terminal_event_type(event_type: &str) -> bool {
    TERMINAL_EVENT_TYPES.contains(&event_type)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub run_id: Uuid,
    pub seq: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    pub raw: Option<String>,
}

/// A single event as submitted by a worker, before persistence assigns an id.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EventInput {
    #[validate(range(min = 1))]
    pub seq: i64,
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub raw: Option<String>,
}
