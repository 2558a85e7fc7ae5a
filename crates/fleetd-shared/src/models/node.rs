use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Draining,
    Disabled,
    Maintenance,
}

impl NodeStatus {
    /// Administrative statuses are sticky: a heartbeat must never
    /// overwrite them with online/offline.
    pub fn is_administrative(self) -> bool {
        matches!(self, Self::Draining | Self::Disabled | Self::Maintenance)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeCapacity {
    #[serde(flatten)]
    pub values: HashMap<String, i64>,
}

impl NodeCapacity {
    pub fn max_concurrent(&self) -> i64 {
        self.values.get("max_concurrent").copied().unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub status: NodeStatus,
    pub labels: HashMap<String, String>,
    pub capacity: NodeCapacity,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Fields carried on a heartbeat request; all but `node_id` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatInput {
    pub node_id: Uuid,
    pub status: Option<NodeStatus>,
    pub labels: Option<HashMap<String, String>>,
    pub capacity: Option<NodeCapacity>,
}
