//! Stream-name routing. Kept as enum dispatch rather than `Arc<dyn Router>`
//! to match the rest of the messaging layer's dispatch style and avoid
//! vtable overhead on a per-cycle hot path.

use uuid::Uuid;

pub trait StreamRouter: Send + Sync {
    /// The single global stream the scheduler consumes from.
    fn scheduler_stream(&self) -> String;

    /// The consumer group name schedulers register under.
    fn scheduler_group(&self) -> String;

    /// The per-node stream a worker consumes from.
    fn node_stream(&self, node_id: Uuid) -> String;

    /// The consumer group name node managers register under.
    fn node_group(&self) -> String;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultStreamRouter;

impl StreamRouter for DefaultStreamRouter {
    fn scheduler_stream(&self) -> String {
        "scheduler:runs".to_string()
    }

    fn scheduler_group(&self) -> String {
        "schedulers".to_string()
    }

    fn node_stream(&self, node_id: Uuid) -> String {
        format!("nodes:{node_id}:runs")
    }

    fn node_group(&self) -> String {
        "node_managers".to_string()
    }
}

/// Enum dispatch for `StreamRouter`, matching the messaging layer's
/// `MessageRouterKind` pattern.
#[derive(Debug, Clone)]
pub enum StreamRouterKind {
    Default(DefaultStreamRouter),
}

impl StreamRouterKind {
    pub fn scheduler_stream(&self) -> String {
        match self {
            Self::Default(r) => r.scheduler_stream(),
        }
    }

    pub fn scheduler_group(&self) -> String {
        match self {
            Self::Default(r) => r.scheduler_group(),
        }
    }

    pub fn node_stream(&self, node_id: Uuid) -> String {
        match self {
            Self::Default(r) => r.node_stream(node_id),
        }
    }

    pub fn node_group(&self) -> String {
        match self {
            Self::Default(r) => r.node_group(),
        }
    }
}

impl Default for StreamRouterKind {
    fn default() -> Self {
        Self::Default(DefaultStreamRouter)
    }
}
