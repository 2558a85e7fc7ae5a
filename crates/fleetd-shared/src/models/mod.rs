//! Domain entities. Opaque JSON is carried only at the REST boundary; once
//! inside the control plane, spec/snapshot/payload fields are tagged
//! variants with explicit fields for the data the scheduler and lifecycle
//! machinery actually inspect.

pub mod event;
pub mod node;
pub mod run;
pub mod task;

pub use event::{
    is_terminal_event_type, Event, EventInput, EventPayload, EVENT_RUN_STARTED, TERMINAL_EVENT_TYPES,
};
pub use node::{HeartbeatInput, Node, NodeCapacity, NodeStatus};
pub use run::{Run, RunSnapshot, RunStatus};
pub use task::{Task, TaskSpec, TaskStatus, TaskType};
