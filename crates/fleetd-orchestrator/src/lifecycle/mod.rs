//! RunLifecycle: Run creation, FSM-enforced status mutation, and the
//! implicit Task-promotion side effect (spec.md §4.1).

mod run_lifecycle;
mod state_machine;

pub use run_lifecycle::RunLifecycle;
pub use state_machine::{validate_intervention, Intervention};
