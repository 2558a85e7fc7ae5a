//! Data model, configuration, resilience primitives, storage, and dispatch
//! queues shared by every component of the fleetd control plane.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod queue;
pub mod resilience;
pub mod store;

pub use error::{FleetError, FleetResult};
