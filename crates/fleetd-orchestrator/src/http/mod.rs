//! REST + WebSocket surface (spec.md §6's core-relevant subset).

pub mod handlers_nodes;
pub mod handlers_runs;
pub mod routes;
pub mod state;
pub mod ws;

pub use routes::router;
pub use state::AppState;
