use serde::{Deserialize, Serialize};

/// The three states of a circuit breaker's internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation; calls are allowed through.
    Closed,
    /// Failing fast; calls are rejected until the recovery timeout elapses.
    Open,
    /// Recovery probe; a limited number of calls are allowed through to test health.
    HalfOpen,
}
