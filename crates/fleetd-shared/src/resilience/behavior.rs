//! Unified interface for all circuit breaker implementations.
//!
//! Object-safe so consumers can work with `&dyn CircuitBreakerBehavior` when
//! uniform access to any breaker is needed (e.g. health reporting). Concrete
//! types are preferred in hot paths.

use std::time::Duration;

use crate::resilience::{CircuitBreakerMetrics, CircuitState};

pub trait CircuitBreakerBehavior: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn state(&self) -> CircuitState;

    /// Whether the circuit currently allows the next call through.
    fn should_allow(&self) -> bool;

    fn record_success(&self, duration: Duration);
    fn record_failure(&self, duration: Duration);
    fn is_healthy(&self) -> bool;
    fn force_open(&self);
    fn force_closed(&self);
    fn metrics(&self) -> CircuitBreakerMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn CircuitBreakerBehavior) {}
}
