//! Generic circuit breaker usable by any component that wants to guard a
//! fallible operation (database scans, queue reads, bus publishes) behind a
//! closed/open/half-open state machine.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

use crate::resilience::{CircuitBreakerBehavior, CircuitBreakerMetrics, CircuitState};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    half_open_calls: u64,
    total_duration: Duration,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Whether the circuit allows the next call. Transitions Open -> HalfOpen
    /// when the recovery timeout has elapsed.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut inner);
        !matches!(inner.state, CircuitState::Open)
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    info!(circuit_breaker = %self.name, "transitioning Open -> HalfOpen");
                }
            }
        }
    }

    pub fn record_success_manual(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.total_calls += 1;
        inner.success_count += 1;
        inner.total_duration += duration;
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_calls += 1;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    info!(circuit_breaker = %self.name, "transitioning HalfOpen -> Closed");
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn record_failure_manual(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.total_duration += duration;
        inner.consecutive_failures += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                info!(circuit_breaker = %self.name, "transitioning HalfOpen -> Open");
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    info!(circuit_breaker = %self.name, "transitioning Closed -> Open");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn force_open(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
    }

    pub fn force_closed(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.consecutive_failures = 0;
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        let failure_rate = if inner.total_calls == 0 {
            0.0
        } else {
            inner.failure_count as f64 / inner.total_calls as f64
        };
        let success_rate = if inner.total_calls == 0 {
            0.0
        } else {
            inner.success_count as f64 / inner.total_calls as f64
        };
        let average_duration = if inner.total_calls == 0 {
            Duration::ZERO
        } else {
            inner.total_duration / inner.total_calls as u32
        };
        CircuitBreakerMetrics {
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            consecutive_failures: inner.consecutive_failures as u64,
            half_open_calls: inner.half_open_calls,
            total_duration: inner.total_duration,
            current_state: inner.state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        self.name()
    }

    fn state(&self) -> CircuitState {
        self.state()
    }

    fn should_allow(&self) -> bool {
        self.should_allow()
    }

    fn record_success(&self, duration: Duration) {
        self.record_success_manual(duration);
    }

    fn record_failure(&self, duration: Duration) {
        self.record_failure_manual(duration);
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy()
    }

    fn force_open(&self) {
        self.force_open();
    }

    fn force_closed(&self) {
        self.force_closed();
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 3,
                timeout: Duration::from_millis(50),
                success_threshold: 1,
            },
        );
        assert!(breaker.should_allow());
        for _ in 0..3 {
            breaker.record_failure_manual(Duration::ZERO);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow());
    }

    #[test]
    fn half_open_recovers_to_closed() {
        let breaker = CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_millis(10),
                success_threshold: 1,
            },
        );
        breaker.record_failure_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.should_allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_millis(10),
                success_threshold: 2,
            },
        );
        breaker.record_failure_manual(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.should_allow());
        breaker.record_failure_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_and_closed() {
        let breaker = CircuitBreaker::new("test".to_string(), CircuitBreakerConfig::default());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.force_closed();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
