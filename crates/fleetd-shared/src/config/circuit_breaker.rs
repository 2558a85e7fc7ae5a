//! Conversion from the plain config section to resilience-module config.

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::CircuitBreakerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSectionConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerSectionConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 30,
        }
    }
}

impl CircuitBreakerSectionConfig {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
