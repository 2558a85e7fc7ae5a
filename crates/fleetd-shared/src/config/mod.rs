//! Layered configuration: a base TOML file overridden by `FLEETD_*`
//! environment variables, following the teacher's `config`-crate-over-TOML
//! pattern.

pub mod circuit_breaker;

use std::time::Duration;

use serde::Deserialize;

pub use circuit_breaker::CircuitBreakerSectionConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerFallbackConfig {
    pub interval_ms: u64,
    pub stale_threshold_secs: u64,
}

impl Default for SchedulerFallbackConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            stale_threshold_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    Direct,
    Affinity,
    LabelMatch,
    RoundRobin,
    Random,
    CapacityWeighted,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerStrategyConfig {
    pub chain: Vec<StrategyName>,
    pub label_match_load_balance: bool,
}

impl Default for SchedulerStrategyConfig {
    fn default() -> Self {
        Self {
            chain: vec![
                StrategyName::Direct,
                StrategyName::Affinity,
                StrategyName::LabelMatch,
                StrategyName::CapacityWeighted,
            ],
            label_match_load_balance: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub node_id: String,
    pub read_timeout_ms: u64,
    pub read_count: i64,
    pub fallback: SchedulerFallbackConfig,
    pub strategy: SchedulerStrategyConfig,
    pub circuit_breaker: CircuitBreakerSectionConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            node_id: "scheduler-1".to_string(),
            read_timeout_ms: 200,
            read_count: 10,
            fallback: SchedulerFallbackConfig::default(),
            strategy: SchedulerStrategyConfig::default(),
            circuit_breaker: CircuitBreakerSectionConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeHeartbeatConfig {
    pub freshness_window_secs: u64,
}

impl Default for NodeHeartbeatConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub heartbeat: NodeHeartbeatConfig,
    pub stale_sweep_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat: NodeHeartbeatConfig::default(),
            stale_sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventGatewayConfig {
    pub poll_interval_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for EventGatewayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            send_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fleetd".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    pub scheduler: SchedulerConfig,
    pub node: NodeConfig,
    pub eventgateway: EventGatewayConfig,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

impl FleetConfig {
    /// Load `config/fleetd.toml` (if present) layered with `FLEETD_*`
    /// environment overrides (double-underscore separated for nesting,
    /// e.g. `FLEETD_SCHEDULER__NODE_ID`).
    pub fn load() -> anyhow::Result<Self> {
        // Ignore a missing .env; real deployments set FLEETD_* directly.
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/fleetd").required(false))
            .add_source(
                config::Environment::with_prefix("FLEETD")
                    .separator("__")
                    .try_parsing(true),
            );
        let raw = builder.build()?;
        Ok(raw.try_deserialize()?)
    }
}
