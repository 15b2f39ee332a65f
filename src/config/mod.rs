//! # Conductor Configuration System
//!
//! Typed configuration for every component of the orchestration core. Each
//! section carries its own defaults so a missing file, a partial file, or a
//! single environment override all produce a complete [`ConductorConfig`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let ttl = manager.config().callbacks.ttl();
//! let strict = manager.config().gate.strict_mode;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::orchestration::types::Priority;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring conductor.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Execution queue settings
    pub queue: QueueConfig,
    /// Resource ownership arbitration
    pub ledger: LedgerConfig,
    /// Callback preservation registry
    pub callbacks: CallbackConfig,
    /// Subscription gate policy
    pub gate: GateConfig,
    /// Statistics smoothing and warning thresholds
    pub statistics: StatisticsConfig,
    /// Gap monitor sampling
    pub monitor: MonitorConfig,
    /// Lifecycle event publishing
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pipeline name -> priority applied at enqueue time (names match case-insensitively)
    pub priority_overrides: HashMap<String, Priority>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// One of `priority`, `override`, `reject`, `queue`
    pub strategy: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            strategy: "priority".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub ttl_ms: u64,
    pub id_prefix: String,
}

impl CallbackConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 120_000,
            id_prefix: "cb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Throw on unauthorized subscriptions instead of logging and proceeding
    pub strict_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub smoothing_factor: f64,
    pub max_execution_time_ms: f64,
    pub max_queue_wait_ms: f64,
    pub min_success_rate: f64,
    pub max_queue_length: usize,
    pub max_error_count: u64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.1,
            max_execution_time_ms: 5000.0,
            max_queue_wait_ms: 10000.0,
            min_success_rate: 95.0,
            max_queue_length: 10,
            max_error_count: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sample_interval_ms: u64,
    pub blocking_threshold_ms: u64,
    pub idle_threshold_ms: u64,
    pub history_size: usize,
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn blocking_threshold(&self) -> Duration {
        Duration::from_millis(self.blocking_threshold_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
            blocking_threshold_ms: 50,
            idle_threshold_ms: 30_000,
            history_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

impl ConductorConfig {
    /// Reject values that would make a component misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let alpha = self.statistics.smoothing_factor;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "statistics.smoothing_factor",
                alpha.to_string(),
                "smoothing factor must be in (0, 1]",
            ));
        }

        if self.callbacks.ttl_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "callbacks.ttl_ms",
                "0",
                "ttl must be greater than 0",
            ));
        }

        if self.callbacks.id_prefix.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "callbacks.id_prefix",
                "",
                "correlation id prefix must not be empty",
            ));
        }

        if self.monitor.sample_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "monitor.sample_interval_ms",
                "0",
                "sample interval must be greater than 0",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        if !matches!(
            self.ledger.strategy.as_str(),
            "priority" | "override" | "reject" | "queue"
        ) {
            return Err(ConfigurationError::invalid_value(
                "ledger.strategy",
                self.ledger.strategy.clone(),
                "expected one of priority, override, reject, queue",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConductorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.callbacks.ttl(), Duration::from_secs(120));
        assert_eq!(config.statistics.smoothing_factor, 0.1);
        assert!(!config.gate.strict_mode);
    }

    #[test]
    fn test_rejects_out_of_range_smoothing_factor() {
        let mut config = ConductorConfig::default();
        config.statistics.smoothing_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let mut config = ConductorConfig::default();
        config.ledger.strategy = "coin_flip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ConductorConfig =
            serde_json::from_value(serde_json::json!({"gate": {"strict_mode": true}})).unwrap();
        assert!(config.gate.strict_mode);
        assert_eq!(config.monitor.sample_interval_ms, 100);
    }
}
