//! # Statistics Tracker
//!
//! Running performance counters for pipeline execution. Averages are
//! exponentially smoothed: `avg = avg * (1 - α) + sample * α`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::StatisticsConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_executed: u64,
    pub total_errors: u64,
    pub total_queued: u64,
    pub current_queue_length: usize,
    pub max_queue_length: usize,
    pub average_execution_time_ms: f64,
    pub average_queue_wait_time_ms: f64,
    /// Percentage of successful executions; 100 before any attempt
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    /// Percentage of attempts that succeeded
    pub efficiency: f64,
    /// Share of end-to-end latency spent executing rather than waiting
    pub queue_efficiency: f64,
    pub error_rate: f64,
    /// Requests per second at the current average execution time
    pub throughput: f64,
}

#[derive(Debug)]
pub struct StatisticsTracker {
    config: StatisticsConfig,
    stats: StatisticsSnapshot,
}

impl StatisticsTracker {
    pub fn new(config: StatisticsConfig) -> Self {
        Self {
            config,
            stats: Self::zeroed(),
        }
    }

    fn zeroed() -> StatisticsSnapshot {
        StatisticsSnapshot {
            success_rate: 100.0,
            ..StatisticsSnapshot::default()
        }
    }

    fn smooth(&self, average: f64, sample: f64) -> f64 {
        let alpha = self.config.smoothing_factor;
        average * (1.0 - alpha) + sample * alpha
    }

    fn update_success_rate(&mut self) {
        let attempts = self.stats.total_executed + self.stats.total_errors;
        self.stats.success_rate = if attempts == 0 {
            100.0
        } else {
            self.stats.total_executed as f64 / attempts as f64 * 100.0
        };
    }

    pub fn record_execution(&mut self, execution_time_ms: f64) {
        self.stats.total_executed += 1;
        self.stats.average_execution_time_ms =
            self.smooth(self.stats.average_execution_time_ms, execution_time_ms);
        self.update_success_rate();
    }

    pub fn record_error(&mut self) {
        self.stats.total_errors += 1;
        self.update_success_rate();
    }

    pub fn record_queue_wait(&mut self, wait_time_ms: f64) {
        self.stats.average_queue_wait_time_ms =
            self.smooth(self.stats.average_queue_wait_time_ms, wait_time_ms);
    }

    pub fn record_queued(&mut self) {
        self.stats.total_queued += 1;
        self.stats.current_queue_length += 1;
        self.stats.max_queue_length = self
            .stats
            .max_queue_length
            .max(self.stats.current_queue_length);
    }

    pub fn record_dequeued(&mut self) {
        self.stats.current_queue_length = self.stats.current_queue_length.saturating_sub(1);
    }

    /// Bring the queue-length gauge in line after bulk removals
    pub fn set_queue_length(&mut self, length: usize) {
        self.stats.current_queue_length = length;
        self.stats.max_queue_length = self.stats.max_queue_length.max(length);
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.clone()
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let exec = self.stats.average_execution_time_ms;
        let wait = self.stats.average_queue_wait_time_ms;

        PerformanceSummary {
            efficiency: self.stats.success_rate,
            queue_efficiency: if exec + wait > 0.0 {
                exec / (exec + wait) * 100.0
            } else {
                100.0
            },
            error_rate: 100.0 - self.stats.success_rate,
            throughput: if exec > 0.0 { 1000.0 / exec } else { 0.0 },
        }
    }

    /// Human-readable threshold breaches, empty when everything is nominal
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let stats = &self.stats;

        if stats.average_execution_time_ms > self.config.max_execution_time_ms {
            warnings.push(format!(
                "High average execution time: {:.1}ms (threshold {:.0}ms)",
                stats.average_execution_time_ms, self.config.max_execution_time_ms
            ));
        }
        if stats.average_queue_wait_time_ms > self.config.max_queue_wait_ms {
            warnings.push(format!(
                "High average queue wait time: {:.1}ms (threshold {:.0}ms)",
                stats.average_queue_wait_time_ms, self.config.max_queue_wait_ms
            ));
        }
        if stats.success_rate < self.config.min_success_rate {
            warnings.push(format!(
                "Low success rate: {:.1}% (threshold {:.0}%)",
                stats.success_rate, self.config.min_success_rate
            ));
        }
        if stats.current_queue_length > self.config.max_queue_length {
            warnings.push(format!(
                "Long queue: {} pending (threshold {})",
                stats.current_queue_length, self.config.max_queue_length
            ));
        }
        if stats.total_errors > self.config.max_error_count {
            warnings.push(format!(
                "High error count: {} (threshold {})",
                stats.total_errors, self.config.max_error_count
            ));
        }

        warnings
    }

    /// Flat metric map for external ingestion
    pub fn export_metrics(&self) -> BTreeMap<String, f64> {
        let stats = &self.stats;
        let summary = self.performance_summary();

        [
            ("total_executed", stats.total_executed as f64),
            ("total_errors", stats.total_errors as f64),
            ("total_queued", stats.total_queued as f64),
            ("current_queue_length", stats.current_queue_length as f64),
            ("max_queue_length", stats.max_queue_length as f64),
            ("average_execution_time_ms", stats.average_execution_time_ms),
            ("average_queue_wait_time_ms", stats.average_queue_wait_time_ms),
            ("success_rate", stats.success_rate),
            ("error_rate", summary.error_rate),
            ("throughput", summary.throughput),
        ]
        .into_iter()
        .map(|(name, value)| (format!("conductor.{name}"), value))
        .collect()
    }

    pub fn reset(&mut self) {
        self.stats = Self::zeroed();
    }
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new(StatisticsConfig::default())
    }
}
