//! # Gap Monitor
//!
//! Background sampler that flags abnormal gaps in orchestration activity.
//!
//! - A **blocking gap** is a sampler tick that fires later than
//!   `sample_interval + blocking_threshold`; something held the runtime.
//! - An **idle gap** is a stretch with no recorded activity longer than
//!   `idle_threshold`. Each idle period is reported once.
//!
//! [`GapMonitor::sample_at`] is the deterministic core; [`GapMonitor::start`]
//! drives it from a `tokio::time::interval`.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    Blocking,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapEvent {
    pub kind: GapKind,
    pub duration_ms: u64,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    pub samples: u64,
    pub blocking_gaps: u64,
    pub idle_gaps: u64,
    pub worst_blocking_ms: u64,
    pub recent: Vec<GapEvent>,
}

#[derive(Debug)]
struct MonitorState {
    last_sample: Option<Instant>,
    last_activity: Instant,
    idle_reported: bool,
    samples: u64,
    blocking_gaps: u64,
    idle_gaps: u64,
    worst_blocking: Duration,
    history: VecDeque<GapEvent>,
}

#[derive(Debug)]
pub struct GapMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl GapMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState {
                last_sample: None,
                last_activity: Instant::now(),
                idle_reported: false,
                samples: 0,
                blocking_gaps: 0,
                idle_gaps: 0,
                worst_blocking: Duration::ZERO,
                history: VecDeque::new(),
            }),
        }
    }

    /// Note that orchestration work happened
    pub fn record_activity(&self) {
        self.record_activity_at(Instant::now());
    }

    pub fn record_activity_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.last_activity = now;
        state.idle_reported = false;
    }

    pub fn sample(&self) -> Vec<GapEvent> {
        self.sample_at(Instant::now())
    }

    /// Evaluate one tick taken at `now`; returns any gaps detected by it
    pub fn sample_at(&self, now: Instant) -> Vec<GapEvent> {
        let mut state = self.state.lock();
        let mut detected = Vec::new();
        state.samples += 1;

        if let Some(previous) = state.last_sample {
            let elapsed = now.saturating_duration_since(previous);
            let allowed = self.config.sample_interval() + self.config.blocking_threshold();
            if elapsed > allowed {
                let lag = elapsed - self.config.sample_interval();
                state.blocking_gaps += 1;
                state.worst_blocking = state.worst_blocking.max(lag);
                warn!(
                    lag_ms = lag.as_millis() as u64,
                    threshold_ms = self.config.blocking_threshold_ms,
                    "⏱️ MONITOR: Blocking gap detected"
                );
                detected.push(GapEvent {
                    kind: GapKind::Blocking,
                    duration_ms: lag.as_millis() as u64,
                    detected_at: chrono::Utc::now(),
                });
            }
        }
        state.last_sample = Some(now);

        let idle = now.saturating_duration_since(state.last_activity);
        if idle > self.config.idle_threshold() && !state.idle_reported {
            state.idle_gaps += 1;
            state.idle_reported = true;
            debug!(idle_ms = idle.as_millis() as u64, "Idle gap detected");
            detected.push(GapEvent {
                kind: GapKind::Idle,
                duration_ms: idle.as_millis() as u64,
                detected_at: chrono::Utc::now(),
            });
        }

        for event in &detected {
            state.history.push_back(event.clone());
            while state.history.len() > self.config.history_size {
                state.history.pop_front();
            }
        }

        detected
    }

    pub fn report(&self) -> GapReport {
        let state = self.state.lock();
        GapReport {
            samples: state.samples,
            blocking_gaps: state.blocking_gaps,
            idle_gaps: state.idle_gaps,
            worst_blocking_ms: state.worst_blocking.as_millis() as u64,
            recent: state.history.iter().cloned().collect(),
        }
    }

    /// Spawn the sampler on the current tokio runtime
    pub fn start(self: &Arc<Self>) -> GapMonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let period = self.config.sample_interval();

        info!(
            interval_ms = self.config.sample_interval_ms,
            blocking_threshold_ms = self.config.blocking_threshold_ms,
            idle_threshold_ms = self.config.idle_threshold_ms,
            "📈 MONITOR: Starting gap monitor"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.sample();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Gap monitor stopped");
        });

        GapMonitorHandle { shutdown_tx, task }
    }
}

impl Default for GapMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Running sampler; dropping it without `shutdown` leaves the task running
#[derive(Debug)]
pub struct GapMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GapMonitorHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
