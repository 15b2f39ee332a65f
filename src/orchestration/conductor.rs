//! # Conductor
//!
//! Root of the orchestration core. Owns one instance of every component and
//! plays the orchestrator role around them:
//!
//! ```text
//! submit ──► ExecutionQueue ──► execute_next
//!                                 ├─ ResourceOwnershipLedger: check every declared resource
//!                                 │    ├─ REJECT ─► finish as rejected
//!                                 │    └─ QUEUE  ─► requeue, try later
//!                                 ├─ acquire ownership, mark executing (one request at a time)
//!                                 ├─ PipelineHandler::execute (panics isolated)
//!                                 ├─ StatisticsTracker: execution time / error
//!                                 └─ release ownership, mark completed, announce
//! ```
//!
//! The callback registry, subscription gate and gap monitor are owned here
//! and injected nowhere else, so each conductor is fully isolated from any
//! other instance.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::execution_queue::{ExecutionQueue, QueueStatus};
use super::gap_monitor::{GapMonitor, GapMonitorHandle, GapReport};
use super::resource_ledger::{
    strategy_from_name, ConflictCheck, ConflictResolution, ConflictStrategy, ResourceOwnership,
    ResourceOwnershipLedger,
};
use super::statistics::{PerformanceSummary, StatisticsSnapshot, StatisticsTracker};
use super::types::PipelineRequest;
use crate::callbacks::{CallbackRegistry, Payload, PreservationResult};
use crate::config::{ConductorConfig, ConfigManager};
use crate::constants::events;
use crate::error::Result;
use crate::events::{
    EventPublisher, EventTransport, LocalEventBus, PolicyHandler, PublishedEvent,
    RecordingPolicyHandler, SubscriptionGate,
};
use crate::logging::{log_pipeline_operation, log_resource_operation};

/// Business logic run for a dequeued pipeline request
#[async_trait]
pub trait PipelineHandler: Send + Sync {
    async fn execute(&self, request: &mut PipelineRequest) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed {
        request_id: String,
        execution_id: String,
        duration_ms: f64,
    },
    Failed {
        request_id: String,
        execution_id: String,
        error: String,
    },
    /// A declared resource was refused by the conflict strategy
    Rejected {
        request_id: String,
        resource_id: String,
        message: String,
    },
    /// A declared resource is busy; the request went back on the queue
    Requeued {
        request_id: String,
        execution_id: String,
        resource_id: String,
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn request_id(&self) -> &str {
        match self {
            ExecutionOutcome::Completed { request_id, .. }
            | ExecutionOutcome::Failed { request_id, .. }
            | ExecutionOutcome::Rejected { request_id, .. }
            | ExecutionOutcome::Requeued { request_id, .. } => request_id,
        }
    }
}

/// Resource arbitration counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictStats {
    pub checks: u64,
    pub conflicts: u64,
    pub overrides: u64,
    pub rejections: u64,
    pub requeues: u64,
}

#[derive(Debug, Default)]
struct ConflictCounters {
    checks: AtomicU64,
    conflicts: AtomicU64,
    overrides: AtomicU64,
    rejections: AtomicU64,
    requeues: AtomicU64,
}

impl ConflictCounters {
    fn snapshot(&self) -> ConflictStats {
        ConflictStats {
            checks: self.checks.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            overrides: self.overrides.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
pub struct ConductorBuilder {
    config: ConductorConfig,
    transport: Option<Arc<dyn EventTransport>>,
    policy: Option<Arc<dyn PolicyHandler>>,
    strategy: Option<Arc<dyn ConflictStrategy>>,
    callbacks: Option<Arc<CallbackRegistry>>,
}

impl ConductorBuilder {
    pub fn config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn PolicyHandler>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Override the strategy named in `ledger.strategy`
    pub fn strategy(mut self, strategy: Arc<dyn ConflictStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<CallbackRegistry>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn build(self) -> Result<Conductor> {
        let config = self.config;
        config.validate()?;

        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => strategy_from_name(&config.ledger.strategy)?,
        };
        let transport: Arc<dyn EventTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(LocalEventBus::new()),
        };
        let policy: Arc<dyn PolicyHandler> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(RecordingPolicyHandler::new(config.gate.strict_mode)),
        };
        let callbacks = self
            .callbacks
            .unwrap_or_else(|| Arc::new(CallbackRegistry::from_config(&config.callbacks)));

        info!(
            strategy = %strategy.name(),
            strict_mode = policy.strict_mode(),
            callback_ttl_ms = callbacks.ttl().as_millis() as u64,
            "🎼 CONDUCTOR: Initialized orchestration core"
        );

        Ok(Conductor {
            queue: Mutex::new(ExecutionQueue::with_priority_overrides(
                config.queue.priority_overrides.clone(),
            )),
            ledger: Mutex::new(ResourceOwnershipLedger::new(strategy)),
            callbacks,
            statistics: Mutex::new(StatisticsTracker::new(config.statistics.clone())),
            gate: Arc::new(SubscriptionGate::new(transport, policy)),
            monitor: Arc::new(GapMonitor::new(config.monitor.clone())),
            publisher: EventPublisher::new(config.events.channel_capacity),
            conflicts: ConflictCounters::default(),
            execution_permit: tokio::sync::Mutex::new(()),
            config,
        })
    }
}

pub struct Conductor {
    config: ConductorConfig,
    queue: Mutex<ExecutionQueue>,
    ledger: Mutex<ResourceOwnershipLedger>,
    callbacks: Arc<CallbackRegistry>,
    statistics: Mutex<StatisticsTracker>,
    gate: Arc<SubscriptionGate>,
    monitor: Arc<GapMonitor>,
    publisher: EventPublisher,
    conflicts: ConflictCounters,
    /// Held across a whole execution so only one request runs at a time
    execution_permit: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("queue", &self.queue.lock().status())
            .field("owned_resources", &self.ledger.lock().len())
            .field("callback_entries", &self.callbacks.entry_count())
            .field("gate", &self.gate)
            .finish()
    }
}

impl Conductor {
    pub fn new(config: ConductorConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Build from a loaded configuration layer stack
    pub fn from_config_manager(manager: &ConfigManager) -> Result<Self> {
        Self::new(manager.config().clone())
    }

    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::default()
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<SubscriptionGate> {
        &self.gate
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn monitor(&self) -> &Arc<GapMonitor> {
        &self.monitor
    }

    /// Async stream of lifecycle events
    pub fn lifecycle_events(&self) -> tokio::sync::broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    pub fn start_monitor(&self) -> GapMonitorHandle {
        self.monitor.start()
    }

    /// Queue a pipeline request
    pub fn submit(&self, request: PipelineRequest) -> Result<()> {
        let request_id = request.request_id.clone();
        let pipeline = request.pipeline_name.clone();
        let priority = request.priority;

        self.queue.lock().enqueue(request)?;
        self.statistics.lock().record_queued();
        self.monitor.record_activity();

        log_pipeline_operation("submit", &request_id, &pipeline, "queued", None);
        self.announce(
            events::PIPELINE_QUEUED,
            json!({"request_id": request_id, "pipeline": pipeline, "priority": priority}),
        );
        Ok(())
    }

    /// Drop every not-yet-started request for `pipeline_name`
    pub fn cancel(&self, pipeline_name: &str) -> usize {
        let (removed, remaining) = {
            let mut queue = self.queue.lock();
            let removed = queue.remove_by_sequence_name(pipeline_name);
            (removed, queue.len())
        };
        self.statistics.lock().set_queue_length(remaining);

        if !removed.is_empty() {
            self.announce(
                events::PIPELINE_CANCELLED,
                json!({"pipeline": pipeline_name, "removed": removed.len()}),
            );
        }
        removed.len()
    }

    /// Empty the queue; returns the number of requests dropped
    pub fn clear(&self) -> usize {
        let removed = self.queue.lock().clear();
        self.statistics.lock().set_queue_length(0);
        removed
    }

    pub fn status(&self) -> QueueStatus {
        self.queue.lock().status()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.lock().statistics()
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        self.statistics.lock().performance_summary()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.statistics.lock().warnings()
    }

    pub fn export_metrics(&self) -> std::collections::BTreeMap<String, f64> {
        self.statistics.lock().export_metrics()
    }

    pub fn reset_statistics(&self) {
        self.statistics.lock().reset();
    }

    pub fn conflict_stats(&self) -> ConflictStats {
        self.conflicts.snapshot()
    }

    pub fn gap_report(&self) -> GapReport {
        self.monitor.report()
    }

    pub fn owner_of(&self, resource_id: &str) -> Option<ResourceOwnership> {
        self.ledger.lock().owner_of(resource_id).cloned()
    }

    pub fn check_conflict(&self, request: &PipelineRequest, resource_id: &str) -> ConflictCheck {
        self.ledger.lock().check_conflict(
            resource_id,
            &request.group_name,
            request.priority,
            &request.instance_id,
        )
    }

    /// Record a claim on behalf of a host-driven execution. Unconditional;
    /// run [`Self::check_conflict`] first.
    pub fn acquire_ownership(
        &self,
        resource_id: &str,
        group_name: &str,
        instance_id: &str,
        execution_id: &str,
    ) {
        self.ledger
            .lock()
            .acquire_ownership(resource_id, group_name, instance_id, execution_id);
        log_resource_operation("acquire", resource_id, instance_id, "owned");
    }

    /// Release a claim; a no-op unless `execution_id` still owns the resource
    pub fn release_ownership(&self, resource_id: &str, execution_id: &str) -> bool {
        self.ledger.lock().release_ownership(resource_id, execution_id)
    }

    pub fn resources_owned_by(&self, execution_id: &str) -> Vec<String> {
        self.ledger.lock().resources_owned_by(execution_id)
    }

    /// Preserve callbacks and serialize a payload for a plain-data boundary
    pub fn encode_payload(&self, payload: &mut Payload) -> Result<(PreservationResult, String)> {
        let preserved = self.callbacks.preserve_in_place(payload);
        let wire = serde_json::to_string(&payload.to_json())?;
        Ok((preserved, wire))
    }

    /// Parse a payload received from a plain-data boundary and restore its callbacks
    pub fn decode_payload(&self, wire: &str) -> Result<(Payload, usize)> {
        let value: Value = serde_json::from_str(wire)?;
        let mut payload = Payload::from_json(value);
        let restored = self.callbacks.rehydrate_in_place(&mut payload);
        Ok((payload, restored))
    }

    /// Dequeue and run the next request. `Ok(None)` when the queue is empty.
    ///
    /// Calls are serialized: a second caller waits until the running request
    /// has settled. Dropping the returned future mid-run releases the
    /// request's resources and clears the executing slot.
    pub async fn execute_next<H>(&self, handler: &H) -> Result<Option<ExecutionOutcome>>
    where
        H: PipelineHandler + ?Sized,
    {
        self.run_next(handler, &HashSet::new()).await
    }

    /// Run until the queue is empty or every remaining request is waiting on a resource
    pub async fn drain<H>(&self, handler: &H) -> Result<Vec<ExecutionOutcome>>
    where
        H: PipelineHandler + ?Sized,
    {
        let mut outcomes = Vec::new();
        // Requests deferred since the last one that left the queue
        let mut deferred = HashSet::new();

        while let Some(outcome) = self.run_next(handler, &deferred).await? {
            match &outcome {
                ExecutionOutcome::Requeued { execution_id, .. } => {
                    deferred.insert(execution_id.clone());
                }
                _ => deferred.clear(),
            }
            outcomes.push(outcome);
        }

        if !deferred.is_empty() {
            debug!(
                blocked = deferred.len(),
                "Drain stopped: only blocked requests remain"
            );
        }
        Ok(outcomes)
    }

    async fn run_next<H>(
        &self,
        handler: &H,
        skip: &HashSet<String>,
    ) -> Result<Option<ExecutionOutcome>>
    where
        H: PipelineHandler + ?Sized,
    {
        let _permit = self.execution_permit.lock().await;

        let Some(mut request) = self.queue.lock().dequeue_skipping(skip) else {
            return Ok(None);
        };
        self.statistics.lock().record_dequeued();

        let execution_id = request.execution_key().to_string();

        if let Some(deferral) = self.arbitrate(&request) {
            return Ok(Some(self.defer(request, deferral)));
        }
        self.record_queue_wait(&request);

        let mut guard = ExecutionGuard {
            conductor: self,
            request: request.clone(),
            execution_id: execution_id.clone(),
            settled: false,
        };
        {
            let mut ledger = self.ledger.lock();
            for resource_id in &request.resources {
                ledger.acquire_ownership(
                    resource_id,
                    &request.group_name,
                    &request.instance_id,
                    &execution_id,
                );
            }
        }
        self.queue
            .lock()
            .set_currently_executing(Some(request.clone()));
        self.announce(
            events::PIPELINE_STARTED,
            json!({"request_id": request.request_id, "pipeline": request.pipeline_name}),
        );

        let started = Instant::now();
        let result = AssertUnwindSafe(handler.execute(&mut request))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match result {
            Ok(Ok(())) => {
                self.statistics.lock().record_execution(duration_ms);
                ExecutionOutcome::Completed {
                    request_id: request.request_id.clone(),
                    execution_id: execution_id.clone(),
                    duration_ms,
                }
            }
            Ok(Err(e)) => {
                self.statistics.lock().record_error();
                error!(
                    request_id = %request.request_id,
                    pipeline = %request.pipeline_name,
                    error = %e,
                    "Pipeline handler failed"
                );
                ExecutionOutcome::Failed {
                    request_id: request.request_id.clone(),
                    execution_id: execution_id.clone(),
                    error: format!("{e:#}"),
                }
            }
            Err(panic) => {
                self.statistics.lock().record_error();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    request_id = %request.request_id,
                    pipeline = %request.pipeline_name,
                    panic = %message,
                    "Pipeline handler panicked"
                );
                ExecutionOutcome::Failed {
                    request_id: request.request_id.clone(),
                    execution_id: execution_id.clone(),
                    error: format!("handler panicked: {message}"),
                }
            }
        };

        guard.settled = true;
        drop(guard);
        self.monitor.record_activity();

        let (event, status) = match &outcome {
            ExecutionOutcome::Completed { .. } => (events::PIPELINE_COMPLETED, "completed"),
            _ => (events::PIPELINE_FAILED, "failed"),
        };
        log_pipeline_operation(
            "execute",
            &request.request_id,
            &request.pipeline_name,
            status,
            Some(&format!("{duration_ms:.2}ms")),
        );
        self.announce(
            event,
            json!({
                "request_id": request.request_id,
                "pipeline": request.pipeline_name,
                "duration_ms": duration_ms,
            }),
        );

        Ok(Some(outcome))
    }

    fn record_queue_wait(&self, request: &PipelineRequest) {
        let wait_ms = (chrono::Utc::now() - request.enqueued_at)
            .num_microseconds()
            .map(|us| us.max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.statistics.lock().record_queue_wait(wait_ms);
    }

    /// First declared resource that blocks the request, counting every check
    fn arbitrate(&self, request: &PipelineRequest) -> Option<Deferral> {
        let ledger = self.ledger.lock();
        for resource_id in &request.resources {
            self.conflicts.checks.fetch_add(1, Ordering::Relaxed);
            let check = ledger.check_conflict(
                resource_id,
                &request.group_name,
                request.priority,
                &request.instance_id,
            );
            if !check.has_conflict {
                continue;
            }

            self.conflicts.conflicts.fetch_add(1, Ordering::Relaxed);
            log_resource_operation(
                "check_conflict",
                resource_id,
                &request.instance_id,
                &check.resolution.to_string(),
            );

            let resource_id = resource_id.clone();
            match check.resolution {
                ConflictResolution::Allow => {
                    self.conflicts.overrides.fetch_add(1, Ordering::Relaxed);
                }
                ConflictResolution::Reject => {
                    self.conflicts.rejections.fetch_add(1, Ordering::Relaxed);
                    return Some(Deferral::Reject {
                        resource_id,
                        message: check.message,
                    });
                }
                ConflictResolution::Queue => {
                    self.conflicts.requeues.fetch_add(1, Ordering::Relaxed);
                    return Some(Deferral::Requeue {
                        resource_id,
                        message: check.message,
                    });
                }
            }
        }
        None
    }

    fn defer(&self, request: PipelineRequest, deferral: Deferral) -> ExecutionOutcome {
        let request_id = request.request_id.clone();
        let execution_id = request.execution_key().to_string();
        self.announce(
            events::RESOURCE_CONFLICT,
            json!({
                "request_id": request_id,
                "resource_id": deferral.resource_id(),
                "resolution": deferral.resolution(),
            }),
        );

        match deferral {
            Deferral::Requeue {
                resource_id,
                message,
            } => {
                let remaining = {
                    let mut queue = self.queue.lock();
                    queue.requeue(request);
                    queue.len()
                };
                self.statistics.lock().set_queue_length(remaining);
                self.announce(
                    events::PIPELINE_REQUEUED,
                    json!({"request_id": request_id, "resource_id": resource_id}),
                );
                ExecutionOutcome::Requeued {
                    request_id,
                    execution_id,
                    resource_id,
                    message,
                }
            }
            Deferral::Reject {
                resource_id,
                message,
            } => {
                self.record_queue_wait(&request);
                self.statistics.lock().record_error();
                self.queue.lock().mark_completed(&request);
                warn!(
                    request_id = %request_id,
                    resource_id = %resource_id,
                    "Pipeline request rejected: {}", message
                );
                self.announce(
                    events::PIPELINE_REJECTED,
                    json!({"request_id": request_id, "resource_id": resource_id}),
                );
                ExecutionOutcome::Rejected {
                    request_id,
                    resource_id,
                    message,
                }
            }
        }
    }

    /// Publish a lifecycle event on the broadcast channel and through the gate.
    /// Subscriber failures are logged; they never fail orchestration.
    fn announce(&self, event_name: &str, data: Value) {
        if let Err(e) = self.gate.emit(event_name, &data) {
            warn!(event = %event_name, error = %e, "Lifecycle event delivery failed");
        }
        self.publisher.publish(event_name, data);
    }
}

/// Why a dequeued request did not start
enum Deferral {
    Reject { resource_id: String, message: String },
    Requeue { resource_id: String, message: String },
}

impl Deferral {
    fn resource_id(&self) -> &str {
        match self {
            Deferral::Reject { resource_id, .. } | Deferral::Requeue { resource_id, .. } => {
                resource_id
            }
        }
    }

    fn resolution(&self) -> ConflictResolution {
        match self {
            Deferral::Reject { .. } => ConflictResolution::Reject,
            Deferral::Requeue { .. } => ConflictResolution::Queue,
        }
    }
}

/// Settles a started request: releases its resources and clears the
/// executing slot, including when the execution future is dropped mid-run.
struct ExecutionGuard<'a> {
    conductor: &'a Conductor,
    request: PipelineRequest,
    execution_id: String,
    settled: bool,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.conductor.ledger.lock().release_all(&self.execution_id);
        self.conductor.queue.lock().mark_completed(&self.request);

        if !self.settled {
            self.conductor.statistics.lock().record_error();
            warn!(
                request_id = %self.request.request_id,
                execution_id = %self.execution_id,
                "Pipeline execution dropped before completion; ownership released"
            );
        }
    }
}
