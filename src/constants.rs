//! # System Constants
//!
//! Event names emitted by the conductor and identifiers it uses when acting
//! on its own behalf.

/// Lifecycle events published by the conductor
pub mod events {
    // Pipeline lifecycle events
    pub const PIPELINE_QUEUED: &str = "pipeline.queued";
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    pub const PIPELINE_REJECTED: &str = "pipeline.rejected";
    pub const PIPELINE_REQUEUED: &str = "pipeline.requeued";
    pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";

    // Resource arbitration events
    pub const RESOURCE_CONFLICT: &str = "resource.conflict";
}

/// Actor id used for subscriptions and emits made by the conductor itself
pub const ORCHESTRATOR_ACTOR: &str = "conductor";
