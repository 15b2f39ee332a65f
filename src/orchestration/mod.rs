//! # Orchestration Engine
//!
//! Serialized pipeline execution for plugin-driven front ends.
//!
//! ## Core Components
//!
//! - **ExecutionQueue**: priority-ordered FIFO of pending pipeline requests
//! - **ResourceOwnershipLedger**: which execution holds which shared resource,
//!   with pluggable conflict strategies
//! - **StatisticsTracker**: smoothed execution/queue-wait averages and threshold warnings
//! - **GapMonitor**: detects a blocked or idle runtime from sampling lag
//! - **Conductor**: owns one of each and drives requests through them

pub mod conductor;
pub mod execution_queue;
pub mod gap_monitor;
pub mod resource_ledger;
pub mod statistics;
pub mod types;

pub use conductor::{
    Conductor, ConductorBuilder, ConflictStats, ExecutionOutcome, PipelineHandler,
};
pub use execution_queue::{ExecutionQueue, QueueStatus};
pub use gap_monitor::{GapEvent, GapKind, GapMonitor, GapMonitorHandle, GapReport};
pub use resource_ledger::{
    strategy_from_name, ConflictCheck, ConflictResolution, ConflictStrategy, OverrideStrategy,
    PriorityBasedStrategy, QueueStrategy, RejectStrategy, ResourceClaim, ResourceOwnership,
    ResourceOwnershipLedger,
};
pub use statistics::{PerformanceSummary, StatisticsSnapshot, StatisticsTracker};
pub use types::{PipelineRequest, Priority};
