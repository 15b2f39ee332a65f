#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Orchestration core for plugin-based interactive applications.
//!
//! ## Overview
//!
//! Plugins submit named pipelines; the conductor runs them one at a time in
//! priority order, arbitrates the shared resources they touch, keeps
//! callbacks alive across plain-data boundaries, and restricts who may attach
//! to the event transport.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Execution queue, resource ledger, statistics, gap monitor and the [`Conductor`]
//! - [`callbacks`] - Callback preservation and rehydration for payloads
//! - [`events`] - Event transport, subscription gate and lifecycle publisher
//! - [`config`] - Layered TOML/environment configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conductor_core::{Conductor, ConductorConfig, PipelineRequest, Priority};
//!
//! # fn example() -> conductor_core::Result<()> {
//! let conductor = Conductor::new(ConductorConfig::default())?;
//! conductor.submit(
//!     PipelineRequest::new("req-1", "canvas.drag", Priority::Normal)
//!         .with_group("canvas")
//!         .with_resources(["selection"]),
//! )?;
//! println!("{:?}", conductor.status());
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestration;

pub use callbacks::{Callback, CallbackPath, CallbackRegistry, OpaqueNode, Payload, PathStep};
pub use config::{ConductorConfig, ConfigManager, ConfigurationError};
pub use error::{ConductorError, Result};
pub use events::{CallerContext, EventCallback, EventTransport, LocalEventBus, SubscriptionGate};
pub use orchestration::{
    Conductor, ExecutionOutcome, ExecutionQueue, PipelineHandler, PipelineRequest, Priority,
    ResourceOwnershipLedger, StatisticsTracker,
};
