//! # Callback Preservation
//!
//! Payload graph types and the registry that lets function-valued fields
//! survive plain-data boundaries.
//!
//! ## Module Organization
//!
//! - [`payload`] - The [`Payload`] graph, [`Callback`] and the [`OpaqueNode`] skip marker
//! - [`path`] - Typed locators ([`CallbackPath`]) into a payload graph
//! - [`registry`] - The [`CallbackRegistry`] with preserve/rehydrate and TTL sweeping

pub mod path;
pub mod payload;
pub mod registry;

pub use path::{CallbackPath, PathStep};
pub use payload::{Callback, OpaqueNode, Payload, CORRELATION_FIELD, PLACEHOLDER_KEY};
pub use registry::{CallbackRegistry, EntryInfo, PreservationResult};
