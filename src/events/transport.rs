//! # Event Transport
//!
//! The publish/subscribe seam the subscription gate wraps, plus an in-process
//! implementation.
//!
//! [`LocalEventBus`] dispatches synchronously in registration order and stops
//! at the first subscriber that returns an error; a panicking subscriber
//! unwinds through `emit`. Isolating subscribers from each other is the job of
//! managed subscriptions in the gate, not of the transport.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConductorError, Result};

pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

pub type EventCallbackFn = dyn Fn(&str, &Value) -> std::result::Result<(), SubscriberError> + Send + Sync;

/// Subscriber callback. Receives the concrete event name and its data.
#[derive(Clone)]
pub struct EventCallback(Arc<EventCallbackFn>);

impl EventCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &Value) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, event_name: &str, data: &Value) -> std::result::Result<(), SubscriberError> {
        (self.0)(event_name, data)
    }
}

impl fmt::Debug for EventCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<event callback>")
    }
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportDebugInfo {
    /// Event pattern -> number of subscribers
    pub subscriptions: HashMap<String, usize>,
    pub total_subscribers: usize,
    pub events_emitted: u64,
}

/// Publish/subscribe transport the gate delegates to
pub trait EventTransport: Send + Sync {
    fn subscribe(&self, event_name: &str, callback: EventCallback, context: Option<&str>) -> SubscriptionId;

    /// Returns whether the subscription existed
    fn unsubscribe(&self, event_name: &str, id: SubscriptionId) -> bool;

    /// Deliver `data` to every subscriber whose pattern matches; returns how many ran
    fn emit(&self, event_name: &str, data: &Value) -> Result<usize>;

    fn debug_info(&self) -> TransportDebugInfo;
}

#[derive(Debug, Clone)]
struct Registration {
    id: SubscriptionId,
    callback: EventCallback,
    context: Option<String>,
}

/// Synchronous in-process transport with `*` prefix/suffix patterns
#[derive(Debug, Default)]
pub struct LocalEventBus {
    /// pattern -> registrations in subscription order
    subscriptions: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    events_emitted: AtomicU64,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches_pattern(event_name: &str, pattern: &str) -> bool {
        if pattern == "*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            event_name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            event_name.ends_with(suffix)
        } else {
            event_name == pattern
        }
    }

    fn matching(&self, event_name: &str) -> Vec<Registration> {
        let subscriptions = self.subscriptions.read();
        let mut matched: Vec<Registration> = subscriptions
            .iter()
            .filter(|(pattern, _)| Self::matches_pattern(event_name, pattern))
            .flat_map(|(_, registrations)| registrations.iter().cloned())
            .collect();
        // Registration order across patterns
        matched.sort_by_key(|registration| registration.id.0);
        matched
    }
}

impl EventTransport for LocalEventBus {
    fn subscribe(&self, event_name: &str, callback: EventCallback, context: Option<&str>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .entry(event_name.to_string())
            .or_default()
            .push(Registration {
                id,
                callback,
                context: context.map(str::to_string),
            });
        debug!(event = %event_name, subscription = %id, context = ?context, "Subscribed");
        id
    }

    fn unsubscribe(&self, event_name: &str, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(registrations) = subscriptions.get_mut(event_name) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            subscriptions.remove(event_name);
        }
        removed
    }

    fn emit(&self, event_name: &str, data: &Value) -> Result<usize> {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        // Snapshot first so callbacks may (un)subscribe without deadlocking
        let registrations = self.matching(event_name);

        let mut delivered = 0;
        for registration in &registrations {
            registration
                .callback
                .invoke(event_name, data)
                .map_err(|e| ConductorError::Transport {
                    event_name: event_name.to_string(),
                    reason: format!(
                        "subscriber {} ({}) failed: {e}",
                        registration.id,
                        registration.context.as_deref().unwrap_or("anonymous")
                    ),
                })?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn debug_info(&self) -> TransportDebugInfo {
        let subscriptions = self.subscriptions.read();
        let counts: HashMap<String, usize> = subscriptions
            .iter()
            .map(|(pattern, registrations)| (pattern.clone(), registrations.len()))
            .collect();
        TransportDebugInfo {
            total_subscribers: counts.values().sum(),
            subscriptions: counts,
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
        }
    }
}
