//! # Subscription Gate
//!
//! The only sanctioned way to attach to the event transport.
//!
//! Every subscribe/unsubscribe presents a [`CallerContext`]. Authorized
//! callers are UI components, plugins inside their mount phase, and the
//! conductor itself. Anything else produces a [`Violation`] for the policy
//! handler, and then:
//!
//! - in strict mode the call fails with [`ConductorError::PolicyViolation`];
//! - otherwise the violation is logged and the call **still goes through**.
//!
//! The lenient path is the default configuration. Do not tighten it to
//! fail-closed without changing `gate.strict_mode`.

use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::policy::{
    CallerContext, PolicyHandler, Severity, SubscriberClass, Violation, ViolationKind,
};
use super::transport::{EventCallback, EventTransport, SubscriptionId, TransportDebugInfo};
use crate::error::{ConductorError, Result};

/// Advisory answer from [`SubscriptionGate::validate_subscription`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionValidation {
    pub allowed: bool,
    pub class: SubscriberClass,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub authorized: u64,
    pub violations: u64,
    pub managed_failures: u64,
    pub emitted: u64,
}

#[derive(Debug, Default)]
struct GateCounters {
    authorized: AtomicU64,
    violations: AtomicU64,
    managed_failures: Arc<AtomicU64>,
    emitted: AtomicU64,
}

pub struct SubscriptionGate {
    transport: Arc<dyn EventTransport>,
    policy: Arc<dyn PolicyHandler>,
    counters: GateCounters,
}

impl std::fmt::Debug for SubscriptionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGate")
            .field("transport", &"<Arc<dyn EventTransport>>".to_string())
            .field("strict_mode", &self.policy.strict_mode())
            .field("counters", &self.counters)
            .finish()
    }
}

impl SubscriptionGate {
    pub fn new(transport: Arc<dyn EventTransport>, policy: Arc<dyn PolicyHandler>) -> Self {
        Self {
            transport,
            policy,
            counters: GateCounters::default(),
        }
    }

    pub fn strict_mode(&self) -> bool {
        self.policy.strict_mode()
    }

    /// Pure check: would this caller be authorized to subscribe?
    pub fn validate_subscription(&self, event_name: &str, context: &CallerContext) -> SubscriptionValidation {
        let class = context.classify();
        let reason = match (class, context) {
            (SubscriberClass::UiComponent, _) => "UI components may subscribe".to_string(),
            (SubscriberClass::MountingPlugin, _) => "plugin is inside its mount phase".to_string(),
            (SubscriberClass::Orchestrator, _) => "orchestrator internals".to_string(),
            (SubscriberClass::Unauthorized, CallerContext::Plugin { plugin_id, .. }) => format!(
                "plugin '{plugin_id}' must subscribe to '{event_name}' from its mount phase"
            ),
            (SubscriberClass::Unauthorized, _) => format!(
                "'{}' presented no capability for '{event_name}'",
                context.actor_id()
            ),
        };

        SubscriptionValidation {
            allowed: class.is_authorized(),
            class,
            reason,
        }
    }

    fn authorize(&self, kind: ViolationKind, event_name: &str, context: &CallerContext) -> Result<SubscriberClass> {
        let validation = self.validate_subscription(event_name, context);
        if validation.allowed {
            self.counters.authorized.fetch_add(1, Ordering::Relaxed);
            return Ok(validation.class);
        }

        let strict = self.policy.strict_mode();
        let actor_id = context.actor_id();
        let violation = Violation {
            kind,
            actor_id: actor_id.clone(),
            message: validation.reason.clone(),
            stack: format!("{kind} '{event_name}' by {context:?}"),
            severity: if strict { Severity::Error } else { Severity::Warning },
            occurred_at: chrono::Utc::now(),
        };
        self.counters.violations.fetch_add(1, Ordering::Relaxed);
        self.policy.report(&violation);

        if strict {
            return Err(ConductorError::PolicyViolation {
                actor_id,
                message: validation.reason,
            });
        }

        warn!(
            actor_id = %actor_id,
            event = %event_name,
            "Unauthorized {kind} allowed to proceed (lenient mode)"
        );
        Ok(validation.class)
    }

    pub fn subscribe(
        &self,
        event_name: &str,
        callback: EventCallback,
        context: &CallerContext,
    ) -> Result<SubscriptionId> {
        let class = self.authorize(ViolationKind::UnauthorizedSubscribe, event_name, context)?;
        let actor_id = context.actor_id();
        let id = self.transport.subscribe(event_name, callback, Some(&actor_id));
        debug!(
            event = %event_name,
            actor_id = %actor_id,
            class = ?class,
            subscription = %id,
            "Gate subscription registered"
        );
        Ok(id)
    }

    pub fn unsubscribe(&self, event_name: &str, id: SubscriptionId, context: &CallerContext) -> Result<bool> {
        self.authorize(ViolationKind::UnauthorizedUnsubscribe, event_name, context)?;
        Ok(self.transport.unsubscribe(event_name, id))
    }

    /// Subscribe with failure isolation: errors and panics from `callback`
    /// are logged against `subscriber_id` and never reach the dispatch loop.
    pub fn create_managed_subscription(
        &self,
        event_name: &str,
        callback: EventCallback,
        subscriber_id: &str,
        context: &CallerContext,
    ) -> Result<SubscriptionId> {
        let subscriber_id = subscriber_id.to_string();
        let failures = Arc::clone(&self.counters.managed_failures);

        let managed = EventCallback::new(move |name, data| {
            match catch_unwind(AssertUnwindSafe(|| callback.invoke(name, data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        subscriber_id = %subscriber_id,
                        event = %name,
                        error = %e,
                        "Managed subscriber failed"
                    );
                }
                Err(panic) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        subscriber_id = %subscriber_id,
                        event = %name,
                        panic = %panic_message(panic.as_ref()),
                        "Managed subscriber panicked"
                    );
                }
            }
            Ok(())
        });

        self.subscribe(event_name, managed, context)
    }

    /// Logged pass-through to the transport
    pub fn emit(&self, event_name: &str, data: &Value) -> Result<usize> {
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        let delivered = self.transport.emit(event_name, data)?;
        debug!(event = %event_name, delivered = delivered, "Event emitted");
        Ok(delivered)
    }

    pub fn transport_info(&self) -> TransportDebugInfo {
        self.transport.debug_info()
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            authorized: self.counters.authorized.load(Ordering::Relaxed),
            violations: self.counters.violations.load(Ordering::Relaxed),
            managed_failures: self.counters.managed_failures.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
