//! # Subscription Policy
//!
//! Callers identify themselves with a [`CallerContext`] capability token
//! instead of being classified from stack traces. The gate turns the token
//! into a [`SubscriberClass`] and hands unauthorized attempts to a
//! [`PolicyHandler`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

use crate::logging::log_policy_violation;

/// Who is calling the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerContext {
    /// A component rendered by the UI framework
    UiComponent { component: String },
    /// A plugin; only authorized while inside its mount phase
    Plugin {
        plugin_id: String,
        in_mount_phase: bool,
    },
    /// The conductor's own internals
    Orchestrator,
    /// No capability presented
    Anonymous { source: String },
}

impl CallerContext {
    pub fn ui_component(component: impl Into<String>) -> Self {
        Self::UiComponent {
            component: component.into(),
        }
    }

    pub fn mounting_plugin(plugin_id: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            in_mount_phase: true,
        }
    }

    pub fn plugin(plugin_id: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            in_mount_phase: false,
        }
    }

    pub fn anonymous(source: impl Into<String>) -> Self {
        Self::Anonymous {
            source: source.into(),
        }
    }

    /// Stable identifier for logs and violation records
    pub fn actor_id(&self) -> String {
        match self {
            CallerContext::UiComponent { component } => format!("ui:{component}"),
            CallerContext::Plugin { plugin_id, .. } => format!("plugin:{plugin_id}"),
            CallerContext::Orchestrator => crate::constants::ORCHESTRATOR_ACTOR.to_string(),
            CallerContext::Anonymous { source } => format!("anonymous:{source}"),
        }
    }

    pub fn classify(&self) -> SubscriberClass {
        match self {
            CallerContext::UiComponent { .. } => SubscriberClass::UiComponent,
            CallerContext::Plugin {
                in_mount_phase: true,
                ..
            } => SubscriberClass::MountingPlugin,
            CallerContext::Orchestrator => SubscriberClass::Orchestrator,
            CallerContext::Plugin {
                in_mount_phase: false,
                ..
            }
            | CallerContext::Anonymous { .. } => SubscriberClass::Unauthorized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberClass {
    UiComponent,
    MountingPlugin,
    Orchestrator,
    Unauthorized,
}

impl SubscriberClass {
    pub fn is_authorized(&self) -> bool {
        !matches!(self, SubscriberClass::Unauthorized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnauthorizedSubscribe,
    UnauthorizedUnsubscribe,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::UnauthorizedSubscribe => f.write_str("unauthorized_subscribe"),
            ViolationKind::UnauthorizedUnsubscribe => f.write_str("unauthorized_unsubscribe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub actor_id: String,
    pub message: String,
    /// Where the attempt came from (event name and caller description)
    pub stack: String,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
}

/// Consumer of policy violations
pub trait PolicyHandler: Send + Sync {
    fn report(&self, violation: &Violation);

    /// Whether unauthorized calls must fail instead of proceeding
    fn strict_mode(&self) -> bool;
}

/// Logs every violation and keeps them for inspection
#[derive(Debug, Default)]
pub struct RecordingPolicyHandler {
    strict_mode: bool,
    violations: Mutex<Vec<Violation>>,
}

impl RecordingPolicyHandler {
    pub fn new(strict_mode: bool) -> Self {
        Self {
            strict_mode,
            violations: Mutex::new(Vec::new()),
        }
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    pub fn violation_count(&self) -> usize {
        self.violations.lock().len()
    }
}

impl PolicyHandler for RecordingPolicyHandler {
    fn report(&self, violation: &Violation) {
        log_policy_violation(
            &violation.kind.to_string(),
            &violation.actor_id,
            &violation.stack,
            &violation.message,
            violation.severity == Severity::Error,
        );
        self.violations.lock().push(violation.clone());
    }

    fn strict_mode(&self) -> bool {
        self.strict_mode
    }
}
