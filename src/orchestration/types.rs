//! # Orchestration Types
//!
//! Core data types shared by the execution queue, the resource ledger and the
//! conductor facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::callbacks::Payload;

/// Queue position class. Ordering between tiers is strict:
/// `High` > `Chained` > `Normal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Chained,
    #[default]
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Chained => "chained",
            Priority::Normal => "normal",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to execute one pipeline (sequence of beats).
///
/// `execution_id` and `sequence` are bookkeeping assigned by the execution
/// queue on enqueue; every other field is fixed once the request is queued.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub request_id: String,
    pub pipeline_name: String,
    pub priority: Priority,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
    /// Group ("symphony") the pipeline belongs to
    pub group_name: String,
    /// Plugin instance issuing the request; ownership conflicts are per instance
    pub instance_id: String,
    /// Shared resources touched by the pipeline's beats
    pub resources: Vec<String>,
    pub execution_id: Option<String>,
    pub sequence: Option<u64>,
}

impl PipelineRequest {
    pub fn new(
        request_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            pipeline_name: pipeline_name.into(),
            priority,
            payload: Payload::Null,
            enqueued_at: Utc::now(),
            group_name: String::new(),
            instance_id: String::new(),
            resources: Vec::new(),
            execution_id: None,
            sequence: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Execution id, falling back to the request id before the queue assigns one
    pub fn execution_key(&self) -> &str {
        self.execution_id.as_deref().unwrap_or(&self.request_id)
    }

    /// Identity used by `mark_completed` to match the executing request
    pub fn is_same_request(&self, other: &PipelineRequest) -> bool {
        self.request_id == other.request_id && self.execution_id == other.execution_id
    }
}
