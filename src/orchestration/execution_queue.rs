//! # Execution Queue
//!
//! In-memory priority queue of pipeline requests.
//!
//! ## Ordering
//!
//! Tiers are strict (`High` > `Chained` > `Normal`) but the tie-break inside a
//! tier is not uniformly FIFO:
//!
//! - `High` goes to the very front, so the newest high request runs first.
//! - `Chained` goes directly after the leading run of `High` requests, ahead of
//!   every queued chained or normal request (newest first as well).
//! - `Normal` is appended at the tail (FIFO).
//!
//! Enqueue `A:normal, B:high, C:high, D:chained` and the dequeue order is
//! `C, B, D, A`.
//!
//! The "currently executing" slot is advisory. The queue records what the
//! caller tells it through [`ExecutionQueue::set_currently_executing`] and
//! [`ExecutionQueue::mark_completed`]; it does not stop anyone from running
//! two requests at once.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{PipelineRequest, Priority};
use crate::error::{ConductorError, Result};

/// Snapshot returned by [`ExecutionQueue::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    /// 1 while a request is marked as executing, else 0
    pub executing: usize,
    pub completed: u64,
    /// Number of queued requests (same as `pending`)
    pub length: usize,
    /// Pipeline name of the executing request
    pub active_sequence: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExecutionQueue {
    queue: VecDeque<PipelineRequest>,
    currently_executing: Option<PipelineRequest>,
    completed: u64,
    next_sequence: u64,
    priority_overrides: HashMap<String, Priority>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue seeded with per-pipeline priority overrides.
    ///
    /// Override keys match pipeline names case-insensitively; configuration
    /// sources lowercase map keys.
    pub fn with_priority_overrides(overrides: HashMap<String, Priority>) -> Self {
        Self {
            priority_overrides: overrides
                .into_iter()
                .map(|(name, priority)| (name.to_lowercase(), priority))
                .collect(),
            ..Self::default()
        }
    }

    /// Insert a request according to its (possibly overridden) priority.
    ///
    /// A request without an id or pipeline name is a caller error.
    pub fn enqueue(&mut self, mut request: PipelineRequest) -> Result<()> {
        if request.request_id.trim().is_empty() {
            return Err(ConductorError::InvalidRequest(
                "pipeline request has no request_id".to_string(),
            ));
        }
        if request.pipeline_name.trim().is_empty() {
            return Err(ConductorError::InvalidRequest(format!(
                "pipeline request {} has no pipeline_name",
                request.request_id
            )));
        }

        if let Some(priority) = self.priority_override(&request.pipeline_name) {
            if priority != request.priority {
                debug!(
                    request_id = %request.request_id,
                    pipeline = %request.pipeline_name,
                    from = %request.priority,
                    to = %priority,
                    "Applying priority override"
                );
                request.priority = priority;
            }
        }

        if request.execution_id.is_none() {
            request.execution_id = Some(Uuid::new_v4().to_string());
        }
        request.sequence = Some(self.next_sequence);
        self.next_sequence += 1;

        debug!(
            request_id = %request.request_id,
            pipeline = %request.pipeline_name,
            priority = %request.priority,
            queue_length = self.queue.len() + 1,
            "Enqueued pipeline request"
        );

        self.insert_by_priority(request);
        Ok(())
    }

    /// Put a previously dequeued request back, keeping its bookkeeping
    pub fn requeue(&mut self, request: PipelineRequest) {
        debug!(
            request_id = %request.request_id,
            pipeline = %request.pipeline_name,
            "Requeued pipeline request"
        );
        self.insert_by_priority(request);
    }

    fn insert_by_priority(&mut self, request: PipelineRequest) {
        match request.priority {
            Priority::High => self.queue.push_front(request),
            Priority::Chained => {
                let position = self
                    .queue
                    .iter()
                    .position(|queued| queued.priority != Priority::High)
                    .unwrap_or(self.queue.len());
                self.queue.insert(position, request);
            }
            Priority::Normal => self.queue.push_back(request),
        }
    }

    pub fn dequeue(&mut self) -> Option<PipelineRequest> {
        self.queue.pop_front()
    }

    /// Remove the first request in queue order whose execution key is not in
    /// `skip`. Skipped requests keep their positions.
    pub fn dequeue_skipping(&mut self, skip: &HashSet<String>) -> Option<PipelineRequest> {
        if skip.is_empty() {
            return self.dequeue();
        }
        let position = self
            .queue
            .iter()
            .position(|queued| !skip.contains(queued.execution_key()))?;
        self.queue.remove(position)
    }

    pub fn peek(&self) -> Option<&PipelineRequest> {
        self.queue.front()
    }

    /// Empty the queue and the priority overrides; returns how many requests were dropped
    pub fn clear(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        self.priority_overrides.clear();
        info!(removed = removed, "🧹 QUEUE: Cleared execution queue");
        removed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.queue.len(),
            executing: usize::from(self.currently_executing.is_some()),
            completed: self.completed,
            length: self.queue.len(),
            active_sequence: self
                .currently_executing
                .as_ref()
                .map(|request| request.pipeline_name.clone()),
        }
    }

    pub fn set_currently_executing(&mut self, request: Option<PipelineRequest>) {
        self.currently_executing = request;
    }

    pub fn currently_executing(&self) -> Option<&PipelineRequest> {
        self.currently_executing.as_ref()
    }

    /// Count a completion. The executing slot is only cleared when it holds
    /// this same request.
    pub fn mark_completed(&mut self, request: &PipelineRequest) {
        if self
            .currently_executing
            .as_ref()
            .is_some_and(|current| current.is_same_request(request))
        {
            self.currently_executing = None;
        }
        self.completed += 1;
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn find_by_sequence_name(&self, pipeline_name: &str) -> Vec<&PipelineRequest> {
        self.queue
            .iter()
            .filter(|request| request.pipeline_name == pipeline_name)
            .collect()
    }

    /// Drop every not-yet-started request for `pipeline_name`; returns them
    pub fn remove_by_sequence_name(&mut self, pipeline_name: &str) -> Vec<PipelineRequest> {
        let (removed, kept): (VecDeque<_>, VecDeque<_>) = self
            .queue
            .drain(..)
            .partition(|request| request.pipeline_name == pipeline_name);
        self.queue = kept;

        if !removed.is_empty() {
            info!(
                pipeline = %pipeline_name,
                removed = removed.len(),
                "Removed queued requests by sequence name"
            );
        }
        removed.into_iter().collect()
    }

    pub fn set_priority_override(&mut self, pipeline_name: impl Into<String>, priority: Priority) {
        self.priority_overrides
            .insert(pipeline_name.into().to_lowercase(), priority);
    }

    pub fn clear_priority_overrides(&mut self) {
        self.priority_overrides.clear();
    }

    pub fn priority_override(&self, pipeline_name: &str) -> Option<Priority> {
        self.priority_overrides
            .get(&pipeline_name.to_lowercase())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, priority: Priority) -> PipelineRequest {
        PipelineRequest::new(id, format!("pipeline-{id}"), priority)
    }

    fn drain_ids(queue: &mut ExecutionQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue())
            .map(|r| r.request_id)
            .collect()
    }

    #[test]
    fn test_mixed_priority_order() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(request("A", Priority::Normal)).unwrap();
        queue.enqueue(request("B", Priority::High)).unwrap();
        queue.enqueue(request("C", Priority::High)).unwrap();
        queue.enqueue(request("D", Priority::Chained)).unwrap();

        assert_eq!(drain_ids(&mut queue), vec!["C", "B", "D", "A"]);
    }

    #[test]
    fn test_chained_is_newest_first_after_high() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(request("n1", Priority::Normal)).unwrap();
        queue.enqueue(request("c1", Priority::Chained)).unwrap();
        queue.enqueue(request("h1", Priority::High)).unwrap();
        queue.enqueue(request("c2", Priority::Chained)).unwrap();
        queue.enqueue(request("n2", Priority::Normal)).unwrap();

        assert_eq!(drain_ids(&mut queue), vec!["h1", "c2", "c1", "n1", "n2"]);
    }

    #[test]
    fn test_rejects_request_without_id() {
        let mut queue = ExecutionQueue::new();
        let result = queue.enqueue(PipelineRequest::new("", "drag", Priority::Normal));
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));

        let result = queue.enqueue(PipelineRequest::new("r1", " ", Priority::Normal));
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_assigns_bookkeeping() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(request("a", Priority::Normal)).unwrap();
        queue.enqueue(request("b", Priority::Normal)).unwrap();

        let first = queue.dequeue().unwrap();
        let second = queue.dequeue().unwrap();
        assert!(first.execution_id.is_some());
        assert_eq!(first.sequence, Some(0));
        assert_eq!(second.sequence, Some(1));
    }

    #[test]
    fn test_clear_returns_count_and_drops_overrides() {
        let mut queue = ExecutionQueue::new();
        queue.set_priority_override("pipeline-a", Priority::High);
        for id in ["a", "b", "c"] {
            queue.enqueue(request(id, Priority::Normal)).unwrap();
        }

        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.status().length, 0);
        assert_eq!(queue.priority_override("pipeline-a"), None);
    }

    #[test]
    fn test_priority_override_applies_on_enqueue() {
        let mut queue = ExecutionQueue::new();
        queue.set_priority_override("pipeline-urgent", Priority::High);
        queue.enqueue(request("first", Priority::Normal)).unwrap();
        queue.enqueue(request("urgent", Priority::Normal)).unwrap();

        let head = queue.peek().unwrap();
        assert_eq!(head.request_id, "urgent");
        assert_eq!(head.priority, Priority::High);
    }

    #[test]
    fn test_priority_override_ignores_pipeline_name_case() {
        let overrides = HashMap::from([("canvas-redraw".to_string(), Priority::High)]);
        let mut queue = ExecutionQueue::with_priority_overrides(overrides);
        queue.set_priority_override("Toolbar-Refresh", Priority::Chained);

        queue
            .enqueue(PipelineRequest::new("n", "drag", Priority::Normal))
            .unwrap();
        queue
            .enqueue(PipelineRequest::new("t", "toolbar-refresh", Priority::Normal))
            .unwrap();
        queue
            .enqueue(PipelineRequest::new("c", "Canvas-Redraw", Priority::Normal))
            .unwrap();

        assert_eq!(queue.priority_override("CANVAS-REDRAW"), Some(Priority::High));
        assert_eq!(drain_ids(&mut queue), vec!["c", "t", "n"]);
    }

    #[test]
    fn test_dequeue_skipping_leaves_skipped_in_place() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(request("n", Priority::Normal)).unwrap();
        queue.enqueue(request("h", Priority::High)).unwrap();

        let blocked = queue.peek().unwrap().execution_key().to_string();
        let skip = HashSet::from([blocked]);

        assert_eq!(queue.dequeue_skipping(&skip).unwrap().request_id, "n");
        assert!(queue.dequeue_skipping(&skip).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue_skipping(&HashSet::new()).unwrap().request_id, "h");
    }

    #[test]
    fn test_status_and_mark_completed_identity() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(request("a", Priority::Normal)).unwrap();
        queue.enqueue(request("b", Priority::Normal)).unwrap();

        let running = queue.dequeue().unwrap();
        queue.set_currently_executing(Some(running.clone()));

        let status = queue.status();
        assert_eq!(status.pending, 1);
        assert_eq!(status.executing, 1);
        assert_eq!(status.active_sequence.as_deref(), Some("pipeline-a"));

        // A different request completing does not clear the slot
        let other = queue.dequeue().unwrap();
        queue.mark_completed(&other);
        assert_eq!(queue.status().executing, 1);
        assert_eq!(queue.status().completed, 1);

        queue.mark_completed(&running);
        let status = queue.status();
        assert_eq!(status.executing, 0);
        assert_eq!(status.completed, 2);
        assert_eq!(status.active_sequence, None);
    }

    #[test]
    fn test_find_and_remove_by_sequence_name() {
        let mut queue = ExecutionQueue::new();
        queue
            .enqueue(PipelineRequest::new("1", "drag", Priority::Normal))
            .unwrap();
        queue
            .enqueue(PipelineRequest::new("2", "drop", Priority::Normal))
            .unwrap();
        queue
            .enqueue(PipelineRequest::new("3", "drag", Priority::High))
            .unwrap();

        assert_eq!(queue.find_by_sequence_name("drag").len(), 2);

        let removed = queue.remove_by_sequence_name("drag");
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().pipeline_name, "drop");
        assert!(queue.remove_by_sequence_name("missing").is_empty());
    }
}
