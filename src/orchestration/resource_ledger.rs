//! # Resource Ownership Ledger
//!
//! Tracks which execution owns which shared resource and arbitrates new
//! claims against the current owner.
//!
//! The ledger never blocks and never queues internally. A
//! [`ConflictResolution::Queue`] answer tells the caller to put the whole
//! pipeline request back on the execution queue and retry later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::Priority;
use crate::config::LedgerConfig;
use crate::error::{ConductorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOwnership {
    pub resource_id: String,
    pub execution_id: String,
    pub group_name: String,
    pub instance_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// What the caller should do with a conflicting claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConflictResolution {
    /// Proceed; the current owner (if any) is evicted on acquisition
    Allow,
    /// Refuse the new claim
    Reject,
    /// Requeue the pipeline request and try again later
    Queue,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictResolution::Allow => "ALLOW",
            ConflictResolution::Reject => "REJECT",
            ConflictResolution::Queue => "QUEUE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictCheck {
    pub has_conflict: bool,
    pub resolution: ConflictResolution,
    pub message: String,
}

/// The claim being arbitrated
#[derive(Debug, Clone, Copy)]
pub struct ResourceClaim<'a> {
    pub resource_id: &'a str,
    pub group_name: &'a str,
    pub priority: Priority,
    pub instance_id: &'a str,
}

/// Policy deciding between a current owner and a conflicting claim
pub trait ConflictStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn resolve(&self, current: &ResourceOwnership, claim: &ResourceClaim<'_>) -> ConflictResolution;
}

/// High-priority claims evict the owner; everything else waits its turn
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityBasedStrategy;

impl ConflictStrategy for PriorityBasedStrategy {
    fn name(&self) -> &str {
        "priority"
    }

    fn resolve(&self, _current: &ResourceOwnership, claim: &ResourceClaim<'_>) -> ConflictResolution {
        match claim.priority {
            Priority::High => ConflictResolution::Allow,
            Priority::Chained | Priority::Normal => ConflictResolution::Queue,
        }
    }
}

/// Newest claim always wins
#[derive(Debug, Default, Clone, Copy)]
pub struct OverrideStrategy;

impl ConflictStrategy for OverrideStrategy {
    fn name(&self) -> &str {
        "override"
    }

    fn resolve(&self, _current: &ResourceOwnership, _claim: &ResourceClaim<'_>) -> ConflictResolution {
        ConflictResolution::Allow
    }
}

/// First owner keeps the resource, conflicting claims fail
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectStrategy;

impl ConflictStrategy for RejectStrategy {
    fn name(&self) -> &str {
        "reject"
    }

    fn resolve(&self, _current: &ResourceOwnership, _claim: &ResourceClaim<'_>) -> ConflictResolution {
        ConflictResolution::Reject
    }
}

/// Conflicting claims always retry later
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueStrategy;

impl ConflictStrategy for QueueStrategy {
    fn name(&self) -> &str {
        "queue"
    }

    fn resolve(&self, _current: &ResourceOwnership, _claim: &ResourceClaim<'_>) -> ConflictResolution {
        ConflictResolution::Queue
    }
}

/// Build the strategy named in configuration
pub fn strategy_from_name(name: &str) -> Result<Arc<dyn ConflictStrategy>> {
    match name {
        "priority" => Ok(Arc::new(PriorityBasedStrategy)),
        "override" => Ok(Arc::new(OverrideStrategy)),
        "reject" => Ok(Arc::new(RejectStrategy)),
        "queue" => Ok(Arc::new(QueueStrategy)),
        other => Err(ConductorError::Configuration(format!(
            "unknown conflict strategy '{other}'"
        ))),
    }
}

#[derive(Debug)]
pub struct ResourceOwnershipLedger {
    ownership: HashMap<String, ResourceOwnership>,
    /// group name -> resources currently owned on behalf of that group
    group_index: HashMap<String, BTreeSet<String>>,
    strategy: Arc<dyn ConflictStrategy>,
}

impl ResourceOwnershipLedger {
    pub fn new(strategy: Arc<dyn ConflictStrategy>) -> Self {
        Self {
            ownership: HashMap::new(),
            group_index: HashMap::new(),
            strategy,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(strategy_from_name(&config.strategy)?))
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Arbitrate a claim without changing any state.
    ///
    /// A conflict exists only when the resource is owned by a different
    /// instance; re-claims by the owning instance are always allowed.
    pub fn check_conflict(
        &self,
        resource_id: &str,
        group_name: &str,
        priority: Priority,
        instance_id: &str,
    ) -> ConflictCheck {
        let Some(current) = self.ownership.get(resource_id) else {
            return ConflictCheck {
                has_conflict: false,
                resolution: ConflictResolution::Allow,
                message: format!("Resource '{resource_id}' is free"),
            };
        };

        if current.instance_id == instance_id {
            return ConflictCheck {
                has_conflict: false,
                resolution: ConflictResolution::Allow,
                message: format!("Resource '{resource_id}' already owned by instance '{instance_id}'"),
            };
        }

        let claim = ResourceClaim {
            resource_id,
            group_name,
            priority,
            instance_id,
        };
        let resolution = self.strategy.resolve(current, &claim);

        let message = match resolution {
            ConflictResolution::Allow => format!(
                "Instance '{instance_id}' overrides '{}' on resource '{resource_id}'",
                current.instance_id
            ),
            ConflictResolution::Reject => format!(
                "Resource '{resource_id}' is owned by '{}' ({}); claim from '{instance_id}' rejected",
                current.instance_id, current.group_name
            ),
            ConflictResolution::Queue => format!(
                "Resource '{resource_id}' is owned by '{}' ({}); claim from '{instance_id}' should be requeued",
                current.instance_id, current.group_name
            ),
        };

        debug!(
            resource_id = %resource_id,
            owner = %current.instance_id,
            claimant = %instance_id,
            strategy = %self.strategy.name(),
            resolution = %resolution,
            "Resource conflict detected"
        );

        ConflictCheck {
            has_conflict: true,
            resolution,
            message,
        }
    }

    /// Record ownership unconditionally, evicting any previous owner.
    ///
    /// Callers are expected to have run [`Self::check_conflict`] first.
    pub fn acquire_ownership(
        &mut self,
        resource_id: &str,
        group_name: &str,
        instance_id: &str,
        execution_id: &str,
    ) {
        let record = ResourceOwnership {
            resource_id: resource_id.to_string(),
            execution_id: execution_id.to_string(),
            group_name: group_name.to_string(),
            instance_id: instance_id.to_string(),
            acquired_at: Utc::now(),
        };

        if let Some(previous) = self.ownership.insert(resource_id.to_string(), record) {
            self.unindex(&previous);
            if previous.execution_id != execution_id {
                warn!(
                    resource_id = %resource_id,
                    evicted_execution = %previous.execution_id,
                    evicted_instance = %previous.instance_id,
                    new_execution = %execution_id,
                    "Evicted previous resource owner"
                );
            }
        }

        self.group_index
            .entry(group_name.to_string())
            .or_default()
            .insert(resource_id.to_string());

        debug!(
            resource_id = %resource_id,
            group = %group_name,
            instance_id = %instance_id,
            execution_id = %execution_id,
            "Acquired resource ownership"
        );
    }

    /// Release ownership if, and only if, `execution_id` still owns it.
    ///
    /// Returns whether a record was removed. A stale release from an evicted
    /// execution is a no-op.
    pub fn release_ownership(&mut self, resource_id: &str, execution_id: &str) -> bool {
        match self.ownership.get(resource_id) {
            Some(current) if current.execution_id == execution_id => {}
            Some(current) => {
                debug!(
                    resource_id = %resource_id,
                    owner_execution = %current.execution_id,
                    releasing_execution = %execution_id,
                    "Ignoring release from non-owning execution"
                );
                return false;
            }
            None => return false,
        }

        if let Some(previous) = self.ownership.remove(resource_id) {
            self.unindex(&previous);
        }
        true
    }

    /// Release everything held by an execution; returns the number released
    pub fn release_all(&mut self, execution_id: &str) -> usize {
        let owned = self.resources_owned_by(execution_id);
        let released = owned
            .iter()
            .filter(|resource_id| self.release_ownership(resource_id, execution_id))
            .count();

        if released > 0 {
            info!(
                execution_id = %execution_id,
                released = released,
                "🔓 LEDGER: Released resources for completed execution"
            );
        }
        released
    }

    fn unindex(&mut self, record: &ResourceOwnership) {
        if let Some(resources) = self.group_index.get_mut(&record.group_name) {
            resources.remove(&record.resource_id);
            if resources.is_empty() {
                self.group_index.remove(&record.group_name);
            }
        }
    }

    pub fn is_owned(&self, resource_id: &str) -> bool {
        self.ownership.contains_key(resource_id)
    }

    pub fn owner_of(&self, resource_id: &str) -> Option<&ResourceOwnership> {
        self.ownership.get(resource_id)
    }

    /// Resources owned by an execution, sorted
    pub fn resources_owned_by(&self, execution_id: &str) -> Vec<String> {
        let mut resources: Vec<String> = self
            .ownership
            .values()
            .filter(|record| record.execution_id == execution_id)
            .map(|record| record.resource_id.clone())
            .collect();
        resources.sort();
        resources
    }

    pub fn group_resources(&self, group_name: &str) -> Vec<String> {
        self.group_index
            .get(group_name)
            .map(|resources| resources.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ownership_snapshot(&self) -> Vec<ResourceOwnership> {
        let mut records: Vec<ResourceOwnership> = self.ownership.values().cloned().collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        records
    }

    pub fn len(&self) -> usize {
        self.ownership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ownership.is_empty()
    }
}

impl Default for ResourceOwnershipLedger {
    fn default() -> Self {
        Self::new(Arc::new(PriorityBasedStrategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_resource_has_no_conflict() {
        let ledger = ResourceOwnershipLedger::default();
        let check = ledger.check_conflict("selection", "canvas", Priority::Normal, "canvas#1");
        assert!(!check.has_conflict);
        assert_eq!(check.resolution, ConflictResolution::Allow);
    }

    #[test]
    fn test_conflict_with_other_instance() {
        let mut ledger = ResourceOwnershipLedger::default();
        ledger.acquire_ownership("selection", "canvas", "X", "exec-1");

        let check = ledger.check_conflict("selection", "canvas", Priority::Normal, "Y");
        assert!(check.has_conflict);
        assert_eq!(check.resolution, ConflictResolution::Queue);

        let same = ledger.check_conflict("selection", "canvas", Priority::Normal, "X");
        assert!(!same.has_conflict);
    }

    #[test]
    fn test_check_does_not_mutate() {
        let mut ledger = ResourceOwnershipLedger::new(Arc::new(OverrideStrategy));
        ledger.acquire_ownership("selection", "canvas", "X", "exec-1");

        let check = ledger.check_conflict("selection", "canvas", Priority::High, "Y");
        assert_eq!(check.resolution, ConflictResolution::Allow);
        assert_eq!(ledger.owner_of("selection").unwrap().instance_id, "X");
    }

    #[test]
    fn test_priority_strategy_lets_high_override() {
        let mut ledger = ResourceOwnershipLedger::default();
        ledger.acquire_ownership("viewport", "canvas", "X", "exec-1");

        let check = ledger.check_conflict("viewport", "canvas", Priority::High, "Y");
        assert_eq!(check.resolution, ConflictResolution::Allow);

        ledger.acquire_ownership("viewport", "canvas", "Y", "exec-2");
        assert_eq!(ledger.owner_of("viewport").unwrap().execution_id, "exec-2");
        // The evicted execution can no longer release it
        assert!(!ledger.release_ownership("viewport", "exec-1"));
        assert!(ledger.is_owned("viewport"));
    }

    #[test]
    fn test_reject_strategy() {
        let mut ledger = strategy_from_name("reject")
            .map(ResourceOwnershipLedger::new)
            .unwrap();
        ledger.acquire_ownership("doc", "editor", "X", "exec-1");
        let check = ledger.check_conflict("doc", "editor", Priority::High, "Y");
        assert_eq!(check.resolution, ConflictResolution::Reject);
        assert!(check.message.contains("rejected"));
    }

    #[test]
    fn test_release_with_mismatched_execution_is_noop() {
        let mut ledger = ResourceOwnershipLedger::default();
        ledger.acquire_ownership("selection", "canvas", "X", "exec-1");

        assert!(!ledger.release_ownership("selection", "exec-other"));
        assert!(ledger.is_owned("selection"));

        assert!(ledger.release_ownership("selection", "exec-1"));
        assert!(!ledger.is_owned("selection"));
        assert!(ledger.group_resources("canvas").is_empty());
    }

    #[test]
    fn test_group_index_and_release_all() {
        let mut ledger = ResourceOwnershipLedger::default();
        ledger.acquire_ownership("selection", "canvas", "X", "exec-1");
        ledger.acquire_ownership("viewport", "canvas", "X", "exec-1");
        ledger.acquire_ownership("palette", "library", "Z", "exec-2");

        assert_eq!(ledger.group_resources("canvas"), vec!["selection", "viewport"]);
        assert_eq!(ledger.resources_owned_by("exec-1"), vec!["selection", "viewport"]);

        assert_eq!(ledger.release_all("exec-1"), 2);
        assert!(ledger.group_resources("canvas").is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_eviction_moves_group_index() {
        let mut ledger = ResourceOwnershipLedger::new(Arc::new(OverrideStrategy));
        ledger.acquire_ownership("shared", "canvas", "X", "exec-1");
        ledger.acquire_ownership("shared", "library", "Y", "exec-2");

        assert!(ledger.group_resources("canvas").is_empty());
        assert_eq!(ledger.group_resources("library"), vec!["shared"]);
    }

    #[test]
    fn test_unknown_strategy_is_configuration_error() {
        let err = strategy_from_name("coin_flip").unwrap_err();
        assert!(matches!(err, ConductorError::Configuration(_)));
    }
}
