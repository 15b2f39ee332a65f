//! # Callback Preservation Registry
//!
//! Keeps function-valued payload fields alive across boundaries that only
//! carry plain data (cloning into another context, JSON transport, ...).
//!
//! ## Flow
//!
//! ```text
//! preserve_in_place(payload)          rehydrate_in_place(received)
//!   ├─ attach correlation id            ├─ read correlation id
//!   ├─ walk graph, skip opaque nodes    ├─ pass 1: swap placeholders back
//!   ├─ callback -> placeholder(path)    └─ pass 2: write every recorded path
//!   └─ registry[id][path] = callback        that is not already a callback
//! ```
//!
//! Entries expire after `ttl` without access. Expiry is checked lazily on
//! every preserve and rehydrate call; there is no timer task.
//!
//! ## Shape mismatches
//!
//! Pass 2 assumes the received payload still has the original shape. When a
//! recorded path no longer fits (a map became an array, an intermediate key
//! vanished, an index is out of bounds, or the walk hits an opaque node) that
//! one path is skipped and the rest are still restored. A missing final key
//! on an existing map is created.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::path::{CallbackPath, PathStep};
use super::payload::{Callback, Payload, CORRELATION_FIELD};
use crate::config::CallbackConfig;

/// Outcome of [`CallbackRegistry::preserve_in_place`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservationResult {
    pub correlation_id: String,
    /// Number of callback fields extracted by this call
    pub count: usize,
}

#[derive(Debug)]
struct RegistryEntry {
    callbacks: HashMap<CallbackPath, Callback>,
    created_at: DateTime<Utc>,
    last_access: Instant,
}

impl RegistryEntry {
    fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
            created_at: Utc::now(),
            last_access: Instant::now(),
        }
    }
}

/// Diagnostic view of one registry entry
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub correlation_id: String,
    pub paths: Vec<CallbackPath>,
    pub created_at: DateTime<Utc>,
    pub idle_for: Duration,
}

enum RestoreOutcome {
    Restored,
    AlreadyPresent,
    ShapeMismatch,
}

/// Correlation-id keyed table of extracted callbacks
#[derive(Debug)]
pub struct CallbackRegistry {
    entries: DashMap<String, RegistryEntry>,
    ttl: Duration,
    id_prefix: String,
}

impl CallbackRegistry {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            id_prefix: "cb".to_string(),
        }
    }

    pub fn from_config(config: &CallbackConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl(),
            id_prefix: config.id_prefix.clone(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the correlation id on `payload`, minting and attaching one if absent.
    ///
    /// Attaching is best effort: a payload whose root is not an object keeps
    /// no id, and the freshly minted id is still returned.
    pub fn ensure_correlation_id(&self, payload: &mut Payload) -> String {
        if let Some(existing) = payload.correlation_id() {
            return existing.to_string();
        }

        let random = Uuid::new_v4().simple().to_string();
        let correlation_id = format!(
            "{}-{}-{}",
            self.id_prefix,
            Utc::now().timestamp_millis(),
            &random[..9]
        );

        match payload.as_object_mut() {
            Some(map) => {
                map.insert(
                    CORRELATION_FIELD.to_string(),
                    Payload::String(correlation_id.clone()),
                );
            }
            None => debug!(
                correlation_id = %correlation_id,
                "Payload root is not an object; correlation id not attached"
            ),
        }

        correlation_id
    }

    /// Replace every callback reachable from `root` with a placeholder and
    /// remember the callback under the root's correlation id.
    pub fn preserve_in_place(&self, root: &mut Payload) -> PreservationResult {
        self.sweep_expired();

        let correlation_id = self.ensure_correlation_id(root);
        let mut extracted = Vec::new();
        Self::extract(root, CallbackPath::root(), &mut extracted);

        let count = extracted.len();
        let mut entry = self
            .entries
            .entry(correlation_id.clone())
            .or_insert_with(RegistryEntry::new);
        entry.last_access = Instant::now();
        for (path, callback) in extracted {
            entry.callbacks.insert(path, callback);
        }
        drop(entry);

        debug!(
            correlation_id = %correlation_id,
            count = count,
            "Preserved callbacks in place"
        );

        PreservationResult {
            correlation_id,
            count,
        }
    }

    fn extract(node: &mut Payload, path: CallbackPath, out: &mut Vec<(CallbackPath, Callback)>) {
        match node {
            Payload::Callback(callback) => {
                out.push((path.clone(), callback.clone()));
                *node = Payload::placeholder(&path);
            }
            Payload::Object(map) => {
                for (key, child) in map.iter_mut() {
                    Self::extract(child, path.field(key.as_str()), out);
                }
            }
            Payload::Array(items) => {
                for (index, child) in items.iter_mut().enumerate() {
                    Self::extract(child, path.index(index), out);
                }
            }
            Payload::Opaque(_)
            | Payload::Null
            | Payload::Bool(_)
            | Payload::Number(_)
            | Payload::String(_) => {}
        }
    }

    /// Put preserved callbacks back into `target`.
    ///
    /// Returns the number of callback fields written. An unknown or expired
    /// correlation id is not an error and restores nothing.
    pub fn rehydrate_in_place(&self, target: &mut Payload) -> usize {
        self.sweep_expired();

        let Some(correlation_id) = target.correlation_id().map(str::to_string) else {
            return 0;
        };

        let callbacks = match self.entries.get_mut(&correlation_id) {
            Some(mut entry) => {
                entry.last_access = Instant::now();
                entry.callbacks.clone()
            }
            None => {
                debug!(correlation_id = %correlation_id, "No callback entry to rehydrate");
                return 0;
            }
        };

        let mut restored = HashSet::new();
        Self::replace_placeholders(target, &callbacks, &mut restored);

        for (path, callback) in &callbacks {
            match Self::restore_at(target, path, callback) {
                RestoreOutcome::Restored => {
                    restored.insert(path.clone());
                }
                RestoreOutcome::AlreadyPresent => {}
                RestoreOutcome::ShapeMismatch => debug!(
                    correlation_id = %correlation_id,
                    path = %path,
                    "Skipping callback restore: payload shape no longer matches"
                ),
            }
        }

        debug!(
            correlation_id = %correlation_id,
            restored = restored.len(),
            recorded = callbacks.len(),
            "Rehydrated callbacks in place"
        );

        restored.len()
    }

    fn replace_placeholders(
        node: &mut Payload,
        callbacks: &HashMap<CallbackPath, Callback>,
        restored: &mut HashSet<CallbackPath>,
    ) {
        if let Some(path) = node.placeholder_path() {
            if let Some(callback) = callbacks.get(&path) {
                *node = Payload::Callback(callback.clone());
                restored.insert(path);
                return;
            }
        }

        match node {
            Payload::Object(map) => {
                for child in map.values_mut() {
                    Self::replace_placeholders(child, callbacks, restored);
                }
            }
            Payload::Array(items) => {
                for child in items.iter_mut() {
                    Self::replace_placeholders(child, callbacks, restored);
                }
            }
            _ => {}
        }
    }

    fn restore_at(target: &mut Payload, path: &CallbackPath, callback: &Callback) -> RestoreOutcome {
        let Some((last, parents)) = path.split_last() else {
            // The root carries the correlation id, so it cannot also be a callback
            return RestoreOutcome::ShapeMismatch;
        };

        let mut node = target;
        for step in parents {
            let current = node;
            node = match (step, current) {
                (PathStep::Field(name), Payload::Object(map)) => match map.get_mut(name) {
                    Some(child) => child,
                    None => return RestoreOutcome::ShapeMismatch,
                },
                (PathStep::Index(index), Payload::Array(items)) => match items.get_mut(*index) {
                    Some(child) => child,
                    None => return RestoreOutcome::ShapeMismatch,
                },
                _ => return RestoreOutcome::ShapeMismatch,
            };
        }

        match (last, node) {
            (PathStep::Field(name), Payload::Object(map)) => {
                if map.get(name).is_some_and(Payload::is_callback) {
                    return RestoreOutcome::AlreadyPresent;
                }
                map.insert(name.clone(), Payload::Callback(callback.clone()));
                RestoreOutcome::Restored
            }
            (PathStep::Index(index), Payload::Array(items)) => match items.get_mut(*index) {
                Some(slot) if slot.is_callback() => RestoreOutcome::AlreadyPresent,
                Some(slot) => {
                    *slot = Payload::Callback(callback.clone());
                    RestoreOutcome::Restored
                }
                None => RestoreOutcome::ShapeMismatch,
            },
            _ => RestoreOutcome::ShapeMismatch,
        }
    }

    /// Drop the entry for `correlation_id`. Returns whether one existed.
    pub fn cleanup(&self, correlation_id: &str) -> bool {
        self.entries.remove(correlation_id).is_some()
    }

    /// Purge entries idle for longer than the TTL; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.last_access.elapsed() <= ttl);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            info!(removed = removed, ttl_ms = ttl.as_millis() as u64, "🧹 CALLBACKS: Swept expired entries");
        }
        removed
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn has_entry(&self, correlation_id: &str) -> bool {
        self.entries.contains_key(correlation_id)
    }

    /// Recorded paths for an entry, sorted for stable output
    pub fn paths_for(&self, correlation_id: &str) -> Vec<CallbackPath> {
        let mut paths: Vec<CallbackPath> = self
            .entries
            .get(correlation_id)
            .map(|entry| entry.callbacks.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    pub fn entry_info(&self, correlation_id: &str) -> Option<EntryInfo> {
        let entry = self.entries.get(correlation_id)?;
        let mut paths: Vec<CallbackPath> = entry.callbacks.keys().cloned().collect();
        paths.sort();
        Some(EntryInfo {
            correlation_id: correlation_id.to_string(),
            paths,
            created_at: entry.created_at,
            idle_for: entry.last_access.elapsed(),
        })
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
