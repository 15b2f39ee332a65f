//! # Payload Graph
//!
//! The structured value carried by a pipeline request. Unlike
//! `serde_json::Value` it can hold live [`Callback`]s, which is exactly what a
//! serialization boundary destroys, and [`OpaqueNode`]s, which graph walks
//! treat as foreign and never descend into.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::path::CallbackPath;

/// Reserved field on a payload root holding its correlation id
pub const CORRELATION_FIELD: &str = "__correlation_id";

/// Reserved key of the single-entry object left in place of a callback
pub const PLACEHOLDER_KEY: &str = "__callback_ref";

pub type CallbackFn = dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync;

/// A function-valued payload field. Equality is reference identity.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, argument: &Value) -> anyhow::Result<Value> {
        (self.0)(argument)
    }

    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<callback>")
    }
}

/// Explicit opt-out from graph walks.
///
/// Anything implementing this (render-tree nodes, host handles) is carried
/// through the payload untouched: callback preservation never inspects or
/// rewrites its contents.
pub trait OpaqueNode: fmt::Debug + Send + Sync {
    /// Short label for diagnostics
    fn node_kind(&self) -> &str;

    /// Plain-data rendition used when the payload crosses a boundary
    fn to_json(&self) -> Value {
        Value::Null
    }
}

#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
    Callback(Callback),
    Opaque(Arc<dyn OpaqueNode>),
}

impl Payload {
    /// Build an object payload from key/value pairs
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Payload)>,
        K: Into<String>,
    {
        Payload::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Payload>,
    {
        Payload::Array(items.into_iter().collect())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Payload::Callback(Callback::new(f))
    }

    pub fn opaque(node: impl OpaqueNode + 'static) -> Self {
        Payload::Opaque(Arc::new(node))
    }

    /// Placeholder object standing in for a callback at `path`
    pub fn placeholder(path: &CallbackPath) -> Self {
        let steps = serde_json::to_value(path).unwrap_or(Value::Null);
        Payload::object([(PLACEHOLDER_KEY, Payload::from_json(steps))])
    }

    /// Path carried by a placeholder object, if this is one
    pub fn placeholder_path(&self) -> Option<CallbackPath> {
        let Payload::Object(map) = self else {
            return None;
        };
        if map.len() != 1 {
            return None;
        }
        let steps = map.get(PLACEHOLDER_KEY)?;
        serde_json::from_value(steps.to_json()).ok()
    }

    pub fn is_callback(&self) -> bool {
        matches!(self, Payload::Callback(_))
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Payload::Callback(callback) => Some(callback),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Payload>> {
        match self {
            Payload::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Payload>> {
        match self {
            Payload::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_object()?.get(key)
    }

    pub fn get_index(&self, index: usize) -> Option<&Payload> {
        match self {
            Payload::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Follow a path from this node
    pub fn lookup(&self, path: &CallbackPath) -> Option<&Payload> {
        use super::path::PathStep;

        path.steps()
            .iter()
            .try_fold(self, |node, step| match step {
                PathStep::Field(name) => node.get(name),
                PathStep::Index(index) => node.get_index(*index),
            })
    }

    /// Correlation id attached to this payload root, if any
    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_FIELD)?.as_str()
    }

    /// Plain-data rendition. Callbacks do not survive: they become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Null | Payload::Callback(_) => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::Array(items) => Value::Array(items.iter().map(Payload::to_json).collect()),
            Payload::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
            Payload::Opaque(node) => node.to_json(),
        }
    }

    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(items.into_iter().map(Payload::from_json).collect()),
            Value::Object(map) => Payload::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Payload::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Null, Payload::Null) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Number(a), Payload::Number(b)) => a == b,
            (Payload::String(a), Payload::String(b)) => a == b,
            (Payload::Array(a), Payload::Array(b)) => a == b,
            (Payload::Object(a), Payload::Object(b)) => a == b,
            (Payload::Callback(a), Payload::Callback(b)) => a.ptr_eq(b),
            (Payload::Opaque(a), Payload::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::from_json(value)
    }
}

impl From<Callback> for Payload {
    fn from(callback: Callback) -> Self {
        Payload::Callback(callback)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::String(s)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n.into())
    }
}
