//! Structured locators into a payload graph.
//!
//! A [`CallbackPath`] is a sequence of typed steps rather than a string, so
//! field names containing dots or brackets need no escaping. It renders in
//! the familiar `handlers[0].on_done` form for logs and serializes as a JSON
//! array (`["handlers", 0, "on_done"]`) inside placeholders.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Index(usize),
    Field(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackPath(Vec<PathStep>);

impl CallbackPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// New path extended by a field step
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut steps = self.0.clone();
        steps.push(PathStep::Field(name.into()));
        Self(steps)
    }

    /// New path extended by an index step
    pub fn index(&self, index: usize) -> Self {
        let mut steps = self.0.clone();
        steps.push(PathStep::Index(index));
        Self(steps)
    }

    /// Split into the parent steps and the final step
    pub fn split_last(&self) -> Option<(&PathStep, &[PathStep])> {
        self.0.split_last()
    }
}

impl From<Vec<PathStep>> for CallbackPath {
    fn from(steps: Vec<PathStep>) -> Self {
        Self(steps)
    }
}

impl fmt::Display for CallbackPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, step) in self.0.iter().enumerate() {
            match step {
                PathStep::Field(name) if position == 0 => write!(f, "{name}")?,
                PathStep::Field(name) => write!(f, ".{name}")?,
                PathStep::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_locator_notation() {
        let path = CallbackPath::root()
            .field("handlers")
            .index(0)
            .field("on_done");
        assert_eq!(path.to_string(), "handlers[0].on_done");
    }

    #[test]
    fn test_field_names_with_separators_survive_json() {
        let path = CallbackPath::root().field("a.b[3]").index(2);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["a.b[3]", 2]));

        let back: CallbackPath = serde_json::from_value(json).unwrap();
        assert_eq!(back, path);
    }
}
