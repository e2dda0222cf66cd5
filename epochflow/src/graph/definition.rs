//! Stage declarations.

use crate::errors::GraphError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Declaration of a single stage in the pipeline.
///
/// Predecessors and tags are kept in ordered sets so that two declarations
/// with the same content always serialize and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageDefinition {
    /// The unique name of the stage.
    pub name: String,
    /// Names of stages that must reach a terminal status first.
    #[serde(default)]
    pub predecessors: BTreeSet<String>,
    /// Free-form labels.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl StageDefinition {
    /// Creates a new stage definition with no predecessors.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predecessors: BTreeSet::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Sets the predecessors.
    #[must_use]
    pub fn with_predecessors(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.predecessors = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a predecessor.
    #[must_use]
    pub fn with_predecessor(mut self, dep: impl Into<String>) -> Self {
        self.predecessors.insert(dep.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Returns true if the stage carries the tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Validates the declaration in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed. A stage listing itself as
    /// a predecessor is reported as a one-stage cycle by the graph builder.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !is_valid_name(&self.name) {
            return Err(GraphError::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}

/// Returns true if `name` is usable as a stage or registry name.
///
/// Names double as file names in the file-backed stores, so path
/// separators and a leading dot are rejected.
pub(crate) fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

// Literal pattern; cannot fail to compile.
#[allow(clippy::unwrap_used)]
fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_builder() {
        let def = StageDefinition::new("termination_events")
            .with_predecessors(["hiring_events", "baseline_workforce"])
            .with_tag("events");

        assert_eq!(def.name, "termination_events");
        assert_eq!(def.predecessors.len(), 2);
        assert!(def.has_tag("events"));
        assert!(!def.has_tag("snapshot"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(StageDefinition::new("").validate().is_err());
        assert!(StageDefinition::new("has space").validate().is_err());
        assert!(StageDefinition::new("_leading").validate().is_err());
        assert!(StageDefinition::new("int_enrollment.v2").validate().is_ok());
    }

    #[test]
    fn test_deserialize_defaults() {
        let def: StageDefinition = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert!(def.predecessors.is_empty());
        assert!(def.tags.is_empty());
    }
}
