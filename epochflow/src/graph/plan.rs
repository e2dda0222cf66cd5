//! Wave planning over the stage dependency graph.
//!
//! Stages are grouped into waves by longest-path depth: a stage lands in
//! the first wave after all of its predecessors. Within a wave stages are
//! ordered lexicographically, and the global execution index enumerates
//! waves in order. The plan depends only on the declarations, never on
//! declaration order or hash-map iteration order.

use super::StageDefinition;
use crate::errors::{CycleError, GraphError, UnknownDependencyError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// A set of stages with no dependencies among each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionWave {
    /// Zero-based position of the wave in the plan.
    pub index: usize,
    /// Stage names in execution-index order.
    pub stages: Vec<String>,
}

impl ExecutionWave {
    /// Returns the number of stages in the wave.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the wave has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns true if the wave contains the stage.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// A validated, immutable stage graph with its wave plan.
#[derive(Debug, Clone)]
pub struct StageGraph {
    definitions: BTreeMap<String, StageDefinition>,
    waves: Vec<ExecutionWave>,
    execution_order: Vec<String>,
    execution_index: BTreeMap<String, usize>,
    fingerprint: String,
}

impl StageGraph {
    /// Builds the graph and its wave plan.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] if a predecessor is not
    /// declared, [`GraphError::Cycle`] naming every stage that sits on a
    /// cycle, and [`GraphError::DuplicateStage`], [`GraphError::InvalidName`]
    /// or [`GraphError::Empty`] for malformed declaration lists.
    pub fn build(definitions: impl IntoIterator<Item = StageDefinition>) -> Result<Self, GraphError> {
        let mut by_name = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            if by_name.contains_key(&def.name) {
                return Err(GraphError::DuplicateStage(def.name));
            }
            by_name.insert(def.name.clone(), def);
        }

        if by_name.is_empty() {
            return Err(GraphError::Empty);
        }

        for def in by_name.values() {
            for dep in &def.predecessors {
                if !by_name.contains_key(dep) {
                    return Err(UnknownDependencyError::new(&def.name, dep).into());
                }
            }
        }

        let waves = compute_waves(&by_name)?;

        let execution_order: Vec<String> = waves
            .iter()
            .flat_map(|w| w.stages.iter().cloned())
            .collect();
        let execution_index = execution_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let fingerprint = fingerprint_of(by_name.values());

        Ok(Self {
            definitions: by_name,
            waves,
            execution_order,
            execution_index,
            fingerprint,
        })
    }

    /// Returns the wave plan.
    #[must_use]
    pub fn waves(&self) -> &[ExecutionWave] {
        &self.waves
    }

    /// Returns the number of waves.
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.definitions.len()
    }

    /// Returns the global topological order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns a stage's position in the global topological order.
    #[must_use]
    pub fn execution_index(&self, stage: &str) -> Option<usize> {
        self.execution_index.get(stage).copied()
    }

    /// Returns a stage declaration.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.definitions.get(name)
    }

    /// Returns the stages carrying a tag, in execution order.
    #[must_use]
    pub fn stages_tagged(&self, tag: &str) -> Vec<&StageDefinition> {
        self.execution_order
            .iter()
            .filter_map(|name| self.definitions.get(name))
            .filter(|def| def.has_tag(tag))
            .collect()
    }

    /// Returns the sha256 fingerprint of the declaration list.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Computes the fingerprint a graph built from `definitions` would have,
    /// without validating or planning.
    #[must_use]
    pub fn fingerprint_for(definitions: &[StageDefinition]) -> String {
        let mut sorted: Vec<&StageDefinition> = definitions.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        fingerprint_of(sorted)
    }
}

/// Groups stages into waves by longest-path depth.
fn compute_waves(stages: &BTreeMap<String, StageDefinition>) -> Result<Vec<ExecutionWave>, GraphError> {
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut remaining: BTreeSet<&str> = stages.keys().map(String::as_str).collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        // BTreeSet iteration keeps each wave sorted by name.
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|name| {
                stages[*name]
                    .predecessors
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            })
            .collect();

        if ready.is_empty() {
            return Err(cycle_error(stages, &remaining).into());
        }

        for name in &ready {
            remaining.remove(name);
        }
        placed.extend(ready.iter().copied());

        waves.push(ExecutionWave {
            index: waves.len(),
            stages: ready.into_iter().map(str::to_string).collect(),
        });
    }

    Ok(waves)
}

/// Builds a cycle error from the stages that could not be placed.
///
/// Every unplaced stage has at least one unplaced predecessor, so walking
/// predecessors from any of them must revisit a stage.
fn cycle_error(stages: &BTreeMap<String, StageDefinition>, remaining: &BTreeSet<&str>) -> CycleError {
    let on_cycle: Vec<&str> = remaining
        .iter()
        .copied()
        .filter(|start| reaches(stages, remaining, start, start))
        .collect();

    let mut path: Vec<&str> = Vec::new();
    let mut current = on_cycle
        .first()
        .or_else(|| remaining.iter().next())
        .copied()
        .unwrap_or_default();
    loop {
        if let Some(pos) = path.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(current.to_string());
            return CycleError::new(owned(&on_cycle), cycle);
        }
        path.push(current);
        match unplaced_predecessors(stages, remaining, current).first() {
            Some(next) => current = *next,
            None => return CycleError::new(owned(&on_cycle), owned(&path)),
        }
    }
}

fn unplaced_predecessors<'a>(
    stages: &'a BTreeMap<String, StageDefinition>,
    remaining: &BTreeSet<&str>,
    name: &str,
) -> Vec<&'a str> {
    stages
        .get(name)
        .map(|def| {
            def.predecessors
                .iter()
                .map(String::as_str)
                .filter(|dep| remaining.contains(dep))
                .collect()
        })
        .unwrap_or_default()
}

/// Returns true if `target` is reachable from `from` by following at least one edge.
fn reaches(
    stages: &BTreeMap<String, StageDefinition>,
    remaining: &BTreeSet<&str>,
    from: &str,
    target: &str,
) -> bool {
    let mut stack = unplaced_predecessors(stages, remaining, from);
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if seen.insert(node) {
            stack.extend(unplaced_predecessors(stages, remaining, node));
        }
    }
    false
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

fn fingerprint_of<'a>(stages: impl IntoIterator<Item = &'a StageDefinition>) -> String {
    let mut hasher = Sha256::new();
    for def in stages {
        hasher.update(def.name.as_bytes());
        hasher.update([0u8]);
        for dep in &def.predecessors {
            hasher.update(dep.as_bytes());
            hasher.update([1u8]);
        }
        hasher.update([0u8]);
        for tag in &def.tags {
            hasher.update(tag.as_bytes());
            hasher.update([1u8]);
        }
        hasher.update([2u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn diamond() -> Vec<StageDefinition> {
        vec![
            StageDefinition::new("D").with_predecessors(["B", "C"]),
            StageDefinition::new("C").with_predecessor("A"),
            StageDefinition::new("A"),
            StageDefinition::new("B").with_predecessor("A"),
        ]
    }

    fn wave_names(graph: &StageGraph) -> Vec<Vec<String>> {
        graph.waves().iter().map(|w| w.stages.clone()).collect()
    }

    #[test]
    fn test_diamond_waves() {
        let graph = StageGraph::build(diamond()).unwrap();
        assert_eq!(
            wave_names(&graph),
            vec![vec!["A".to_string()], vec!["B".to_string(), "C".to_string()], vec!["D".to_string()]]
        );
        assert_eq!(graph.execution_order(), &["A", "B", "C", "D"]);
        assert_eq!(graph.execution_index("C"), Some(2));
        assert_eq!(graph.execution_index("missing"), None);
    }

    #[test]
    fn test_plan_independent_of_declaration_order() {
        let mut reversed = diamond();
        reversed.reverse();
        let a = StageGraph::build(diamond()).unwrap();
        let b = StageGraph::build(reversed).unwrap();
        assert_eq!(a.execution_order(), b.execution_order());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_longest_path_depth() {
        // "late" depends on A directly and on D transitively via "mid".
        let mut defs = diamond();
        defs.push(StageDefinition::new("mid").with_predecessor("D"));
        defs.push(StageDefinition::new("late").with_predecessors(["A", "mid"]));
        let graph = StageGraph::build(defs).unwrap();
        assert_eq!(graph.wave_count(), 5);
        assert_eq!(graph.waves()[4].stages, vec!["late".to_string()]);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = StageGraph::build(vec![StageDefinition::new("a").with_predecessor("ghost")]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency(UnknownDependencyError::new("a", "ghost"))
        );
    }

    #[test]
    fn test_cycle_names_offending_set() {
        let defs = vec![
            StageDefinition::new("root"),
            StageDefinition::new("x").with_predecessors(["root", "z"]),
            StageDefinition::new("y").with_predecessor("x"),
            StageDefinition::new("z").with_predecessor("y"),
            StageDefinition::new("downstream").with_predecessor("z"),
        ];
        let GraphError::Cycle(cycle) = StageGraph::build(defs).unwrap_err() else {
            panic!("expected cycle error");
        };
        assert_eq!(cycle.stages, vec!["x", "y", "z"]);
        assert_eq!(cycle.cycle_path.first(), cycle.cycle_path.last());
        assert_eq!(cycle.cycle_path.len(), 4);
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = StageGraph::build(vec![StageDefinition::new("loop").with_predecessor("loop")]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(ref c) if c.stages == vec!["loop".to_string()]));
    }

    #[test]
    fn test_duplicate_and_empty() {
        let dup = StageGraph::build(vec![StageDefinition::new("a"), StageDefinition::new("a")]);
        assert_eq!(dup.unwrap_err(), GraphError::DuplicateStage("a".into()));
        assert_eq!(StageGraph::build(Vec::new()).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn test_stages_tagged() {
        let defs = vec![
            StageDefinition::new("b").with_tag("events"),
            StageDefinition::new("a").with_tag("events"),
            StageDefinition::new("c"),
        ];
        let graph = StageGraph::build(defs).unwrap();
        let tagged: Vec<&str> = graph.stages_tagged("events").iter().map(|d| d.name.as_str()).collect();
        assert_eq!(tagged, vec!["a", "b"]);
    }

    #[test]
    fn test_fingerprint_changes_with_edges() {
        let a = StageGraph::build(diamond()).unwrap();
        let mut defs = diamond();
        defs[0] = StageDefinition::new("D").with_predecessor("B");
        let b = StageGraph::build(defs).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
