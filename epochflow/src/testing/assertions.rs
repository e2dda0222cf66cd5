//! Assertions over plans and run reports.

use crate::epoch::{EpochOutcome, EpochPhase};
use crate::graph::StageGraph;
use crate::orchestrator::RunReport;

/// Asserts the graph's waves, each listed in execution-index order.
///
/// # Panics
///
/// Panics if the waves differ.
pub fn assert_waves(graph: &StageGraph, expected: &[&[&str]]) {
    let actual: Vec<Vec<&str>> = graph
        .waves()
        .iter()
        .map(|w| w.stages.iter().map(String::as_str).collect())
        .collect();
    let expected: Vec<Vec<&str>> = expected.iter().map(|w| w.to_vec()).collect();
    assert_eq!(actual, expected, "waves differ");
}

/// Asserts an epoch went through every phase and committed.
///
/// # Panics
///
/// Panics if the epoch did not commit.
pub fn assert_committed(outcome: &EpochOutcome) {
    assert_eq!(
        outcome.phases.last(),
        Some(&EpochPhase::Committed),
        "epoch {} ended in {:?}",
        outcome.epoch,
        outcome.phases.last()
    );
    assert!(
        outcome.checkpoint.is_committed(),
        "epoch {} checkpoint is {}",
        outcome.epoch,
        outcome.checkpoint.status
    );
    assert_eq!(outcome.checkpoint.registry_content_hashes, outcome.registry_hashes);
}

/// Asserts two reports committed identical registries for every epoch both executed.
///
/// # Panics
///
/// Panics on the first epoch whose hashes differ, or if the reports share no epoch.
pub fn assert_same_registry_hashes(left: &RunReport, right: &RunReport) {
    let right_hashes = right.registry_hashes();
    let mut compared = 0;
    for (epoch, hashes) in left.registry_hashes() {
        if let Some(other) = right_hashes.get(&epoch) {
            assert_eq!(&hashes, other, "registry hashes differ for epoch {epoch}");
            compared += 1;
        }
    }
    assert!(compared > 0, "reports share no executed epoch");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::diamond_stages;

    #[test]
    fn test_assert_waves_on_diamond() {
        let graph = StageGraph::build(diamond_stages()).unwrap();
        assert_waves(&graph, &[&["a"], &["b", "c"], &["d"]]);
    }

    #[test]
    #[should_panic(expected = "waves differ")]
    fn test_assert_waves_detects_difference() {
        let graph = StageGraph::build(diamond_stages()).unwrap();
        assert_waves(&graph, &[&["a"], &["c", "b"], &["d"]]);
    }
}
