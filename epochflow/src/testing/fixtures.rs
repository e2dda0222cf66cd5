//! Stage graphs and configurations used across tests.

use crate::config::OrchestratorConfig;
use crate::governor::GovernorConfig;
use crate::graph::StageDefinition;
use crate::scheduler::{JitterStrategy, RetryPolicy};

/// `a`, `b -> a`, `c -> a`, `d -> [b, c]`.
#[must_use]
pub fn diamond_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("a"),
        StageDefinition::new("b").with_predecessor("a"),
        StageDefinition::new("c").with_predecessor("a"),
        StageDefinition::new("d").with_predecessors(["b", "c"]),
    ]
}

/// A chain where every stage depends on the one before it.
#[must_use]
pub fn linear_stages(names: &[&str]) -> Vec<StageDefinition> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let stage = StageDefinition::new(*name);
            match i.checked_sub(1) {
                Some(prev) => stage.with_predecessor(names[prev]),
                None => stage,
            }
        })
        .collect()
}

/// `width` independent stages named `s00`, `s01`, ... feeding one `sink`.
#[must_use]
pub fn fan_in_stages(width: usize) -> Vec<StageDefinition> {
    let sources: Vec<String> = (0..width).map(|i| format!("s{i:02}")).collect();
    let mut stages: Vec<_> = sources.iter().map(StageDefinition::new).collect();
    stages.push(StageDefinition::new("sink").with_predecessors(sources));
    stages
}

/// Retries quickly with no jitter.
#[must_use]
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_retries(max_retries)
        .with_backoff_base_ms(1)
        .with_max_backoff_ms(5)
        .with_jitter(JitterStrategy::None)
}

/// A config over `stages` with one `events` registry, a fixed pool of
/// `workers` and epochs `start..=end`.
#[must_use]
pub fn test_config(stages: Vec<StageDefinition>, workers: usize, start: u32, end: u32) -> OrchestratorConfig {
    OrchestratorConfig::new("test")
        .with_stages(stages)
        .with_registry("events")
        .with_epochs(start..=end)
        .with_retry(fast_retry(1))
        .with_governor(GovernorConfig::fixed(workers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StageGraph;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixture_graphs_build() {
        let diamond = StageGraph::build(diamond_stages()).unwrap();
        assert_eq!(diamond.wave_count(), 3);

        let chain = StageGraph::build(linear_stages(&["x", "y", "z"])).unwrap();
        assert_eq!(chain.execution_order().to_vec(), vec!["x", "y", "z"]);

        let fan = StageGraph::build(fan_in_stages(3)).unwrap();
        assert_eq!(fan.waves()[0].len(), 3);
        assert_eq!(fan.waves()[1].stages, vec!["sink".to_string()]);
    }

    #[test]
    fn test_config_is_valid() {
        test_config(diamond_stages(), 2, 1, 5).validate().unwrap();
    }
}
