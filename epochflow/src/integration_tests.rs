//! End-to-end epoch runs through the public orchestrator API.

use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, FileCheckpointStore};
use crate::config::OrchestratorConfig;
use crate::epoch::EpochPhase;
use crate::errors::{EpochFailure, GraphError, OrchestratorError};
use crate::events::{CollectingEventSink, OrchestratorEvent};
use crate::governor::{GovernorConfig, StaticSampler};
use crate::graph::StageDefinition;
use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
use crate::registry::{FileRegistryStore, InMemoryRegistryStore, Registry, RegistryStore};
use crate::scheduler::{ExecutionContext, StageOutcome, TransformRunner};
use crate::testing::{
    assert_committed, assert_same_registry_hashes, assert_waves, diamond_stages, fan_in_stages, test_config,
    FailingRunner, FnRunner, RecordingRunner, SeededRunner, Trace,
};
use crate::validation::{ReferentialIntegrityRule, RowCountDriftRule, RuleConfig, Severity};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn build(config: OrchestratorConfig, runner: Arc<dyn TransformRunner>) -> Orchestrator {
    OrchestratorBuilder::new(config, runner)
        .with_sampler(Arc::new(StaticSampler::idle()))
        .with_run_id("test-run")
        .build()
        .unwrap()
}

fn seeded() -> Arc<dyn TransformRunner> {
    Arc::new(SeededRunner::new("events").with_timing_noise(3))
}

fn wide_and_deep() -> Vec<StageDefinition> {
    let mut stages = fan_in_stages(6);
    stages.extend([
        StageDefinition::new("a").with_predecessor("sink"),
        StageDefinition::new("b").with_predecessor("a"),
        StageDefinition::new("c").with_predecessor("a"),
        StageDefinition::new("d").with_predecessors(["b", "c"]),
    ]);
    stages
}

#[tokio::test]
async fn test_same_hashes_for_any_worker_count() {
    let mut reports = Vec::new();
    for workers in [1, 2, 4, 8] {
        let orchestrator = build(test_config(wide_and_deep(), workers, 1, 3), seeded());
        let report = orchestrator.run_configured().await.unwrap();
        assert_eq!(report.executed(), vec![1, 2, 3]);
        report.epochs.iter().for_each(assert_committed);
        reports.push(report);
    }
    for report in &reports[1..] {
        assert_same_registry_hashes(&reports[0], report);
    }

    // Stage order in the report never depends on completion order.
    let names: Vec<_> = reports[3].epochs[0]
        .stage_results
        .iter()
        .map(|r| r.stage_name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["s00", "s01", "s02", "s03", "s04", "s05", "sink", "a", "b", "c", "d"]
    );
}

#[tokio::test]
async fn test_diamond_dispatch_order() {
    let recorder = Arc::new(RecordingRunner::new(SeededRunner::new("events").with_timing_noise(5)));
    let orchestrator = build(test_config(diamond_stages(), 4, 1, 1), recorder.clone());
    assert_waves(orchestrator.graph(), &[&["a"], &["b", "c"], &["d"]]);

    orchestrator.run_configured().await.unwrap();

    let d_started = recorder.position(&Trace::Started("d".into())).unwrap();
    for upstream in ["b", "c"] {
        let finished = recorder.position(&Trace::Finished(upstream.into())).unwrap();
        assert!(finished < d_started, "d started before {upstream} finished");
    }
    assert!(recorder.max_concurrency() <= 2);
}

#[tokio::test]
async fn test_resume_after_crash_matches_uninterrupted_run() {
    let full_dir = tempfile::tempdir().unwrap();
    let full = build(
        test_config(diamond_stages(), 2, 1, 5).with_storage_root(full_dir.path()),
        seeded(),
    )
    .run_configured()
    .await
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(diamond_stages(), 2, 1, 5).with_storage_root(dir.path());
    {
        let first = build(config.clone(), seeded());
        let partial = first.run(1..=2).await.unwrap();
        assert_eq!(partial.executed(), vec![1, 2]);
    }

    let recorder = Arc::new(RecordingRunner::new(SeededRunner::new("events")));
    let second = build(config, recorder.clone());
    let resumed = second.resume().await.unwrap();

    assert_eq!(resumed.executed(), vec![3, 4, 5]);
    assert_eq!(recorder.started().len(), 3 * 4);
    assert_same_registry_hashes(&full, &resumed);
    for epoch in 1..=2 {
        assert_eq!(
            second.committed_hashes(epoch).await.unwrap(),
            Some(full.epoch(epoch).unwrap().registry_hashes.clone())
        );
    }
}

#[tokio::test]
async fn test_resume_past_interrupted_epoch_with_torn_log() {
    let full_dir = tempfile::tempdir().unwrap();
    let full = build(
        test_config(diamond_stages(), 2, 1, 5).with_storage_root(full_dir.path()),
        seeded(),
    )
    .run_configured()
    .await
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(diamond_stages(), 2, 1, 5).with_storage_root(dir.path());
    build(config.clone(), seeded()).run(1..=2).await.unwrap();

    // Epoch 3 began, wrote a partial registry, then the process died mid-append.
    let log = FileCheckpointStore::new(dir.path());
    log.append(&Checkpoint::in_progress(3).with_run_id("crashed"))
        .await
        .unwrap();
    FileRegistryStore::new(dir.path())
        .save(&Registry::new("events", 3).with_entry("3/a", json!("partial")))
        .await
        .unwrap();
    let mut content = tokio::fs::read_to_string(log.path()).await.unwrap();
    content.push_str(r#"{"epoch_id":3,"status":"COMM"#);
    tokio::fs::write(log.path(), content).await.unwrap();

    let resumed_by = build(config.clone(), seeded());
    let status = resumed_by.status().await.unwrap();
    assert_eq!(status.epochs.get(&3), Some(&CheckpointStatus::InProgress));
    assert_eq!(status.resume_point(1), 3);

    let resumed = resumed_by.resume().await.unwrap();
    assert_eq!(resumed.executed(), vec![3, 4, 5]);
    assert_same_registry_hashes(&full, &resumed);

    // The repaired log stays readable for any later restart.
    let again = build(config, seeded());
    let status = again.status().await.unwrap();
    assert_eq!(status.last_committed.map(|c| c.epoch_id), Some(5));
    assert!(again.resume().await.unwrap().executed().is_empty());
}

#[tokio::test]
async fn test_failed_epoch_is_reexecuted_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(diamond_stages(), 2, 1, 4).with_storage_root(dir.path());

    let failing = build(
        config.clone(),
        Arc::new(FailingRunner::new(SeededRunner::new("events"), "d").in_epoch(3)),
    );
    let err = failing.run_configured().await.unwrap_err();
    assert_eq!(err.failed_epoch(), Some(3));
    assert!(matches!(err.epoch_failure(), Some(EpochFailure::StageFatal(e)) if e.stage == "d"));

    let status = failing.status().await.unwrap();
    assert_eq!(status.epochs.get(&3), Some(&CheckpointStatus::Failed));
    assert_eq!(status.epochs.get(&4), None);
    assert_eq!(status.last_committed.map(|c| c.epoch_id), Some(2));

    let healthy = build(config, seeded());
    let resumed = healthy.resume().await.unwrap();
    assert_eq!(resumed.executed(), vec![3, 4]);
    assert_eq!(
        healthy.status().await.unwrap().epochs.values().collect::<Vec<_>>(),
        vec![&CheckpointStatus::Committed; 4]
    );
}

/// `census` hires ten employees per epoch; `enroll` enrolls each of them,
/// plus one unknown employee in `bad_epoch`.
fn workforce_runner(bad_epoch: u32) -> Arc<dyn TransformRunner> {
    fn write(ctx: &ExecutionContext, bad_epoch: u32) -> Result<(), crate::errors::RegistryError> {
        let epoch = ctx.epoch_id();
        match ctx.stage_name() {
            "census" => {
                for i in 0..10 {
                    ctx.writer()
                        .put("workforce", format!("{epoch}-{i}"), json!({ "hired": epoch }))?;
                }
            }
            "enroll" => {
                for i in 0..10 {
                    ctx.writer()
                        .put("enrollment", format!("enr-{epoch}-{i}"), json!({ "employee_id": format!("{epoch}-{i}") }))?;
                }
                if epoch == bad_epoch {
                    ctx.writer()
                        .put("enrollment", "enr-ghost", json!({ "employee_id": "ghost" }))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
    Arc::new(FnRunner::new(move |ctx| match write(ctx, bad_epoch) {
        Ok(()) => StageOutcome::ok(),
        Err(e) => StageOutcome::Fatal(e.to_string()),
    }))
}

fn workforce_config() -> OrchestratorConfig {
    OrchestratorConfig::new("workforce")
        .with_stage(StageDefinition::new("census"))
        .with_stage(StageDefinition::new("enroll").with_predecessor("census"))
        .with_registry("workforce")
        .with_registry("enrollment")
        .with_epochs(1..=3)
        .with_governor(GovernorConfig::fixed(2))
        .with_rule(RuleConfig::ReferentialIntegrity(
            ReferentialIntegrityRule::new("enrollment_fk", "enrollment", "workforce").on_field("employee_id"),
        ))
}

#[tokio::test]
async fn test_orphaned_reference_halts_run() {
    let events = Arc::new(CollectingEventSink::new());
    let orchestrator = OrchestratorBuilder::new(workforce_config(), workforce_runner(2))
        .with_sampler(Arc::new(StaticSampler::idle()))
        .with_event_sink(events.clone())
        .build()
        .unwrap();

    let err = orchestrator.run_configured().await.unwrap_err();
    assert_eq!(err.failed_epoch(), Some(2));
    match err.epoch_failure() {
        Some(EpochFailure::ValidationFatal(e)) => {
            assert_eq!(e.results.len(), 1);
            assert_eq!(e.results[0].rule_name, "enrollment_fk");
        }
        other => panic!("unexpected failure: {other:?}"),
    }

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.epochs.get(&1), Some(&CheckpointStatus::Committed));
    assert_eq!(status.epochs.get(&2), Some(&CheckpointStatus::Failed));
    assert!(!status.epochs.contains_key(&3));
    assert_eq!(status.progress.phase, Some(EpochPhase::Failed));

    assert!(events.events().iter().all(|e| e.epoch() != Some(3)));
    assert!(matches!(
        events.events_of_type("epoch.failed").as_slice(),
        [OrchestratorEvent::EpochFailed {
            epoch: 2,
            phase: EpochPhase::Validating,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_small_row_count_drift_warns_and_commits() {
    let runner = Arc::new(FnRunner::new(|ctx| {
        let (registry, rows) = match ctx.stage_name() {
            "census" => ("workforce", 1000),
            _ => ("events", 997),
        };
        for i in 0..rows {
            if let Err(e) = ctx.writer().put(registry, format!("{i:04}"), json!(i)) {
                return StageOutcome::Fatal(e.to_string());
            }
        }
        StageOutcome::ok()
    }));
    let config = OrchestratorConfig::new("drift")
        .with_stage(StageDefinition::new("census"))
        .with_stage(StageDefinition::new("events").with_predecessor("census"))
        .with_registry("workforce")
        .with_registry("events")
        .with_epochs(1..=1)
        .with_governor(GovernorConfig::fixed(1))
        .with_rule(RuleConfig::RowCountDrift(RowCountDriftRule::new(
            "events_vs_workforce",
            "workforce",
            "events",
            0.001,
            0.005,
        )));

    let report = build(config, runner).run_configured().await.unwrap();
    let outcome = report.epoch(1).unwrap();
    assert_committed(outcome);
    assert_eq!(outcome.validation.worst(), Severity::Warning);
    assert_eq!(report.warning_count(), 1);
}

#[tokio::test]
async fn test_committed_epochs_are_skipped() {
    let events = Arc::new(CollectingEventSink::new());
    let orchestrator = OrchestratorBuilder::new(test_config(diamond_stages(), 2, 1, 3), seeded())
        .with_sampler(Arc::new(StaticSampler::idle()))
        .with_event_sink(events.clone())
        .build()
        .unwrap();

    orchestrator.run(1..=2).await.unwrap();
    events.clear();
    let report = orchestrator.run(1..=3).await.unwrap();

    assert_eq!(report.skipped, vec![1, 2]);
    assert_eq!(report.executed(), vec![3]);
    assert_eq!(events.events_of_type("epoch.skipped").len(), 2);
    assert_eq!(events.events_of_type("epoch.committed").len(), 1);

    // Nothing left to resume.
    assert!(orchestrator.resume().await.unwrap().epochs.is_empty());
}

#[tokio::test]
async fn test_event_sequence_for_one_epoch() {
    let events = Arc::new(CollectingEventSink::new());
    let orchestrator = OrchestratorBuilder::new(test_config(diamond_stages(), 2, 1, 1), seeded())
        .with_sampler(Arc::new(StaticSampler::idle()))
        .with_event_sink(events.clone())
        .build()
        .unwrap();
    orchestrator.run_configured().await.unwrap();

    assert_eq!(
        events.event_types(),
        vec![
            "epoch.started",
            "epoch.phase_changed",
            "epoch.phase_changed",
            "epoch.phase_changed",
            "wave.started",
            "wave.completed",
            "wave.started",
            "wave.completed",
            "wave.started",
            "wave.completed",
            "epoch.phase_changed",
            "validation.completed",
            "epoch.phase_changed",
            "epoch.committed",
        ]
    );
}

#[tokio::test]
async fn test_governor_shrinks_once_under_pressure() {
    let events = Arc::new(CollectingEventSink::new());
    let governor = GovernorConfig::new()
        .with_workers(1, 4, 4)
        .with_cooldown_secs(3600)
        .with_sample_interval_ms(5);
    let config = test_config(wide_and_deep(), 4, 1, 2).with_governor(governor);
    let orchestrator = OrchestratorBuilder::new(config, seeded())
        .with_sampler(Arc::new(StaticSampler::new(0.95, 0.5, 8.0)))
        .with_event_sink(events.clone())
        .build()
        .unwrap();

    let report = orchestrator.run_configured().await.unwrap();
    assert_eq!(report.executed(), vec![1, 2]);
    assert_eq!(
        events.events_of_type("governor.resized"),
        vec![OrchestratorEvent::GovernorResized { previous: 4, size: 3 }]
    );
    assert_eq!(orchestrator.status().await.unwrap().pool_size, 3);

    // Pool size changes do not change committed content.
    let fixed = build(test_config(wide_and_deep(), 1, 1, 2), seeded())
        .run_configured()
        .await
        .unwrap();
    assert_same_registry_hashes(&report, &fixed);
}

#[tokio::test]
async fn test_initial_registries_seed_first_epoch() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let orchestrator = OrchestratorBuilder::new(test_config(diamond_stages(), 2, 1, 2), seeded())
        .with_sampler(Arc::new(StaticSampler::idle()))
        .with_registry_store(store.clone())
        .with_initial_registry(Registry::new("events", 0).with_entry("seed", json!("census-2024")))
        .build()
        .unwrap();
    orchestrator.run_configured().await.unwrap();

    for epoch in 1..=2 {
        let committed = store.load("events", epoch).await.unwrap().unwrap();
        assert_eq!(committed.get("seed"), Some(&json!("census-2024")));
    }
    let latest = store.load("events", 2).await.unwrap().unwrap();
    assert_eq!(latest.len(), 1 + 2 * 4);
}

#[tokio::test]
async fn test_validate_only() {
    let orchestrator = build(workforce_config().with_epochs(1..=2), workforce_runner(0));
    orchestrator.run_configured().await.unwrap();

    let report = orchestrator.validate_only(2).await.unwrap();
    assert_eq!(report.epoch, 2);
    assert_eq!(report.worst(), Severity::Pass);

    assert!(matches!(
        orchestrator.validate_only(3).await,
        Err(OrchestratorError::NotCommitted(3))
    ));
}

#[tokio::test]
async fn test_invalid_inputs_rejected() {
    let orchestrator = build(test_config(diamond_stages(), 2, 1, 3), seeded());
    assert!(matches!(
        orchestrator.run(3..=1).await,
        Err(OrchestratorError::InvalidRange { start: 3, end: 1 })
    ));
    assert!(matches!(
        orchestrator.run(0..=1).await,
        Err(OrchestratorError::InvalidRange { .. })
    ));

    let cyclic = test_config(
        vec![
            StageDefinition::new("a").with_predecessor("b"),
            StageDefinition::new("b").with_predecessor("a"),
        ],
        1,
        1,
        1,
    );
    assert!(matches!(
        OrchestratorBuilder::new(cyclic, seeded()).build(),
        Err(OrchestratorError::Graph(GraphError::Cycle(_)))
    ));

    let undeclared = OrchestratorBuilder::new(test_config(diamond_stages(), 1, 1, 1), seeded())
        .with_initial_registry(Registry::new("payroll", 0))
        .build();
    assert!(matches!(undeclared, Err(OrchestratorError::Config(_))));
}
