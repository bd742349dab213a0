//! Integration tests for the Generation Coordinator
//!
//! Tests cover:
//! - Hybrid fallback across engines
//! - Explicit engine preferences
//! - Quality gate rejections
//! - Result deduplication and memoization
//! - Cancellation through the coordinator
//! - Engine progress on job snapshots and events

use crate::integration::test_utils::{
    fast_scheduler_config, recording_callback, CountingEngine, FailingEngine, HangingEngine,
};
use forge_scheduler::config::ForgeConfig;
use forge_scheduler::coordinator::GenerationCoordinator;
use forge_scheduler::engine::{EngineKind, EngineRegistry, ProceduralEngine, TextureEngine};
use forge_scheduler::error::{EngineError, JobError};
use forge_scheduler::events::{EventBus, JobEventKind};
use forge_scheduler::queue::{JobOptions, JobState};
use forge_scheduler::request::{EnginePreference, GenerationSpec, MaterialStyle};
use forge_scheduler::SchedulerConfig;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn hybrid_config() -> SchedulerConfig {
    SchedulerConfig {
        engine_order: vec![EngineKind::Ai, EngineKind::Procedural],
        ..fast_scheduler_config()
    }
}

fn single_attempt() -> JobOptions {
    JobOptions::default().with_max_attempts(1)
}

#[tokio::test]
async fn test_hybrid_falls_back_to_procedural() {
    let ai = Arc::new(FailingEngine::new(
        EngineKind::Ai,
        EngineError::Request("model service down".into()),
    ));
    let registry = EngineRegistry::new()
        .with(ai.clone())
        .with(Arc::new(ProceduralEngine::new()));
    let coordinator = GenerationCoordinator::new(&hybrid_config(), registry);
    coordinator.start();

    let result = coordinator
        .generate(GenerationSpec::new("wooden table"))
        .await
        .unwrap();
    assert_eq!(result.engine_used, EngineKind::Procedural);
    assert_eq!(result.metadata["category"], "furniture");
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    coordinator.stop().await;
}

#[tokio::test]
async fn test_all_engines_failing_aggregates_errors() {
    let registry = EngineRegistry::new()
        .with(Arc::new(FailingEngine::new(
            EngineKind::Ai,
            EngineError::Auth("bad key".into()),
        )))
        .with(Arc::new(FailingEngine::new(
            EngineKind::Procedural,
            EngineError::Failed("no geometry".into()),
        )));
    let coordinator = GenerationCoordinator::new(&hybrid_config(), registry);
    coordinator.start();

    let err = coordinator
        .generate_with(GenerationSpec::new("tower"), single_attempt())
        .await
        .unwrap_err();
    let JobError::ExhaustedRetries { attempts, last } = err else {
        panic!("unexpected error {:?}", err);
    };
    assert_eq!(attempts, 1);
    match *last {
        JobError::AllEnginesFailed(failures) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].engine, EngineKind::Ai);
            assert_eq!(failures[0].error, EngineError::Auth("bad key".into()));
            assert_eq!(failures[1].engine, EngineKind::Procedural);
        }
        other => panic!("unexpected last error {:?}", other),
    }
    coordinator.stop().await;
}

#[tokio::test]
async fn test_explicit_preference_skips_chain() {
    let ai = Arc::new(FailingEngine::new(
        EngineKind::Ai,
        EngineError::Request("unused".into()),
    ));
    let registry = EngineRegistry::offline().with(ai.clone());
    let coordinator = GenerationCoordinator::new(&hybrid_config(), registry);
    coordinator.start();

    let spec = GenerationSpec::new("iron sword")
        .with_engine(EnginePreference::Texture)
        .with_material_style(MaterialStyle::Fantasy);
    let result = coordinator.generate(spec).await.unwrap();
    assert_eq!(result.engine_used, EngineKind::Texture);
    assert_eq!(result.metadata["material"], "metal");
    assert_eq!(result.metadata["base_engine"], "procedural");
    assert!(result.geometry.material.is_some());
    assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
    coordinator.stop().await;
}

#[tokio::test]
async fn test_unavailable_engine_rejected_at_submit() {
    let coordinator = GenerationCoordinator::new(&hybrid_config(), EngineRegistry::offline());
    coordinator.start();

    let spec = GenerationSpec::new("robot").with_engine(EnginePreference::Ai);
    let err = coordinator.generate(spec.clone()).await.unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    let (callback, mut outcomes) = recording_callback();
    assert!(coordinator
        .submit(spec, JobOptions::default(), callback)
        .is_err());
    assert!(outcomes.try_recv().is_err());
    assert!(coordinator.queue().snapshots().is_empty());
    coordinator.stop().await;
}

#[tokio::test]
async fn test_quality_gate_rejects_low_scores() {
    let config = SchedulerConfig {
        min_quality_score: 0.99,
        engine_order: vec![EngineKind::Procedural],
        ..fast_scheduler_config()
    };
    let coordinator = GenerationCoordinator::new(&config, EngineRegistry::offline());
    coordinator.start();

    let err = coordinator
        .generate_with(GenerationSpec::new("boulder"), single_attempt())
        .await
        .unwrap_err();
    let JobError::ExhaustedRetries { last, .. } = err else {
        panic!("unexpected error {:?}", err);
    };
    let JobError::AllEnginesFailed(failures) = *last else {
        panic!("expected aggregate failure");
    };
    assert!(matches!(failures[0].error, EngineError::Rejected(_)));
    coordinator.stop().await;
}

#[tokio::test]
async fn test_identical_requests_generate_once() {
    let engine = Arc::new(CountingEngine::new(Duration::from_millis(50)));
    let registry = EngineRegistry::new().with(engine.clone());
    let coordinator = GenerationCoordinator::new(&hybrid_config(), registry);
    coordinator.start();

    let spec = GenerationSpec::new("stone well");
    let (a, b, c) = tokio::join!(
        coordinator.generate(spec.clone()),
        coordinator.generate(spec.clone()),
        coordinator.generate(GenerationSpec::new("  stone well  ")),
    );
    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert_eq!(engine.calls(), 1);

    let again = coordinator.generate(spec.clone()).await.unwrap();
    assert_eq!(again.geometry_ref, a.geometry_ref);
    assert_eq!(engine.calls(), 1);
    assert_eq!(coordinator.cache().get(&spec.fingerprint()), Some(a));

    coordinator.generate(spec.with_complexity(2)).await.unwrap();
    assert_eq!(engine.calls(), 2);
    coordinator.stop().await;
}

#[tokio::test]
async fn test_dedupe_without_memoization() {
    let engine = Arc::new(CountingEngine::new(Duration::from_millis(30)));
    let config = SchedulerConfig {
        cache_results: false,
        ..hybrid_config()
    };
    let coordinator =
        GenerationCoordinator::new(&config, EngineRegistry::new().with(engine.clone()));
    coordinator.start();

    let spec = GenerationSpec::new("street lamp");
    let (a, b) = tokio::join!(
        coordinator.generate(spec.clone()),
        coordinator.generate(spec.clone())
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(engine.calls(), 1);

    coordinator.generate(spec).await.unwrap();
    assert_eq!(engine.calls(), 2);
    assert!(coordinator.cache().is_empty());
    coordinator.stop().await;
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let ai = Arc::new(FailingEngine::new(
        EngineKind::Ai,
        EngineError::RateLimit("slow down".into()),
    ));
    let coordinator =
        GenerationCoordinator::new(&hybrid_config(), EngineRegistry::new().with(ai.clone()));
    coordinator.start();

    let spec = GenerationSpec::new("spaceship").with_engine(EnginePreference::Ai);
    for _ in 0..2 {
        let err = coordinator
            .generate_with(spec.clone(), single_attempt())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ExhaustedRetries { .. }));
    }
    assert_eq!(ai.calls.load(Ordering::SeqCst), 2);
    assert!(coordinator.cache().is_empty());
    assert_eq!(coordinator.cache().in_flight(), 0);
    coordinator.stop().await;
}

#[tokio::test]
async fn test_cancel_submitted_job() {
    let registry = EngineRegistry::offline().with(Arc::new(HangingEngine));
    let coordinator = GenerationCoordinator::new(&hybrid_config(), registry);
    coordinator.start();

    let (callback, mut outcomes) = recording_callback();
    let id = coordinator
        .submit(
            GenerationSpec::new("robot").with_engine(EnginePreference::Ai),
            JobOptions::default(),
            callback,
        )
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.queue().status(id).map(|s| s.state) != Some(JobState::Active) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert!(coordinator.cancel(id));
    assert_eq!(outcomes.recv().await.unwrap().unwrap_err(), JobError::Cancelled);
    assert_eq!(coordinator.queue().stats().cancelled, 1);
    coordinator.stop().await;
}

#[tokio::test]
async fn test_from_default_config_runs_offline() {
    let coordinator = GenerationCoordinator::from_config(&ForgeConfig::default(), None).unwrap();
    coordinator.start();

    let result = coordinator
        .generate(GenerationSpec::new("pine tree").with_detail_level(3))
        .await
        .unwrap();
    assert_eq!(result.engine_used, EngineKind::Procedural);
    assert_eq!(result.metadata["category"], "nature");
    coordinator.stop().await;
}

#[tokio::test]
async fn test_texture_over_custom_base() {
    let base = Arc::new(CountingEngine::new(Duration::from_millis(1)));
    let registry = EngineRegistry::new()
        .with(base.clone())
        .with(Arc::new(TextureEngine::new(base.clone())));
    let coordinator = GenerationCoordinator::new(&hybrid_config(), registry);
    coordinator.start();

    let result = coordinator
        .generate(GenerationSpec::new("glass vase").with_engine(EnginePreference::Texture))
        .await
        .unwrap();
    assert_eq!(result.metadata["material"], "glass");
    assert_eq!(base.calls(), 1);
    assert!(!result.geometry.uvs.is_empty());
    coordinator.stop().await;
}

#[tokio::test]
async fn test_progress_reaches_snapshot_and_events() {
    let (bus, events) = EventBus::new_pair();
    let coordinator =
        GenerationCoordinator::with_events(&hybrid_config(), EngineRegistry::offline(), Some(bus));
    coordinator.start();

    let (callback, mut outcomes) = recording_callback();
    let id = coordinator
        .submit(
            GenerationSpec::new("wooden chair").with_engine(EnginePreference::Texture),
            JobOptions::default(),
            callback,
        )
        .unwrap();
    assert!(outcomes.recv().await.unwrap().is_ok());

    let progress = coordinator.queue().status(id).unwrap().progress.unwrap();
    assert_eq!(progress.percent, 95);
    assert_eq!(progress.status, "projecting uvs");

    let details: Vec<String> = events
        .try_iter()
        .filter(|e| e.kind == JobEventKind::Progress && e.job_id == id.as_u64())
        .filter_map(|e| e.detail)
        .collect();
    assert!(details[0].ends_with("furniture parts"));
    assert_eq!(details.last().unwrap(), "95% projecting uvs");
    let percents: Vec<u8> = details
        .iter()
        .map(|d| d.split('%').next().unwrap().parse().unwrap())
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    coordinator.stop().await;
}
