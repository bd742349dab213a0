//! Integration tests for layered configuration feeding the coordinator

use forge_scheduler::config::ConfigLoader;
use forge_scheduler::coordinator::GenerationCoordinator;
use forge_scheduler::engine::EngineKind;
use forge_scheduler::error::ConfigError;
use forge_scheduler::request::EnginePreference;
use std::io::Write;
use std::sync::Mutex;

/// Serializes tests that touch FORGE_* environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_environment_overrides_file() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let file = write_config(
        r#"
[scheduler]
max_concurrent_jobs = 5
engine_order = ["ai", "procedural"]

[ai_service]
endpoint = "http://127.0.0.1:9/generate"
api_key = "test-key"
"#,
    );

    std::env::set_var("FORGE_SCHEDULER__ENGINE_ORDER", "texture,procedural");
    std::env::set_var("FORGE_SCHEDULER__MAX_CONCURRENT_JOBS", "2");
    let loaded = ConfigLoader::new()
        .without_global_file()
        .with_file(file.path())
        .load();
    std::env::remove_var("FORGE_SCHEDULER__ENGINE_ORDER");
    std::env::remove_var("FORGE_SCHEDULER__MAX_CONCURRENT_JOBS");

    let config = loaded.unwrap();
    assert_eq!(config.scheduler.max_concurrent_jobs, 2);
    assert_eq!(
        config.scheduler.engine_order,
        vec![EngineKind::Texture, EngineKind::Procedural]
    );
    assert!(config.ai_service.is_configured());

    let coordinator = GenerationCoordinator::from_config(&config, None).unwrap();
    let chain: Vec<EngineKind> = coordinator
        .runner()
        .chain(EnginePreference::Auto)
        .iter()
        .map(|engine| engine.kind())
        .collect();
    assert_eq!(chain, vec![EngineKind::Texture, EngineKind::Procedural]);
    assert_eq!(coordinator.runner().chain(EnginePreference::Ai).len(), 1);
    assert_eq!(coordinator.queue().config().max_concurrent_jobs, 2);
}

#[test]
fn test_invalid_values_are_reported_together() {
    let file = write_config(
        r#"
[scheduler]
max_concurrent_jobs = 0
retry_delay_seconds = -1.0
"#,
    );
    let err = ConfigLoader::new()
        .without_global_file()
        .without_environment()
        .with_file(file.path())
        .load()
        .unwrap_err();
    match err {
        ConfigError::Invalid(problems) => assert!(problems.len() >= 2),
        other => panic!("unexpected error {:?}", other),
    }
}
