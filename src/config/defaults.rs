//! Built-in defaults, shared by serde and the config builder.

use crate::engine::EngineKind;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

pub(super) fn max_concurrent_jobs() -> usize {
    3
}

pub(super) fn max_attempts() -> u32 {
    3
}

pub(super) fn retry_delay_seconds() -> f64 {
    1.0
}

pub(super) fn job_timeout_seconds() -> f64 {
    300.0
}

pub(super) fn engine_order() -> Vec<EngineKind> {
    vec![EngineKind::Ai, EngineKind::Procedural, EngineKind::Texture]
}

pub(super) fn cache_results() -> bool {
    true
}

pub(super) fn cache_max_entries() -> usize {
    256
}

pub(super) fn max_pending_jobs() -> usize {
    10_000
}

pub(super) fn ai_model() -> String {
    "mesh-default".to_string()
}

pub(super) fn request_timeout_seconds() -> f64 {
    60.0
}

pub(super) fn rate_limit_backoff_seconds() -> f64 {
    2.0
}

/// Create a Config builder with every default applied
pub(super) fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let order: Vec<String> = engine_order()
        .iter()
        .map(|kind| kind.as_str().to_string())
        .collect();
    Config::builder()
        .set_default("scheduler.max_concurrent_jobs", max_concurrent_jobs() as u64)?
        .set_default("scheduler.default_max_attempts", u64::from(max_attempts()))?
        .set_default("scheduler.retry_delay_seconds", retry_delay_seconds())?
        .set_default("scheduler.job_timeout_seconds", job_timeout_seconds())?
        .set_default("scheduler.engine_order", order)?
        .set_default("scheduler.retry_backoff", "flat")?
        .set_default("scheduler.min_quality_score", 0.0)?
        .set_default("scheduler.cache_results", cache_results())?
        .set_default("scheduler.cache_max_entries", cache_max_entries() as u64)?
        .set_default("scheduler.max_pending_jobs", max_pending_jobs() as u64)?
        .set_default("ai_service.model", ai_model())?
        .set_default("ai_service.request_timeout_seconds", request_timeout_seconds())?
        .set_default(
            "ai_service.rate_limit_backoff_seconds",
            rate_limit_backoff_seconds(),
        )
}
