//! Configuration System
//!
//! Layered configuration: built-in defaults, the global file under the user
//! config directory, an explicit file, then `FORGE_<SECTION>__<KEY>`
//! environment variables. Validation collects every problem before failing.

use crate::engine::EngineKind;
use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod defaults;
mod sources;

pub use sources::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub ai_service: AiServiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// `retry_delay` every time
    #[default]
    Flat,
    /// `retry_delay * attempts`
    Linear,
}

impl RetryBackoff {
    pub fn delay(&self, base: Duration, attempts: u32) -> Duration {
        match self {
            RetryBackoff::Linear => base.saturating_mul(attempts.max(1)),
            RetryBackoff::Flat => base,
        }
    }
}

/// Queue and coordinator settings, consumed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "defaults::max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "defaults::max_attempts")]
    pub default_max_attempts: u32,

    #[serde(default = "defaults::retry_delay_seconds")]
    pub retry_delay_seconds: f64,

    /// Per-attempt deadline; 0 disables it
    #[serde(default = "defaults::job_timeout_seconds")]
    pub job_timeout_seconds: f64,

    /// Hybrid fallback order
    #[serde(default = "defaults::engine_order")]
    pub engine_order: Vec<EngineKind>,

    #[serde(default)]
    pub retry_backoff: RetryBackoff,

    /// Candidates scoring below this fail the quality gate
    #[serde(default)]
    pub min_quality_score: f32,

    #[serde(default = "defaults::cache_results")]
    pub cache_results: bool,

    /// 0 means unbounded
    #[serde(default = "defaults::cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "defaults::max_pending_jobs")]
    pub max_pending_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: defaults::max_concurrent_jobs(),
            default_max_attempts: defaults::max_attempts(),
            retry_delay_seconds: defaults::retry_delay_seconds(),
            job_timeout_seconds: defaults::job_timeout_seconds(),
            engine_order: defaults::engine_order(),
            retry_backoff: RetryBackoff::default(),
            min_quality_score: 0.0,
            cache_results: defaults::cache_results(),
            cache_max_entries: defaults::cache_max_entries(),
            max_pending_jobs: defaults::max_pending_jobs(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_delay(&self) -> Duration {
        seconds(self.retry_delay_seconds)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        if self.job_timeout_seconds > 0.0 {
            Some(seconds(self.job_timeout_seconds))
        } else {
            None
        }
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if self.max_concurrent_jobs == 0 {
            errors.push("scheduler.max_concurrent_jobs must be at least 1".to_string());
        }
        if self.default_max_attempts == 0 {
            errors.push("scheduler.default_max_attempts must be at least 1".to_string());
        }
        check_seconds("scheduler.retry_delay_seconds", self.retry_delay_seconds, errors);
        check_seconds("scheduler.job_timeout_seconds", self.job_timeout_seconds, errors);
        if self.engine_order.is_empty() {
            errors.push("scheduler.engine_order cannot be empty".to_string());
        }
        for (i, kind) in self.engine_order.iter().enumerate() {
            if self.engine_order[..i].contains(kind) {
                errors.push(format!("scheduler.engine_order lists '{}' twice", kind));
            }
        }
        if !(0.0..=1.0).contains(&self.min_quality_score) {
            errors.push(format!(
                "scheduler.min_quality_score must be within [0, 1], got {}",
                self.min_quality_score
            ));
        }
        if self.max_pending_jobs == 0 {
            errors.push("scheduler.max_pending_jobs must be at least 1".to_string());
        }
    }
}

/// Remote mesh service; the AI engine is only registered when endpoint and key are set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiServiceConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "defaults::ai_model")]
    pub model: String,

    #[serde(default = "defaults::request_timeout_seconds")]
    pub request_timeout_seconds: f64,

    #[serde(default = "defaults::rate_limit_backoff_seconds")]
    pub rate_limit_backoff_seconds: f64,
}

impl Default for AiServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: defaults::ai_model(),
            request_timeout_seconds: defaults::request_timeout_seconds(),
            rate_limit_backoff_seconds: defaults::rate_limit_backoff_seconds(),
        }
    }
}

impl AiServiceConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        seconds(self.rate_limit_backoff_seconds)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(format!(
                    "ai_service.endpoint must be an http(s) URL, got '{}'",
                    endpoint
                ));
            }
        }
        if self.model.trim().is_empty() {
            errors.push("ai_service.model cannot be empty".to_string());
        }
        check_seconds(
            "ai_service.request_timeout_seconds",
            self.request_timeout_seconds,
            errors,
        );
        if self.request_timeout_seconds == 0.0 {
            errors.push("ai_service.request_timeout_seconds must be positive".to_string());
        }
        check_seconds(
            "ai_service.rate_limit_backoff_seconds",
            self.rate_limit_backoff_seconds,
            errors,
        );
    }
}

impl ForgeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.scheduler.validate(&mut errors);
        self.ai_service.validate(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Render as TOML, masking the API key
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.ai_service.api_key.is_some() {
            shown.ai_service.api_key = Some("********".to_string());
        }
        toml::to_string_pretty(&shown)
            .map_err(|e| ConfigError::Invalid(vec![format!("Failed to render config: {}", e)]))
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn check_seconds(name: &str, value: f64, errors: &mut Vec<String>) {
    if Duration::try_from_secs_f64(value).is_err() {
        errors.push(format!(
            "{} must be a finite, non-negative number of seconds, got {}",
            name, value
        ));
    }
}

/// Builds a [`ForgeConfig`] from the layered sources
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit_file: Option<PathBuf>,
    global_file: bool,
    environment: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            explicit_file: None,
            global_file: true,
            environment: true,
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer an explicit file over the global one; it must exist
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn without_global_file(mut self) -> Self {
        self.global_file = false;
        self
    }

    pub fn without_environment(mut self) -> Self {
        self.environment = false;
        self
    }

    /// Load, deserialize and validate
    pub fn load(&self) -> Result<ForgeConfig, ConfigError> {
        let mut builder = defaults::builder_with_defaults()?;
        if self.global_file {
            builder = sources::add_global_file(builder)?;
        }
        if let Some(path) = &self.explicit_file {
            builder = sources::add_explicit_file(builder, path);
        }
        if self.environment {
            builder = sources::add_environment(builder);
        }

        let config: ForgeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
