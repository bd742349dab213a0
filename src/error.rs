//! Error types for the generation scheduler.

use crate::engine::EngineKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Adapter-level failures reported by a generation engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Engine authentication failed: {0}")]
    Auth(String),

    #[error("Engine rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Engine request timed out: {0}")]
    Timeout(String),

    #[error("Engine returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Engine request failed: {0}")]
    Request(String),

    #[error("Candidate rejected: {0}")]
    Rejected(String),

    #[error("Engine failed: {0}")]
    Failed(String),

    #[error("Engine run cancelled")]
    Cancelled,
}

/// One engine's failure inside a fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct EngineFailure {
    pub engine: EngineKind,
    pub error: EngineError,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.engine, self.error)
    }
}

/// Terminal and intermediate outcomes of a queued generation job
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("Invalid generation request: {0}")]
    Validation(String),

    #[error(transparent)]
    Engine(EngineError),

    #[error("Job exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<JobError>,
    },

    #[error("All engines failed: {}", format_failures(.0))]
    AllEnginesFailed(Vec<EngineFailure>),

    #[error("Generation queue is full ({0} pending jobs)")]
    QueueFull(usize),
}

impl JobError {
    /// Whether the queue may schedule another attempt after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Engine(_) => true,
            JobError::Timeout(_) => true,
            JobError::AllEnginesFailed(_) => true,
            JobError::Validation(_) => false,
            JobError::Cancelled => false,
            JobError::ExhaustedRetries { .. } => false,
            JobError::QueueFull(_) => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

impl From<EngineError> for JobError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => JobError::Cancelled,
            other => JobError::Engine(other),
        }
    }
}

fn format_failures(failures: &[EngineFailure]) -> String {
    if failures.is_empty() {
        return "no engines available".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
