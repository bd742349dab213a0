//! Forge Scheduler: 3D Model Generation Orchestration
//!
//! A priority job queue with bounded concurrency, retry and cancellation,
//! feeding a coordinator that runs each request through a fallback chain of
//! AI, procedural and texture engines and dedupes identical requests.

pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod geometry;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod request;

pub use cache::ResultCache;
pub use cancel::CancelSignal;
pub use config::{ConfigLoader, ForgeConfig, SchedulerConfig};
pub use coordinator::{GenerationCoordinator, QualityGate};
pub use engine::{EngineKind, EngineRegistry, EngineResult, GenerationEngine};
pub use error::{EngineError, JobError};
pub use progress::ProgressReporter;
pub use queue::{JobId, JobOptions, JobOutcome, JobQueue, JobState};
pub use request::{EnginePreference, GenerationSpec, MaterialStyle};
