//! Generation Coordinator
//!
//! Turns a [`GenerationSpec`] into one accepted [`EngineResult`]. Requests go
//! through the result cache (one generation per fingerprint) and then the job
//! queue, whose runner walks the engine chain for the request: a single
//! engine for an explicit preference, or the configured fallback order for
//! `Auto`, accepting the first candidate that passes the quality gate.

use crate::cache::{self, Lookup, ResultCache};
use crate::cancel::CancelSignal;
use crate::config::{ForgeConfig, SchedulerConfig};
use crate::engine::{AiServiceEngine, EngineKind, EngineRegistry, GenerationEngine};
use crate::error::{EngineError, EngineFailure, JobError};
use crate::events::EventBus;
use crate::progress::ProgressReporter;
use crate::queue::{JobId, JobOptions, JobOutcome, JobQueue, JobRunner, QueueConfig};
use crate::request::{EnginePreference, GenerationSpec};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub mod quality;

pub use quality::QualityGate;

fn preferred_kind(preference: EnginePreference) -> Option<EngineKind> {
    match preference {
        EnginePreference::Auto => None,
        EnginePreference::Ai => Some(EngineKind::Ai),
        EnginePreference::Procedural => Some(EngineKind::Procedural),
        EnginePreference::Texture => Some(EngineKind::Texture),
    }
}

/// Runs one attempt through the engine chain selected by the spec
pub struct ChainRunner {
    registry: EngineRegistry,
    engine_order: Vec<EngineKind>,
    gate: QualityGate,
}

impl ChainRunner {
    pub fn new(registry: EngineRegistry, engine_order: Vec<EngineKind>, gate: QualityGate) -> Self {
        Self {
            registry,
            engine_order,
            gate,
        }
    }

    /// Engines tried for `preference`, in order
    pub fn chain(&self, preference: EnginePreference) -> Vec<Arc<dyn GenerationEngine>> {
        match preferred_kind(preference) {
            Some(kind) => self.registry.get(kind).into_iter().collect(),
            None => self
                .engine_order
                .iter()
                .filter_map(|kind| self.registry.get(*kind))
                .collect(),
        }
    }

    /// Reject explicit preferences naming an engine that is not registered
    pub fn check_preference(&self, spec: &GenerationSpec) -> Result<(), JobError> {
        match preferred_kind(spec.engine_preference) {
            Some(kind) if !self.registry.contains(kind) => Err(JobError::Validation(format!(
                "engine '{}' is not available",
                kind
            ))),
            Some(_) => Ok(()),
            None if self.chain(EnginePreference::Auto).is_empty() => Err(
                JobError::Validation("no engines are available".to_string()),
            ),
            None => Ok(()),
        }
    }

    async fn run_single(
        &self,
        engine: &dyn GenerationEngine,
        spec: &GenerationSpec,
        cancel: &CancelSignal,
        progress: &ProgressReporter,
    ) -> JobOutcome {
        let candidate = engine.generate(spec, cancel, progress).await?;
        self.gate.check(&candidate)?;
        Ok(candidate)
    }

    async fn run_fallback(
        &self,
        chain: &[Arc<dyn GenerationEngine>],
        spec: &GenerationSpec,
        cancel: &CancelSignal,
        progress: &ProgressReporter,
    ) -> JobOutcome {
        let mut failures = Vec::new();
        for engine in chain {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let kind = engine.kind();
            if !failures.is_empty() {
                progress.report(0, &format!("falling back to {} engine", kind));
            }
            let error = match engine.generate(spec, cancel, progress).await {
                Ok(candidate) => match self.gate.check(&candidate) {
                    Ok(()) => {
                        if !failures.is_empty() {
                            info!(
                                engine = %kind,
                                skipped = failures.len(),
                                "Fallback engine produced an accepted result"
                            );
                        }
                        return Ok(candidate);
                    }
                    Err(rejection) => rejection,
                },
                Err(EngineError::Cancelled) => return Err(JobError::Cancelled),
                Err(error) => error,
            };
            warn!(engine = %kind, error = %error, "Engine failed, trying next in chain");
            failures.push(EngineFailure {
                engine: kind,
                error,
            });
        }
        Err(JobError::AllEnginesFailed(failures))
    }
}

#[async_trait]
impl JobRunner for ChainRunner {
    async fn run(
        &self,
        spec: Arc<GenerationSpec>,
        cancel: CancelSignal,
        progress: ProgressReporter,
    ) -> JobOutcome {
        let chain = self.chain(spec.engine_preference);
        debug!(
            preference = spec.engine_preference.as_str(),
            chain = ?chain.iter().map(|e| e.kind()).collect::<Vec<_>>(),
            "Running engine chain"
        );
        match (spec.engine_preference, chain.as_slice()) {
            (EnginePreference::Auto, chain) => {
                self.run_fallback(chain, &spec, &cancel, &progress).await
            }
            (_, [engine]) => {
                self.run_single(engine.as_ref(), &spec, &cancel, &progress)
                    .await
            }
            (preference, _) => Err(JobError::Validation(format!(
                "engine '{}' is not available",
                preference.as_str()
            ))),
        }
    }

    fn supports_cancellation(&self, spec: &GenerationSpec) -> bool {
        self.chain(spec.engine_preference)
            .iter()
            .all(|engine| engine.supports_cancellation())
    }
}

/// Front door for generation requests
pub struct GenerationCoordinator {
    queue: JobQueue,
    runner: Arc<ChainRunner>,
    cache: Arc<ResultCache>,
}

impl GenerationCoordinator {
    pub fn new(config: &SchedulerConfig, registry: EngineRegistry) -> Self {
        Self::with_events(config, registry, None)
    }

    pub fn with_events(
        config: &SchedulerConfig,
        registry: EngineRegistry,
        events: Option<EventBus>,
    ) -> Self {
        let runner = Arc::new(ChainRunner::new(
            registry,
            config.engine_order.clone(),
            QualityGate::new(config.min_quality_score),
        ));
        let queue = JobQueue::with_events(
            QueueConfig::from(config),
            Arc::clone(&runner) as Arc<dyn JobRunner>,
            events,
        );
        let cache = if config.cache_results {
            ResultCache::new(config.cache_max_entries)
        } else {
            ResultCache::dedupe_only()
        };
        Self {
            queue,
            runner,
            cache: Arc::new(cache),
        }
    }

    /// Offline engines plus the AI engine when the service is configured
    pub fn from_config(config: &ForgeConfig, events: Option<EventBus>) -> Result<Self, EngineError> {
        let mut registry = EngineRegistry::offline();
        if let Some(ai) = AiServiceEngine::from_config(&config.ai_service)? {
            registry.register(Arc::new(ai));
        }
        info!(engines = ?registry.kinds(), "Generation coordinator configured");
        Ok(Self::with_events(&config.scheduler, registry, events))
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn runner(&self) -> &ChainRunner {
        &self.runner
    }

    pub fn start(&self) {
        self.queue.start();
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub async fn generate(&self, spec: GenerationSpec) -> JobOutcome {
        self.generate_with(spec, JobOptions::default()).await
    }

    /// Generate through the cache and queue, waiting for the terminal outcome
    pub async fn generate_with(&self, spec: GenerationSpec, options: JobOptions) -> JobOutcome {
        spec.validate()?;
        self.runner.check_preference(&spec)?;

        let fingerprint = spec.fingerprint();
        match self.cache.begin(fingerprint) {
            Lookup::Hit(result) => Ok(result),
            Lookup::Wait(receiver) => receiver.await.unwrap_or_else(|_| Err(cache::abandoned())),
            Lookup::Lead => {
                let (tx, rx) = oneshot::channel();
                let cache = Arc::clone(&self.cache);
                let submitted = self.queue.submit(spec, options, move |outcome| {
                    cache.complete(fingerprint, &outcome);
                    let _ = tx.send(outcome);
                });
                if let Err(err) = submitted {
                    self.cache.complete(fingerprint, &Err(err.clone()));
                    return Err(err);
                }
                rx.await.unwrap_or_else(|_| Err(cache::abandoned()))
            }
        }
    }

    /// Fire-and-forget submission through the engine chain; bypasses the result cache
    pub fn submit<F>(&self, spec: GenerationSpec, options: JobOptions, callback: F) -> Result<JobId, JobError>
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        self.runner.check_preference(&spec)?;
        self.queue.submit(spec, options, callback)
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.queue.cancel(id)
    }
}
