//! Generation Engine Abstraction
//!
//! Uniform interface over the strategies that turn a [`GenerationSpec`] into
//! geometry: a remote AI service, offline procedural synthesis, and a
//! texture/material post-process. The coordinator builds fallback chains out
//! of engines registered in an [`EngineRegistry`].

use crate::cancel::CancelSignal;
use crate::error::EngineError;
use crate::geometry::{GeometryRef, Mesh};
use crate::progress::ProgressReporter;
use crate::request::GenerationSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub mod ai_service;
pub mod procedural;
pub mod texture;

pub use ai_service::{AiServiceEngine, HttpModelServiceClient, ModelServiceClient, ServiceMesh};
pub use procedural::{ProceduralEngine, ShapeCategory};
pub use texture::TextureEngine;

/// Engine identity, used in chains, configuration and results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Ai,
    Procedural,
    Texture,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Ai => "ai",
            EngineKind::Procedural => "procedural",
            EngineKind::Texture => "texture",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" => Ok(EngineKind::Ai),
            "procedural" => Ok(EngineKind::Procedural),
            "texture" => Ok(EngineKind::Texture),
            other => Err(format!("unknown engine '{}'", other)),
        }
    }
}

/// Candidate produced by one engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub geometry: Arc<Mesh>,
    pub geometry_ref: GeometryRef,
    pub metadata: BTreeMap<String, String>,
    pub engine_used: EngineKind,
    pub quality_score: f32,
    /// Set when the engine produced output but flagged it as unusable
    pub soft_failure: Option<String>,
}

impl EngineResult {
    /// Encode `mesh` and record vertex/face counts in the metadata
    pub fn new(
        engine_used: EngineKind,
        mesh: Mesh,
        mut metadata: BTreeMap<String, String>,
        quality_score: f32,
    ) -> Result<Self, EngineError> {
        let geometry_ref = GeometryRef::encode(&mesh)?;
        metadata.insert("vertex_count".to_string(), mesh.vertex_count().to_string());
        metadata.insert("face_count".to_string(), mesh.primitive_count().to_string());
        Ok(Self {
            geometry: Arc::new(mesh),
            geometry_ref,
            metadata,
            engine_used,
            quality_score,
            soft_failure: None,
        })
    }

    pub fn with_soft_failure(mut self, reason: impl Into<String>) -> Self {
        self.soft_failure = Some(reason.into());
        self
    }
}

/// Generation engine trait
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Whether [`GenerationEngine::generate`] honours the cancel signal at its checkpoints.
    ///
    /// The queue only interrupts an active job when every engine in its chain
    /// is cooperative; otherwise it lets the run finish and discards the result.
    fn supports_cancellation(&self) -> bool {
        true
    }

    /// Produce a model for `spec`, reporting stages through `progress`.
    async fn generate(
        &self,
        spec: &GenerationSpec,
        cancel: &CancelSignal,
        progress: &ProgressReporter,
    ) -> Result<EngineResult, EngineError>;
}

/// Engines available to a coordinator, keyed by kind
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<EngineKind, Arc<dyn GenerationEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Procedural engine plus a texture engine layered over it
    pub fn offline() -> Self {
        let procedural: Arc<dyn GenerationEngine> = Arc::new(ProceduralEngine::new());
        let mut registry = Self::new();
        registry.register(Arc::clone(&procedural));
        registry.register(Arc::new(TextureEngine::new(procedural)));
        registry
    }

    /// Register an engine, replacing any previous engine of the same kind
    pub fn register(&mut self, engine: Arc<dyn GenerationEngine>) {
        self.engines.insert(engine.kind(), engine);
    }

    pub fn with(mut self, engine: Arc<dyn GenerationEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, kind: EngineKind) -> Option<Arc<dyn GenerationEngine>> {
        self.engines.get(&kind).cloned()
    }

    pub fn contains(&self, kind: EngineKind) -> bool {
        self.engines.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<EngineKind> = self.engines.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.kinds())
            .finish()
    }
}
