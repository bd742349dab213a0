//! Acceptance checks applied to every engine candidate.

use crate::engine::EngineResult;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QualityGate {
    min_score: f32,
}

impl QualityGate {
    pub fn new(min_score: f32) -> Self {
        Self { min_score }
    }

    /// Accept the candidate or explain why it was rejected
    pub fn check(&self, candidate: &EngineResult) -> Result<(), EngineError> {
        let mesh = &candidate.geometry;
        if let Some(reason) = &candidate.soft_failure {
            return Err(EngineError::Rejected(format!(
                "engine flagged output: {}",
                reason
            )));
        }
        if mesh.faces.is_empty() {
            return Err(EngineError::Rejected("mesh has no faces".to_string()));
        }
        if !mesh.has_finite_vertices() {
            return Err(EngineError::Rejected(
                "mesh has non-finite vertex coordinates".to_string(),
            ));
        }
        if !mesh.faces_in_range() {
            return Err(EngineError::Rejected(
                "mesh face references a missing vertex".to_string(),
            ));
        }
        if !candidate.quality_score.is_finite() || candidate.quality_score < self.min_score {
            return Err(EngineError::Rejected(format!(
                "quality score {:.2} below minimum {:.2}",
                candidate.quality_score, self.min_score
            )));
        }
        Ok(())
    }
}
