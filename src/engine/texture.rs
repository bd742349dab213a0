//! Texture and material post-process
//!
//! Wraps a base engine, then assigns a material picked from the prompt and
//! projects UV coordinates over the resulting mesh.

use super::procedural::{prompt_tokens, token_matches, Variation};
use super::{EngineKind, EngineResult, GenerationEngine};
use crate::cancel::CancelSignal;
use crate::error::EngineError;
use crate::geometry::{Material, Mesh, Vec3};
use crate::progress::ProgressReporter;
use crate::request::{GenerationSpec, MaterialStyle};
use async_trait::async_trait;
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::debug;

const MATERIAL_KEYWORDS: &[(&str, &[&str])] = &[
    ("metal", &["metal", "steel", "iron", "chrome", "silver", "gold"]),
    ("plastic", &["plastic", "rubber", "polymer"]),
    ("wood", &["wood", "wooden", "oak", "pine"]),
    ("stone", &["stone", "rock", "marble", "granite"]),
    ("glass", &["glass", "crystal", "transparent"]),
    ("fabric", &["fabric", "cloth", "textile", "leather"]),
];

const DEFAULT_MATERIAL: &str = "plastic";
const COLOR_VARIATION: f32 = 0.05;

fn library_material(name: &str) -> Material {
    let (diffuse, specular, roughness, metallic, alpha) = match name {
        "metal" => ([0.7, 0.7, 0.8], [0.9, 0.9, 0.9], 0.1, 1.0, 1.0),
        "wood" => ([0.6, 0.4, 0.2], [0.1, 0.1, 0.1], 0.8, 0.0, 1.0),
        "stone" => ([0.5, 0.5, 0.5], [0.2, 0.2, 0.2], 0.9, 0.0, 1.0),
        "glass" => ([0.9, 0.9, 0.9], [1.0, 1.0, 1.0], 0.0, 0.0, 0.1),
        "fabric" => ([0.8, 0.2, 0.4], [0.05, 0.05, 0.05], 1.0, 0.0, 1.0),
        _ => ([0.8, 0.3, 0.8], [0.5, 0.5, 0.5], 0.3, 0.0, 1.0),
    };
    Material {
        name: name.to_string(),
        diffuse,
        specular,
        emissive: [0.0, 0.0, 0.0],
        roughness,
        metallic,
        alpha,
    }
}

/// Pick the library material for a prompt; precious metals override the tint
pub(crate) fn select_material(prompt: &str) -> Material {
    let tokens = prompt_tokens(prompt);
    let has = |kw: &str| tokens.iter().any(|t| token_matches(t, kw));

    let name = MATERIAL_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| has(kw)))
        .map(|(name, _)| *name)
        .unwrap_or(DEFAULT_MATERIAL);

    let mut material = library_material(name);
    if name == "metal" {
        if has("gold") {
            material.name = "gold".to_string();
            material.diffuse = [0.9, 0.7, 0.1];
        } else if has("silver") {
            material.name = "silver".to_string();
            material.diffuse = [0.8, 0.8, 0.9];
        }
    }
    material
}

fn apply_style(material: &mut Material, style: MaterialStyle) {
    match style {
        MaterialStyle::Cartoon => {
            material.roughness = (material.roughness + 0.2).min(1.0);
            for c in &mut material.specular {
                *c = (*c + 0.3).min(1.0);
            }
        }
        MaterialStyle::SciFi => {
            material.emissive = [0.1, 0.1, 0.2];
            material.metallic = (material.metallic + 0.2).min(1.0);
        }
        MaterialStyle::Fantasy => {
            material.emissive = [0.2, 0.1, 0.3];
        }
        MaterialStyle::LowPoly => {
            material.roughness = material.roughness.max(0.6);
        }
        MaterialStyle::Realistic | MaterialStyle::Stylized => {}
    }
}

fn apply_variation(material: &mut Material, variation: &mut Variation) {
    for c in &mut material.diffuse {
        *c = (*c + (variation.unit() - 0.5) * 2.0 * COLOR_VARIATION).clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Spherical,
    Cylindrical,
    Planar,
}

fn choose_projection(min: Vec3, max: Vec3) -> Projection {
    let extent = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
    let largest = extent.iter().cloned().fold(f32::MIN, f32::max);
    let smallest = extent.iter().cloned().fold(f32::MAX, f32::min);
    if largest <= 0.0 {
        return Projection::Planar;
    }
    if smallest / largest > 0.6 {
        Projection::Spherical
    } else if extent[1] >= extent[0] && extent[1] >= extent[2] {
        Projection::Cylindrical
    } else {
        Projection::Planar
    }
}

/// Fill `mesh.uvs` with one coordinate per vertex
fn project_uvs(mesh: &mut Mesh) -> Option<Projection> {
    let (min, max) = mesh.bounds()?;
    let projection = choose_projection(min, max);
    let center = [
        (min[0] + max[0]) / 2.0,
        (min[1] + max[1]) / 2.0,
        (min[2] + max[2]) / 2.0,
    ];
    let span = |axis: usize| (max[axis] - min[axis]).max(f32::EPSILON);

    mesh.uvs = mesh
        .vertices
        .iter()
        .map(|v| {
            let d = [v[0] - center[0], v[1] - center[1], v[2] - center[2]];
            match projection {
                Projection::Spherical => {
                    let r = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt().max(f32::EPSILON);
                    let u = 0.5 + d[2].atan2(d[0]) / (2.0 * PI);
                    let v = 0.5 - (d[1] / r).clamp(-1.0, 1.0).asin() / PI;
                    [u, v]
                }
                Projection::Cylindrical => {
                    let u = 0.5 + d[2].atan2(d[0]) / (2.0 * PI);
                    [u, (v[1] - min[1]) / span(1)]
                }
                Projection::Planar => [(v[0] - min[0]) / span(0), (v[2] - min[2]) / span(2)],
            }
        })
        .collect();
    Some(projection)
}

/// Material-focused engine layered over a base geometry engine
pub struct TextureEngine {
    base: Arc<dyn GenerationEngine>,
}

impl TextureEngine {
    pub fn new(base: Arc<dyn GenerationEngine>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl GenerationEngine for TextureEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Texture
    }

    fn supports_cancellation(&self) -> bool {
        self.base.supports_cancellation()
    }

    async fn generate(
        &self,
        spec: &GenerationSpec,
        cancel: &CancelSignal,
        progress: &ProgressReporter,
    ) -> Result<EngineResult, EngineError> {
        let base = self
            .base
            .generate(spec, cancel, &progress.scaled(0, 80))
            .await?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        progress.report(85, "applying material");

        let mut mesh = (*base.geometry).clone();
        let mut material = select_material(&spec.normalized_prompt());
        apply_style(&mut material, spec.material_style);
        // Offset the stream so material jitter is independent of the base geometry jitter
        let mut variation = Variation::new(spec.fingerprint().seed() ^ 0x7465_7874_7572_6521);
        apply_variation(&mut material, &mut variation);

        progress.report(95, "projecting uvs");
        let projection = project_uvs(&mut mesh);
        debug!(
            material = %material.name,
            style = spec.material_style.as_str(),
            projection = ?projection,
            "Applied material"
        );

        let mut metadata = base.metadata.clone();
        metadata.insert("base_engine".to_string(), base.engine_used.to_string());
        metadata.insert("material".to_string(), material.name.clone());
        metadata.insert(
            "material_style".to_string(),
            spec.material_style.as_str().to_string(),
        );
        if let Some(projection) = projection {
            metadata.insert(
                "uv_projection".to_string(),
                format!("{:?}", projection).to_lowercase(),
            );
        }
        mesh.material = Some(material);

        let quality = (base.quality_score + 0.1).min(1.0);
        let result = EngineResult::new(EngineKind::Texture, mesh, metadata, quality)?;
        Ok(match base.soft_failure {
            Some(reason) => result.with_soft_failure(reason),
            None => result,
        })
    }
}
