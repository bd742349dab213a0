//! Offline procedural synthesis
//!
//! Picks a shape category from prompt keywords and assembles it from
//! primitives. Output depends only on the spec: proportions are jittered from
//! the spec fingerprint, never from the clock or an unseeded RNG.

use super::{EngineKind, EngineResult, GenerationEngine};
use crate::cancel::CancelSignal;
use crate::error::EngineError;
use crate::geometry::{Mesh, Vec3};
use crate::progress::ProgressReporter;
use crate::request::GenerationSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;
use tracing::debug;

/// Shape family derived from the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeCategory {
    Vehicle,
    Building,
    Furniture,
    Character,
    Weapon,
    Nature,
    Abstract,
    Generic,
}

/// Checked in order; the first category with a matching keyword wins
const CATEGORY_KEYWORDS: &[(ShapeCategory, &[&str])] = &[
    (
        ShapeCategory::Vehicle,
        &[
            "car", "vehicle", "automobile", "truck", "spaceship", "rocket", "ship",
            "spacecraft", "boat", "plane", "airplane", "bus", "tank", "train",
        ],
    ),
    (
        ShapeCategory::Building,
        &[
            "castle", "tower", "building", "structure", "house", "skyscraper", "temple", "hut",
        ],
    ),
    (
        ShapeCategory::Furniture,
        &[
            "chair", "seat", "furniture", "table", "desk", "bed", "sofa", "couch", "bench",
            "stool",
        ],
    ),
    (
        ShapeCategory::Character,
        &[
            "human", "person", "character", "humanoid", "robot", "mech", "android", "animal",
            "creature", "beast", "knight",
        ],
    ),
    (
        ShapeCategory::Weapon,
        &[
            "weapon", "sword", "gun", "blade", "axe", "bow", "spear", "dagger", "hammer",
        ],
    ),
    (
        ShapeCategory::Nature,
        &["plant", "tree", "flower", "bush", "rock", "mushroom", "forest"],
    ),
    (
        ShapeCategory::Abstract,
        &[
            "abstract", "sphere", "ball", "orb", "globe", "cube", "box", "block", "cylinder",
            "sculpture", "shape",
        ],
    ),
];

impl ShapeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeCategory::Vehicle => "vehicle",
            ShapeCategory::Building => "building",
            ShapeCategory::Furniture => "furniture",
            ShapeCategory::Character => "character",
            ShapeCategory::Weapon => "weapon",
            ShapeCategory::Nature => "nature",
            ShapeCategory::Abstract => "abstract",
            ShapeCategory::Generic => "generic",
        }
    }

    /// Classify a prompt by whole-word keyword match (simple plurals included)
    pub fn from_prompt(prompt: &str) -> Self {
        let tokens = prompt_tokens(prompt);
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                keywords
                    .iter()
                    .any(|kw| tokens.iter().any(|token| token_matches(token, kw)))
            })
            .map(|(category, _)| *category)
            .unwrap_or(ShapeCategory::Generic)
    }
}

pub(crate) fn prompt_tokens(prompt: &str) -> Vec<String> {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub(crate) fn token_matches(token: &str, keyword: &str) -> bool {
    match token.strip_prefix(keyword) {
        Some("") | Some("s") | Some("es") => true,
        _ => false,
    }
}

/// SplitMix64 stream seeded from a fingerprint
pub(crate) struct Variation {
    state: u64,
}

impl Variation {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform value in `[0, 1)`
    pub(crate) fn unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Multiplier in `[1 - amount, 1 + amount)`
    pub(crate) fn factor(&mut self, amount: f32) -> f32 {
        1.0 + (self.unit() - 0.5) * 2.0 * amount
    }
}

#[derive(Debug, Clone, Copy)]
enum Primitive {
    Cuboid(Vec3),
    Cylinder { radius: f32, height: f32 },
    Cone { radius: f32, height: f32 },
    Sphere { radius: f32 },
    /// Unit sphere stretched per axis
    Ellipsoid { radii: Vec3 },
}

#[derive(Debug, Clone, Copy)]
enum Orientation {
    Upright,
    AlongX,
    AlongZ,
}

#[derive(Debug, Clone, Copy)]
struct Part {
    primitive: Primitive,
    orientation: Orientation,
    offset: Vec3,
}

impl Part {
    fn at(primitive: Primitive, offset: Vec3) -> Self {
        Self {
            primitive,
            orientation: Orientation::Upright,
            offset,
        }
    }

    fn oriented(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    fn build(&self, resolution: &Resolution) -> Mesh {
        let mesh = match self.primitive {
            Primitive::Cuboid(size) => Mesh::cuboid(size),
            Primitive::Cylinder { radius, height } => {
                Mesh::cylinder(radius, height, resolution.segments)
            }
            Primitive::Cone { radius, height } => Mesh::cone(radius, height, resolution.segments),
            Primitive::Sphere { radius } => {
                Mesh::uv_sphere(radius, resolution.rings, resolution.segments)
            }
            Primitive::Ellipsoid { radii } => {
                Mesh::uv_sphere(1.0, resolution.rings, resolution.segments).scaled(radii)
            }
        };
        let mesh = match self.orientation {
            Orientation::Upright => mesh,
            Orientation::AlongX => mesh.rotated_z(FRAC_PI_2),
            Orientation::AlongZ => mesh.rotated_x(FRAC_PI_2),
        };
        mesh.translated(self.offset)
    }
}

struct Resolution {
    segments: u32,
    rings: u32,
}

impl Resolution {
    fn for_detail(detail_level: u8) -> Self {
        let detail = u32::from(detail_level);
        Self {
            segments: 6 + 2 * detail,
            rings: 3 + detail,
        }
    }
}

/// Lay out the parts of a model; pure data so the build loop can checkpoint between parts
fn plan_parts(category: ShapeCategory, complexity: u8, variation: &mut Variation) -> Vec<Part> {
    let complexity = usize::from(complexity);
    let mut parts = Vec::new();

    match category {
        ShapeCategory::Vehicle => {
            let length = 4.0 * variation.factor(0.15);
            let height = 1.0 * variation.factor(0.1);
            let width = 2.0 * variation.factor(0.1);
            parts.push(Part::at(
                Primitive::Cuboid([length, height, width]),
                [0.0, height / 2.0 + 0.45, 0.0],
            ));
            parts.push(Part::at(
                Primitive::Cuboid([length * 0.5, height * 0.8, width * 0.9]),
                [-length * 0.1, height * 1.35 + 0.45, 0.0],
            ));
            let axles = if complexity >= 8 { 3 } else { 2 };
            for axle in 0..axles {
                let x = -length * 0.35 + axle as f32 * (length * 0.7) / (axles - 1) as f32;
                for side in [-1.0f32, 1.0] {
                    parts.push(
                        Part::at(
                            Primitive::Cylinder {
                                radius: 0.45,
                                height: 0.3,
                            },
                            [x, 0.45, side * width / 2.0],
                        )
                        .oriented(Orientation::AlongZ),
                    );
                }
            }
            if complexity > 5 {
                parts.push(Part::at(
                    Primitive::Cuboid([0.3, 0.1, width]),
                    [-length / 2.0, height + 0.75, 0.0],
                ));
            }
        }
        ShapeCategory::Building => {
            let base_height = (3.0 + complexity as f32 * 0.3) * variation.factor(0.1);
            parts.push(Part::at(
                Primitive::Cuboid([4.0, base_height, 4.0]),
                [0.0, base_height / 2.0, 0.0],
            ));
            let towers = (1 + complexity / 3).min(4);
            let corners = [[-2.0, -2.0], [2.0, 2.0], [2.0, -2.0], [-2.0, 2.0]];
            for corner in corners.iter().take(towers) {
                let tower_height = base_height * 1.4 * variation.factor(0.1);
                parts.push(Part::at(
                    Primitive::Cylinder {
                        radius: 0.6,
                        height: tower_height,
                    },
                    [corner[0], tower_height / 2.0, corner[1]],
                ));
                parts.push(Part::at(
                    Primitive::Cone {
                        radius: 0.8,
                        height: 1.2,
                    },
                    [corner[0], tower_height + 0.6, corner[1]],
                ));
            }
        }
        ShapeCategory::Furniture => {
            let seat_height = 1.0 * variation.factor(0.1);
            parts.push(Part::at(
                Primitive::Cuboid([2.0, 0.2, 2.0]),
                [0.0, seat_height, 0.0],
            ));
            for [x, z] in [[-0.9, -0.9], [0.9, -0.9], [0.9, 0.9], [-0.9, 0.9]] {
                parts.push(Part::at(
                    Primitive::Cuboid([0.15, seat_height, 0.15]),
                    [x, seat_height / 2.0, z],
                ));
            }
            let back_height = 1.5 * variation.factor(0.15);
            parts.push(Part::at(
                Primitive::Cuboid([2.0, back_height, 0.15]),
                [0.0, seat_height + back_height / 2.0, -0.95],
            ));
            if complexity >= 6 {
                for x in [-1.0, 1.0] {
                    parts.push(Part::at(
                        Primitive::Cuboid([0.15, 0.1, 1.8]),
                        [x, seat_height + 0.6, 0.0],
                    ));
                }
            }
        }
        ShapeCategory::Character => {
            let torso = 1.5 * variation.factor(0.1);
            parts.push(Part::at(
                Primitive::Cylinder {
                    radius: 0.5,
                    height: torso,
                },
                [0.0, 1.6 + torso / 2.0, 0.0],
            ));
            parts.push(Part::at(
                Primitive::Sphere {
                    radius: 0.4 * variation.factor(0.1),
                },
                [0.0, 2.0 + torso, 0.0],
            ));
            for side in [-1.0f32, 1.0] {
                parts.push(Part::at(
                    Primitive::Cylinder {
                        radius: 0.15,
                        height: 1.2,
                    },
                    [side * 0.7, 1.0 + torso, 0.0],
                ));
                parts.push(Part::at(
                    Primitive::Cylinder {
                        radius: 0.2,
                        height: 1.6,
                    },
                    [side * 0.25, 0.8, 0.0],
                ));
                if complexity >= 7 {
                    parts.push(Part::at(
                        Primitive::Sphere { radius: 0.15 },
                        [side * 0.7, 0.35 + torso, 0.0],
                    ));
                }
            }
        }
        ShapeCategory::Weapon => {
            let blade = 3.0 * variation.factor(0.15);
            parts.push(Part::at(
                Primitive::Cuboid([0.2, blade, 0.05]),
                [0.0, 0.6 + blade / 2.0, 0.0],
            ));
            parts.push(Part::at(
                Primitive::Cuboid([1.0 * variation.factor(0.2), 0.15, 0.2]),
                [0.0, 0.55, 0.0],
            ));
            parts.push(Part::at(
                Primitive::Cylinder {
                    radius: 0.1,
                    height: 0.8,
                },
                [0.0, 0.1, 0.0],
            ));
            if complexity >= 4 {
                parts.push(Part::at(Primitive::Sphere { radius: 0.15 }, [0.0, -0.35, 0.0]));
            }
        }
        ShapeCategory::Nature => {
            let trunk = 2.0 * variation.factor(0.2);
            parts.push(Part::at(
                Primitive::Cylinder {
                    radius: 0.3,
                    height: trunk,
                },
                [0.0, trunk / 2.0, 0.0],
            ));
            let clusters = 1 + complexity / 2;
            for i in 0..clusters {
                let angle = i as f32 * 2.399_963; // golden angle
                let spread = if i == 0 { 0.0 } else { 0.8 * variation.factor(0.2) };
                let radius = 1.0 * variation.factor(0.2);
                parts.push(Part::at(
                    Primitive::Ellipsoid {
                        radii: [radius, radius * 0.8, radius],
                    },
                    [
                        spread * angle.cos(),
                        trunk + 0.5 + 0.3 * variation.unit(),
                        spread * angle.sin(),
                    ],
                ));
            }
        }
        ShapeCategory::Abstract => {
            parts.push(Part::at(Primitive::Sphere { radius: 1.0 }, [0.0, 0.0, 0.0]));
            for i in 0..complexity {
                let angle = i as f32 * std::f32::consts::TAU / complexity as f32;
                let distance = 1.8 * variation.factor(0.15);
                let offset = [distance * angle.cos(), 0.4 * (variation.unit() - 0.5), distance * angle.sin()];
                let primitive = if i % 2 == 0 {
                    Primitive::Cuboid([0.4, 0.4, 0.4])
                } else {
                    Primitive::Sphere { radius: 0.25 }
                };
                let orientation = if i % 3 == 0 {
                    Orientation::AlongX
                } else {
                    Orientation::Upright
                };
                parts.push(Part::at(primitive, offset).oriented(orientation));
            }
        }
        ShapeCategory::Generic => {
            parts.push(Part::at(Primitive::Cuboid([1.0, 1.0, 1.0]), [0.0, 0.5, 0.0]));
        }
    }

    parts
}

/// Deterministic keyword-driven mesh synthesis
#[derive(Debug, Clone, Default)]
pub struct ProceduralEngine;

impl ProceduralEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build the full mesh for `spec` without checkpoints
    pub fn synthesize(spec: &GenerationSpec) -> (ShapeCategory, Mesh) {
        let category = ShapeCategory::from_prompt(&spec.normalized_prompt());
        let mut variation = Variation::new(spec.fingerprint().seed());
        let resolution = Resolution::for_detail(spec.detail_level);
        let mut mesh = Mesh::new();
        for part in plan_parts(category, spec.complexity, &mut variation) {
            mesh.merge(part.build(&resolution));
        }
        (category, mesh)
    }

    fn quality_score(spec: &GenerationSpec, category: ShapeCategory) -> f32 {
        let base = if category == ShapeCategory::Generic {
            0.4
        } else {
            0.55
        };
        (base + 0.03 * f32::from(spec.detail_level) + 0.01 * f32::from(spec.complexity)).min(0.95)
    }
}

#[async_trait]
impl GenerationEngine for ProceduralEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Procedural
    }

    async fn generate(
        &self,
        spec: &GenerationSpec,
        cancel: &CancelSignal,
        progress: &ProgressReporter,
    ) -> Result<EngineResult, EngineError> {
        let fingerprint = spec.fingerprint();
        let category = ShapeCategory::from_prompt(&spec.normalized_prompt());
        let mut variation = Variation::new(fingerprint.seed());
        let resolution = Resolution::for_detail(spec.detail_level);
        let parts = plan_parts(category, spec.complexity, &mut variation);

        debug!(
            fingerprint = %fingerprint.short(),
            category = category.as_str(),
            parts = parts.len(),
            segments = resolution.segments,
            "Procedural synthesis started"
        );

        progress.report(5, &format!("planned {} {} parts", parts.len(), category.as_str()));

        let mut mesh = Mesh::new();
        let total = parts.len();
        for (index, part) in parts.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            mesh.merge(part.build(&resolution));
            let done = index + 1;
            let percent = 5 + 90 * done / total.max(1);
            progress.report(percent as u8, &format!("built part {}/{}", done, total));
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("generator".to_string(), "procedural".to_string());
        metadata.insert("category".to_string(), category.as_str().to_string());
        metadata.insert("parts".to_string(), parts.len().to_string());
        metadata.insert("complexity".to_string(), spec.complexity.to_string());
        metadata.insert("detail_level".to_string(), spec.detail_level.to_string());
        metadata.insert("fingerprint".to_string(), fingerprint.to_string());

        EngineResult::new(
            EngineKind::Procedural,
            mesh,
            metadata,
            Self::quality_score(spec, category),
        )
    }
}
