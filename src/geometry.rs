//! Mesh value types shared by the engines
//!
//! Engines build meshes from a handful of primitives and hand them to the
//! coordinator. A [`GeometryRef`] is the canonical encoded form of a mesh:
//! bincode bytes plus their BLAKE3 digest. Identical meshes always encode to
//! identical bytes.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

pub type Vec3 = [f32; 3];

/// Surface description attached by the texture engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub emissive: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub alpha: f32,
}

/// Triangle mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
    /// One entry per vertex when present
    pub uvs: Vec<[f32; 2]>,
    pub material: Option<Material>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primitive_count(&self) -> usize {
        self.faces.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn has_finite_vertices(&self) -> bool {
        self.vertices
            .iter()
            .all(|v| v.iter().all(|c| c.is_finite()))
    }

    /// Whether every face references an existing vertex
    pub fn faces_in_range(&self) -> bool {
        let count = self.vertices.len() as u64;
        self.faces
            .iter()
            .all(|f| f.iter().all(|&i| u64::from(i) < count))
    }

    /// Axis-aligned bounds as `(min, max)`; `None` for an empty mesh
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for v in &self.vertices[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Some((min, max))
    }

    /// Append another mesh, rebasing its face indices
    pub fn merge(&mut self, other: Mesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.faces.extend(
            other
                .faces
                .into_iter()
                .map(|[a, b, c]| [a + offset, b + offset, c + offset]),
        );
    }

    pub fn translated(mut self, offset: Vec3) -> Self {
        for v in &mut self.vertices {
            v[0] += offset[0];
            v[1] += offset[1];
            v[2] += offset[2];
        }
        self
    }

    pub fn scaled(mut self, factor: Vec3) -> Self {
        for v in &mut self.vertices {
            v[0] *= factor[0];
            v[1] *= factor[1];
            v[2] *= factor[2];
        }
        self
    }

    /// Rotate about the X axis by `angle` radians
    pub fn rotated_x(mut self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        for v in &mut self.vertices {
            let (y, z) = (v[1], v[2]);
            v[1] = y * cos - z * sin;
            v[2] = y * sin + z * cos;
        }
        self
    }

    /// Rotate about the Z axis by `angle` radians
    pub fn rotated_z(mut self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        for v in &mut self.vertices {
            let (x, y) = (v[0], v[1]);
            v[0] = x * cos - y * sin;
            v[1] = x * sin + y * cos;
        }
        self
    }

    /// Axis-aligned box centred on the origin
    pub fn cuboid(size: Vec3) -> Self {
        let [hx, hy, hz] = [size[0] / 2.0, size[1] / 2.0, size[2] / 2.0];
        let vertices = vec![
            [-hx, -hy, -hz],
            [hx, -hy, -hz],
            [hx, hy, -hz],
            [-hx, hy, -hz],
            [-hx, -hy, hz],
            [hx, -hy, hz],
            [hx, hy, hz],
            [-hx, hy, hz],
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        Self {
            vertices,
            faces,
            ..Self::default()
        }
    }

    /// Closed cylinder along the Y axis, centred on the origin
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        Self::frustum(radius, radius, height, segments)
    }

    /// Closed cone along the Y axis with its base at `-height / 2`
    pub fn cone(radius: f32, height: f32, segments: u32) -> Self {
        Self::frustum(radius, 0.0, height, segments)
    }

    fn frustum(bottom_radius: f32, top_radius: f32, height: f32, segments: u32) -> Self {
        let segments = segments.max(3);
        let half = height / 2.0;
        let mut mesh = Self::new();

        for ring in [(-half, bottom_radius), (half, top_radius)] {
            for i in 0..segments {
                let angle = 2.0 * PI * i as f32 / segments as f32;
                mesh.vertices
                    .push([ring.1 * angle.cos(), ring.0, ring.1 * angle.sin()]);
            }
        }
        let bottom_center = mesh.vertices.len() as u32;
        mesh.vertices.push([0.0, -half, 0.0]);
        let top_center = bottom_center + 1;
        mesh.vertices.push([0.0, half, 0.0]);

        for i in 0..segments {
            let next = (i + 1) % segments;
            let (b0, b1) = (i, next);
            let (t0, t1) = (i + segments, next + segments);
            mesh.faces.push([b0, t0, b1]);
            mesh.faces.push([b1, t0, t1]);
            mesh.faces.push([bottom_center, b0, b1]);
            mesh.faces.push([top_center, t1, t0]);
        }
        mesh
    }

    /// UV sphere centred on the origin
    pub fn uv_sphere(radius: f32, rings: u32, segments: u32) -> Self {
        let rings = rings.max(2);
        let segments = segments.max(3);
        let mut mesh = Self::new();

        for r in 0..=rings {
            let phi = PI * r as f32 / rings as f32;
            for s in 0..segments {
                let theta = 2.0 * PI * s as f32 / segments as f32;
                mesh.vertices.push([
                    radius * phi.sin() * theta.cos(),
                    radius * phi.cos(),
                    radius * phi.sin() * theta.sin(),
                ]);
            }
        }
        for r in 0..rings {
            for s in 0..segments {
                let next = (s + 1) % segments;
                let a = r * segments + s;
                let b = r * segments + next;
                let c = (r + 1) * segments + s;
                let d = (r + 1) * segments + next;
                if r != 0 {
                    mesh.faces.push([a, b, c]);
                }
                if r != rings - 1 {
                    mesh.faces.push([b, d, c]);
                }
            }
        }
        mesh
    }
}

/// Canonical encoded form of a mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryRef {
    /// Hex BLAKE3 digest of `content`
    pub digest: String,
    pub content: Arc<[u8]>,
}

impl GeometryRef {
    pub fn encode(mesh: &Mesh) -> Result<Self, EngineError> {
        let bytes = bincode::serialize(mesh)
            .map_err(|e| EngineError::Failed(format!("Failed to encode mesh: {}", e)))?;
        Ok(Self {
            digest: blake3::hash(&bytes).to_hex().to_string(),
            content: Arc::from(bytes),
        })
    }

    pub fn decode(&self) -> Result<Mesh, EngineError> {
        bincode::deserialize(&self.content)
            .map_err(|e| EngineError::InvalidResponse(format!("Failed to decode mesh: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
