//! Render meshes of lightmapped surfaces.
//!
//! These are plain vertex lists; submitting them to a renderer is up to the caller.

use crate::geom::{Point3, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    TriangleFan,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderVertex {
    pub origin: Point3,
    pub tex_coord: [f64; 2],
    /// Atlas-tile coordinates in `[0, 1]`.
    pub lightmap_coord: [f64; 2],
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderMesh {
    pub primitive: Primitive,
    pub vertices: Vec<RenderVertex>,
}

impl RenderMesh {
    #[must_use]
    pub fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            vertices: Vec::new(),
        }
    }

    /// Triangles described by the vertex list.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.vertices.len().saturating_sub(2)
    }
}
