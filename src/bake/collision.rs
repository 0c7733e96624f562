//! Ray queries against an auxiliary collision tessellation of a surface.

use thiserror::Error;

use crate::geom::{BBox, BezierPatch, Bvh, BvhLimits, Point3, Vec3};

use super::material::ClipFlags;

/// Ray/triangle determinant below which the ray counts as parallel.
const PARALLEL_EPS: f64 = 1e-12;

/// A static solid that answers "how far along this ray is the first hit".
pub trait CollisionProxy {
    /// Traces `start .. start + ray` and returns the fraction of `ray` travelled before the
    /// first hit, `1.0` when nothing is hit or `mask` does not intersect the proxy's flags.
    fn trace_ray(&self, start: Point3, ray: Vec3, mask: ClipFlags) -> f64;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollisionError {
    #[error("collision mesh {width}x{height} has no usable triangles")]
    Empty { width: usize, height: usize },
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    a: Point3,
    b: Point3,
    c: Point3,
}

impl Triangle {
    fn bbox(&self) -> BBox {
        BBox::new(self.a, self.a).expand_point(self.b).expand_point(self.c)
    }

    fn is_degenerate(&self) -> bool {
        (self.b - self.a).cross(self.c - self.a).length_squared() <= PARALLEL_EPS
    }

    /// Möller–Trumbore against the front face only; returns the ray parameter of the hit.
    ///
    /// The front is the side `(b - a) x (c - a)` points to. Rays leaving through the back are
    /// not stopped.
    fn intersect(&self, origin: Point3, dir: Vec3) -> Option<f64> {
        let e1 = self.b - self.a;
        let e2 = self.c - self.a;
        let p = dir.cross(e2);
        let det = e1.dot(p);
        if det < PARALLEL_EPS {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = origin - self.a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = dir.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t >= 0.0).then_some(t)
    }
}

/// Triangle soup built from a tessellated patch grid, accelerated by a [`Bvh`].
#[derive(Debug, Clone)]
pub struct StaticMeshProxy {
    triangles: Vec<Triangle>,
    bvh: Bvh,
    clip_flags: ClipFlags,
}

impl StaticMeshProxy {
    /// Two triangles per grid cell of `mesh`; degenerate triangles are dropped.
    ///
    /// Triangles face the same way as the grid's vertex normals, `tangent_t x tangent_s`.
    ///
    /// BVH nodes whose longest side is below `min_node_size` are not split further.
    pub fn from_grid(
        mesh: &BezierPatch,
        clip_flags: ClipFlags,
        min_node_size: f64,
    ) -> Result<Self, CollisionError> {
        let empty = CollisionError::Empty {
            width: mesh.width,
            height: mesh.height,
        };
        if mesh.width < 2 || mesh.height < 2 {
            return Err(empty);
        }

        let mut triangles = Vec::with_capacity((mesh.width - 1) * (mesh.height - 1) * 2);
        for row in 0..mesh.height - 1 {
            for col in 0..mesh.width - 1 {
                let p00 = mesh.vertex(col, row).coord;
                let p10 = mesh.vertex(col + 1, row).coord;
                let p01 = mesh.vertex(col, row + 1).coord;
                let p11 = mesh.vertex(col + 1, row + 1).coord;
                for tri in [
                    Triangle { a: p00, b: p01, c: p10 },
                    Triangle { a: p10, b: p01, c: p11 },
                ] {
                    if !tri.is_degenerate() {
                        triangles.push(tri);
                    }
                }
            }
        }

        let bboxes: Vec<BBox> = triangles.iter().map(Triangle::bbox).collect();
        let bvh = Bvh::build(
            &bboxes,
            BvhLimits {
                leaf_size: 4,
                min_node_extent: min_node_size,
            },
        )
        .ok_or(empty)?;

        log::debug!(
            "collision proxy: {} triangles, {} BVH nodes",
            triangles.len(),
            bvh.node_count()
        );
        Ok(Self {
            triangles,
            bvh,
            clip_flags,
        })
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    #[must_use]
    pub fn clip_flags(&self) -> ClipFlags {
        self.clip_flags
    }
}

impl CollisionProxy for StaticMeshProxy {
    fn trace_ray(&self, start: Point3, ray: Vec3, mask: ClipFlags) -> f64 {
        if !self.clip_flags.intersects(mask) {
            return 1.0;
        }
        self.bvh
            .closest_ray_hit(start, ray, 1.0, |idx| {
                self.triangles[idx].intersect(start, ray)
            })
            .map_or(1.0, |(_, fraction)| fraction)
    }
}
