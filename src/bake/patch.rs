use crate::geom::{Point3, Vec3};

use super::material::MaterialId;
use super::node::NodeId;

/// One cell of the radiosity grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patch {
    /// World-space sample position.
    pub coord: Point3,
    pub normal: Vec3,
    /// Covered surface area; the nominal cell area unless clipped.
    pub area: f64,
    /// Whether the cell covers any part of the surface. Cells outside are kept as placeholders.
    pub inside_face: bool,
    /// RGB irradiance, written by the solver.
    pub total_energy: Vec3,
    /// Accumulated incident direction, written by the solver.
    pub energy_from_dir: Vec3,
}

impl Patch {
    /// Placeholder cell at the origin whose incident direction points along `normal`.
    #[must_use]
    pub fn placeholder(normal: Vec3, area: f64, initial_dir_length: f64) -> Self {
        Self {
            coord: Point3::ORIGIN,
            normal,
            area,
            inside_face: false,
            total_energy: Vec3::ZERO,
            energy_from_dir: normal * initial_dir_length,
        }
    }
}

/// The full patch grid of one surface, row-major (`patches[t * width + s]`).
#[derive(Debug, Clone, PartialEq)]
pub struct PatchMesh {
    pub width: usize,
    pub height: usize,
    /// Column `width` is column 0 again.
    pub wraps_horz: bool,
    /// Row `height` is row 0 again.
    pub wraps_vert: bool,
    pub patches: Vec<Patch>,
    /// Owning surface in the node table.
    pub node: NodeId,
    pub material: MaterialId,
}

impl PatchMesh {
    #[must_use]
    pub fn new(node: NodeId, material: MaterialId, width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            wraps_horz: false,
            wraps_vert: false,
            patches: Vec::with_capacity(width * height),
            node,
            material,
        }
    }

    /// Patch at grid cell `(s, t)`, wrapping around when the mesh wraps.
    #[must_use]
    pub fn patch(&self, s: usize, t: usize) -> Option<&Patch> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let s = if self.wraps_horz { s % self.width } else { s };
        let t = if self.wraps_vert { t % self.height } else { t };
        if s >= self.width || t >= self.height {
            return None;
        }
        self.patches.get(t * self.width + s)
    }

    /// `patches.len() == width * height`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.patches.len() == self.width * self.height
    }

    #[must_use]
    pub fn inside_count(&self) -> usize {
        self.patches.iter().filter(|p| p.inside_face).count()
    }
}

/// A patch mesh plus, per patch, the points the solver samples direct light at.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchGrid {
    pub mesh: PatchMesh,
    /// Parallel to `mesh.patches`; empty for placeholders.
    pub sample_coords: Vec<Vec<Point3>>,
}
