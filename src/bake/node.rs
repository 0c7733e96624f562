//! Surface nodes of a scene and the context every bake step runs in.

use thiserror::Error;

use crate::geom::{BBox, BezierError};

use super::atlas::{AtlasError, LightMapInfo, LightmapAtlas};
use super::collision::CollisionError;
use super::config::BakeConfig;
use super::curved::CurvedSurface;
use super::diagnostics::BakeDiagnostics;
use super::material::{Material, MaterialId, MaterialRegistry};
use super::metrics::BakeMetrics;
use super::patch::{PatchGrid, PatchMesh};
use super::planar::PlanarSurface;

/// Index of a surface in a [`NodeTable`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Ord, PartialOrd)]
pub struct NodeId(pub usize);

impl NodeId {
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

/// Why a surface ended up without a lightmap.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LightmapError {
    #[error("material `{0}` does not use a generated lightmap")]
    NotRequested(String),
    #[error("surface has no usable extent")]
    Degenerate,
    #[error("lightmap of {size_s}x{size_t} texels exceeds the atlas tile")]
    ExceedsTile { size_s: usize, size_t: usize },
    #[error("lightmap mesh still {width}x{height} after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        width: usize,
        height: usize,
    },
    #[error("atlas allocation failed: {0}")]
    Allocation(#[from] AtlasError),
    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialId),
}

impl LightmapError {
    /// The material asked for no lightmap; nothing went wrong.
    #[must_use]
    pub fn is_not_requested(&self) -> bool {
        matches!(self, Self::NotRequested(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("planar surface needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("invalid control grid: {0}")]
    ControlGrid(#[from] BezierError),
    #[error("draw index {index} is out of range for {vertex_count} shared vertices")]
    DrawIndexOutOfRange { index: u32, vertex_count: usize },
    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialId),
    #[error("patch mesh {width}x{height} does not match the {expected_width}x{expected_height} lightmap")]
    MeshMismatch {
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },
    #[error("collision proxy: {0}")]
    Collision(#[from] CollisionError),
    #[error("lightmap mesh could not be regenerated: {0}")]
    Lightmap(#[from] LightmapError),
    #[error(transparent)]
    Atlas(#[from] AtlasError),
}

/// Shared state of one bake, passed into every surface operation.
pub struct BakeContext<'a> {
    pub atlas: &'a mut dyn LightmapAtlas,
    pub materials: &'a MaterialRegistry,
    pub config: &'a BakeConfig,
    pub diagnostics: BakeDiagnostics,
    pub metrics: BakeMetrics,
}

impl<'a> BakeContext<'a> {
    pub fn new(
        atlas: &'a mut dyn LightmapAtlas,
        materials: &'a MaterialRegistry,
        config: &'a BakeConfig,
    ) -> Self {
        Self {
            atlas,
            materials,
            config,
            diagnostics: BakeDiagnostics::new(),
            metrics: BakeMetrics::default(),
        }
    }

    /// Looks up `id` in the registry; the reference outlives the borrow of `self`.
    pub fn material(&self, id: MaterialId) -> Option<&'a Material> {
        self.materials.get(id)
    }
}

/// A lightmapped surface: a flat polygonal face or a curved Bezier patch.
#[derive(Debug, Clone)]
pub enum SurfaceNode {
    Planar(PlanarSurface),
    Curved(CurvedSurface),
}

impl SurfaceNode {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Planar(_) => "face",
            Self::Curved(_) => "bezier patch",
        }
    }

    #[must_use]
    pub fn bounding_box(&self) -> BBox {
        match self {
            Self::Planar(face) => face.bounding_box(),
            Self::Curved(patch) => patch.bounding_box(),
        }
    }

    #[must_use]
    pub fn material(&self) -> MaterialId {
        match self {
            Self::Planar(face) => face.material(),
            Self::Curved(patch) => patch.material(),
        }
    }

    #[must_use]
    pub fn lightmap_info(&self) -> LightMapInfo {
        match self {
            Self::Planar(face) => face.lightmap_info(),
            Self::Curved(patch) => patch.lightmap_info(),
        }
    }

    /// Sizes the lightmap, allocates it from the atlas and fills it with neutral texels.
    ///
    /// On any error the surface keeps an empty lightmap.
    pub fn init_default_lightmaps(
        &mut self,
        ctx: &mut BakeContext<'_>,
    ) -> Result<LightMapInfo, LightmapError> {
        match self {
            Self::Planar(face) => face.init_default_lightmaps(ctx),
            Self::Curved(patch) => patch.init_default_lightmaps(ctx),
        }
    }

    /// Patch grid and sample points for the solver; `None` without a lightmap.
    pub fn create_patch_meshes(
        &self,
        node: NodeId,
        ctx: &mut BakeContext<'_>,
    ) -> Result<Option<PatchGrid>, SurfaceError> {
        match self {
            Self::Planar(face) => face.create_patch_mesh(node, ctx),
            Self::Curved(patch) => patch.create_patch_mesh(node, ctx),
        }
    }

    /// Writes the solved `mesh` into this surface's atlas region.
    pub fn back_to_lightmap(
        &self,
        mesh: &PatchMesh,
        ctx: &mut BakeContext<'_>,
    ) -> Result<(), SurfaceError> {
        match self {
            Self::Planar(face) => face.back_to_lightmap(mesh, ctx),
            Self::Curved(patch) => patch.back_to_lightmap(mesh, ctx),
        }
    }

    pub fn is_opaque(&self, materials: &MaterialRegistry) -> Result<bool, SurfaceError> {
        let id = self.material();
        materials
            .get(id)
            .map(Material::is_opaque)
            .ok_or(SurfaceError::UnknownMaterial(id))
    }
}

impl From<PlanarSurface> for SurfaceNode {
    fn from(face: PlanarSurface) -> Self {
        Self::Planar(face)
    }
}

impl From<CurvedSurface> for SurfaceNode {
    fn from(patch: CurvedSurface) -> Self {
        Self::Curved(patch)
    }
}

/// Arena of the surfaces of a scene. Ids are dense and stable; nodes are never removed.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: Vec<SurfaceNode>,
}

impl NodeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: impl Into<SurfaceNode>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node.into());
        id
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&SurfaceNode> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SurfaceNode> {
        self.nodes.get_mut(id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SurfaceNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::new(i), node))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut SurfaceNode)> {
        self.nodes
            .iter_mut()
            .enumerate()
            .map(|(i, node)| (NodeId::new(i), node))
    }

    /// Bounding box of all surfaces.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BBox> {
        self.nodes
            .iter()
            .map(SurfaceNode::bounding_box)
            .reduce(BBox::union)
    }
}
