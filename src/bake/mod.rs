//! Lightmap baking for planar faces and Bezier patches.
//!
//! A bake runs in three steps over a [`NodeTable`]:
//!
//! 1. every surface sizes its lightmap and allocates it from a [`LightmapAtlas`],
//! 2. every lightmapped surface builds a [`PatchMesh`] for the external [`RadiositySolver`],
//! 3. the solved meshes are written back into the atlas, directions in tangent space.
//!
//! [`bake_scene`] drives all three; the surface methods can also be called one by one.

mod atlas;
mod baker;
mod collision;
mod config;
mod curved;
mod diagnostics;
mod material;
mod metrics;
mod node;
mod patch;
mod planar;
mod render;
mod scene_io;
mod tangent;

pub use atlas::{
    ATLAS_TILE_S, ATLAS_TILE_T, AtlasError, AtlasRegion, LightMapInfo, LightmapAtlas,
    NEUTRAL_COLOR, NEUTRAL_DIRECTION, TiledLightmapAtlas,
};
pub use baker::{BakeError, BakeReport, RadiositySolver, SolverError, bake_scene};
pub use collision::{CollisionError, CollisionProxy, StaticMeshProxy};
pub use config::{BakeConfig, ConfigError};
pub use curved::CurvedSurface;
pub use diagnostics::BakeDiagnostics;
pub use material::{BlendMode, ClipFlags, Material, MaterialError, MaterialId, MaterialRegistry};
pub use metrics::{BakeMetrics, BakeTimingReport, PhaseStart, TimingBucket};
pub use node::{BakeContext, LightmapError, NodeId, NodeTable, SurfaceError, SurfaceNode};
pub use patch::{Patch, PatchGrid, PatchMesh};
pub use planar::{PlanarSurface, TexInfo};
pub use render::{Primitive, RenderMesh, RenderVertex};
pub use scene_io::{SceneIoError, read_node, read_scene, write_node, write_scene};
pub use tangent::{
    EncodedDirection, TangentFrame, TangentSpaceEncoder, decode_direction, encode_color,
    orientation_factor,
};

#[cfg(test)]
mod tests;
