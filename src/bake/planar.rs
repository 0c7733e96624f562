//! Lightmaps of flat polygonal faces.
//!
//! A face is parameterized by the span vectors `U`, `V` of its plane. The lightmap covers the
//! face's `U`/`V` extents with square patches of `patch_size` plus a one-texel border on every
//! side, so texel `(s, t)` covers the span range
//! `[min_u + (s - 1) * patch_size, min_u + s * patch_size]` (same for `t` along `V`).

use crate::geom::{BBox, Plane3, Point3, Polygon3, Tolerance, Vec3};

use super::atlas::{ATLAS_TILE_S, ATLAS_TILE_T, LightMapInfo, LightmapAtlas};
use super::config::BakeConfig;
use super::material::{MaterialId, MaterialRegistry};
use super::metrics::TimingBucket;
use super::node::{BakeContext, LightmapError, NodeId, SurfaceError};
use super::patch::{Patch, PatchGrid, PatchMesh};
use super::render::{Primitive, RenderMesh, RenderVertex};
use super::tangent::{TangentFrame, TangentSpaceEncoder, encode_color};

/// Texture mapping of a face: `s = dot(P, u) / |u|^2 + offset_u`, same for `t`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TexInfo {
    pub u: Vec3,
    pub v: Vec3,
    pub offset_u: f64,
    pub offset_v: f64,
}

impl TexInfo {
    /// Texture coordinates of `p`, without any integer shift.
    #[must_use]
    pub fn st(&self, p: Point3) -> [f64; 2] {
        let axis = |a: Vec3, offset: f64| {
            let len2 = a.length_squared();
            if len2 > 0.0 {
                p.to_vec3().dot(a) / len2 + offset
            } else {
                offset
            }
        };
        [axis(self.u, self.offset_u), axis(self.v, self.offset_v)]
    }
}

/// Span vectors of a face plane and the face's extents along them.
#[derive(Debug, Clone, Copy)]
struct SpanExtents {
    u: Vec3,
    v: Vec3,
    min_u: f64,
    min_v: f64,
    max_u: f64,
    max_v: f64,
}

impl SpanExtents {
    fn of(plane: &Plane3, points: &[Point3]) -> Option<Self> {
        let (u, v) = plane.span_vectors()?;
        let first = points.first()?.to_vec3();
        let start = (first.dot(u), first.dot(v));

        let (min_u, min_v, max_u, max_v) = points.iter().skip(1).fold(
            (start.0, start.1, start.0, start.1),
            |(min_u, min_v, max_u, max_v), p| {
                let (pu, pv) = (p.to_vec3().dot(u), p.to_vec3().dot(v));
                (min_u.min(pu), min_v.min(pv), max_u.max(pu), max_v.max(pv))
            },
        );

        Some(Self {
            u,
            v,
            min_u,
            min_v,
            max_u,
            max_v,
        })
    }
}

/// Where a patch footprint lies relative to the face.
enum Coverage {
    Outside,
    Covered(Polygon3),
    ChopFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanarSurface {
    polygon: Polygon3,
    material: MaterialId,
    tex_info: TexInfo,
    draw_indices: Vec<u32>,
    lightmap: LightMapInfo,
    bbox: BBox,
}

impl PlanarSurface {
    /// Face from a convex polygon (clockwise seen from the front), its material, texture
    /// mapping and the indices of its render vertices in the scene's shared vertex array.
    pub fn new(
        polygon: Polygon3,
        material: MaterialId,
        tex_info: TexInfo,
        draw_indices: Vec<u32>,
    ) -> Result<Self, SurfaceError> {
        if polygon.len() < 3 {
            return Err(SurfaceError::TooFewVertices(polygon.len()));
        }
        let bbox = BBox::from_points(&polygon.vertices)
            .ok_or(SurfaceError::TooFewVertices(polygon.len()))?;
        Ok(Self {
            polygon,
            material,
            tex_info,
            draw_indices,
            lightmap: LightMapInfo::default(),
            bbox,
        })
    }

    #[must_use]
    pub fn polygon(&self) -> &Polygon3 {
        &self.polygon
    }

    #[must_use]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    #[must_use]
    pub fn tex_info(&self) -> &TexInfo {
        &self.tex_info
    }

    #[must_use]
    pub fn draw_indices(&self) -> &[u32] {
        &self.draw_indices
    }

    #[must_use]
    pub fn lightmap_info(&self) -> LightMapInfo {
        self.lightmap
    }

    pub(crate) fn set_lightmap_info(&mut self, info: LightMapInfo) {
        self.lightmap = info;
    }

    #[must_use]
    pub fn bounding_box(&self) -> BBox {
        self.bbox
    }

    /// Tangent frame of the face, derived from its texture axes.
    #[must_use]
    pub fn tangent_frame(&self) -> TangentFrame {
        TangentFrame::from_texture_axes(self.polygon.plane.normal, self.tex_info.u, self.tex_info.v)
    }

    /// Lightmap size of this face for `patch_size`, border included.
    #[must_use]
    pub fn lightmap_size(&self, patch_size: f64) -> Option<(usize, usize)> {
        let span = SpanExtents::of(&self.polygon.plane, &self.polygon.vertices)?;
        let cells = |extent: f64| ((extent / patch_size).ceil() as usize).saturating_add(2);
        Some((cells(span.max_u - span.min_u), cells(span.max_v - span.min_v)))
    }

    pub fn init_default_lightmaps(
        &mut self,
        ctx: &mut BakeContext<'_>,
    ) -> Result<LightMapInfo, LightmapError> {
        self.lightmap = LightMapInfo::default();

        let material = ctx
            .material(self.material)
            .ok_or(LightmapError::UnknownMaterial(self.material))?;
        if !material.uses_generated_lightmap {
            return Err(LightmapError::NotRequested(material.name.clone()));
        }

        let (size_s, size_t) = self
            .lightmap_size(ctx.config.patch_size)
            .ok_or(LightmapError::Degenerate)?;
        if !LightMapInfo::fits_tile(size_s, size_t) {
            return Err(LightmapError::ExceedsTile { size_s, size_t });
        }

        self.lightmap = ctx.atlas.allocate_lightmap(size_s, size_t)?;
        log::debug!(
            "face lightmap {}x{} at tile {} ({}, {})",
            size_s,
            size_t,
            self.lightmap.lightmap_nr,
            self.lightmap.pos_s,
            self.lightmap.pos_t
        );
        Ok(self.lightmap)
    }

    /// One patch per lightmap texel, clipped to the face.
    ///
    /// Footprints outside the face stay placeholders. Footprints the clipper cannot handle are
    /// counted as clip fallbacks and treated as outside as well.
    pub fn create_patch_mesh(
        &self,
        node: NodeId,
        ctx: &mut BakeContext<'_>,
    ) -> Result<Option<PatchGrid>, SurfaceError> {
        if self.lightmap.is_empty() || self.polygon.len() < 3 {
            return Ok(None);
        }
        let Some(span) = SpanExtents::of(&self.polygon.plane, &self.polygon.vertices) else {
            return Ok(None);
        };

        let started = ctx.metrics.start();
        let config = ctx.config;
        let patch_size = config.patch_size;
        let eps = config.round_epsilon;
        let plane = self.polygon.plane;
        let normal = plane.normal;
        let uv_origin = Point3::from(normal * plane.dist);
        let safety = normal * config.planar_normal_safety;

        // Footprints are wound counter-clockwise in (U, V); they face the other way unless
        // U x V points against the face normal.
        let footprint_plane = if normal.dot(span.u.cross(span.v)) < 0.0 {
            plane
        } else {
            plane.mirrored()
        };

        let (width, height) = (self.lightmap.size_s, self.lightmap.size_t);
        let mut mesh = PatchMesh::new(node, self.material, width, height);
        let mut sample_coords = Vec::with_capacity(width * height);

        for t in 0..height {
            for s in 0..width {
                let mut patch = Patch::placeholder(
                    normal,
                    patch_size * patch_size,
                    config.initial_energy_dir_length,
                );

                let corner = |ds: f64, dt: f64| {
                    uv_origin
                        + span.u * (span.min_u + ds * patch_size)
                        + span.v * (span.min_v + dt * patch_size)
                };
                let (s0, t0) = (s as f64 - 1.0, t as f64 - 1.0);
                let footprint = Polygon3::new(
                    footprint_plane,
                    vec![
                        corner(s0, t0),
                        corner(s0 + 1.0, t0),
                        corner(s0 + 1.0, t0 + 1.0),
                        corner(s0, t0 + 1.0),
                    ],
                );

                let samples = match self.coverage(footprint, eps) {
                    Coverage::Outside => Vec::new(),
                    Coverage::ChopFailed(reason) => {
                        ctx.diagnostics.clip_fallbacks += 1;
                        ctx.diagnostics.warn(format!(
                            "{node:?}: clipping patch ({s}, {t}) failed ({reason}), treated as outside"
                        ));
                        Vec::new()
                    }
                    Coverage::Covered(region) => match region.centroid() {
                        Some(center) => {
                            patch.coord = center + safety;
                            patch.area = region.area();
                            patch.inside_face = true;
                            sample_points(&region, patch.coord, safety, config.sample_inset)
                        }
                        None => Vec::new(),
                    },
                };

                mesh.patches.push(patch);
                sample_coords.push(samples);
            }
        }

        ctx.metrics.stop(TimingBucket::PatchGeneration, started);
        Ok(Some(PatchGrid {
            mesh,
            sample_coords,
        }))
    }

    fn coverage(&self, footprint: Polygon3, eps: f64) -> Coverage {
        match self.polygon.overlaps(&footprint, false, eps) {
            Ok(false) => return Coverage::Outside,
            Ok(true) => {}
            Err(err) => return Coverage::ChopFailed(err.to_string()),
        }

        match self.polygon.encloses(&footprint, true, eps) {
            Ok(true) => return Coverage::Covered(footprint),
            Ok(false) => {}
            Err(err) => return Coverage::ChopFailed(err.to_string()),
        }

        match footprint.chopped_up_along(&self.polygon, eps) {
            Ok(mut pieces) => match pieces.pop() {
                Some(inside) if !inside.is_empty() => Coverage::Covered(inside),
                _ => Coverage::ChopFailed("no piece inside the face".to_owned()),
            },
            Err(err) => Coverage::ChopFailed(err.to_string()),
        }
    }

    /// Writes colors and tangent-space directions of `mesh` into the lightmap.
    pub fn back_to_lightmap(
        &self,
        mesh: &PatchMesh,
        ctx: &mut BakeContext<'_>,
    ) -> Result<(), SurfaceError> {
        if mesh.width != self.lightmap.size_s
            || mesh.height != self.lightmap.size_t
            || !mesh.is_complete()
        {
            return Err(SurfaceError::MeshMismatch {
                width: mesh.width,
                height: mesh.height,
                expected_width: self.lightmap.size_s,
                expected_height: self.lightmap.size_t,
            });
        }

        // Faces cannot receive light from behind, so no incidence clamp.
        let encoder = TangentSpaceEncoder::unclamped();
        let frame = self.tangent_frame();

        for t in 0..mesh.height {
            for s in 0..mesh.width {
                let patch = &mesh.patches[t * mesh.width + s];
                let direction = encoder.encode(patch.energy_from_dir, patch.normal, &frame);
                ctx.atlas.write_texel(
                    &self.lightmap,
                    s,
                    t,
                    encode_color(patch.total_energy),
                    direction.rgba,
                )?;
            }
        }
        Ok(())
    }

    /// Triangle fan over the face's draw indices into `shared_vertices`.
    pub fn render_mesh(
        &self,
        shared_vertices: &[Point3],
        patch_size: f64,
    ) -> Result<RenderMesh, SurfaceError> {
        let points = self
            .draw_indices
            .iter()
            .map(|&index| {
                shared_vertices
                    .get(index as usize)
                    .copied()
                    .ok_or(SurfaceError::DrawIndexOutOfRange {
                        index,
                        vertex_count: shared_vertices.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut mesh = RenderMesh::new(Primitive::TriangleFan);
        let Some(span) = SpanExtents::of(&self.polygon.plane, &points) else {
            return Ok(mesh);
        };

        // Texture coordinates are shifted by whole texture repeats only.
        let shift = points.iter().fold([f64::INFINITY; 2], |acc, &p| {
            let st = self.tex_info.st(p);
            [acc[0].min(st[0]), acc[1].min(st[1])]
        });
        let shift = [shift[0].floor(), shift[1].floor()];

        let frame = self.tangent_frame();
        let info = self.lightmap;
        let tile_s = ATLAS_TILE_S as f64;
        let tile_t = ATLAS_TILE_T as f64;

        mesh.vertices = points
            .iter()
            .map(|&p| {
                let st = self.tex_info.st(p);
                let pu = p.to_vec3().dot(span.u);
                let pv = p.to_vec3().dot(span.v);
                RenderVertex {
                    origin: p,
                    tex_coord: [st[0] - shift[0], st[1] - shift[1]],
                    lightmap_coord: [
                        ((pu - span.min_u) / patch_size + 1.0 + info.pos_s as f64) / tile_s,
                        ((pv - span.min_v) / patch_size + 1.0 + info.pos_t as f64) / tile_t,
                    ],
                    normal: frame.normal,
                    tangent: frame.tangent,
                    bitangent: frame.bitangent,
                }
            })
            .collect();
        Ok(mesh)
    }

    /// Baked color of the texel under `ground`.
    ///
    /// `ground` must lie at most `lookup_plane_distance` in front of the face and at most
    /// `lookup_edge_slack` outside any of its edges.
    #[must_use]
    pub fn lightmap_color_near_position(
        &self,
        ground: Point3,
        config: &BakeConfig,
        materials: &MaterialRegistry,
        atlas: &dyn LightmapAtlas,
    ) -> Option<[u8; 3]> {
        if self.lightmap.is_empty() {
            return None;
        }
        if !materials.get(self.material)?.uses_generated_lightmap {
            return None;
        }
        if self.polygon.plane.distance(ground) > config.lookup_plane_distance {
            return None;
        }

        let edges = self.polygon.edge_planes(Tolerance::EXACT).ok()?;
        if edges
            .iter()
            .any(|edge| edge.distance(ground) < -config.lookup_edge_slack)
        {
            return None;
        }

        let span = SpanExtents::of(&self.polygon.plane, &self.polygon.vertices)?;
        let texel = |coord: f64, min: f64| {
            let x = (coord - min) / config.patch_size + 1.0 + 0.5;
            (x >= 0.0).then(|| x as usize)
        };
        let s = texel(ground.to_vec3().dot(span.u), span.min_u)?;
        let t = texel(ground.to_vec3().dot(span.v), span.min_v)?;

        atlas.read_color(&self.lightmap, s, t).ok()
    }
}

/// Direct-light sample points of a covered footprint.
///
/// Per edge `(v1, v2)`: `v1` pulled `inset` towards the patch center, the midpoint of the two
/// pulled endpoints, and the midpoint between `v1` and the center; finally the center itself.
/// Every point is lifted by `safety`.
fn sample_points(region: &Polygon3, center: Point3, safety: Vec3, inset: f64) -> Vec<Point3> {
    let n = region.len();
    let mut samples = Vec::with_capacity(3 * n + 1);

    for i in 0..n {
        let v1 = region.vertices[i];
        let v2 = region.vertices[(i + 1) % n];
        let pull1 = (center - (v1 + safety)).normalized_or_zero() * inset;
        let pull2 = (center - (v2 + safety)).normalized_or_zero() * inset;

        samples.push(v1 + pull1 + safety);
        samples.push((v1 + pull1).midpoint(v2 + pull2) + safety);
        samples.push((v1 + safety).midpoint(center));
    }

    samples.push(center);
    samples
}
