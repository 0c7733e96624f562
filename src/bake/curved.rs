//! Lightmaps of bi-quadratic Bezier patches.
//!
//! A curved surface keeps only its control grid. Three tessellations are derived from it on
//! demand:
//!
//! - the render mesh (explicit subdivision counts, or `max_error` auto subdivision),
//! - the lightmap mesh, additionally refined until no edge is longer than a multiple of the
//!   patch size; one lightmap texel per vertex, no border,
//! - the collision mesh, used to snap patch positions back onto the exact surface.
//!
//! The lightmap mesh is regenerated wherever it is needed. Subdivision is deterministic, so
//! every regeneration yields the grid the lightmap was sized for.

use crate::geom::{BBox, BezierError, BezierPatch, Point3, Subdivision, Vec3};

use super::atlas::{ATLAS_TILE_S, ATLAS_TILE_T, LightMapInfo};
use super::collision::{CollisionProxy, StaticMeshProxy};
use super::config::BakeConfig;
use super::material::{ClipFlags, MaterialId};
use super::metrics::TimingBucket;
use super::node::{BakeContext, LightmapError, NodeId, SurfaceError};
use super::patch::{Patch, PatchGrid, PatchMesh};
use super::render::{Primitive, RenderMesh, RenderVertex};
use super::tangent::{TangentFrame, TangentSpaceEncoder, encode_color};

#[derive(Debug, Clone, PartialEq)]
pub struct CurvedSurface {
    size_x: usize,
    size_y: usize,
    control_xyz: Vec<Point3>,
    control_uv: Vec<Vec3>,
    /// Explicit subdivisions per sub-patch; auto subdivision unless both are positive.
    subdivs_horz: i32,
    subdivs_vert: i32,
    max_error: f64,
    material: MaterialId,
    lightmap: LightMapInfo,
    bbox: BBox,
}

impl CurvedSurface {
    /// Surface from a `size_x` x `size_y` control grid (row-major) with texture coordinates.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        size_x: usize,
        size_y: usize,
        control_xyz: Vec<Point3>,
        control_uv: Vec<Vec3>,
        subdivs_horz: i32,
        subdivs_vert: i32,
        material: MaterialId,
        max_error: f64,
    ) -> Result<Self, SurfaceError> {
        BezierPatch::from_control_points(size_x, size_y, &control_xyz, &control_uv)?;
        let bbox = BBox::from_points(&control_xyz).ok_or(BezierError::InvalidSize {
            width: size_x,
            height: size_y,
        })?;

        Ok(Self {
            size_x,
            size_y,
            control_xyz,
            control_uv,
            subdivs_horz,
            subdivs_vert,
            max_error,
            material,
            lightmap: LightMapInfo::default(),
            bbox,
        })
    }

    /// Surface from interleaved `x, y, z, u, v` control point components.
    pub fn from_interleaved(
        size_x: usize,
        size_y: usize,
        components: &[f64],
        subdivs: (i32, i32),
        material: MaterialId,
        max_error: f64,
    ) -> Result<Self, SurfaceError> {
        let expected = size_x * size_y;
        if components.len() != expected * 5 {
            return Err(BezierError::VertexCountMismatch {
                width: size_x,
                height: size_y,
                expected,
                got: components.len() / 5,
            }
            .into());
        }

        let (xyz, uv): (Vec<Point3>, Vec<Vec3>) = components
            .chunks_exact(5)
            .map(|c| (Point3::new(c[0], c[1], c[2]), Vec3::new(c[3], c[4], 0.0)))
            .unzip();
        Self::new(size_x, size_y, xyz, uv, subdivs.0, subdivs.1, material, max_error)
    }

    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.size_x, self.size_y)
    }

    #[must_use]
    pub fn control_points(&self) -> (&[Point3], &[Vec3]) {
        (&self.control_xyz, &self.control_uv)
    }

    #[must_use]
    pub fn subdivisions(&self) -> (i32, i32) {
        (self.subdivs_horz, self.subdivs_vert)
    }

    #[must_use]
    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    #[must_use]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    #[must_use]
    pub fn lightmap_info(&self) -> LightMapInfo {
        self.lightmap
    }

    pub(crate) fn set_lightmap_info(&mut self, info: LightMapInfo) {
        self.lightmap = info;
    }

    /// Bounding box of the control points, which contains the surface.
    #[must_use]
    pub fn bounding_box(&self) -> BBox {
        self.bbox
    }

    fn control_mesh(&self) -> Result<BezierPatch, BezierError> {
        BezierPatch::from_control_points(
            self.size_x,
            self.size_y,
            &self.control_xyz,
            &self.control_uv,
        )
    }

    fn subdivision(&self, max_error: f64, max_length: f64) -> Subdivision {
        Subdivision::from_counts(self.subdivs_horz, self.subdivs_vert, max_error, max_length)
    }

    /// Tessellation whose vertices are the lightmap texels.
    ///
    /// Starts with edges of at most `curved_max_length_factor` patch sizes and doubles that
    /// bound until the mesh fits into one atlas tile, at most `lightmap_retry_limit` times.
    pub fn generate_lightmap_mesh(
        &self,
        config: &BakeConfig,
        compute_tangent_space: bool,
    ) -> Result<BezierPatch, LightmapError> {
        let mut max_length = config.patch_size * config.curved_max_length_factor;
        let mut last_size = (0, 0);

        for attempt in 1..=config.lightmap_retry_limit {
            let mut mesh = self.control_mesh().map_err(|_| LightmapError::Degenerate)?;
            if compute_tangent_space {
                mesh.compute_tangent_space();
            }
            mesh.subdivide(self.subdivision(self.max_error, -1.0), true);
            if mesh.width == 0 || mesh.height == 0 {
                return Err(LightmapError::Degenerate);
            }

            let mut size = mesh.linear_max_length_size(max_length, ATLAS_TILE_S.max(ATLAS_TILE_T));
            if LightMapInfo::fits_tile(size.0, size.1) {
                mesh.force_linear_max_length(max_length);
                if LightMapInfo::fits_tile(mesh.width, mesh.height) {
                    return Ok(mesh);
                }
                size = (mesh.width, mesh.height);
            }

            log::info!(
                "bezier patch lightmap mesh is {}x{} after attempt {attempt}, doubling max edge length to {}",
                size.0,
                size.1,
                max_length * 2.0
            );
            last_size = size;
            max_length *= 2.0;
        }

        Err(LightmapError::RetriesExhausted {
            attempts: config.lightmap_retry_limit,
            width: last_size.0,
            height: last_size.1,
        })
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

        let mesh = self.generate_lightmap_mesh(ctx.config, false)?;
        self.lightmap = ctx.atlas.allocate_lightmap(mesh.width, mesh.height)?;
        log::debug!(
            "bezier patch lightmap {}x{} at tile {} ({}, {})",
            mesh.width,
            mesh.height,
            self.lightmap.lightmap_nr,
            self.lightmap.pos_s,
            self.lightmap.pos_t
        );
        Ok(self.lightmap)
    }

    /// Collision tessellation of the control grid as a ray-query proxy.
    pub fn collision_proxy(
        &self,
        config: &BakeConfig,
        clip_flags: ClipFlags,
    ) -> Result<StaticMeshProxy, SurfaceError> {
        let mut grid = self.control_mesh()?;
        grid.subdivide(
            self.subdivision(
                config.collision_max_curve_error,
                config.collision_max_curve_length,
            ),
            true,
        );
        Ok(StaticMeshProxy::from_grid(
            &grid,
            clip_flags,
            config.collision_min_node_size,
        )?)
    }

    /// One patch per lightmap-mesh vertex, snapped onto the collision surface.
    ///
    /// The snapping traces from far outside back along the vertex normal and keeps the first
    /// hit. Parts of the surface that curve back by more than 180 degrees within one patch can
    /// shadow that ray; such surfaces have to be split into several patches.
    pub fn create_patch_mesh(
        &self,
        node: NodeId,
        ctx: &mut BakeContext<'_>,
    ) -> Result<Option<PatchGrid>, SurfaceError> {
        let info = self.lightmap;
        if info.is_empty() {
            return Ok(None);
        }

        let config = ctx.config;
        let material = ctx
            .material(self.material)
            .ok_or(SurfaceError::UnknownMaterial(self.material))?;

        let started = ctx.metrics.start();
        let lm_mesh = self.generate_lightmap_mesh(config, true)?;
        if lm_mesh.width != info.size_s || lm_mesh.height != info.size_t {
            ctx.metrics.stop(TimingBucket::PatchGeneration, started);
            ctx.diagnostics.warn(format!(
                "{node:?}: lightmap mesh is {}x{} but the lightmap is {}x{}, no patches created",
                lm_mesh.width, lm_mesh.height, info.size_s, info.size_t
            ));
            return Ok(None);
        }
        if material.two_sided {
            ctx.diagnostics.warn(format!(
                "{node:?}: two-sided material `{}` on a bezier patch only gets a one-sided patch mesh",
                material.name
            ));
        }

        let wraps_horz = lm_mesh.wraps_horz() && info.size_s > 1;
        let wraps_vert = lm_mesh.wraps_vert() && info.size_t > 1;
        let width = if wraps_horz { info.size_s - 1 } else { info.size_s };
        let height = if wraps_vert { info.size_t - 1 } else { info.size_t };
        ctx.metrics.stop(TimingBucket::PatchGeneration, started);

        let proxy = if material.clip_flags.contains(ClipFlags::RADIANCE) {
            let started = ctx.metrics.start();
            let proxy = match self.collision_proxy(config, material.clip_flags) {
                Ok(proxy) => Some(proxy),
                Err(err) => {
                    ctx.diagnostics.warn(format!(
                        "{node:?}: collision proxy unavailable ({err}), patches stay on the lightmap mesh"
                    ));
                    None
                }
            };
            ctx.metrics.stop(TimingBucket::CollisionProxy, started);
            proxy
        } else {
            None
        };

        let started = ctx.metrics.start();
        let diagonal = self.bbox.diagonal();
        let coords: Vec<Point3> = lm_mesh.mesh.iter().map(|v| v.coord).collect();
        let center = Point3::centroid(&coords).unwrap_or_else(|| self.bbox.center());
        let lift = config.round_epsilon * config.curved_normal_safety_factor;

        let mut mesh = PatchMesh::new(node, self.material, width, height);
        mesh.wraps_horz = wraps_horz;
        mesh.wraps_vert = wraps_vert;
        let mut sample_coords = Vec::with_capacity(width * height);

        for t in 0..height {
            for s in 0..width {
                let vertex = lm_mesh.vertex(s, t);
                let normal = vertex.normal;
                let mut coord = vertex.coord;

                // Border vertices move slightly inwards, off whatever the patch is adjacent to.
                let on_border = (!wraps_horz && (s == 0 || s + 1 == width))
                    || (!wraps_vert && (t == 0 || t + 1 == height));
                if on_border {
                    let to_center = center - coord;
                    let tangential = to_center - normal * normal.dot(to_center);
                    coord = coord + tangential.normalized_or_zero() * config.round_epsilon;
                }

                if let Some(proxy) = &proxy {
                    let outward = normal * diagonal;
                    let outside = coord + outward;
                    let fraction = proxy.trace_ray(outside, -outward, ClipFlags::RADIANCE);
                    coord = outside - outward * fraction + normal * lift;
                }

                let area = lm_mesh.surface_area_at_vertex(s, t);
                mesh.patches.push(Patch {
                    coord,
                    normal,
                    area,
                    inside_face: area > config.curved_min_inside_area,
                    total_energy: Vec3::ZERO,
                    energy_from_dir: normal * config.initial_energy_dir_length,
                });
                sample_coords.push(vec![coord]);
            }
        }
        ctx.metrics.stop(TimingBucket::PatchGeneration, started);

        Ok(Some(PatchGrid {
            mesh,
            sample_coords,
        }))
    }

    /// Writes colors and tangent-space directions of `mesh` into the lightmap.
    ///
    /// Wrapping meshes have one column (row) less than the lightmap; the last texel column
    /// (row) repeats the first. Directions more than `max_incidence_angle_deg` away from the
    /// patch normal are clamped onto that angle first.
    pub fn back_to_lightmap(
        &self,
        mesh: &PatchMesh,
        ctx: &mut BakeContext<'_>,
    ) -> Result<(), SurfaceError> {
        let info = self.lightmap;
        let expected_width = if mesh.wraps_horz {
            info.size_s.saturating_sub(1)
        } else {
            info.size_s
        };
        let expected_height = if mesh.wraps_vert {
            info.size_t.saturating_sub(1)
        } else {
            info.size_t
        };
        let mismatch = |width, height| SurfaceError::MeshMismatch {
            width,
            height,
            expected_width,
            expected_height,
        };
        if mesh.width != expected_width
            || mesh.height != expected_height
            || mesh.width == 0
            || mesh.height == 0
            || !mesh.is_complete()
        {
            return Err(mismatch(mesh.width, mesh.height));
        }

        let config = ctx.config;
        let lm_mesh = self.generate_lightmap_mesh(config, true)?;
        if lm_mesh.width != info.size_s || lm_mesh.height != info.size_t {
            return Err(mismatch(lm_mesh.width, lm_mesh.height));
        }

        let encoder = TangentSpaceEncoder::with_max_incidence(
            config.max_incidence_angle_deg,
            config.incidence_check_tolerance,
        );

        for t in 0..info.size_t {
            for s in 0..info.size_s {
                let (ps, pt) = (s % mesh.width, t % mesh.height);
                let vertex = lm_mesh.vertex(ps, pt);
                let patch = &mesh.patches[pt * mesh.width + ps];

                let frame = TangentFrame::new(vertex.tangent_s, vertex.tangent_t, vertex.normal);
                let direction = encoder.encode(patch.energy_from_dir, patch.normal, &frame);
                if direction.clamped {
                    ctx.diagnostics.clamped_directions += 1;
                }
                if direction.check_failed {
                    ctx.diagnostics.warn(format!(
                        "{:?}: clamped light direction at texel ({s}, {t}) still misses the incidence bound",
                        mesh.node
                    ));
                }

                ctx.atlas.write_texel(
                    &info,
                    s,
                    t,
                    encode_color(patch.total_energy),
                    direction.rgba,
                )?;
            }
        }
        Ok(())
    }

    /// One triangle strip per column of the render tessellation.
    ///
    /// Lightmap coordinates put vertex `(col, row)` on the center of texel
    /// `col / (width - 1) * (size_s - 1)`, matching the one-texel-per-vertex lightmap mesh.
    pub fn render_meshes(&self) -> Result<Vec<RenderMesh>, SurfaceError> {
        let mut surface = self.control_mesh()?;
        surface.compute_tangent_space();
        surface.subdivide(self.subdivision(self.max_error, -1.0), true);
        if surface.width < 2 || surface.height < 2 {
            return Ok(Vec::new());
        }

        let info = self.lightmap;
        let lightmap_coord = |col: usize, row: usize| {
            let s = info.pos_s as f64
                + 0.5
                + col as f64 / (surface.width - 1) as f64 * (info.size_s as f64 - 1.0);
            let t = info.pos_t as f64
                + 0.5
                + row as f64 / (surface.height - 1) as f64 * (info.size_t as f64 - 1.0);
            [s / ATLAS_TILE_S as f64, t / ATLAS_TILE_T as f64]
        };
        let render_vertex = |col: usize, row: usize| {
            let v = surface.vertex(col, row);
            RenderVertex {
                origin: v.coord,
                tex_coord: [v.tex_coord.x, v.tex_coord.y],
                lightmap_coord: lightmap_coord(col, row),
                normal: v.normal,
                tangent: v.tangent_s,
                bitangent: v.tangent_t,
            }
        };

        Ok((0..surface.width - 1)
            .map(|col| {
                let mut strip = RenderMesh::new(Primitive::TriangleStrip);
                strip.vertices = (0..surface.height)
                    .flat_map(|row| [render_vertex(col, row), render_vertex(col + 1, row)])
                    .collect();
                strip
            })
            .collect())
    }
}
