//! Binary scene records of lightmapped surfaces.
//!
//! All values are little-endian. Strings are NUL-terminated UTF-8. A record starts with its
//! tag string:
//!
//! | tag    | body |
//! |--------|------|
//! | `Face` | normal `3 x f64`, dist `f64`, `u32` vertex count, vertices `3 x f64`, material, texture U and V `3 x f32`, offsets U and V `f32`, lightmap block, `u32` index count, `u32` indices |
//! | `BP`   | max error `f32`, size X and Y `u32`, subdivisions horz and vert `i32`, material, per control point XYZ `3 x f32` then UV `3 x f32`, lightmap block |
//!
//! The lightmap block is `u16` SizeS, `u16` SizeT, the color texels as RGB triples and then
//! the direction texels as RGBA quads, both `t`-major.
//!
//! Reading a record always consumes it completely before the material is resolved and the
//! lightmap allocated, so a scene reader can skip a record that fails either step.

use std::io::{self, Read, Write};
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::geom::{Plane3, Point3, Polygon3, Vec3};

use super::atlas::{AtlasError, LightMapInfo, LightmapAtlas};
use super::curved::CurvedSurface;
use super::material::{MaterialId, MaterialRegistry};
use super::node::{NodeTable, SurfaceError, SurfaceNode};
use super::planar::{PlanarSurface, TexInfo};

const FACE_TAG: &str = "Face";
const BEZIER_PATCH_TAG: &str = "BP";

/// Longest string accepted while reading, NUL excluded.
const MAX_STRING_LEN: usize = 4096;

#[derive(Debug, Error)]
pub enum SceneIoError {
    #[error("scene I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown scene record tag `{0}`")]
    UnknownTag(String),
    #[error("material `{0}` not found")]
    MissingMaterial(String),
    #[error("material {0:?} is not registered")]
    UnknownMaterialId(MaterialId),
    #[error("could not allocate lightmap: {0}")]
    Allocation(#[from] AtlasError),
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("string exceeds {MAX_STRING_LEN} bytes")]
    StringTooLong,
    #[error("{what} {value} does not fit the record field")]
    OutOfRange { what: &'static str, value: usize },
    #[error("invalid surface: {0}")]
    Surface(#[from] SurfaceError),
}

impl SceneIoError {
    /// The record was read completely but could not be turned into a node; the stream is
    /// positioned at the next record.
    #[must_use]
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            Self::MissingMaterial(_) | Self::Allocation(_) | Self::Surface(_)
        )
    }
}

struct RecordWriter<'w, W: Write> {
    out: &'w mut W,
}

impl<W: Write> RecordWriter<'_, W> {
    fn bytes(&mut self, bytes: &[u8]) -> Result<(), SceneIoError> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<(), SceneIoError> {
        self.bytes(s.as_bytes())?;
        self.bytes(&[0])
    }

    fn u16(&mut self, what: &'static str, value: usize) -> Result<(), SceneIoError> {
        let value = u16::try_from(value).map_err(|_| SceneIoError::OutOfRange { what, value })?;
        self.bytes(&value.to_le_bytes())
    }

    fn u32(&mut self, what: &'static str, value: usize) -> Result<(), SceneIoError> {
        let value = u32::try_from(value).map_err(|_| SceneIoError::OutOfRange { what, value })?;
        self.bytes(&value.to_le_bytes())
    }

    fn i32(&mut self, value: i32) -> Result<(), SceneIoError> {
        self.bytes(&value.to_le_bytes())
    }

    fn f32(&mut self, value: f64) -> Result<(), SceneIoError> {
        self.bytes(&(value as f32).to_le_bytes())
    }

    fn f64(&mut self, value: f64) -> Result<(), SceneIoError> {
        self.bytes(&value.to_le_bytes())
    }

    fn vec3_f32(&mut self, v: [f64; 3]) -> Result<(), SceneIoError> {
        v.into_iter().try_for_each(|c| self.f32(c))
    }

    fn vec3_f64(&mut self, v: [f64; 3]) -> Result<(), SceneIoError> {
        v.into_iter().try_for_each(|c| self.f64(c))
    }

    fn lightmap(
        &mut self,
        info: &LightMapInfo,
        atlas: &dyn LightmapAtlas,
    ) -> Result<(), SceneIoError> {
        self.u16("lightmap width", info.size_s)?;
        self.u16("lightmap height", info.size_t)?;
        for t in 0..info.size_t {
            for s in 0..info.size_s {
                self.bytes(&atlas.read_color(info, s, t)?)?;
            }
        }
        for t in 0..info.size_t {
            for s in 0..info.size_s {
                self.bytes(&atlas.read_direction(info, s, t)?)?;
            }
        }
        Ok(())
    }
}

struct RecordReader<'r, R: Read> {
    input: &'r mut R,
}

impl<R: Read> RecordReader<'_, R> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N], SceneIoError> {
        let mut buf = [0u8; N];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn string(&mut self) -> Result<String, SceneIoError> {
        let mut bytes = Vec::new();
        loop {
            let [b] = self.array::<1>()?;
            if b == 0 {
                break;
            }
            if bytes.len() == MAX_STRING_LEN {
                return Err(SceneIoError::StringTooLong);
            }
            bytes.push(b);
        }
        Ok(String::from_utf8(bytes)?)
    }

    fn u16(&mut self) -> Result<usize, SceneIoError> {
        Ok(usize::from(u16::from_le_bytes(self.array()?)))
    }

    fn u32(&mut self) -> Result<u32, SceneIoError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, SceneIoError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f64, SceneIoError> {
        Ok(f64::from(f32::from_le_bytes(self.array()?)))
    }

    fn f64(&mut self) -> Result<f64, SceneIoError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn vec3_f32(&mut self) -> Result<[f64; 3], SceneIoError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    fn vec3_f64(&mut self) -> Result<[f64; 3], SceneIoError> {
        Ok([self.f64()?, self.f64()?, self.f64()?])
    }

    fn lightmap(&mut self) -> Result<LightmapBlock, SceneIoError> {
        let size_s = self.u16()?;
        let size_t = self.u16()?;
        let count = size_s * size_t;
        let colors = (0..count)
            .map(|_| self.array::<3>())
            .collect::<Result<Vec<_>, _>>()?;
        let directions = (0..count)
            .map(|_| self.array::<4>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LightmapBlock {
            size_s,
            size_t,
            colors,
            directions,
        })
    }
}

/// Texels of a lightmap read from a record, before allocation.
struct LightmapBlock {
    size_s: usize,
    size_t: usize,
    colors: Vec<[u8; 3]>,
    directions: Vec<[u8; 4]>,
}

impl LightmapBlock {
    fn allocate_into(&self, atlas: &mut dyn LightmapAtlas) -> Result<LightMapInfo, SceneIoError> {
        let region = atlas.allocate(self.size_s, self.size_t)?;
        let info = LightMapInfo {
            size_s: self.size_s,
            size_t: self.size_t,
            lightmap_nr: region.tile,
            pos_s: region.pos_s,
            pos_t: region.pos_t,
        };
        for t in 0..self.size_t {
            for s in 0..self.size_s {
                let i = t * self.size_s + s;
                atlas.write_texel(&info, s, t, self.colors[i], self.directions[i])?;
            }
        }
        Ok(info)
    }
}

fn material_name(materials: &MaterialRegistry, id: MaterialId) -> Result<&str, SceneIoError> {
    materials
        .get(id)
        .map(|m| m.name.as_str())
        .ok_or(SceneIoError::UnknownMaterialId(id))
}

fn resolve_material(materials: &MaterialRegistry, name: String) -> Result<MaterialId, SceneIoError> {
    materials.find(&name).ok_or_else(|| {
        log::warn!("material `{name}` not found");
        SceneIoError::MissingMaterial(name)
    })
}

/// Writes one surface record, lightmap texels taken from `atlas`.
pub fn write_node<W: Write>(
    out: &mut W,
    node: &SurfaceNode,
    materials: &MaterialRegistry,
    atlas: &dyn LightmapAtlas,
) -> Result<(), SceneIoError> {
    let mut w = RecordWriter { out };
    match node {
        SurfaceNode::Planar(face) => {
            let polygon = face.polygon();
            w.string(FACE_TAG)?;
            w.vec3_f64(polygon.plane.normal.to_array())?;
            w.f64(polygon.plane.dist)?;
            w.u32("vertex count", polygon.len())?;
            for v in &polygon.vertices {
                w.vec3_f64(v.to_array())?;
            }
            w.string(material_name(materials, face.material())?)?;

            let tex = face.tex_info();
            w.vec3_f32(tex.u.to_array())?;
            w.vec3_f32(tex.v.to_array())?;
            w.f32(tex.offset_u)?;
            w.f32(tex.offset_v)?;

            w.lightmap(&face.lightmap_info(), atlas)?;

            w.u32("draw index count", face.draw_indices().len())?;
            for &index in face.draw_indices() {
                w.bytes(&index.to_le_bytes())?;
            }
        }
        SurfaceNode::Curved(patch) => {
            let (size_x, size_y) = patch.size();
            let (subdivs_horz, subdivs_vert) = patch.subdivisions();
            w.string(BEZIER_PATCH_TAG)?;
            w.f32(patch.max_error())?;
            w.u32("control grid width", size_x)?;
            w.u32("control grid height", size_y)?;
            w.i32(subdivs_horz)?;
            w.i32(subdivs_vert)?;
            w.string(material_name(materials, patch.material())?)?;

            let (xyz, uv) = patch.control_points();
            for (p, t) in xyz.iter().zip(uv) {
                w.vec3_f32(p.to_array())?;
                w.vec3_f32(t.to_array())?;
            }

            w.lightmap(&patch.lightmap_info(), atlas)?;
        }
    }
    Ok(())
}

/// Reads one surface record and restores its lightmap into `atlas`.
pub fn read_node<R: Read>(
    input: &mut R,
    materials: &MaterialRegistry,
    atlas: &mut dyn LightmapAtlas,
) -> Result<SurfaceNode, SceneIoError> {
    let mut r = RecordReader { input };
    let tag = r.string()?;
    match tag.as_str() {
        FACE_TAG => read_face(&mut r, materials, atlas),
        BEZIER_PATCH_TAG => read_bezier_patch(&mut r, materials, atlas),
        _ => Err(SceneIoError::UnknownTag(tag)),
    }
}

fn read_face<R: Read>(
    r: &mut RecordReader<'_, R>,
    materials: &MaterialRegistry,
    atlas: &mut dyn LightmapAtlas,
) -> Result<SurfaceNode, SceneIoError> {
    let normal = Vec3::from_array(r.vec3_f64()?);
    let dist = r.f64()?;
    let vertex_count = r.u32()?;
    let vertices = (0..vertex_count)
        .map(|_| r.vec3_f64().map(Point3::from_array))
        .collect::<Result<Vec<_>, _>>()?;
    let material = r.string()?;
    let tex_info = TexInfo {
        u: Vec3::from_array(r.vec3_f32()?),
        v: Vec3::from_array(r.vec3_f32()?),
        offset_u: r.f32()?,
        offset_v: r.f32()?,
    };
    let lightmap = r.lightmap()?;
    let index_count = r.u32()?;
    let draw_indices = (0..index_count)
        .map(|_| r.u32())
        .collect::<Result<Vec<_>, _>>()?;

    let material = resolve_material(materials, material)?;
    let polygon = Polygon3::new(Plane3::new(normal, dist), vertices);
    let mut face = PlanarSurface::new(polygon, material, tex_info, draw_indices)?;
    face.set_lightmap_info(lightmap.allocate_into(atlas)?);
    Ok(face.into())
}

fn read_bezier_patch<R: Read>(
    r: &mut RecordReader<'_, R>,
    materials: &MaterialRegistry,
    atlas: &mut dyn LightmapAtlas,
) -> Result<SurfaceNode, SceneIoError> {
    let max_error = r.f32()?;
    let size_x = r.u32()? as usize;
    let size_y = r.u32()? as usize;
    let subdivs_horz = r.i32()?;
    let subdivs_vert = r.i32()?;
    let material = r.string()?;

    let count = size_x.checked_mul(size_y).ok_or(SceneIoError::OutOfRange {
        what: "control point count",
        value: usize::MAX,
    })?;
    let mut xyz = Vec::with_capacity(count.min(1 << 16));
    let mut uv = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        xyz.push(Point3::from_array(r.vec3_f32()?));
        uv.push(Vec3::from_array(r.vec3_f32()?));
    }
    let lightmap = r.lightmap()?;

    let material = resolve_material(materials, material)?;
    let mut patch = CurvedSurface::new(
        size_x,
        size_y,
        xyz,
        uv,
        subdivs_horz,
        subdivs_vert,
        material,
        max_error,
    )?;
    patch.set_lightmap_info(lightmap.allocate_into(atlas)?);
    Ok(patch.into())
}

/// Writes a `u32` node count followed by every node record.
pub fn write_scene<W: Write>(
    out: &mut W,
    nodes: &NodeTable,
    materials: &MaterialRegistry,
    atlas: &dyn LightmapAtlas,
) -> Result<(), SceneIoError> {
    RecordWriter { out: &mut *out }.u32("node count", nodes.len())?;
    for (_, node) in nodes.iter() {
        write_node(out, node, materials, atlas)?;
    }
    Ok(())
}

/// Reads a scene written by [`write_scene`].
///
/// Records whose material is unknown or whose lightmap cannot be allocated are skipped with a
/// warning; the returned list holds one message per skipped record. Stream errors abort.
pub fn read_scene<R: Read>(
    input: &mut R,
    materials: &MaterialRegistry,
    atlas: &mut dyn LightmapAtlas,
) -> Result<(NodeTable, Vec<String>), SceneIoError> {
    let count = RecordReader { input: &mut *input }.u32()?;
    let mut nodes = NodeTable::new();
    let mut skipped = Vec::new();

    for nr in 0..count {
        match read_node(input, materials, atlas) {
            Ok(node) => {
                nodes.push(node);
            }
            Err(err) if err.is_record_local() => {
                let message = format!("scene record {nr} skipped: {err}");
                log::warn!("{message}");
                skipped.push(message);
            }
            Err(err) => return Err(err),
        }
    }

    log::debug!("read {} of {count} scene records", nodes.len());
    Ok((nodes, skipped))
}
