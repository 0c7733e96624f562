use std::io::Cursor;

use crate::bake::{
    BakeConfig, BakeContext, CurvedSurface, LightMapInfo, LightmapAtlas, Material,
    MaterialRegistry, NodeId, NodeTable, PlanarSurface, SceneIoError, SurfaceNode, TexInfo,
    TiledLightmapAtlas, read_node, read_scene, write_node, write_scene,
};
use crate::geom::{Point3, Polygon3, Vec3};

fn materials() -> MaterialRegistry {
    let mut materials = MaterialRegistry::new();
    materials.insert(Material::lightmapped("walls/concrete"));
    materials.insert(Material::lightmapped("pipes/steel"));
    materials
}

fn face(materials: &MaterialRegistry) -> PlanarSurface {
    let polygon = Polygon3::from_vertices(vec![
        Point3::new(0.0, 0.0, 16.0),
        Point3::new(0.0, 96.0, 16.0),
        Point3::new(128.0, 96.0, 16.0),
        Point3::new(128.0, 0.0, 16.0),
    ])
    .expect("polygon");
    let tex_info = TexInfo {
        u: Vec3::new(0.5, 0.0, 0.0),
        v: Vec3::new(0.0, 0.5, 0.0),
        offset_u: 0.25,
        offset_v: -1.5,
    };
    let material = materials.find("walls/concrete").expect("material");
    PlanarSurface::new(polygon, material, tex_info, vec![4, 7, 9, 12]).expect("face")
}

fn bezier_patch(materials: &MaterialRegistry) -> CurvedSurface {
    let mut xyz = Vec::new();
    let mut uv = Vec::new();
    for row in 0..3 {
        for col in 0..3 {
            let bulge = if col == 1 && row == 1 { 32.0 } else { 0.0 };
            xyz.push(Point3::new(f64::from(col) * 64.0, f64::from(row) * 64.0, bulge));
            uv.push(Vec3::new(f64::from(col) * 0.5, f64::from(row) * 0.5, 0.0));
        }
    }
    let material = materials.find("pipes/steel").expect("material");
    CurvedSurface::new(3, 3, xyz, uv, 4, 2, material, 2.5).expect("patch")
}

/// Lightmapped scene with a recognizable pattern in every texel.
fn baked_scene(materials: &MaterialRegistry, atlas: &mut TiledLightmapAtlas) -> NodeTable {
    let config = BakeConfig::with_patch_size(32.0);
    let mut nodes = NodeTable::new();
    nodes.push(face(materials));
    nodes.push(bezier_patch(materials));

    let mut ctx = BakeContext::new(&mut *atlas, materials, &config);
    for (_, node) in nodes.iter_mut() {
        node.init_default_lightmaps(&mut ctx).expect("lightmap");
    }
    drop(ctx);

    for (id, node) in nodes.iter() {
        let info = node.lightmap_info();
        for t in 0..info.size_t {
            for s in 0..info.size_s {
                let rgb = [id.index() as u8, s as u8, t as u8];
                let rgba = [s as u8, t as u8, 200, 1 + id.index() as u8];
                atlas.write_texel(&info, s, t, rgb, rgba).expect("texel");
            }
        }
    }
    nodes
}

fn texels(atlas: &dyn LightmapAtlas, info: &LightMapInfo) -> Vec<([u8; 3], [u8; 4])> {
    let mut out = Vec::new();
    for t in 0..info.size_t {
        for s in 0..info.size_s {
            out.push((
                atlas.read_color(info, s, t).expect("color"),
                atlas.read_direction(info, s, t).expect("direction"),
            ));
        }
    }
    out
}

#[test]
fn face_record_round_trips() {
    let materials = materials();
    let mut atlas = TiledLightmapAtlas::new();
    let nodes = baked_scene(&materials, &mut atlas);
    let original = nodes.get(NodeId::new(0)).expect("face");

    let mut bytes = Vec::new();
    write_node(&mut bytes, original, &materials, &atlas).expect("write");
    assert!(bytes.starts_with(b"Face\0"));

    let mut restored_atlas = TiledLightmapAtlas::new();
    let restored = read_node(&mut Cursor::new(&bytes), &materials, &mut restored_atlas)
        .expect("read");

    let (SurfaceNode::Planar(a), SurfaceNode::Planar(b)) = (original, &restored) else {
        panic!("expected two faces");
    };
    assert_eq!(a.polygon(), b.polygon());
    assert_eq!(a.draw_indices(), b.draw_indices());
    assert_eq!(a.tex_info(), b.tex_info());
    assert_eq!(a.material(), b.material());

    let info = b.lightmap_info();
    assert_eq!((info.size_s, info.size_t), (6, 5));
    assert_eq!(
        texels(&restored_atlas, &info),
        texels(&atlas, &a.lightmap_info())
    );
}

#[test]
fn bezier_patch_record_round_trips() {
    let materials = materials();
    let mut atlas = TiledLightmapAtlas::new();
    let nodes = baked_scene(&materials, &mut atlas);
    let original = nodes.get(NodeId::new(1)).expect("patch");

    let mut bytes = Vec::new();
    write_node(&mut bytes, original, &materials, &atlas).expect("write");
    assert!(bytes.starts_with(b"BP\0"));

    let mut restored_atlas = TiledLightmapAtlas::new();
    let restored = read_node(&mut Cursor::new(&bytes), &materials, &mut restored_atlas)
        .expect("read");

    let (SurfaceNode::Curved(a), SurfaceNode::Curved(b)) = (original, &restored) else {
        panic!("expected two bezier patches");
    };
    assert_eq!(a.size(), b.size());
    assert_eq!(a.subdivisions(), b.subdivisions());
    assert_eq!(a.control_points(), b.control_points());
    assert_eq!(a.max_error(), b.max_error());
    assert_eq!(
        texels(&restored_atlas, &b.lightmap_info()),
        texels(&atlas, &a.lightmap_info())
    );
}

#[test]
fn face_record_layout() {
    let materials = materials();
    let mut atlas = TiledLightmapAtlas::new();
    let mut face = face(&materials);
    let config = BakeConfig::with_patch_size(32.0);
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    face.init_default_lightmaps(&mut ctx).expect("lightmap");
    drop(ctx);

    let mut bytes = Vec::new();
    write_node(&mut bytes, &SurfaceNode::Planar(face), &materials, &atlas).expect("write");

    let header = 5 + 8 * 4 + 4 + 4 * 24;
    let material = b"walls/concrete\0".len();
    let tex = 4 * 8;
    let lightmap = 4 + 6 * 5 * (3 + 4);
    let indices = 4 + 4 * 4;
    assert_eq!(bytes.len(), header + material + tex + lightmap + indices);

    // Normal (0, 0, 1) and distance 16 as f64.
    assert_eq!(&bytes[5 + 16..5 + 24], &1.0f64.to_le_bytes());
    assert_eq!(&bytes[5 + 24..5 + 32], &16.0f64.to_le_bytes());
    assert_eq!(&bytes[5 + 32..5 + 36], &4u32.to_le_bytes());

    let block = header + material + tex;
    assert_eq!(&bytes[block..block + 4], &[6, 0, 5, 0]);
    assert_eq!(&bytes[block + 4..block + 7], &[0xFF, 0xFF, 0xFF]);
    let directions = block + 4 + 6 * 5 * 3;
    assert_eq!(&bytes[directions..directions + 4], &[0x80, 0x80, 0xFF, 0xFF]);
}

#[test]
fn missing_material_fails_only_that_record() {
    let materials = materials();
    let mut atlas = TiledLightmapAtlas::new();
    let nodes = baked_scene(&materials, &mut atlas);

    let mut bytes = Vec::new();
    write_scene(&mut bytes, &nodes, &materials, &atlas).expect("write");

    let mut partial = MaterialRegistry::new();
    partial.insert(Material::lightmapped("pipes/steel"));
    let mut restored_atlas = TiledLightmapAtlas::new();
    let (restored, skipped) =
        read_scene(&mut Cursor::new(&bytes), &partial, &mut restored_atlas).expect("read");

    assert_eq!(restored.len(), 1);
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0].contains("walls/concrete"));
    assert!(matches!(restored.get(NodeId::new(0)), Some(SurfaceNode::Curved(_))));

    let err = read_node(&mut Cursor::new(&bytes[4..]), &partial, &mut restored_atlas)
        .expect_err("unknown material");
    assert!(matches!(err, SceneIoError::MissingMaterial(ref name) if name == "walls/concrete"));
    assert!(err.is_record_local());
}

#[test]
fn allocation_failure_fails_only_that_record() {
    let materials = materials();
    let mut atlas = TiledLightmapAtlas::new();
    let nodes = baked_scene(&materials, &mut atlas);

    let mut bytes = Vec::new();
    write_scene(&mut bytes, &nodes, &materials, &atlas).expect("write");

    // One tile, already almost full.
    let mut tight = TiledLightmapAtlas::with_tile_limit(1);
    tight.allocate(256, 253).expect("filler");
    let (restored, skipped) =
        read_scene(&mut Cursor::new(&bytes), &materials, &mut tight).expect("read");

    // The 6x5 face no longer fits.
    assert_eq!(restored.len() + skipped.len(), 2);
    assert!(!skipped.is_empty());
}

#[test]
fn unknown_tags_and_truncated_records_are_errors() {
    let materials = materials();
    let mut atlas = TiledLightmapAtlas::new();

    let err = read_node(&mut Cursor::new(b"Terrain\0"), &materials, &mut atlas)
        .expect_err("unknown tag");
    assert!(matches!(err, SceneIoError::UnknownTag(ref tag) if tag == "Terrain"));
    assert!(!err.is_record_local());

    let err = read_node(&mut Cursor::new(b"Face\0\x01\x02"), &materials, &mut atlas)
        .expect_err("truncated");
    assert!(matches!(err, SceneIoError::Io(_)));

    let err = read_node(&mut Cursor::new(b"\xFF\xFE\0"), &materials, &mut atlas)
        .expect_err("invalid utf-8");
    assert!(matches!(err, SceneIoError::InvalidUtf8(_)));
}
