use crate::bake::{
    ATLAS_TILE_S, BakeConfig, BakeContext, LightmapAtlas, LightmapError, Material,
    MaterialRegistry, NEUTRAL_COLOR, NEUTRAL_DIRECTION, NodeId, PlanarSurface, Primitive,
    TexInfo, TiledLightmapAtlas, orientation_factor,
};
use crate::geom::{Point3, Polygon3, Vec3};

/// Square of side `size` in the z = 0 plane facing +z, lower left corner at the origin.
fn square(size: f64) -> Polygon3 {
    Polygon3::from_vertices(vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.0, size, 0.0),
        Point3::new(size, size, 0.0),
        Point3::new(size, 0.0, 0.0),
    ])
    .expect("square")
}

fn tex_info() -> TexInfo {
    TexInfo {
        u: Vec3::X,
        v: Vec3::Y,
        offset_u: 0.0,
        offset_v: 0.0,
    }
}

fn lightmapped_face(materials: &mut MaterialRegistry, size: f64) -> PlanarSurface {
    let material = materials.insert(Material::lightmapped("walls/concrete"));
    PlanarSurface::new(square(size), material, tex_info(), vec![0, 1, 2, 3]).expect("face")
}

#[test]
fn square_face_gets_six_by_six_lightmap() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    let info = face.init_default_lightmaps(&mut ctx).expect("lightmap");
    assert_eq!((info.size_s, info.size_t), (6, 6));
    assert_eq!(face.lightmap_info(), info);

    for t in 0..6 {
        for s in 0..6 {
            assert_eq!(atlas.read_color(&info, s, t), Ok(NEUTRAL_COLOR));
            assert_eq!(atlas.read_direction(&info, s, t), Ok(NEUTRAL_DIRECTION));
        }
    }
}

#[test]
fn square_face_patches_cover_the_interior() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    face.init_default_lightmaps(&mut ctx).expect("lightmap");

    let grid = face
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped face");
    let mesh = &grid.mesh;

    assert_eq!((mesh.width, mesh.height), (6, 6));
    assert_eq!(mesh.patches.len(), mesh.width * mesh.height);
    assert_eq!(grid.sample_coords.len(), mesh.patches.len());
    assert_eq!(mesh.inside_count(), 16);
    assert_eq!(ctx.diagnostics.clip_fallbacks, 0);

    for t in 0..6 {
        for s in 0..6 {
            let patch = mesh.patch(s, t).expect("patch");
            let border = s == 0 || t == 0 || s == 5 || t == 5;
            assert_eq!(patch.inside_face, !border, "patch ({s}, {t})");
            assert!((patch.energy_from_dir - Vec3::Z * 0.02).length() < 1e-12);

            let samples = &grid.sample_coords[t * 6 + s];
            if border {
                assert!(samples.is_empty());
                continue;
            }

            assert!((patch.area - 4096.0).abs() < 1.0, "area {}", patch.area);
            let expected = Point3::new((s as f64 - 0.5) * 64.0, (t as f64 - 0.5) * 64.0, 0.1);
            assert!(patch.coord.distance_to(expected) < 1e-9, "coord {:?}", patch.coord);
            // Three points per edge plus the center.
            assert_eq!(samples.len(), 13);
            assert_eq!(samples.last(), Some(&patch.coord));
        }
    }
}

#[test]
fn partially_covered_patches_are_clipped() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 100.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = face.init_default_lightmaps(&mut ctx).expect("lightmap");
    assert_eq!((info.size_s, info.size_t), (4, 4));

    let grid = face
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped face");

    // Texel (2, 1) covers u in [64, 128] but the face ends at 100.
    let clipped = grid.mesh.patch(2, 1).expect("patch");
    assert!(clipped.inside_face);
    assert!((clipped.area - 36.0 * 64.0).abs() < 1e-6, "area {}", clipped.area);
    assert!((clipped.coord.x - 82.0).abs() < 1e-9);

    let total: f64 = grid
        .mesh
        .patches
        .iter()
        .filter(|p| p.inside_face)
        .map(|p| p.area)
        .sum();
    assert!((total - 10_000.0).abs() < 1e-6, "total {total}");
    assert_eq!(ctx.diagnostics.clip_fallbacks, 0);
}

#[test]
fn material_without_lightmap_is_not_requested() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material {
        uses_generated_lightmap: false,
        ..Material::lightmapped("sky")
    });
    let mut face =
        PlanarSurface::new(square(256.0), material, tex_info(), Vec::new()).expect("face");
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    let err = face.init_default_lightmaps(&mut ctx).expect_err("no lightmap");
    assert!(err.is_not_requested());
    assert!(face.lightmap_info().is_empty());
    assert!(
        face.create_patch_mesh(NodeId::new(0), &mut ctx)
            .expect("no error")
            .is_none()
    );
    assert_eq!(atlas.tile_count(), 0);
}

#[test]
fn oversized_face_exceeds_tile() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 64.0 * 255.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    let err = face.init_default_lightmaps(&mut ctx).expect_err("too large");
    assert_eq!(
        err,
        LightmapError::ExceedsTile {
            size_s: 257,
            size_t: 257
        }
    );
    assert!(face.lightmap_info().is_empty());
}

#[test]
fn vanishing_patch_size_exceeds_tile_instead_of_overflowing() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(1e-20);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    let err = face.init_default_lightmaps(&mut ctx).expect_err("too large");
    assert_eq!(
        err,
        LightmapError::ExceedsTile {
            size_s: usize::MAX,
            size_t: usize::MAX
        }
    );
    assert!(face.lightmap_info().is_empty());
    assert_eq!(atlas.tile_count(), 0);
}

#[test]
fn too_few_vertices_are_rejected() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("m"));
    let polygon = Polygon3::new(square(10.0).plane, vec![Point3::ORIGIN, Point3::new(1.0, 0.0, 0.0)]);
    assert!(PlanarSurface::new(polygon, material, tex_info(), Vec::new()).is_err());
}

#[test]
fn back_to_lightmap_encodes_colors_and_directions() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = face.init_default_lightmaps(&mut ctx).expect("lightmap");

    let mut grid = face
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped face");
    let incoming = Vec3::new(1.0, 0.0, 1.0);
    for patch in &mut grid.mesh.patches {
        patch.total_energy = Vec3::new(200.0, 100.0, 300.0);
        patch.energy_from_dir = incoming;
    }
    face.back_to_lightmap(&grid.mesh, &mut ctx).expect("writeback");

    let expected_alpha = orientation_factor(incoming.normalized_or_zero(), Vec3::Z);
    for t in 0..info.size_t {
        for s in 0..info.size_s {
            assert_eq!(atlas.read_color(&info, s, t), Ok([200, 100, 255]));
            let rgba = atlas.read_direction(&info, s, t).expect("direction");
            assert!(rgba[3] >= 1);
            assert_eq!(rgba[3], expected_alpha);
            // Tangent-space x and z are equal, y is zero.
            assert_eq!(rgba[0], rgba[2]);
            assert!(rgba[1].abs_diff(128) <= 1);
        }
    }
}

#[test]
fn back_to_lightmap_rejects_mismatched_mesh() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    face.init_default_lightmaps(&mut ctx).expect("lightmap");

    let mut grid = face
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped face");
    grid.mesh.patches.pop();
    assert!(face.back_to_lightmap(&grid.mesh, &mut ctx).is_err());
}

#[test]
fn render_mesh_maps_vertices_into_the_atlas_region() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = face.init_default_lightmaps(&mut ctx).expect("lightmap");

    let shared = face.polygon().vertices.clone();
    let mesh = face.render_mesh(&shared, 64.0).expect("render mesh");
    assert_eq!(mesh.primitive, Primitive::TriangleFan);
    assert_eq!(mesh.vertices.len(), 4);
    assert_eq!(mesh.triangle_count(), 2);

    let tile = ATLAS_TILE_S as f64;
    let origin = &mesh.vertices[0];
    assert!((origin.lightmap_coord[0] - (1.0 + info.pos_s as f64) / tile).abs() < 1e-12);
    assert!((origin.lightmap_coord[1] - (1.0 + info.pos_t as f64) / tile).abs() < 1e-12);

    let far = &mesh.vertices[2];
    assert!((far.lightmap_coord[0] - (5.0 + info.pos_s as f64) / tile).abs() < 1e-12);
    assert_eq!(far.tex_coord, [256.0, 256.0]);
    assert!((far.normal - Vec3::Z).length() < 1e-12);
    assert!((far.tangent - Vec3::X).length() < 1e-12);
    assert!((far.bitangent - Vec3::Y).length() < 1e-12);

    assert!(face.render_mesh(&shared[..2], 64.0).is_err());
}

#[test]
fn lightmap_color_lookup_finds_texel_under_point() {
    let mut materials = MaterialRegistry::new();
    let mut face = lightmapped_face(&mut materials, 256.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = face.init_default_lightmaps(&mut ctx).expect("lightmap");
    drop(ctx);

    atlas
        .write_texel(&info, 2, 1, [10, 20, 30], NEUTRAL_DIRECTION)
        .expect("write");

    let lookup = |p: Point3| face.lightmap_color_near_position(p, &config, &materials, &atlas);
    assert_eq!(lookup(Point3::new(70.0, 10.0, 0.2)), Some([10, 20, 30]));
    assert_eq!(lookup(Point3::new(10.0, 10.0, 0.0)), Some(NEUTRAL_COLOR));
    // Too far in front of the face.
    assert_eq!(lookup(Point3::new(70.0, 10.0, 1.0)), None);
    // Outside an edge by more than the slack.
    assert_eq!(lookup(Point3::new(-1.0, 10.0, 0.0)), None);
}
