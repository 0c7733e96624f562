use crate::bake::{
    ATLAS_TILE_S, BakeConfig, BakeContext, ClipFlags, CurvedSurface, LightMapInfo, LightmapAtlas,
    LightmapError, Material, MaterialId, MaterialRegistry, NodeId, Primitive, TiledLightmapAtlas,
};
use crate::geom::{Point3, Vec3};

/// Flat 3x3 control grid in the z = 0 plane, 2 * `spacing` on a side. It faces -z.
fn flat_patch(material: MaterialId, spacing: f64, subdivs: (i32, i32)) -> CurvedSurface {
    let mut xyz = Vec::new();
    let mut uv = Vec::new();
    for row in 0..3 {
        for col in 0..3 {
            xyz.push(Point3::new(col as f64 * spacing, row as f64 * spacing, 0.0));
            uv.push(Vec3::new(col as f64 * 0.5, row as f64 * 0.5, 0.0));
        }
    }
    CurvedSurface::new(3, 3, xyz, uv, subdivs.0, subdivs.1, material, 1.0).expect("patch")
}

/// Closed cylinder of radius `r` around the z axis, four quarter circles around.
fn cylinder(material: MaterialId, r: f64, height: f64) -> CurvedSurface {
    let ring = [
        (r, 0.0),
        (r, r),
        (0.0, r),
        (-r, r),
        (-r, 0.0),
        (-r, -r),
        (0.0, -r),
        (r, -r),
        (r, 0.0),
    ];
    let mut xyz = Vec::new();
    let mut uv = Vec::new();
    for row in 0..3 {
        for (col, &(x, y)) in ring.iter().enumerate() {
            xyz.push(Point3::new(x, y, row as f64 * height * 0.5));
            uv.push(Vec3::new(col as f64 / 8.0, row as f64 * 0.5, 0.0));
        }
    }
    CurvedSurface::new(9, 3, xyz, uv, -1, -1, material, 5.0).expect("cylinder")
}

#[test]
fn invalid_control_grids_are_rejected() {
    let material = MaterialRegistry::new().insert(Material::lightmapped("m"));
    let xyz = vec![Point3::ORIGIN; 8];
    let uv = vec![Vec3::ZERO; 8];
    assert!(CurvedSurface::new(4, 2, xyz.clone(), uv.clone(), -1, -1, material, 1.0).is_err());
    assert!(CurvedSurface::new(3, 3, xyz, uv, -1, -1, material, 1.0).is_err());
}

#[test]
fn interleaved_components_carry_xyz_and_uv() {
    let material = MaterialRegistry::new().insert(Material::lightmapped("m"));
    let components: Vec<f64> = (0..9)
        .flat_map(|i| {
            let (col, row) = ((i % 3) as f64, (i / 3) as f64);
            [col * 10.0, row * 10.0, 5.0, col * 0.5, row * 0.5]
        })
        .collect();

    let patch = CurvedSurface::from_interleaved(3, 3, &components, (-1, -1), material, 1.0)
        .expect("patch");
    let (xyz, uv) = patch.control_points();
    assert_eq!(xyz[4], Point3::new(10.0, 10.0, 5.0));
    assert_eq!(uv[8], Vec3::new(1.0, 1.0, 0.0));
    assert_eq!(patch.bounding_box().max, Point3::new(20.0, 20.0, 5.0));

    assert!(
        CurvedSurface::from_interleaved(3, 3, &components[..44], (-1, -1), material, 1.0)
            .is_err()
    );
}

#[test]
fn flat_patch_lightmap_has_one_texel_per_vertex() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("terrain/rock"));
    let mut patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    // 100 units with edges of at most 40: four segments per side.
    let mesh = patch.generate_lightmap_mesh(&config, false).expect("mesh");
    assert_eq!((mesh.width, mesh.height), (5, 5));

    let info = patch.init_default_lightmaps(&mut ctx).expect("lightmap");
    assert_eq!((info.size_s, info.size_t), (5, 5));
}

#[test]
fn lightmap_sizing_doubles_edge_length_until_it_fits() {
    let material = MaterialRegistry::new().insert(Material::lightmapped("m"));
    let patch = flat_patch(material, 5000.0, (-1, -1));

    // Edge limits 20 and 40 need 513 and 257 vertices per side, 80 needs 129.
    let config = BakeConfig {
        lightmap_retry_limit: 2,
        ..BakeConfig::with_patch_size(10.0)
    };
    assert_eq!(
        patch.generate_lightmap_mesh(&config, false),
        Err(LightmapError::RetriesExhausted {
            attempts: 2,
            width: 257,
            height: 257
        })
    );

    let mesh = patch
        .generate_lightmap_mesh(&BakeConfig::with_patch_size(10.0), false)
        .expect("fits after the third attempt");
    assert_eq!((mesh.width, mesh.height), (129, 129));
    assert!(LightMapInfo::fits_tile(mesh.width, mesh.height));
}

#[test]
fn vanishing_patch_size_gives_up_without_building_huge_meshes() {
    let material = MaterialRegistry::new().insert(Material::lightmapped("m"));
    let patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(1e-20);

    let err = patch.generate_lightmap_mesh(&config, true).expect_err("too large");
    let LightmapError::RetriesExhausted {
        attempts,
        width,
        height,
    } = err
    else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(attempts, config.lightmap_retry_limit);
    assert!(width > ATLAS_TILE_S && height > ATLAS_TILE_S);
}

#[test]
fn exhausted_retries_leave_patch_unlit() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("m"));
    let mut patch = flat_patch(material, 5000.0, (-1, -1));
    let config = BakeConfig {
        lightmap_retry_limit: 1,
        ..BakeConfig::with_patch_size(10.0)
    };
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    let err = patch.init_default_lightmaps(&mut ctx).expect_err("too large");
    assert!(matches!(err, LightmapError::RetriesExhausted { attempts: 1, .. }));
    assert!(patch.lightmap_info().is_empty());
    assert!(
        patch
            .create_patch_mesh(NodeId::new(0), &mut ctx)
            .expect("no error")
            .is_none()
    );
}

#[test]
fn flat_patch_patches_are_snapped_onto_the_surface() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("terrain/rock"));
    let mut patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    patch.init_default_lightmaps(&mut ctx).expect("lightmap");

    let grid = patch
        .create_patch_mesh(NodeId::new(3), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped patch");
    let mesh = &grid.mesh;

    assert_eq!(mesh.node, NodeId::new(3));
    assert_eq!((mesh.width, mesh.height), (5, 5));
    assert!(!mesh.wraps_horz && !mesh.wraps_vert);
    assert_eq!(mesh.patches.len(), 25);
    assert_eq!(mesh.inside_count(), 25);
    assert!(ctx.diagnostics.warnings.is_empty());

    for t in 0..5 {
        for s in 0..5 {
            let p = mesh.patch(s, t).expect("patch");
            assert!((p.normal - (-Vec3::Z)).length() < 1e-9, "normal {:?}", p.normal);
            // Lifted off the surface along the normal.
            assert!((p.coord.z + 0.8).abs() < 1e-6, "coord {:?}", p.coord);
            assert!((p.energy_from_dir - (-Vec3::Z) * 0.02).length() < 1e-12);
            assert_eq!(grid.sample_coords[t * 5 + s], vec![p.coord]);
        }
    }

    let inner = mesh.patch(2, 2).expect("patch");
    assert!((inner.coord.x - 50.0).abs() < 1e-9 && (inner.coord.y - 50.0).abs() < 1e-9);
    assert!((inner.area - 625.0).abs() < 1e-6);

    // Border patches are pulled towards the center.
    let edge = mesh.patch(0, 2).expect("patch");
    assert!((edge.coord.x - 0.08).abs() < 1e-9, "coord {:?}", edge.coord);
    assert!((edge.area - 312.5).abs() < 1e-6);
}

#[test]
fn two_sided_material_is_reported() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material {
        two_sided: true,
        ..Material::lightmapped("foliage")
    });
    let mut patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    patch.init_default_lightmaps(&mut ctx).expect("lightmap");

    let grid = patch
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh");
    assert!(grid.is_some());
    assert_eq!(ctx.diagnostics.warnings.len(), 1);
    assert!(ctx.diagnostics.warnings[0].contains("two-sided"));
}

#[test]
fn stale_lightmap_size_skips_patch_mesh() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("m"));
    let mut patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);

    patch.set_lightmap_info(LightMapInfo {
        size_s: 4,
        size_t: 5,
        ..LightMapInfo::default()
    });
    let grid = patch
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("no error");
    assert!(grid.is_none());
    assert_eq!(ctx.diagnostics.warnings.len(), 1);
}

#[test]
fn back_to_lightmap_clamps_grazing_directions() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("m"));
    let mut patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = patch.init_default_lightmaps(&mut ctx).expect("lightmap");

    let mut grid = patch
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped patch");
    for p in &mut grid.mesh.patches {
        p.total_energy = Vec3::new(40.0, 50.0, 60.0);
        // Parallel to the surface.
        p.energy_from_dir = Vec3::X;
    }
    patch.back_to_lightmap(&grid.mesh, &mut ctx).expect("writeback");

    assert_eq!(ctx.diagnostics.clamped_directions, 25);
    assert!(ctx.diagnostics.warnings.is_empty());
    drop(ctx);

    let alpha = (80f64.to_radians().cos() * 255.0 + 0.49).floor() as u8;
    for t in 0..info.size_t {
        for s in 0..info.size_s {
            assert_eq!(atlas.read_color(&info, s, t), Ok([40, 50, 60]));
            let rgba = atlas.read_direction(&info, s, t).expect("direction");
            assert_eq!(rgba[3], alpha);
            assert!(rgba[0] > 240, "rgba {rgba:?}");
        }
    }
}

#[test]
fn back_to_lightmap_keeps_directions_along_the_normal() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("m"));
    let mut patch = flat_patch(material, 50.0, (-1, -1));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = patch.init_default_lightmaps(&mut ctx).expect("lightmap");

    let grid = patch
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped patch");
    patch.back_to_lightmap(&grid.mesh, &mut ctx).expect("writeback");
    assert_eq!(ctx.diagnostics.clamped_directions, 0);
    drop(ctx);

    assert_eq!(atlas.read_direction(&info, 2, 2), Ok([127, 127, 255, 255]));
    assert_eq!(atlas.read_color(&info, 2, 2), Ok([0, 0, 0]));
}

#[test]
fn cylinder_wraps_and_repeats_first_column() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material {
        clip_flags: ClipFlags::PLAYERS,
        ..Material::lightmapped("pipes/steel")
    });
    let mut patch = cylinder(material, 100.0, 50.0);
    let config = BakeConfig::with_patch_size(64.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = patch.init_default_lightmaps(&mut ctx).expect("lightmap");

    let mut grid = patch
        .create_patch_mesh(NodeId::new(0), &mut ctx)
        .expect("patch mesh")
        .expect("lightmapped patch");
    let mesh = &mut grid.mesh;
    assert!(mesh.wraps_horz);
    assert!(!mesh.wraps_vert);
    assert_eq!(mesh.width, info.size_s - 1);
    assert_eq!(mesh.height, info.size_t);
    assert_eq!(mesh.patches.len(), mesh.width * mesh.height);
    for p in &mesh.patches {
        assert!((p.normal.length() - 1.0).abs() < 1e-9);
        let radius = (p.coord.x * p.coord.x + p.coord.y * p.coord.y).sqrt();
        assert!((radius - 100.0).abs() < 10.0, "radius {radius}");
    }

    for (i, p) in mesh.patches.iter_mut().enumerate() {
        let first_column = i % mesh.width == 0;
        p.total_energy = if first_column {
            Vec3::new(250.0, 0.0, 0.0)
        } else {
            Vec3::ZERO
        };
    }
    patch.back_to_lightmap(&grid.mesh, &mut ctx).expect("writeback");
    drop(ctx);

    for t in 0..info.size_t {
        assert_eq!(atlas.read_color(&info, 0, t), Ok([250, 0, 0]));
        assert_eq!(atlas.read_color(&info, info.size_s - 1, t), Ok([250, 0, 0]));
        assert_eq!(atlas.read_color(&info, 1, t), Ok([0, 0, 0]));
    }
}

#[test]
fn render_strips_address_the_lightmap_without_border() {
    let mut materials = MaterialRegistry::new();
    let material = materials.insert(Material::lightmapped("m"));
    let mut patch = flat_patch(material, 50.0, (2, 2));
    let config = BakeConfig::with_patch_size(20.0);
    let mut atlas = TiledLightmapAtlas::new();
    let mut ctx = BakeContext::new(&mut atlas, &materials, &config);
    let info = patch.init_default_lightmaps(&mut ctx).expect("lightmap");
    assert_eq!((info.size_s, info.size_t), (5, 5));

    // The flat render tessellation collapses to a single quad: one strip of two triangles.
    let strips = patch.render_meshes().expect("render meshes");
    assert_eq!(strips.len(), 1);
    assert_eq!(strips[0].primitive, Primitive::TriangleStrip);
    assert_eq!(strips[0].vertices.len(), 4);
    assert_eq!(strips[0].triangle_count(), 2);

    let tile = ATLAS_TILE_S as f64;
    let first = &strips[0].vertices[0];
    assert_eq!(first.origin, Point3::ORIGIN);
    assert!((first.lightmap_coord[0] - (info.pos_s as f64 + 0.5) / tile).abs() < 1e-12);

    // Right column, last row.
    let last = strips[0].vertices.last().expect("vertex");
    assert_eq!(last.origin, Point3::new(100.0, 100.0, 0.0));
    assert!((last.lightmap_coord[0] - (info.pos_s as f64 + 4.5) / tile).abs() < 1e-12);
    assert!((last.lightmap_coord[1] - (info.pos_t as f64 + 4.5) / tile).abs() < 1e-12);
    assert!((last.normal - (-Vec3::Z)).length() < 1e-9);
    assert!((last.tangent - Vec3::X).length() < 1e-9);
}
