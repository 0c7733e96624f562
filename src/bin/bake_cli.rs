use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use lightmap_engine::bake::{
    BakeConfig, BakeContext, BakeMetrics, BakeReport, CurvedSurface, LightmapAtlas, Material,
    MaterialId, MaterialRegistry, NodeTable, PatchMesh, PlanarSurface, RadiositySolver,
    SolverError, TexInfo, TiledLightmapAtlas, TimingBucket, bake_scene, read_scene, write_scene,
};
use lightmap_engine::geom::{Point3, Polygon3, Vec3};

const USAGE: &str = r#"bake_cli (lightmap-engine)

USAGE:
  bake_cli list
  bake_cli run <scenario|all> [options]

SCENARIOS:
  floor      one lightmapped face under a point light
  pipe       half pipe bezier patch under a point light
  room       floor, wall, pipe and an unlit sky face

OPTIONS (run):
  --config <path>       Bake settings as a <bake .../> XML element
  --materials <path>    Material table as XML (default: built-in materials)
  --patch-size <units>  Override the patch size
  --scene-out <path>    Write the baked scene records (single scenario only)
  --overwrite           Overwrite an existing scene file
  -h, --help            Show this help

Set RUST_LOG=debug for per-surface details.
"#;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("bake_cli error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args::new(args);

    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "list" => {
            for scenario in Scenario::ALL {
                println!("{}", scenario.name());
            }
            Ok(())
        }
        "run" => cmd_run(&mut args),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        other => Err(format!("unknown command `{other}`\n\n{USAGE}")),
    }
}

fn print_usage() {
    println!("{USAGE}");
}

fn cmd_run(args: &mut Args) -> Result<(), String> {
    let scenario_name = args.next().ok_or("missing scenario name")?;

    let mut config_path: Option<PathBuf> = None;
    let mut materials_path: Option<PathBuf> = None;
    let mut patch_size: Option<f64> = None;
    let mut scene_out: Option<PathBuf> = None;
    let mut overwrite = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(PathBuf::from(args.value("--config")?)),
            "--materials" => materials_path = Some(PathBuf::from(args.value("--materials")?)),
            "--patch-size" => {
                let raw = args.value("--patch-size")?;
                let value = raw
                    .parse::<f64>()
                    .map_err(|e| format!("invalid --patch-size `{raw}`: {e}"))?;
                patch_size = Some(value);
            }
            "--scene-out" => scene_out = Some(PathBuf::from(args.value("--scene-out")?)),
            "--overwrite" => overwrite = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => return Err(format!("unknown option `{other}`\n\n{USAGE}")),
        }
    }

    let mut config = match config_path.as_deref() {
        Some(path) => BakeConfig::from_xml_str(&read_text(path)?)
            .map_err(|e| format!("{}: {e}", path.display()))?,
        None => BakeConfig::default(),
    };
    if let Some(patch_size) = patch_size {
        config.patch_size = patch_size;
        config
            .validate()
            .map_err(|e| format!("--patch-size: {e}"))?;
    }

    let materials = match materials_path.as_deref() {
        Some(path) => MaterialRegistry::from_xml_str(&read_text(path)?)
            .map_err(|e| format!("{}: {e}", path.display()))?,
        None => builtin_materials(),
    };

    let scenarios: Vec<Scenario> = if scenario_name == "all" {
        if scene_out.is_some() {
            return Err("--scene-out needs a single scenario".to_string());
        }
        Scenario::ALL.to_vec()
    } else {
        vec![Scenario::from_str(&scenario_name).ok_or_else(|| unknown_scenario(&scenario_name))?]
    };

    for scenario in scenarios {
        let baked = bake(scenario, &config, &materials)?;
        print_report(scenario, &baked);
        if let Some(path) = scene_out.as_deref() {
            save_scene(path, &baked, &materials, overwrite)?;
        }
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("read {}: {e}", path.display()))
}

fn unknown_scenario(name: &str) -> String {
    let mut msg = format!("unknown scenario `{name}`\n\navailable scenarios:\n");
    for scenario in Scenario::ALL {
        msg.push_str(&format!("  {}\n", scenario.name()));
    }
    msg
}

fn builtin_materials() -> MaterialRegistry {
    let mut materials = MaterialRegistry::new();
    materials.insert(Material::lightmapped("walls/concrete"));
    materials.insert(Material::lightmapped("pipes/steel"));
    materials.insert(Material {
        uses_generated_lightmap: false,
        ..Material::lightmapped("sky")
    });
    materials
}

/// Point light without occlusion, for looking at lightmaps without a real solver.
struct DirectLightSolver {
    position: Point3,
    color: Vec3,
    intensity: f64,
    ambient: Vec3,
}

impl RadiositySolver for DirectLightSolver {
    fn solve(
        &mut self,
        meshes: &mut [PatchMesh],
        sample_coords: &[Vec<Vec<Point3>>],
    ) -> Result<(), SolverError> {
        for (mesh, samples) in meshes.iter_mut().zip(sample_coords) {
            for (patch, points) in mesh.patches.iter_mut().zip(samples) {
                if !patch.inside_face || points.is_empty() {
                    continue;
                }

                let mut energy = Vec3::ZERO;
                let mut direction = Vec3::ZERO;
                for &point in points {
                    let to_light = self.position - point;
                    let dist_sqr = to_light.length_squared().max(1.0);
                    let dir = to_light.normalized_or_zero();
                    let cos = dir.dot(patch.normal);
                    if cos <= 0.0 {
                        continue;
                    }
                    let received = self.intensity * cos / dist_sqr;
                    energy += self.color * received;
                    direction += dir * received;
                }

                let n = points.len() as f64;
                patch.total_energy = self.ambient + energy / n;
                if direction.length_squared() > 0.0 {
                    patch.energy_from_dir = direction / n;
                }
            }
        }
        Ok(())
    }
}

struct Baked {
    nodes: NodeTable,
    atlas: TiledLightmapAtlas,
    report: BakeReport,
}

fn bake(scenario: Scenario, config: &BakeConfig, materials: &MaterialRegistry) -> Result<Baked, String> {
    let (mut nodes, light) = scenario.build(materials)?;
    let mut atlas = TiledLightmapAtlas::new();
    let mut solver = DirectLightSolver {
        position: light,
        color: Vec3::new(1.0, 0.95, 0.8),
        intensity: 4.0e6,
        ambient: Vec3::new(8.0, 8.0, 10.0),
    };

    let mut ctx = BakeContext::new(&mut atlas, materials, config);
    let report = bake_scene(&mut nodes, &mut ctx, &mut solver)
        .map_err(|e| format!("{}: {e}", scenario.name()))?;
    drop(ctx);

    Ok(Baked {
        nodes,
        atlas,
        report,
    })
}

fn print_report(scenario: Scenario, baked: &Baked) {
    println!("== {} ==", scenario.name());
    print!("{}", baked.report.diagnostics);

    for (id, node) in baked.nodes.iter() {
        let info = node.lightmap_info();
        if info.is_empty() {
            println!("  {id:?} {}: no lightmap", node.kind());
            continue;
        }
        let mut sum = [0u64; 3];
        for t in 0..info.size_t {
            for s in 0..info.size_s {
                if let Ok(rgb) = baked.atlas.read_color(&info, s, t) {
                    for (acc, c) in sum.iter_mut().zip(rgb) {
                        *acc += u64::from(c);
                    }
                }
            }
        }
        let count = info.texel_count() as u64;
        println!(
            "  {id:?} {}: {}x{} texels at tile {} ({}, {}), mean color {:?}",
            node.kind(),
            info.size_s,
            info.size_t,
            info.lightmap_nr,
            info.pos_s,
            info.pos_t,
            sum.map(|c| c / count)
        );
    }
}

fn save_scene(
    path: &Path,
    baked: &Baked,
    materials: &MaterialRegistry,
    overwrite: bool,
) -> Result<(), String> {
    if path.exists() && !overwrite {
        return Err(format!(
            "refusing to overwrite existing file {} (use --overwrite)",
            path.display()
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create dir {}: {e}", parent.display()))?;
    }

    let mut metrics = BakeMetrics::default();
    metrics.begin();

    let started = metrics.start();
    let file = File::create(path).map_err(|e| format!("create {}: {e}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_scene(&mut w, &baked.nodes, materials, &baked.atlas)
        .map_err(|e| format!("write {}: {e}", path.display()))?;
    w.flush().map_err(|e| format!("flush {}: {e}", path.display()))?;
    metrics.stop(TimingBucket::SceneIo, started);
    eprintln!("wrote {}", path.display());

    // Read it back into a fresh atlas to make sure the file is usable.
    let started = metrics.start();
    let file = File::open(path).map_err(|e| format!("open {}: {e}", path.display()))?;
    let mut atlas = TiledLightmapAtlas::new();
    let (nodes, skipped) = read_scene(&mut BufReader::new(file), materials, &mut atlas)
        .map_err(|e| format!("read back {}: {e}", path.display()))?;
    metrics.stop(TimingBucket::SceneIo, started);

    eprintln!(
        "verified {}: {} records, {} skipped, {} atlas tiles",
        path.display(),
        nodes.len(),
        skipped.len(),
        atlas.tile_count()
    );
    if let Some(timing) = metrics.end() {
        eprintln!("scene io: {:.3} ms", timing.scene_io_ns as f64 / 1_000_000.0);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Floor,
    Pipe,
    Room,
}

impl Scenario {
    const ALL: &'static [Scenario] = &[Scenario::Floor, Scenario::Pipe, Scenario::Room];

    fn name(self) -> &'static str {
        match self {
            Scenario::Floor => "floor",
            Scenario::Pipe => "pipe",
            Scenario::Room => "room",
        }
    }

    fn from_str(name: &str) -> Option<Self> {
        match name {
            "floor" => Some(Scenario::Floor),
            "pipe" => Some(Scenario::Pipe),
            "room" => Some(Scenario::Room),
            _ => None,
        }
    }

    /// Surfaces of the scenario and the light position.
    fn build(self, materials: &MaterialRegistry) -> Result<(NodeTable, Point3), String> {
        let concrete = material(materials, "walls/concrete")?;
        let mut nodes = NodeTable::new();
        match self {
            Scenario::Floor => {
                nodes.push(floor_face(concrete, 512.0)?);
                Ok((nodes, Point3::new(256.0, 256.0, 300.0)))
            }
            Scenario::Pipe => {
                nodes.push(half_pipe(material(materials, "pipes/steel")?, 64.0, 384.0)?);
                Ok((nodes, Point3::new(0.0, 200.0, 192.0)))
            }
            Scenario::Room => {
                nodes.push(floor_face(concrete, 512.0)?);
                nodes.push(back_wall(concrete, 512.0, 256.0)?);
                nodes.push(half_pipe(material(materials, "pipes/steel")?, 48.0, 256.0)?);
                nodes.push(sky_face(material(materials, "sky")?, 512.0, 256.0)?);
                Ok((nodes, Point3::new(256.0, 320.0, 200.0)))
            }
        }
    }
}

fn material(materials: &MaterialRegistry, name: &str) -> Result<MaterialId, String> {
    materials
        .find(name)
        .ok_or_else(|| format!("material `{name}` is not in the material table"))
}

fn face(vertices: Vec<Point3>, material: MaterialId, u: Vec3, v: Vec3) -> Result<PlanarSurface, String> {
    let draw_indices = (0..vertices.len() as u32).collect();
    let polygon = Polygon3::from_vertices(vertices).map_err(|e| e.to_string())?;
    let tex_info = TexInfo {
        u,
        v,
        offset_u: 0.0,
        offset_v: 0.0,
    };
    PlanarSurface::new(polygon, material, tex_info, draw_indices).map_err(|e| e.to_string())
}

/// Square floor in z = 0, facing up.
fn floor_face(material: MaterialId, size: f64) -> Result<PlanarSurface, String> {
    face(
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, size, 0.0),
            Point3::new(size, size, 0.0),
            Point3::new(size, 0.0, 0.0),
        ],
        material,
        Vec3::X / 64.0,
        Vec3::Y / 64.0,
    )
}

/// Wall along the far edge of the floor (y = `size`), facing -y.
fn back_wall(material: MaterialId, size: f64, height: f64) -> Result<PlanarSurface, String> {
    face(
        vec![
            Point3::new(0.0, size, 0.0),
            Point3::new(0.0, size, height),
            Point3::new(size, size, height),
            Point3::new(size, size, 0.0),
        ],
        material,
        Vec3::X / 64.0,
        Vec3::Z / 64.0,
    )
}

/// Ceiling over the room, facing down; its material gets no lightmap.
fn sky_face(material: MaterialId, size: f64, height: f64) -> Result<PlanarSurface, String> {
    face(
        vec![
            Point3::new(0.0, 0.0, height),
            Point3::new(size, 0.0, height),
            Point3::new(size, size, height),
            Point3::new(0.0, size, height),
        ],
        material,
        Vec3::X / 64.0,
        Vec3::Y / 64.0,
    )
}

/// Upper half of a pipe of `radius` along the x axis, `length` long.
fn half_pipe(material: MaterialId, radius: f64, length: f64) -> Result<CurvedSurface, String> {
    let r = radius;
    let arc = [(0.0, -r), (r, -r), (r, 0.0), (r, r), (0.0, r)];
    let mut components = Vec::with_capacity(arc.len() * 3 * 5);
    for row in 0..3 {
        let x = f64::from(row) * length * 0.5;
        for (col, &(z, y)) in arc.iter().enumerate() {
            components.extend([x, 256.0 + y, z, col as f64 / 4.0, f64::from(row) * 0.5]);
        }
    }
    CurvedSurface::from_interleaved(arc.len(), 3, &components, (-1, -1), material, 4.0)
        .map_err(|e| e.to_string())
}

struct Args {
    args: Vec<String>,
    pos: usize,
}

impl Args {
    fn new(args: Vec<String>) -> Self {
        Self { args, pos: 0 }
    }

    fn next(&mut self) -> Option<String> {
        let arg = self.args.get(self.pos)?.clone();
        self.pos += 1;
        Some(arg)
    }

    fn value(&mut self, flag: &str) -> Result<String, String> {
        self.next()
            .ok_or_else(|| format!("missing value for {flag}"))
    }
}
