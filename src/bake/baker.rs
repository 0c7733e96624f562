//! Bake driver: sizing, patch generation, the solver call and writeback for a whole scene.

use thiserror::Error;

use crate::geom::Point3;

use super::diagnostics::BakeDiagnostics;
use super::material::MaterialId;
use super::metrics::TimingBucket;
use super::node::{BakeContext, LightmapError, NodeId, NodeTable};
use super::patch::PatchMesh;

/// Failure reported by a [`RadiositySolver`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SolverError(pub String);

/// The light transport step between patch generation and writeback.
///
/// `sample_coords[i][p]` holds the direct-light sample points of patch `p` of `meshes[i]`; it is
/// empty for placeholders. The solver must fill in `total_energy` and `energy_from_dir` of
/// every patch and must not add, remove or reorder patches or meshes.
pub trait RadiositySolver {
    fn solve(
        &mut self,
        meshes: &mut [PatchMesh],
        sample_coords: &[Vec<Vec<Point3>>],
    ) -> Result<(), SolverError>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BakeError {
    #[error("radiosity solver failed: {0}")]
    Solver(#[from] SolverError),
    #[error("solver changed patch mesh {index}: {reason}")]
    ContractViolation { index: usize, reason: String },
}

/// Outcome of [`bake_scene`].
#[derive(Debug, Clone, Default)]
pub struct BakeReport {
    pub diagnostics: BakeDiagnostics,
}

/// Shape of a patch mesh as handed to the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeshShape {
    node: NodeId,
    material: MaterialId,
    width: usize,
    height: usize,
    wraps_horz: bool,
    wraps_vert: bool,
    patches: usize,
}

impl MeshShape {
    fn of(mesh: &PatchMesh) -> Self {
        Self {
            node: mesh.node,
            material: mesh.material,
            width: mesh.width,
            height: mesh.height,
            wraps_horz: mesh.wraps_horz,
            wraps_vert: mesh.wraps_vert,
            patches: mesh.patches.len(),
        }
    }
}

/// Bakes the lightmaps of every node in `nodes`.
///
/// Surface-level problems never abort the bake; they are counted and described in the
/// returned diagnostics. Only a failing solver, or one that breaks the mesh contract, turns
/// into an error.
pub fn bake_scene(
    nodes: &mut NodeTable,
    ctx: &mut BakeContext<'_>,
    solver: &mut dyn RadiositySolver,
) -> Result<BakeReport, BakeError> {
    ctx.metrics.begin();
    ctx.diagnostics = BakeDiagnostics::new();

    for (id, node) in nodes.iter_mut() {
        ctx.diagnostics.surface_count += 1;

        let started = ctx.metrics.start();
        let result = node.init_default_lightmaps(ctx);
        ctx.metrics.stop(TimingBucket::LightmapSizing, started);

        match result {
            Ok(info) if !info.is_empty() => ctx.diagnostics.lightmaps_assigned += 1,
            Ok(_) => {}
            Err(err) if err.is_not_requested() => {
                log::debug!("{id:?}: {err}");
            }
            Err(err) => {
                match err {
                    LightmapError::Allocation(_) => ctx.diagnostics.allocation_failures += 1,
                    LightmapError::ExceedsTile { .. }
                    | LightmapError::RetriesExhausted { .. }
                    | LightmapError::Degenerate => ctx.diagnostics.sizing_failures += 1,
                    _ => {}
                }
                ctx.diagnostics
                    .warn(format!("{id:?} ({}): no lightmap, {err}", node.kind()));
            }
        }
    }

    let mut meshes = Vec::new();
    let mut sample_coords = Vec::new();
    for (id, node) in nodes.iter() {
        match node.create_patch_meshes(id, ctx) {
            Ok(Some(grid)) => {
                ctx.diagnostics.patch_mesh_count += 1;
                ctx.diagnostics.patch_count += grid.mesh.patches.len();
                ctx.diagnostics.inside_patch_count += grid.mesh.inside_count();
                meshes.push(grid.mesh);
                sample_coords.push(grid.sample_coords);
            }
            Ok(None) => {}
            Err(err) => ctx
                .diagnostics
                .warn(format!("{id:?} ({}): no patch mesh, {err}", node.kind())),
        }
    }
    log::info!(
        "handing {} patch meshes with {} patches to the solver",
        meshes.len(),
        ctx.diagnostics.patch_count
    );

    let shapes: Vec<MeshShape> = meshes.iter().map(MeshShape::of).collect();
    ctx.metrics
        .time(TimingBucket::Solver, || solver.solve(&mut meshes, &sample_coords))?;
    verify_solver_contract(&shapes, &meshes)?;

    let started = ctx.metrics.start();
    for mesh in &meshes {
        let Some(node) = nodes.get(mesh.node) else {
            continue;
        };
        if let Err(err) = node.back_to_lightmap(mesh, ctx) {
            ctx.diagnostics
                .warn(format!("{:?} ({}): writeback failed, {err}", mesh.node, node.kind()));
        }
    }
    ctx.metrics.stop(TimingBucket::Writeback, started);

    let mut diagnostics = std::mem::take(&mut ctx.diagnostics);
    diagnostics.timing = ctx.metrics.end();
    log::info!("bake finished: {}", diagnostics.summary());
    Ok(BakeReport { diagnostics })
}

fn verify_solver_contract(before: &[MeshShape], after: &[PatchMesh]) -> Result<(), BakeError> {
    if before.len() != after.len() {
        return Err(BakeError::ContractViolation {
            index: before.len().min(after.len()),
            reason: format!("{} meshes in, {} meshes out", before.len(), after.len()),
        });
    }

    for (index, (expected, mesh)) in before.iter().zip(after).enumerate() {
        let got = MeshShape::of(mesh);
        if got != *expected {
            return Err(BakeError::ContractViolation {
                index,
                reason: format!("expected {expected:?}, got {got:?}"),
            });
        }
    }
    Ok(())
}
