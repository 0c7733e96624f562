//! Per-bake diagnostics.
//!
//! Every surface-level problem in a bake is non-fatal: the surface keeps a zero-size lightmap,
//! a patch falls back to "outside", a direction gets clamped. These counters make such
//! degradations visible to the caller instead of leaving them only in the log.
//!
//! ```ignore
//! let report = bake_scene(&mut nodes, &mut ctx, &mut solver)?;
//! if !report.diagnostics.is_clean() {
//!     for warning in &report.diagnostics.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//! }
//! ```

use std::fmt;

use super::metrics::BakeTimingReport;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BakeDiagnostics {
    /// Surface nodes visited by the bake.
    pub surface_count: usize,

    /// Surfaces that received a non-empty atlas region.
    pub lightmaps_assigned: usize,

    /// Surfaces whose lightmap would not fit into one atlas tile.
    ///
    /// For curved surfaces this is only counted after the retry limit is reached.
    pub sizing_failures: usize,

    /// Surfaces for which the atlas had no room left.
    pub allocation_failures: usize,

    /// Planar patches whose footprint could not be clipped and were treated as outside.
    pub clip_fallbacks: usize,

    /// Patch meshes handed to the solver.
    pub patch_mesh_count: usize,

    /// Patches across all meshes, placeholders included.
    pub patch_count: usize,

    /// Patches that actually cover surface area.
    pub inside_patch_count: usize,

    /// Incident directions pulled back to the maximum incidence angle during writeback.
    pub clamped_directions: usize,

    /// Timing per phase, only with the `bake_metrics` feature.
    pub timing: Option<BakeTimingReport>,

    /// Human-readable descriptions of every degradation above.
    pub warnings: Vec<String>,
}

impl BakeDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No surface degraded and nothing was logged as a warning.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.sizing_failures == 0
            && self.allocation_failures == 0
            && self.clip_fallbacks == 0
            && self.warnings.is_empty()
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Logs `warning` at warn level and records it.
    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Adds the counters and warnings of `other`; timing is left alone.
    pub fn merge(&mut self, other: &Self) {
        self.surface_count += other.surface_count;
        self.lightmaps_assigned += other.lightmaps_assigned;
        self.sizing_failures += other.sizing_failures;
        self.allocation_failures += other.allocation_failures;
        self.clip_fallbacks += other.clip_fallbacks;
        self.patch_mesh_count += other.patch_mesh_count;
        self.patch_count += other.patch_count;
        self.inside_patch_count += other.inside_patch_count;
        self.clamped_directions += other.clamped_directions;
        self.warnings.extend(other.warnings.iter().cloned());
    }

    /// One-line summary for logging.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "surfaces:{} lightmaps:{} meshes:{} patches:{}/{}",
            self.surface_count,
            self.lightmaps_assigned,
            self.patch_mesh_count,
            self.inside_patch_count,
            self.patch_count
        )];

        if self.sizing_failures > 0 {
            parts.push(format!("oversized:{}", self.sizing_failures));
        }
        if self.allocation_failures > 0 {
            parts.push(format!("unallocated:{}", self.allocation_failures));
        }
        if self.clip_fallbacks > 0 {
            parts.push(format!("clip-fallbacks:{}", self.clip_fallbacks));
        }
        if self.clamped_directions > 0 {
            parts.push(format!("clamped:{}", self.clamped_directions));
        }

        parts.join(" ")
    }
}

impl fmt::Display for BakeDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bake Diagnostics:")?;
        writeln!(f, "  Surfaces: {}", self.surface_count)?;
        writeln!(f, "  Lightmaps assigned: {}", self.lightmaps_assigned)?;
        writeln!(
            f,
            "  Patches: {} in {} meshes ({} inside)",
            self.patch_count, self.patch_mesh_count, self.inside_patch_count
        )?;

        if self.sizing_failures > 0 || self.allocation_failures > 0 {
            writeln!(f, "  Unlit surfaces:")?;
            if self.sizing_failures > 0 {
                writeln!(f, "    - Too large for one tile: {}", self.sizing_failures)?;
            }
            if self.allocation_failures > 0 {
                writeln!(f, "    - Atlas full: {}", self.allocation_failures)?;
            }
        }

        if self.clip_fallbacks > 0 {
            writeln!(f, "  Clip fallbacks: {}", self.clip_fallbacks)?;
        }
        if self.clamped_directions > 0 {
            writeln!(f, "  Clamped directions: {}", self.clamped_directions)?;
        }

        if let Some(timing) = &self.timing {
            writeln!(f, "  Time: {:.3} ms", timing.total_ms())?;
        }

        if !self.warnings.is_empty() {
            writeln!(f, "  Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "    - {warning}")?;
            }
        }

        Ok(())
    }
}
