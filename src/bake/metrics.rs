//! Opt-in per-phase timing for a bake run.
//!
//! Timing is collected only with the `bake_metrics` feature. Without it every call below is a
//! plain pass-through and [`BakeMetrics::end`] returns `None`.
//!
//! ```ignore
//! let mut metrics = BakeMetrics::default();
//! metrics.begin();
//! let meshes = metrics.time(TimingBucket::PatchGeneration, || build_meshes());
//! if let Some(report) = metrics.end() {
//!     println!("patch generation: {} ns", report.patch_generation_ns);
//! }
//! ```

/// Phases of a bake that accumulate time separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingBucket {
    /// Lightmap sizing and atlas allocation (`init_default_lightmaps`).
    LightmapSizing,
    /// Footprint clipping, curved tessellation and sample placement.
    PatchGeneration,
    /// Building collision proxies.
    CollisionProxy,
    /// The external radiosity solver.
    Solver,
    /// Tangent-space encoding and atlas writes.
    Writeback,
    /// Scene record encoding and decoding.
    SceneIo,
}

impl TimingBucket {
    pub const ALL: [Self; 6] = [
        Self::LightmapSizing,
        Self::PatchGeneration,
        Self::CollisionProxy,
        Self::Solver,
        Self::Writeback,
        Self::SceneIo,
    ];
}

/// Cumulative nanoseconds per bucket.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BakeTimingReport {
    pub lightmap_sizing_ns: u64,
    pub patch_generation_ns: u64,
    pub collision_proxy_ns: u64,
    pub solver_ns: u64,
    pub writeback_ns: u64,
    pub scene_io_ns: u64,
}

impl BakeTimingReport {
    #[must_use]
    pub fn bucket_ns(&self, bucket: TimingBucket) -> u64 {
        match bucket {
            TimingBucket::LightmapSizing => self.lightmap_sizing_ns,
            TimingBucket::PatchGeneration => self.patch_generation_ns,
            TimingBucket::CollisionProxy => self.collision_proxy_ns,
            TimingBucket::Solver => self.solver_ns,
            TimingBucket::Writeback => self.writeback_ns,
            TimingBucket::SceneIo => self.scene_io_ns,
        }
    }

    #[must_use]
    pub fn total_ns(&self) -> u64 {
        TimingBucket::ALL
            .iter()
            .fold(0u64, |acc, &b| acc.saturating_add(self.bucket_ns(b)))
    }

    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total_ns() as f64 / 1_000_000.0
    }

    #[cfg(feature = "bake_metrics")]
    fn add(&mut self, bucket: TimingBucket, nanos: u64) {
        let slot = match bucket {
            TimingBucket::LightmapSizing => &mut self.lightmap_sizing_ns,
            TimingBucket::PatchGeneration => &mut self.patch_generation_ns,
            TimingBucket::CollisionProxy => &mut self.collision_proxy_ns,
            TimingBucket::Solver => &mut self.solver_ns,
            TimingBucket::Writeback => &mut self.writeback_ns,
            TimingBucket::SceneIo => &mut self.scene_io_ns,
        };
        *slot = slot.saturating_add(nanos);
    }
}

/// Start mark of a timed span. Zero-sized without the `bake_metrics` feature.
#[derive(Debug, Clone, Copy)]
pub struct PhaseStart {
    #[cfg(feature = "bake_metrics")]
    at: std::time::Instant,
}

/// Accumulator handed through a bake; see the module docs.
#[derive(Debug, Default)]
pub struct BakeMetrics {
    #[cfg(feature = "bake_metrics")]
    report: BakeTimingReport,
}

impl BakeMetrics {
    /// Resets all counters.
    pub fn begin(&mut self) {
        #[cfg(feature = "bake_metrics")]
        {
            self.report = BakeTimingReport::default();
        }
    }

    #[must_use]
    pub fn end(&self) -> Option<BakeTimingReport> {
        #[cfg(feature = "bake_metrics")]
        {
            Some(self.report.clone())
        }
        #[cfg(not(feature = "bake_metrics"))]
        {
            None
        }
    }

    /// Marks the start of a span that is later charged with [`BakeMetrics::stop`].
    #[must_use]
    pub fn start(&self) -> PhaseStart {
        PhaseStart {
            #[cfg(feature = "bake_metrics")]
            at: std::time::Instant::now(),
        }
    }

    /// Charges the time since `start` to `bucket`.
    pub fn stop(&mut self, bucket: TimingBucket, start: PhaseStart) {
        #[cfg(feature = "bake_metrics")]
        {
            let nanos = start.at.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
            self.report.add(bucket, nanos);
        }

        #[cfg(not(feature = "bake_metrics"))]
        {
            let _ = (bucket, start);
        }
    }

    /// Runs `f` and charges its wall time to `bucket`.
    pub fn time<R>(&mut self, bucket: TimingBucket, f: impl FnOnce() -> R) -> R {
        let start = self.start();
        let result = f();
        self.stop(bucket, start);
        result
    }
}
