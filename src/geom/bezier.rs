//! Bi-quadratic Bezier patch meshes.
//!
//! A control grid of odd width and height is a mosaic of 3x3 quadratic sub-patches that share
//! their border rows and columns. The same [`BezierPatch`] type also stores the tessellated
//! result: after [`BezierPatch::subdivide`] every vertex lies on the curved surface and the grid
//! is to be read as a plain quad mesh.

use super::{BBox, Point3, Vec3};

/// Maximum squared deviation of a middle row/column for [`BezierPatch::optimize_flat`] to drop it.
pub const FLAT_SQR_TOLERANCE: f64 = 0.04;

/// Samples whose normal is shorter than this are replaced by the average of the good samples.
const DEGENERATE_NORMAL_LENGTH: f64 = 1e-6;

/// Opposite border vertices closer than this (squared) make the mesh wrap around.
const WRAP_SQR_DISTANCE: f64 = 1.0;

/// Hard cap on either grid dimension during adaptive refinement.
const MAX_GRID_DIM: usize = 1 << 14;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BezierVertex {
    pub coord: Point3,
    /// Texture coordinate; only `x` and `y` are used, `z` is carried through unchanged.
    pub tex_coord: Vec3,
    pub normal: Vec3,
    pub tangent_s: Vec3,
    pub tangent_t: Vec3,
}

impl BezierVertex {
    #[must_use]
    pub fn new(coord: Point3, tex_coord: Vec3) -> Self {
        Self {
            coord,
            tex_coord,
            ..Self::default()
        }
    }

    /// Component-wise mean of every field.
    #[must_use]
    pub fn average(&self, other: &Self) -> Self {
        Self {
            coord: self.coord.midpoint(other.coord),
            tex_coord: self.tex_coord.average(other.tex_coord),
            normal: self.normal.average(other.normal),
            tangent_s: self.tangent_s.average(other.tangent_s),
            tangent_t: self.tangent_t.average(other.tangent_t),
        }
    }

    fn weighted_sum<'a, I>(terms: I) -> Self
    where
        I: IntoIterator<Item = (f64, &'a Self)>,
    {
        let mut coord = Vec3::ZERO;
        let mut out = Self::default();
        for (w, v) in terms {
            coord += v.coord.to_vec3() * w;
            out.tex_coord += v.tex_coord * w;
            out.normal += v.normal * w;
            out.tangent_s += v.tangent_s * w;
            out.tangent_t += v.tangent_t * w;
        }
        out.coord = Point3::from(coord);
        out
    }

    fn normalize_vectors(&mut self) {
        self.normal = self.normal.normalized_or_zero();
        self.tangent_s = self.tangent_s.normalized_or_zero();
        self.tangent_t = self.tangent_t.normalized_or_zero();
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BezierError {
    #[error("control grid must have odd width and height >= 3, got {width}x{height}")]
    InvalidSize { width: usize, height: usize },
    #[error("control grid {width}x{height} needs {expected} points, got {got}")]
    VertexCountMismatch {
        width: usize,
        height: usize,
        expected: usize,
        got: usize,
    },
}

/// How a control grid is turned into a surface mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Subdivision {
    /// Fixed number of segments per sub-patch along each axis.
    Explicit { horz: u32, vert: u32 },
    /// Split sub-curves until their flatness error is at most `max_error` and (when positive)
    /// no segment is longer than `max_length`.
    Auto { max_error: f64, max_length: f64 },
}

impl Subdivision {
    /// Explicit counts when both are positive, otherwise the error-driven mode.
    #[must_use]
    pub fn from_counts(horz: i32, vert: i32, max_error: f64, max_length: f64) -> Self {
        match (u32::try_from(horz), u32::try_from(vert)) {
            (Ok(h), Ok(v)) if h > 0 && v > 0 => Self::Explicit { horz: h, vert: v },
            _ => Self::Auto {
                max_error,
                max_length,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BezierPatch {
    pub width: usize,
    pub height: usize,
    /// Row-major vertices, `mesh[row * width + col]`.
    pub mesh: Vec<BezierVertex>,
}

impl BezierPatch {
    /// Control grid from positions and texture coordinates.
    pub fn from_control_points(
        width: usize,
        height: usize,
        coords: &[Point3],
        tex_coords: &[Vec3],
    ) -> Result<Self, BezierError> {
        if width < 3 || height < 3 || width % 2 == 0 || height % 2 == 0 {
            return Err(BezierError::InvalidSize { width, height });
        }
        let expected = width * height;
        for got in [coords.len(), tex_coords.len()] {
            if got != expected {
                return Err(BezierError::VertexCountMismatch {
                    width,
                    height,
                    expected,
                    got,
                });
            }
        }

        let mesh = coords
            .iter()
            .zip(tex_coords)
            .map(|(&c, &t)| BezierVertex::new(c, t))
            .collect();
        Ok(Self {
            width,
            height,
            mesh,
        })
    }

    #[must_use]
    pub fn vertex(&self, col: usize, row: usize) -> &BezierVertex {
        &self.mesh[row * self.width + col]
    }

    pub fn vertex_mut(&mut self, col: usize, row: usize) -> &mut BezierVertex {
        &mut self.mesh[row * self.width + col]
    }

    #[must_use]
    pub fn bounding_box(&self) -> Option<BBox> {
        let coords: Vec<Point3> = self.mesh.iter().map(|v| v.coord).collect();
        BBox::from_points(&coords)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tangent space
    // ─────────────────────────────────────────────────────────────────────────

    /// Computes per-vertex normals and texture-aligned tangents of the control grid.
    ///
    /// Each vertex accumulates the analytic tangent space of every sub-patch it belongs to.
    /// A degenerate sample contributes the normalized mean of the good samples of its own
    /// sub-patch instead. When the mesh wraps, contributions on both sides of the seam are merged.
    pub fn compute_tangent_space(&mut self) {
        if self.width < 3 || self.height < 3 || self.width % 2 == 0 || self.height % 2 == 0 {
            return;
        }

        for v in &mut self.mesh {
            v.normal = Vec3::ZERO;
            v.tangent_s = Vec3::ZERO;
            v.tangent_t = Vec3::ZERO;
        }

        for sp_row in (0..self.height - 1).step_by(2) {
            for sp_col in (0..self.width - 1).step_by(2) {
                let mut good = [[false; 3]; 3];
                let mut good_sum = [Vec3::ZERO; 3];

                for j in 0..3 {
                    for i in 0..3 {
                        let s = i as f64 * 0.5;
                        let t = j as f64 * 0.5;
                        let Some([n, tan, bi]) = self.sub_patch_tangent_space(sp_col, sp_row, s, t)
                        else {
                            continue;
                        };

                        let v = self.vertex_mut(sp_col + i, sp_row + j);
                        v.normal += n;
                        v.tangent_s += tan;
                        v.tangent_t += bi;
                        good[j][i] = true;

                        good_sum[0] += n;
                        good_sum[1] += tan;
                        good_sum[2] += bi;
                    }
                }

                // Degenerate samples borrow the mean of this sub-patch's good samples.
                let fallback = good_sum.map(Vec3::normalized_or_zero);
                for j in 0..3 {
                    for i in 0..3 {
                        if good[j][i] {
                            continue;
                        }
                        let v = self.vertex_mut(sp_col + i, sp_row + j);
                        v.normal += fallback[0];
                        v.tangent_s += fallback[1];
                        v.tangent_t += fallback[2];
                    }
                }
            }
        }

        if self.wraps_horz() {
            let last = self.width - 1;
            for row in 0..self.height {
                self.merge_seam((0, row), (last, row));
            }
        }
        if self.wraps_vert() {
            let last = self.height - 1;
            for col in 0..self.width {
                self.merge_seam((col, 0), (col, last));
            }
        }

        for v in &mut self.mesh {
            v.normalize_vectors();
        }
    }

    fn merge_seam(&mut self, a: (usize, usize), b: (usize, usize)) {
        let va = *self.vertex(a.0, a.1);
        let vb = *self.vertex(b.0, b.1);
        for (col, row) in [a, b] {
            let v = self.vertex_mut(col, row);
            v.normal = va.normal + vb.normal;
            v.tangent_s = va.tangent_s + vb.tangent_s;
            v.tangent_t = va.tangent_t + vb.tangent_t;
        }
    }

    /// Normal, tangent and bitangent of the 3x3 sub-patch at `(sp_col, sp_row)` for the local
    /// parameters `s`, `t` in `[0, 1]`; `None` when the normal degenerates.
    fn sub_patch_tangent_space(
        &self,
        sp_col: usize,
        sp_row: usize,
        s: f64,
        t: f64,
    ) -> Option<[Vec3; 3]> {
        let (bs, dbs) = (bernstein(s), bernstein_derivative(s));
        let (bt, dbt) = (bernstein(t), bernstein_derivative(t));

        let mut tangent_s = Vec3::ZERO;
        let mut tangent_t = Vec3::ZERO;
        let mut tex_s = Vec3::ZERO;
        let mut tex_t = Vec3::ZERO;

        for j in 0..3 {
            for i in 0..3 {
                let v = self.vertex(sp_col + i, sp_row + j);
                let p = v.coord.to_vec3();
                tangent_s += p * (dbs[i] * bt[j]);
                tangent_t += p * (bs[i] * dbt[j]);
                tex_s += v.tex_coord * (dbs[i] * bt[j]);
                tex_t += v.tex_coord * (bs[i] * dbt[j]);
            }
        }

        let normal = tangent_t.cross(tangent_s);
        if normal.length() < DEGENERATE_NORMAL_LENGTH {
            return None;
        }

        let mut tan = tangent_t * -tex_s.y + tangent_s * tex_t.y;
        let mut bi = tangent_t * tex_s.x - tangent_s * tex_t.x;
        if tex_s.x * tex_t.y - tex_s.y * tex_t.x < 0.0 {
            tan = -tan;
            bi = -bi;
        }

        Some([
            normal.normalized_or_zero(),
            tan.normalized_or_zero(),
            bi.normalized_or_zero(),
        ])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subdivision
    // ─────────────────────────────────────────────────────────────────────────

    pub fn subdivide(&mut self, mode: Subdivision, optimize_flat: bool) {
        match mode {
            Subdivision::Explicit { horz, vert } => {
                self.subdivide_explicit(horz as usize, vert as usize, optimize_flat);
            }
            Subdivision::Auto {
                max_error,
                max_length,
            } => self.subdivide_auto(max_error, max_length, optimize_flat),
        }
    }

    /// Error-driven subdivision of the control grid into a surface mesh.
    ///
    /// A sub-curve `A, C, B` (start, control, end) is split while the control point deviates
    /// from the curve point `(A + 2C + B) / 4` by more than `max_error`, or while `max_length`
    /// is positive and either half of the control polygon is longer than it.
    pub fn subdivide_auto(&mut self, max_error: f64, max_length: f64, optimize_flat: bool) {
        if self.width < 3 || self.height < 3 {
            return;
        }
        let limits = SplitLimits {
            max_error_sqr: if max_error > 0.0 { max_error * max_error } else { f64::INFINITY },
            max_length_sqr: if max_length > 0.0 { max_length * max_length } else { f64::INFINITY },
        };

        self.refine_columns(limits);
        self.transpose();
        self.refine_columns(limits);
        self.transpose();

        // Pull the remaining control points onto the curve.
        for row in 0..self.height {
            for col in (1..self.width - 1).step_by(2) {
                let v = *self.vertex(col, row);
                let toward_next = v.average(self.vertex(col + 1, row));
                let toward_prev = v.average(self.vertex(col - 1, row));
                *self.vertex_mut(col, row) = toward_next.average(&toward_prev);
            }
        }
        for col in 0..self.width {
            for row in (1..self.height - 1).step_by(2) {
                let v = *self.vertex(col, row);
                let toward_next = v.average(self.vertex(col, row + 1));
                let toward_prev = v.average(self.vertex(col, row - 1));
                *self.vertex_mut(col, row) = toward_next.average(&toward_prev);
            }
        }

        if optimize_flat {
            self.optimize_flat();
        }
        for v in &mut self.mesh {
            v.normalize_vectors();
        }
    }

    /// de Casteljau split of every column triple that violates `limits`.
    fn refine_columns(&mut self, limits: SplitLimits) {
        let mut col = 0;
        while col + 2 < self.width {
            let needs_split = self.width + 2 <= MAX_GRID_DIM
                && (0..self.height).any(|row| {
                    let a = self.vertex(col, row).coord;
                    let c = self.vertex(col + 1, row).coord;
                    let b = self.vertex(col + 2, row).coord;
                    limits.violated_by(a, c, b)
                });

            if !needs_split {
                col += 2;
                continue;
            }

            let old_width = self.width;
            let mut mesh = Vec::with_capacity((old_width + 2) * self.height);
            for row in 0..self.height {
                let line = &self.mesh[row * old_width..(row + 1) * old_width];
                let left = line[col].average(&line[col + 1]);
                let right = line[col + 1].average(&line[col + 2]);
                let center = left.average(&right);

                mesh.extend_from_slice(&line[..=col]);
                mesh.extend_from_slice(&[left, center, right]);
                mesh.extend_from_slice(&line[col + 2..]);
            }
            self.mesh = mesh;
            self.width = old_width + 2;
        }
    }

    /// Samples each sub-patch at `horz + 1` by `vert + 1` evenly spaced parameters.
    pub fn subdivide_explicit(&mut self, horz: usize, vert: usize, optimize_flat: bool) {
        if horz == 0 || vert == 0 || self.width < 3 || self.height < 3 {
            return;
        }
        let target_w = (self.width - 1) / 2 * horz + 1;
        let target_h = (self.height - 1) / 2 * vert + 1;
        let mut mesh = vec![BezierVertex::default(); target_w * target_h];

        for (patch_row, sp_row) in (0..self.height - 1).step_by(2).enumerate() {
            for (patch_col, sp_col) in (0..self.width - 1).step_by(2).enumerate() {
                for j in 0..=vert {
                    let bt = bernstein(j as f64 / vert as f64);
                    for i in 0..=horz {
                        let bs = bernstein(i as f64 / horz as f64);
                        let terms = (0..9).map(|k| {
                            let (a, b) = (k % 3, k / 3);
                            (bs[a] * bt[b], self.vertex(sp_col + a, sp_row + b))
                        });
                        let row = patch_row * vert + j;
                        let col = patch_col * horz + i;
                        mesh[row * target_w + col] = BezierVertex::weighted_sum(terms);
                    }
                }
            }
        }

        self.mesh = mesh;
        self.width = target_w;
        self.height = target_h;

        if optimize_flat {
            self.optimize_flat();
        }
        for v in &mut self.mesh {
            v.normalize_vectors();
        }
    }

    /// Inserts midpoint columns and rows until no two neighbouring vertices are farther apart
    /// than `max_length`.
    pub fn force_linear_max_length(&mut self, max_length: f64) {
        if max_length <= 0.0 || !max_length.is_finite() {
            return;
        }
        let limit_sqr = max_length * max_length;

        self.insert_linear_columns(limit_sqr);
        self.transpose();
        self.insert_linear_columns(limit_sqr);
        self.transpose();
    }

    /// Grid size [`Self::force_linear_max_length`] would produce, computed without building it.
    ///
    /// Counting along an axis stops once that dimension exceeds `stop_at`, so an oversized
    /// result is only a lower bound.
    #[must_use]
    pub fn linear_max_length_size(&self, max_length: f64, stop_at: usize) -> (usize, usize) {
        if max_length <= 0.0 || !max_length.is_finite() || self.width < 2 || self.height < 2 {
            return (self.width, self.height);
        }
        let limit_sqr = max_length * max_length;

        let width = split_size(self.width, limit_sqr, stop_at, |col| {
            (0..self.height)
                .map(|row| {
                    self.vertex(col, row)
                        .coord
                        .distance_squared_to(self.vertex(col + 1, row).coord)
                })
                .fold(0.0, f64::max)
        });
        // Inserted columns interpolate their neighbours, so they never widen a row gap.
        let height = split_size(self.height, limit_sqr, stop_at, |row| {
            (0..self.width)
                .map(|col| {
                    self.vertex(col, row)
                        .coord
                        .distance_squared_to(self.vertex(col, row + 1).coord)
                })
                .fold(0.0, f64::max)
        });
        (width, height)
    }

    fn insert_linear_columns(&mut self, limit_sqr: f64) {
        if self.width < 2 {
            return;
        }

        // Halvings per column segment; each halving doubles the segment's vertex count.
        let mut new_width = self.width;
        let halvings: Vec<u32> = (0..self.width - 1)
            .map(|col| {
                let longest = (0..self.height)
                    .map(|row| {
                        self.vertex(col, row)
                            .coord
                            .distance_squared_to(self.vertex(col + 1, row).coord)
                    })
                    .fold(0.0, f64::max);

                segment_halvings(longest, limit_sqr, &mut new_width)
            })
            .collect();

        if new_width == self.width {
            return;
        }

        let mut mesh = Vec::with_capacity(new_width * self.height);
        for row in 0..self.height {
            let line = &self.mesh[row * self.width..(row + 1) * self.width];
            for (col, &k) in halvings.iter().enumerate() {
                mesh.push(line[col]);
                push_midpoints(&line[col], &line[col + 1], k, &mut mesh);
            }
            mesh.push(line[self.width - 1]);
        }
        self.mesh = mesh;
        self.width = new_width;
    }

    /// Removes inner columns and rows that lie on the straight line between their neighbours.
    pub fn optimize_flat(&mut self) {
        let mut col = 1;
        while col + 1 < self.width {
            let deviation = (0..self.height)
                .map(|row| {
                    line_distance_sqr(
                        self.vertex(col, row).coord,
                        self.vertex(col - 1, row).coord,
                        self.vertex(col + 1, row).coord,
                    )
                })
                .fold(0.0, f64::max);

            if deviation <= FLAT_SQR_TOLERANCE {
                self.remove_column(col);
            } else {
                col += 1;
            }
        }

        let mut row = 1;
        while row + 1 < self.height {
            let deviation = (0..self.width)
                .map(|col| {
                    line_distance_sqr(
                        self.vertex(col, row).coord,
                        self.vertex(col, row - 1).coord,
                        self.vertex(col, row + 1).coord,
                    )
                })
                .fold(0.0, f64::max);

            if deviation < FLAT_SQR_TOLERANCE {
                self.mesh.drain(row * self.width..(row + 1) * self.width);
                self.height -= 1;
            } else {
                row += 1;
            }
        }
    }

    fn remove_column(&mut self, col: usize) {
        let width = self.width;
        self.mesh = self
            .mesh
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx % width != col)
            .map(|(_, v)| *v)
            .collect();
        self.width -= 1;
    }

    fn transpose(&mut self) {
        let (w, h) = (self.width, self.height);
        let mut mesh = Vec::with_capacity(self.mesh.len());
        for col in 0..w {
            for row in 0..h {
                mesh.push(self.mesh[row * w + col]);
            }
        }
        self.mesh = mesh;
        self.width = h;
        self.height = w;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries on the tessellated mesh
    // ─────────────────────────────────────────────────────────────────────────

    /// Area of the mesh attributed to the vertex at `(col, row)`.
    ///
    /// Sums the triangles spanned by the vertex and the half-way points towards each pair of
    /// consecutive neighbours in its 8-neighbourhood; missing neighbours at the border are
    /// skipped.
    #[must_use]
    pub fn surface_area_at_vertex(&self, col: usize, row: usize) -> f64 {
        const RING: [(isize, isize); 8] = [
            (0, 1),
            (1, 1),
            (1, 0),
            (1, -1),
            (0, -1),
            (-1, -1),
            (-1, 0),
            (-1, 1),
        ];

        let center = self.vertex(col, row).coord;
        let neighbour = |(dc, dr): (isize, isize)| {
            let c = col.checked_add_signed(dc).filter(|&c| c < self.width)?;
            let r = row.checked_add_signed(dr).filter(|&r| r < self.height)?;
            Some(self.vertex(c, r).coord)
        };

        (0..RING.len())
            .filter_map(|k| {
                let a = neighbour(RING[k])?;
                let b = neighbour(RING[(k + 1) % RING.len()])?;
                let e1 = (a - center) * 0.5;
                let e2 = (b - center) * 0.5;
                Some(e1.cross(e2).length() * 0.5)
            })
            .sum()
    }

    /// Whether the first and last column coincide (within one unit) on every row.
    #[must_use]
    pub fn wraps_horz(&self) -> bool {
        self.width > 1
            && (0..self.height).all(|row| {
                self.vertex(0, row)
                    .coord
                    .distance_squared_to(self.vertex(self.width - 1, row).coord)
                    <= WRAP_SQR_DISTANCE
            })
    }

    /// Whether the first and last row coincide (within one unit) on every column.
    #[must_use]
    pub fn wraps_vert(&self) -> bool {
        self.height > 1
            && (0..self.width).all(|col| {
                self.vertex(col, 0)
                    .coord
                    .distance_squared_to(self.vertex(col, self.height - 1).coord)
                    <= WRAP_SQR_DISTANCE
            })
    }
}

/// Appends the `2^halvings - 1` inner vertices of repeatedly halving `a .. b`, in order.
/// Halvings of a segment of squared length `len_sqr` down to `limit_sqr`; grows `new_dim` by
/// the inserted vertices.
fn segment_halvings(mut len_sqr: f64, limit_sqr: f64, new_dim: &mut usize) -> u32 {
    let mut k = 0;
    while len_sqr > limit_sqr && *new_dim + (1 << k) <= MAX_GRID_DIM {
        *new_dim += 1 << k;
        len_sqr *= 0.25;
        k += 1;
    }
    k
}

fn split_size<F>(dim: usize, limit_sqr: f64, stop_at: usize, longest: F) -> usize
where
    F: Fn(usize) -> f64,
{
    let mut new_dim = dim;
    for segment in 0..dim - 1 {
        segment_halvings(longest(segment), limit_sqr, &mut new_dim);
        if new_dim > stop_at {
            break;
        }
    }
    new_dim
}

fn push_midpoints(a: &BezierVertex, b: &BezierVertex, halvings: u32, out: &mut Vec<BezierVertex>) {
    if halvings == 0 {
        return;
    }
    let mut mid = a.average(b);
    mid.normalize_vectors();
    push_midpoints(a, &mid, halvings - 1, out);
    out.push(mid);
    push_midpoints(&mid, b, halvings - 1, out);
}

#[derive(Debug, Clone, Copy)]
struct SplitLimits {
    max_error_sqr: f64,
    max_length_sqr: f64,
}

impl SplitLimits {
    fn violated_by(self, a: Point3, c: Point3, b: Point3) -> bool {
        if a.distance_squared_to(c) > self.max_length_sqr
            || c.distance_squared_to(b) > self.max_length_sqr
        {
            return true;
        }
        let on_curve = Point3::from((a.to_vec3() + b.to_vec3() + c.to_vec3() * 2.0) * 0.25);
        c.distance_squared_to(on_curve) > self.max_error_sqr
    }
}

/// Quadratic Bernstein weights at `t`.
fn bernstein(t: f64) -> [f64; 3] {
    let r = 1.0 - t;
    [r * r, 2.0 * t * r, t * t]
}

fn bernstein_derivative(t: f64) -> [f64; 3] {
    [2.0 * (t - 1.0), 2.0 - 4.0 * t, 2.0 * t]
}

/// Squared distance of `p` from the infinite line through `a` and `b`.
fn line_distance_sqr(p: Point3, a: Point3, b: Point3) -> f64 {
    let dir = b - a;
    let len_sqr = dir.length_squared();
    if len_sqr <= 0.0 {
        return p.distance_squared_to(a);
    }
    let ap = p - a;
    (ap - dir * (ap.dot(dir) / len_sqr)).length_squared()
}
