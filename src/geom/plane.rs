use super::{Point3, Tolerance, Vec3};

/// Oriented plane `dot(normal, p) == dist`; the side the normal points to is the front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane3 {
    pub normal: Vec3,
    pub dist: f64,
}

impl Plane3 {
    #[must_use]
    pub const fn new(normal: Vec3, dist: f64) -> Self {
        Self { normal, dist }
    }

    /// Plane through `a`, `b` and `c`, with the normal `normalize((c - a) x (b - a))`.
    ///
    /// Seen from the front, `a`, `b`, `c` run clockwise. Returns `None` when the points are
    /// (nearly) collinear, i.e. the cross product is not longer than `tol.eps`.
    #[must_use]
    pub fn from_points(a: Point3, b: Point3, c: Point3, tol: Tolerance) -> Option<Self> {
        let cross = (c - a).cross(b - a);
        let len = cross.length();
        if !len.is_finite() || len <= tol.eps {
            return None;
        }
        let normal = cross / len;
        Some(Self::new(normal, a.to_vec3().dot(normal)))
    }

    /// Signed distance of `p`; positive in front.
    #[must_use]
    pub fn distance(&self, p: Point3) -> f64 {
        self.normal.dot(p.to_vec3()) - self.dist
    }

    /// Same plane facing the other way.
    #[must_use]
    pub fn mirrored(&self) -> Self {
        Self::new(-self.normal, -self.dist)
    }

    /// Orthogonal projection of `p` onto the plane.
    #[must_use]
    pub fn project(&self, p: Point3) -> Point3 {
        p - self.normal * self.distance(p)
    }

    /// Point where the segment `a..b` crosses the plane.
    ///
    /// Returns `None` when the segment runs parallel to the plane within `cos_eps`.
    #[must_use]
    pub fn intersection(&self, a: Point3, b: Point3, cos_eps: f64) -> Option<Point3> {
        let ab = b - a;
        let denom = self.normal.dot(ab);
        if denom.abs() <= cos_eps {
            return None;
        }
        Some(a + ab * ((self.dist - self.normal.dot(a.to_vec3())) / denom))
    }

    /// Two orthonormal vectors `(u, v)` spanning the plane, with `v = normal x u`.
    ///
    /// The choice only depends on the normal: when `|normal.x|` dominates (compared at a
    /// resolution of 1/1000, ties resolved in x, y, z order) `u` starts from the y axis,
    /// otherwise from the x axis, and is then projected into the plane.
    #[must_use]
    pub fn span_vectors(&self) -> Option<(Vec3, Vec3)> {
        let n = self.normal;
        let quantized = |c: f64| (c * 1000.0).abs() as i64;
        let (qx, qy, qz) = (quantized(n.x), quantized(n.y), quantized(n.z));

        let seed = if qx >= qy && qx >= qz { Vec3::Y } else { Vec3::X };
        let u = (seed - n * n.dot(seed)).normalized()?;
        Some((u, n.cross(u)))
    }
}
