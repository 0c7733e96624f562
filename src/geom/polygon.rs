//! Convex planar polygons and the side/overlap/clip algebra used for patch footprints.
//!
//! Vertices are ordered clockwise when the polygon is seen from the front of its plane. The
//! edge plane of edge `i` contains `v[i]`, `v[i+1]` and the plane normal; the polygon interior
//! lies in front of every edge plane.

use super::{Plane3, Point3, Tolerance, Vec3};

/// Relation of a polygon to a plane.
///
/// The variants combine the three base flags `On`, `Front` and `Back`; `InIdentical` and
/// `InMirrored` are reported when every vertex lies on the plane, telling whether the polygon
/// faces the same way as the plane or the opposite way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Empty,
    On,
    Front,
    FrontAndOn,
    Back,
    BackAndOn,
    Both,
    BothAndOn,
    InIdentical,
    InMirrored,
}

impl Side {
    /// Folds the "and on" variants into their base side.
    #[must_use]
    pub const fn simplified(self) -> Self {
        match self {
            Self::FrontAndOn => Self::Front,
            Self::BackAndOn => Self::Back,
            Self::BothAndOn => Self::Both,
            other => other,
        }
    }

    #[must_use]
    pub const fn is_coplanar(self) -> bool {
        matches!(self, Self::InIdentical | Self::InMirrored)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PolygonError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon vertices are collinear")]
    Collinear,
    #[error("edge {edge} is degenerate (zero length)")]
    DegenerateEdge { edge: usize },
    #[error("split plane is parallel to edge {edge}")]
    ParallelSplit { edge: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon3 {
    pub plane: Plane3,
    pub vertices: Vec<Point3>,
}

impl Polygon3 {
    #[must_use]
    pub const fn new(plane: Plane3, vertices: Vec<Point3>) -> Self {
        Self { plane, vertices }
    }

    /// Builds a polygon and derives its plane from the vertex winding.
    pub fn from_vertices(vertices: Vec<Point3>) -> Result<Self, PolygonError> {
        if vertices.len() < 3 {
            return Err(PolygonError::TooFewVertices(vertices.len()));
        }
        let plane = vertices
            .windows(2)
            .skip(1)
            .find_map(|w| Plane3::from_points(vertices[0], w[0], w[1], Tolerance::ZERO_LENGTH))
            .ok_or(PolygonError::Collinear)?;
        Ok(Self::new(plane, vertices))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[must_use]
    pub fn centroid(&self) -> Option<Point3> {
        Point3::centroid(&self.vertices)
    }

    /// Enclosed area, independent of winding.
    #[must_use]
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        let sum = (0..n).fold(Vec3::ZERO, |acc, i| {
            let a = self.vertices[i].to_vec3();
            let b = self.vertices[(i + 1) % n].to_vec3();
            acc + a.cross(b)
        });
        self.plane.normal.dot(sum).abs() * 0.5
    }

    /// Polygon with reversed facing (reversed vertex order, mirrored plane).
    #[must_use]
    pub fn mirrored(&self) -> Self {
        let mut vertices = self.vertices.clone();
        vertices.reverse();
        Self::new(self.plane.mirrored(), vertices)
    }

    /// Plane through edge `index`, facing the polygon interior.
    pub fn edge_plane(&self, index: usize, tol: Tolerance) -> Result<Plane3, PolygonError> {
        let n = self.vertices.len();
        if n < 2 {
            return Err(PolygonError::TooFewVertices(n));
        }
        let a = self.vertices[index % n];
        let b = self.vertices[(index + 1) % n];
        Plane3::from_points(a, b, a - self.plane.normal, tol)
            .ok_or(PolygonError::DegenerateEdge { edge: index })
    }

    pub fn edge_planes(&self, tol: Tolerance) -> Result<Vec<Plane3>, PolygonError> {
        (0..self.vertices.len())
            .map(|i| self.edge_plane(i, tol))
            .collect()
    }

    /// Classifies the polygon against `plane`, treating `|distance| <= eps` as on.
    #[must_use]
    pub fn what_side(&self, plane: &Plane3, eps: f64) -> Side {
        if self.vertices.is_empty() {
            return Side::Empty;
        }

        let (mut front, mut back, mut on) = (false, false, false);
        for &v in &self.vertices {
            let d = plane.distance(v);
            if d > eps {
                front = true;
            } else if d < -eps {
                back = true;
            } else {
                on = true;
            }
        }

        match (front, back, on) {
            (true, true, true) => Side::BothAndOn,
            (true, true, false) => Side::Both,
            (true, false, true) => Side::FrontAndOn,
            (true, false, false) => Side::Front,
            (false, true, true) => Side::BackAndOn,
            (false, true, false) => Side::Back,
            _ if self.plane.normal.dot(plane.normal) > 0.0 => Side::InIdentical,
            _ => Side::InMirrored,
        }
    }

    #[must_use]
    pub fn what_side_simple(&self, plane: &Plane3, eps: f64) -> Side {
        self.what_side(plane, eps).simplified()
    }

    /// Whether the two coplanar polygons share interior area.
    ///
    /// Polygons on different planes never overlap. With `report_touches`, polygons that only
    /// share a boundary segment count as overlapping.
    pub fn overlaps(
        &self,
        other: &Self,
        report_touches: bool,
        eps: f64,
    ) -> Result<bool, PolygonError> {
        if !other.what_side(&self.plane, eps).is_coplanar() {
            return Ok(false);
        }
        Ok(no_edge_excludes(self, other, report_touches, eps)?
            && no_edge_excludes(other, self, report_touches, eps)?)
    }

    /// Whether `other` lies completely inside `self`.
    ///
    /// With `may_touch`, `other` may share boundary points with `self`.
    pub fn encloses(&self, other: &Self, may_touch: bool, eps: f64) -> Result<bool, PolygonError> {
        if !other.what_side(&self.plane, eps).is_coplanar() {
            return Ok(false);
        }
        for i in 0..self.vertices.len() {
            let edge = self.edge_plane(i, Tolerance::ZERO_LENGTH)?;
            match other.what_side(&edge, eps) {
                Side::Front => {}
                Side::FrontAndOn if may_touch => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Splits the polygon along `plane` into `(front, back)` pieces.
    ///
    /// Vertices within `eps` of the plane go to both pieces; edges that cross the plane
    /// contribute their intersection point to both pieces.
    pub fn splits(&self, plane: &Plane3, eps: f64) -> Result<(Self, Self), PolygonError> {
        let mut front = Self::new(self.plane, Vec::new());
        let mut back = Self::new(self.plane, Vec::new());
        let n = self.vertices.len();

        for i in 0..n {
            let cur = self.vertices[i];
            let next = self.vertices[(i + 1) % n];
            let d_cur = plane.distance(cur);
            let d_next = plane.distance(next);

            if d_cur > eps {
                front.vertices.push(cur);
            } else if d_cur < -eps {
                back.vertices.push(cur);
            } else {
                front.vertices.push(cur);
                back.vertices.push(cur);
            }

            let crosses = (d_cur > eps && d_next < -eps) || (d_cur < -eps && d_next > eps);
            if crosses {
                let hit = plane
                    .intersection(cur, next, 0.0)
                    .ok_or(PolygonError::ParallelSplit { edge: i })?;
                front.vertices.push(hit);
                back.vertices.push(hit);
            }
        }

        Ok((front, back))
    }

    /// Cuts `self` along the edge planes of `splitter`.
    ///
    /// The pieces outside `splitter` come first; the final element is the part of `self`
    /// inside `splitter` (only meaningful when the two polygons overlap).
    pub fn chopped_up_along(&self, splitter: &Self, eps: f64) -> Result<Vec<Self>, PolygonError> {
        let mut pieces = Vec::new();
        let mut fragment = self.clone();

        for i in 0..splitter.vertices.len() {
            let edge = splitter.edge_plane(i, Tolerance::ZERO_LENGTH)?;
            if fragment.what_side_simple(&edge, eps) != Side::Both {
                continue;
            }
            let (front, back) = fragment.splits(&edge, eps)?;
            pieces.push(back);
            fragment = front;
        }

        pieces.push(fragment);
        Ok(pieces)
    }
}

/// True unless some edge plane of `a` has all of `b` behind it.
fn no_edge_excludes(
    a: &Polygon3,
    b: &Polygon3,
    report_touches: bool,
    eps: f64,
) -> Result<bool, PolygonError> {
    for i in 0..a.vertices.len() {
        let edge = a.edge_plane(i, Tolerance::ZERO_LENGTH)?;
        match b.what_side(&edge, eps) {
            Side::Back => return Ok(false),
            Side::BackAndOn if !report_touches => return Ok(false),
            _ => {}
        }
    }
    Ok(true)
}
