mod bezier;
mod bvh;
mod core;
mod plane;
mod polygon;

pub use bezier::{BezierError, BezierPatch, BezierVertex, FLAT_SQR_TOLERANCE, Subdivision};
pub use bvh::{Bvh, BvhLimits};
pub use core::{BBox, Point3, Tolerance, Vec3};
pub use plane::Plane3;
pub use polygon::{Polygon3, PolygonError, Side};
