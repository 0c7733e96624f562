//! Lightmap patch decomposition and writeback for planar faces and Bezier patches.
//!
//! [`geom`] holds the geometry kernel (planes, convex polygons, Bezier control grids, a BVH).
//! [`bake`] turns surfaces into radiosity patch meshes, hands them to an external solver and
//! encodes the result into a lightmap atlas.

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::similar_names
)]

pub mod bake;
pub mod geom;
