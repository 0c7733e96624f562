//! Tangent-space encoding of baked light directions.
//!
//! A direction texel stores the incident light direction rotated into the surface's
//! (tangent, bitangent, normal) frame, each component mapped from `[-1, 1]` to `[0, 255]`.
//! The alpha channel holds the orientation factor `dot(direction, normal)` scaled to
//! `[1, 255]`; the lower bound is 1 because shading divides by it.

use crate::geom::Vec3;

/// Tangent-space basis at one texel. The vectors are expected to be unit length or zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TangentFrame {
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub normal: Vec3,
}

impl TangentFrame {
    #[must_use]
    pub const fn new(tangent: Vec3, bitangent: Vec3, normal: Vec3) -> Self {
        Self {
            tangent,
            bitangent,
            normal,
        }
    }

    /// Frame of a planar face whose texture is mapped by the axes `tex_u`, `tex_v`.
    ///
    /// The texture axes are projected into the face plane along `tex_u x tex_v`, so the
    /// tangent keeps pointing where the texture's s axis points. Degenerate projections give
    /// zero tangents.
    #[must_use]
    pub fn from_texture_axes(normal: Vec3, tex_u: Vec3, tex_v: Vec3) -> Self {
        let u_x_v = tex_u.cross(tex_v);
        let denom = normal.dot(u_x_v);
        if denom.abs() < 1e-9 {
            return Self::new(Vec3::ZERO, Vec3::ZERO, normal);
        }

        let tangent = (tex_u + u_x_v * (-normal.dot(tex_u) / denom)).normalized_or_zero();
        let bitangent = (tex_v + u_x_v * (-normal.dot(tex_v) / denom)).normalized_or_zero();
        Self::new(tangent, bitangent, normal)
    }

    /// Components of `dir` along the tangent, bitangent and normal.
    #[must_use]
    pub fn to_tangent_space(&self, dir: Vec3) -> Vec3 {
        Vec3::new(
            self.tangent.dot(dir),
            self.bitangent.dot(dir),
            self.normal.dot(dir),
        )
    }

    #[must_use]
    pub fn from_tangent_space(&self, local: Vec3) -> Vec3 {
        self.tangent * local.x + self.bitangent * local.y + self.normal * local.z
    }
}

/// Outcome of encoding one texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedDirection {
    pub rgba: [u8; 4],
    /// The direction was pulled back to the maximum incidence angle.
    pub clamped: bool,
    /// After clamping, the angle still missed the bound by more than the tolerance.
    pub check_failed: bool,
}

/// Maximum-incidence clamp applied before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IncidenceClamp {
    max_angle: f64,
    cos_max: f64,
    tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TangentSpaceEncoder {
    clamp: Option<IncidenceClamp>,
}

impl TangentSpaceEncoder {
    /// Encoder that stores directions as they are.
    #[must_use]
    pub const fn unclamped() -> Self {
        Self { clamp: None }
    }

    /// Encoder that first pulls directions more than `max_angle_deg` away from the normal back
    /// onto that angle, and flags results whose cosine misses the bound by more than
    /// `tolerance`.
    #[must_use]
    pub fn with_max_incidence(max_angle_deg: f64, tolerance: f64) -> Self {
        let max_angle = max_angle_deg.to_radians();
        Self {
            clamp: Some(IncidenceClamp {
                max_angle,
                cos_max: max_angle.cos(),
                tolerance,
            }),
        }
    }

    /// Normalizes `dir` and, if this encoder clamps, limits its angle to the normal.
    ///
    /// Returns the direction and whether it was clamped. The correction adds a multiple of
    /// the normal chosen by the law of sines, so the direction keeps its azimuth in the
    /// tangent plane.
    #[must_use]
    pub fn clamp_direction(&self, dir: Vec3, normal: Vec3) -> (Vec3, bool) {
        let dir = dir.normalized_or_zero();
        let Some(clamp) = self.clamp else {
            return (dir, false);
        };

        let cos_in = dir.dot(normal);
        if cos_in >= clamp.cos_max || dir == Vec3::ZERO {
            return (dir, false);
        }

        let incidence = cos_in.clamp(-1.0, 1.0).acos();
        let lift = (incidence - clamp.max_angle).sin() / clamp.max_angle.sin();
        ((dir + normal * lift).normalized_or_zero(), true)
    }

    /// Encodes `energy_from_dir` of a patch with normal `normal` for the texel with basis
    /// `frame`.
    ///
    /// The clamp and the orientation factor refer to the patch normal; the rotation uses the
    /// texel frame. The two differ on curved surfaces, where the patch normal comes from the
    /// traced surface point and the frame from the lightmap mesh.
    #[must_use]
    pub fn encode(
        &self,
        energy_from_dir: Vec3,
        normal: Vec3,
        frame: &TangentFrame,
    ) -> EncodedDirection {
        let (dir, clamped) = self.clamp_direction(energy_from_dir, normal);

        let check_failed = match self.clamp {
            Some(clamp) if clamped => (dir.dot(normal) - clamp.cos_max).abs() > clamp.tolerance,
            _ => false,
        };

        let local = frame.to_tangent_space(dir).normalized_or_zero();
        EncodedDirection {
            rgba: [
                encode_component(local.x),
                encode_component(local.y),
                encode_component(local.z),
                orientation_factor(dir, normal),
            ],
            clamped,
            check_failed,
        }
    }
}

/// `dot(dir, normal)` scaled to `[1, 255]`.
#[must_use]
pub fn orientation_factor(dir: Vec3, normal: Vec3) -> u8 {
    let scaled = (dir.dot(normal) * 255.0 + 0.49).floor();
    scaled.clamp(1.0, 255.0) as u8
}

/// Color texel of a solver energy already in display range; out-of-range values saturate.
#[must_use]
pub fn encode_color(total_energy: Vec3) -> [u8; 3] {
    let channel = |c: f64| (c + 0.49).clamp(0.0, 255.0) as u8;
    [
        channel(total_energy.x),
        channel(total_energy.y),
        channel(total_energy.z),
    ]
}

/// World-space direction stored in `rgba`, before re-normalization.
#[must_use]
pub fn decode_direction(rgba: [u8; 4], frame: &TangentFrame) -> Vec3 {
    let component = |c: u8| f64::from(c) / 255.0 * 2.0 - 1.0;
    frame.from_tangent_space(Vec3::new(
        component(rgba[0]),
        component(rgba[1]),
        component(rgba[2]),
    ))
}

fn encode_component(x: f64) -> u8 {
    ((x + 1.0) * 0.5 * 255.0 + 0.49).clamp(0.0, 255.0) as u8
}
