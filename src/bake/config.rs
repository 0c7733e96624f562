//! Bake parameters.
//!
//! All distances are in world units. The defaults are tuned values that scenes have been baked
//! with so far; they are exposed so a scene can override them, not because other values are
//! known to be better.

use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bake config XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("invalid bake config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Parameters shared by every surface of a bake.
///
/// Loaded from a single XML element whose attributes override the defaults:
///
/// ```xml
/// <bake patch-size="64" max-incidence-angle="75" />
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    /// Edge length of one radiosity patch.
    #[serde(rename = "@patch-size")]
    pub patch_size: f64,

    /// Slab thickness for footprint/face overlap and clipping tests.
    #[serde(rename = "@round-epsilon")]
    pub round_epsilon: f64,

    /// Offset of planar patch coordinates along the face normal.
    #[serde(rename = "@planar-normal-safety")]
    pub planar_normal_safety: f64,

    /// Inward pull of the auxiliary sample points at footprint corners.
    #[serde(rename = "@sample-inset")]
    pub sample_inset: f64,

    /// Length of the initial `energy_from_dir` along the patch normal.
    #[serde(rename = "@initial-energy-dir-length")]
    pub initial_energy_dir_length: f64,

    /// Largest angle between the stored light direction and the normal on curved surfaces.
    #[serde(rename = "@max-incidence-angle")]
    pub max_incidence_angle_deg: f64,

    /// Allowed deviation of `cos(angle)` from the bound after clamping.
    #[serde(rename = "@incidence-check-tolerance")]
    pub incidence_check_tolerance: f64,

    /// Number of tessellations tried before a curved surface is declared too large.
    #[serde(rename = "@lightmap-retry-limit")]
    pub lightmap_retry_limit: u32,

    /// Initial lightmap-mesh edge length of curved surfaces, in patch sizes.
    #[serde(rename = "@curved-max-length-factor")]
    pub curved_max_length_factor: f64,

    /// Curved patch coordinates are lifted by `round_epsilon` times this along the normal.
    #[serde(rename = "@curved-normal-safety-factor")]
    pub curved_normal_safety_factor: f64,

    /// Curved patches with a smaller vertex area are marked as outside the surface.
    #[serde(rename = "@curved-min-inside-area")]
    pub curved_min_inside_area: f64,

    /// Flatness tolerance of the collision tessellation.
    #[serde(rename = "@collision-max-curve-error")]
    pub collision_max_curve_error: f64,

    /// Maximum edge length of the collision tessellation; not positive means unlimited.
    #[serde(rename = "@collision-max-curve-length")]
    pub collision_max_curve_length: f64,

    /// Collision BVH nodes smaller than this are not split further.
    #[serde(rename = "@collision-min-node-size")]
    pub collision_min_node_size: f64,

    /// Lookups of baked colors accept points up to this far off the face plane.
    #[serde(rename = "@lookup-plane-distance")]
    pub lookup_plane_distance: f64,

    /// Lookups of baked colors accept points up to this far outside the face edges.
    #[serde(rename = "@lookup-edge-slack")]
    pub lookup_edge_slack: f64,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            patch_size: 200.0,
            round_epsilon: 0.08,
            planar_normal_safety: 0.1,
            sample_inset: 0.1,
            initial_energy_dir_length: 0.02,
            max_incidence_angle_deg: 80.0,
            incidence_check_tolerance: 1e-4,
            lightmap_retry_limit: 10,
            curved_max_length_factor: 2.0,
            curved_normal_safety_factor: 10.0,
            curved_min_inside_area: 1.0,
            collision_max_curve_error: 24.0,
            collision_max_curve_length: -1.0,
            collision_min_node_size: 40.0,
            lookup_plane_distance: 0.5,
            lookup_edge_slack: 0.1,
        }
    }
}

impl BakeConfig {
    /// Defaults with a different patch size.
    #[must_use]
    pub fn with_patch_size(patch_size: f64) -> Self {
        Self {
            patch_size,
            ..Self::default()
        }
    }

    /// Parses and validates a `<bake .../>` element.
    pub fn from_xml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = from_str(input)?;
        config.validate()?;
        log::debug!("loaded bake config: patch size {}", config.patch_size);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("patch-size", self.patch_size),
            ("curved-max-length-factor", self.curved_max_length_factor),
            ("collision-max-curve-error", self.collision_max_curve_error),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }

        let non_negative = [
            ("round-epsilon", self.round_epsilon),
            ("planar-normal-safety", self.planar_normal_safety),
            ("sample-inset", self.sample_inset),
            ("initial-energy-dir-length", self.initial_energy_dir_length),
            ("incidence-check-tolerance", self.incidence_check_tolerance),
            ("curved-normal-safety-factor", self.curved_normal_safety_factor),
            ("curved-min-inside-area", self.curved_min_inside_area),
            ("collision-min-node-size", self.collision_min_node_size),
            ("lookup-plane-distance", self.lookup_plane_distance),
            ("lookup-edge-slack", self.lookup_edge_slack),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a non-negative number, got {value}"),
                });
            }
        }

        if !(self.max_incidence_angle_deg > 0.0 && self.max_incidence_angle_deg < 90.0) {
            return Err(ConfigError::Invalid {
                field: "max-incidence-angle",
                reason: format!(
                    "must lie strictly between 0 and 90 degrees, got {}",
                    self.max_incidence_angle_deg
                ),
            });
        }

        if !(1..=32).contains(&self.lightmap_retry_limit) {
            return Err(ConfigError::Invalid {
                field: "lightmap-retry-limit",
                reason: format!("must be in 1..=32, got {}", self.lightmap_retry_limit),
            });
        }

        Ok(())
    }
}
