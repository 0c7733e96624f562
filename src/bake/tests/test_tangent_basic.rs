use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bake::{
    TangentFrame, TangentSpaceEncoder, decode_direction, encode_color, orientation_factor,
};
use crate::geom::Vec3;

fn random_unit(rng: &mut StdRng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let len = v.length();
        if len > 0.1 && len <= 1.0 {
            return v / len;
        }
    }
}

#[test]
fn encoded_directions_decode_within_one_step() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let encoder = TangentSpaceEncoder::unclamped();
    let normal = Vec3::new(0.0, 0.6, 0.8);
    let frame = TangentFrame::new(Vec3::X, normal.cross(Vec3::X), normal);

    for _ in 0..500 {
        let dir = random_unit(&mut rng);
        let encoded = encoder.encode(dir * rng.random_range(0.01..50.0), normal, &frame);
        assert!(!encoded.clamped);

        let decoded = decode_direction(encoded.rgba, &frame);
        let local_error = frame.to_tangent_space(decoded - dir);
        for c in [local_error.x, local_error.y, local_error.z] {
            assert!(c.abs() <= 2.0 / 255.0, "dir {dir:?} decoded {decoded:?}");
        }
    }
}

#[test]
fn orientation_factor_stays_in_range() {
    let mut rng = StdRng::seed_from_u64(7);
    let normal = Vec3::Z;
    for _ in 0..200 {
        let alpha = orientation_factor(random_unit(&mut rng), normal);
        assert!(alpha >= 1);
    }
    assert_eq!(orientation_factor(-Vec3::Z, normal), 1);
    assert_eq!(orientation_factor(Vec3::X, normal), 1);
    assert_eq!(orientation_factor(Vec3::Z, normal), 255);
}

#[test]
fn grazing_directions_are_clamped_to_max_incidence() {
    let encoder = TangentSpaceEncoder::with_max_incidence(80.0, 1e-4);
    let normal = Vec3::Z;

    let steep = Vec3::new(0.3, 0.0, 1.0);
    let (kept, clamped) = encoder.clamp_direction(steep, normal);
    assert!(!clamped);
    assert!((kept - steep.normalized_or_zero()).length() < 1e-12);

    for dir in [Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, -0.5)] {
        let (clamped_dir, clamped) = encoder.clamp_direction(dir, normal);
        assert!(clamped);
        assert!((clamped_dir.length() - 1.0).abs() < 1e-9);
        let cos = clamped_dir.dot(normal);
        assert!((cos - 80f64.to_radians().cos()).abs() < 1e-4, "cos {cos}");
        // The azimuth in the tangent plane survives.
        let azimuth = |v: Vec3| v.y.atan2(v.x);
        assert!((azimuth(clamped_dir) - azimuth(dir)).abs() < 1e-9);
    }

    let frame = TangentFrame::new(Vec3::X, Vec3::Y, Vec3::Z);
    let encoded = encoder.encode(Vec3::X * 3.0, normal, &frame);
    assert!(encoded.clamped);
    assert!(!encoded.check_failed);
}

#[test]
fn unclamped_encoder_keeps_back_facing_directions() {
    let encoder = TangentSpaceEncoder::unclamped();
    let (dir, clamped) = encoder.clamp_direction(Vec3::new(0.0, 0.0, -2.0), Vec3::Z);
    assert!(!clamped);
    assert_eq!(dir, -Vec3::Z);
}

#[test]
fn zero_direction_encodes_as_neutral_tangent_space() {
    let encoder = TangentSpaceEncoder::with_max_incidence(80.0, 1e-4);
    let frame = TangentFrame::new(Vec3::X, Vec3::Y, Vec3::Z);
    let encoded = encoder.encode(Vec3::ZERO, Vec3::Z, &frame);
    assert!(!encoded.clamped);
    assert_eq!(encoded.rgba, [127, 127, 127, 1]);
}

#[test]
fn colors_saturate() {
    assert_eq!(encode_color(Vec3::new(300.0, -5.0, 12.6)), [255, 0, 13]);
    assert_eq!(encode_color(Vec3::new(0.4, 254.6, 255.0)), [0, 255, 255]);
}

#[test]
fn texture_axes_are_projected_into_the_face() {
    let frame = TangentFrame::from_texture_axes(Vec3::Z, Vec3::new(1.0, 0.0, 1.0), Vec3::Y);
    assert!((frame.tangent - Vec3::X).length() < 1e-12, "{:?}", frame.tangent);
    assert!((frame.bitangent - Vec3::Y).length() < 1e-12);
    assert_eq!(frame.normal, Vec3::Z);

    let scaled = TangentFrame::from_texture_axes(Vec3::Z, Vec3::X * 0.25, Vec3::Y * 4.0);
    assert!((scaled.tangent - Vec3::X).length() < 1e-12);
    assert!((scaled.bitangent - Vec3::Y).length() < 1e-12);
}

#[test]
fn degenerate_texture_axes_give_zero_tangents() {
    let parallel = TangentFrame::from_texture_axes(Vec3::Z, Vec3::X, Vec3::X * 2.0);
    assert_eq!(parallel.tangent, Vec3::ZERO);
    assert_eq!(parallel.bitangent, Vec3::ZERO);

    // Texture plane perpendicular to the face.
    let edge_on = TangentFrame::from_texture_axes(Vec3::Z, Vec3::X, Vec3::Z);
    assert_eq!(edge_on.tangent, Vec3::ZERO);
    assert_eq!(edge_on.normal, Vec3::Z);
}
