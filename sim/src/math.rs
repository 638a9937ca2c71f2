//! Small vector helpers shared by the systems.
//!
//! World space is Y-up; the battlefield plane is XZ. Planar vectors are
//! `Vec2(x, z)`.

use glam::{Vec2, Vec3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Below this length a direction is treated as undefined.
pub const EPSILON: f32 = 1e-4;

/// Direction used when a normalization would divide by ~zero.
pub const DEFAULT_DIR: Vec2 = Vec2::X;

#[inline]
pub fn planar(v: Vec3) -> Vec2 {
    Vec2::new(v.x, v.z)
}

#[inline]
pub fn lift(v: Vec2, y: f32) -> Vec3 {
    Vec3::new(v.x, y, v.y)
}

/// Planar distance squared between two world points.
#[inline]
pub fn planar_dist_sq(a: Vec3, b: Vec3) -> f32 {
    planar(a).distance_squared(planar(b))
}

/// Normalize, falling back to `fallback` for near-zero vectors.
#[inline]
pub fn normalize_or(v: Vec2, fallback: Vec2) -> Vec2 {
    let len = v.length();
    if len < EPSILON {
        fallback
    } else {
        v / len
    }
}

/// 2D cross product (z of the 3D cross).
#[inline]
pub fn det(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Heading angle of a planar direction.
#[inline]
pub fn heading(v: Vec2) -> f32 {
    v.y.atan2(v.x)
}

#[inline]
pub fn from_heading(angle: f32) -> Vec2 {
    Vec2::new(angle.cos(), angle.sin())
}

/// Wrap an angle into (-PI, PI].
pub fn wrap_angle(mut a: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    a %= TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Clamp the length of a planar vector.
#[inline]
pub fn clamp_length(v: Vec2, max: f32) -> Vec2 {
    let len_sq = v.length_squared();
    if len_sq > max * max && len_sq > 0.0 {
        v * (max / len_sq.sqrt())
    } else {
        v
    }
}

/// Unnormalized Gaussian bump centered at `mean`.
#[inline]
pub fn gaussian(x: f32, mean: f32, sigma: f32) -> f32 {
    let s = sigma.max(EPSILON);
    let d = x - mean;
    (-(d * d) / (2.0 * s * s)).exp()
}

/// Distance from point `p` to segment `a..b`, and the segment parameter.
pub fn point_segment_distance(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < EPSILON * EPSILON {
        return (p.distance(a), 0.0);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (p.distance(a + ab * t), t)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Random stream for one entity on one tick.
///
/// Seeding by (world seed, tick, slot, stream) keeps every draw independent
/// of iteration order, so parallel and sequential runs agree.
pub fn entity_rng(seed: u64, tick: u64, slot: u32, stream: u64) -> ChaCha8Rng {
    let mut h = splitmix64(seed);
    h = splitmix64(h ^ tick);
    h = splitmix64(h ^ slot as u64);
    h = splitmix64(h ^ stream);
    ChaCha8Rng::seed_from_u64(h)
}
