//! Quaternion and vector helpers shared by the evaluator, the solvers and the reducer.
//!
//! - lerp/nlerp/slerp with shortest-arc sign correction
//! - twist/swing separation about an axis
//! - hinge projection (swing reduced to a single signed axis)
//! - slerp-parameter recovery for a sample between two rotations

use std::f64::consts::PI;

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};

/// Vectors or quaternion parts shorter than this are treated as degenerate.
pub const GEOMETRY_EPSILON: f64 = 1e-9;

const SLERP_T_ITERATIONS: usize = 48;
const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_894_9;

/// Linear interpolation of scalars.
#[inline]
pub fn lerp_f64(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Absolute quaternion dot product; 1.0 means identical rotations regardless of sign.
#[inline]
pub fn quat_dot_abs(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    a.coords.dot(&b.coords).abs().min(1.0)
}

/// Flip `b` into the hemisphere of `a` so interpolation takes the shortest arc.
#[inline]
fn align_hemisphere(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    if a.coords.dot(&b.coords) < 0.0 {
        UnitQuaternion::new_unchecked(-b.into_inner())
    } else {
        *b
    }
}

/// Quaternion NLERP with shortest-arc correction.
pub fn nlerp(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>, t: f64) -> UnitQuaternion<f64> {
    let b = align_hemisphere(a, b);
    let coords = a.coords.lerp(&b.coords, t);
    if coords.norm_squared() <= GEOMETRY_EPSILON {
        return *a;
    }
    UnitQuaternion::new_normalize(Quaternion::from(coords))
}

/// Spherical interpolation along the shortest arc.
/// Falls back to NLERP when the two rotations are too close for a stable slerp.
pub fn slerp(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>, t: f64) -> UnitQuaternion<f64> {
    if t <= 0.0 {
        return *a;
    }
    if t >= 1.0 {
        return *b;
    }
    let b = align_hemisphere(a, b);
    a.try_slerp(&b, t, GEOMETRY_EPSILON)
        .unwrap_or_else(|| nlerp(a, &b, t))
}

/// Shortest rotation carrying `from` onto `to`.
/// Zero-length or opposite vectors yield the identity instead of NaN.
pub fn rotation_between(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    if from.norm() <= GEOMETRY_EPSILON || to.norm() <= GEOMETRY_EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::rotation_between(from, to).unwrap_or_else(UnitQuaternion::identity)
}

/// Separate `rotation` into `(twist, swing)` with `rotation = swing * twist`,
/// where `twist` rotates purely about `axis`.
///
/// A degenerate axis returns `(identity, rotation)`. A swing of exactly 180°
/// (no component about the axis) returns an identity twist.
pub fn separate_twist(
    rotation: &UnitQuaternion<f64>,
    axis: &Vector3<f64>,
) -> (UnitQuaternion<f64>, UnitQuaternion<f64>) {
    let Some(axis) = Unit::try_new(*axis, GEOMETRY_EPSILON) else {
        return (UnitQuaternion::identity(), *rotation);
    };
    let q = rotation.quaternion();
    let projected = axis.into_inner() * q.imag().dot(&axis);
    let raw = Quaternion::from_parts(q.scalar(), projected);
    if raw.norm_squared() <= GEOMETRY_EPSILON {
        return (UnitQuaternion::identity(), *rotation);
    }
    let twist = UnitQuaternion::new_normalize(raw);
    let swing = rotation * twist.inverse();
    (twist, swing)
}

/// Reduce a joint rotation to a single-axis bend: the twist about `bone_axis`
/// is discarded, then only the signed component of the remaining swing about
/// `hinge_axis` is kept.
pub fn hinge_rotation(
    rotation: &UnitQuaternion<f64>,
    bone_axis: &Vector3<f64>,
    hinge_axis: &Vector3<f64>,
) -> UnitQuaternion<f64> {
    let (_, swing) = separate_twist(rotation, bone_axis);
    let (hinge, _) = separate_twist(&swing, hinge_axis);
    hinge
}

/// Signed rotation angle of `rotation` about `axis`, wrapped to (-π, π].
pub fn twist_angle(rotation: &UnitQuaternion<f64>, axis: &Vector3<f64>) -> f64 {
    let Some(axis) = axis.try_normalize(GEOMETRY_EPSILON) else {
        return 0.0;
    };
    let q = rotation.quaternion();
    let angle = 2.0 * q.imag().dot(&axis).atan2(q.scalar());
    if angle > PI {
        angle - 2.0 * PI
    } else if angle <= -PI {
        angle + 2.0 * PI
    } else {
        angle
    }
}

/// Limit a rotation's angle to `max_angle` radians, keeping its axis.
pub fn clamp_rotation_angle(rotation: &UnitQuaternion<f64>, max_angle: f64) -> UnitQuaternion<f64> {
    match rotation.axis_angle() {
        Some((axis, angle)) if angle > max_angle => UnitQuaternion::from_axis_angle(&axis, max_angle),
        _ => *rotation,
    }
}

/// Find the interpolation fraction `t ∈ [0,1]` for which `slerp(start, end, t)`
/// comes closest to `sample`.
///
/// Golden-section search over the geodesic between `start` and `end`; when the
/// two endpoints coincide every `t` is equivalent and 0.0 is returned.
pub fn find_slerp_t(
    start: &UnitQuaternion<f64>,
    end: &UnitQuaternion<f64>,
    sample: &UnitQuaternion<f64>,
) -> f64 {
    if start.angle_to(end) <= GEOMETRY_EPSILON {
        return 0.0;
    }
    let cost = |t: f64| slerp(start, end, t).angle_to(sample);

    let mut lo = 0.0f64;
    let mut hi = 1.0f64;
    let mut x1 = hi - GOLDEN_RATIO_CONJUGATE * (hi - lo);
    let mut x2 = lo + GOLDEN_RATIO_CONJUGATE * (hi - lo);
    let mut f1 = cost(x1);
    let mut f2 = cost(x2);
    for _ in 0..SLERP_T_ITERATIONS {
        if f1 <= f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - GOLDEN_RATIO_CONJUGATE * (hi - lo);
            f1 = cost(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + GOLDEN_RATIO_CONJUGATE * (hi - lo);
            f2 = cost(x2);
        }
    }
    let mid = 0.5 * (lo + hi);

    // The search interval never reaches the endpoints exactly.
    let mut best = (mid, cost(mid));
    for t in [0.0, 1.0] {
        let c = cost(t);
        if c < best.1 {
            best = (t, c);
        }
    }
    best.0.clamp(0.0, 1.0)
}
