//! Keyframe interpolation curves.
//!
//! A curve is a cubic-bezier timing function on the 0..=127 control-point grid
//! used by keyframe animation files: `(0,0)` and `(127,127)` are implied, only
//! the two inner control points are stored. Curves live on the END keyframe of
//! a segment and map the normalized frame fraction to a normalized value
//! fraction between the previous keyframe and this one.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Upper bound of the control-point grid.
pub const CURVE_GRID: u8 = 127;

/// Value ranges below this are treated as flat.
const FLAT_RANGE: f64 = 1e-4;

const INVERT_ITERATIONS: usize = 32;

/// Fitted curves pin the x control points to 1/3 and 2/3 of the grid.
const FIT_X1: u8 = 42;
const FIT_X2: u8 = 85;

/// One inner control point on the 0..=127 grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: u8,
    pub y: u8,
}

impl CurvePoint {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    #[inline]
    fn normalized(self) -> (f64, f64) {
        let g = f64::from(CURVE_GRID);
        (f64::from(self.x) / g, f64::from(self.y) / g)
    }
}

/// Cubic-bezier timing curve with start/end control points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Curve {
    pub start: CurvePoint,
    pub end: CurvePoint,
}

impl Default for Curve {
    fn default() -> Self {
        Curve::LINEAR
    }
}

impl Curve {
    /// Canonical linear curve written for unreduced keyframes.
    pub const LINEAR: Curve = Curve {
        start: CurvePoint::new(20, 20),
        end: CurvePoint::new(107, 107),
    };

    pub const fn new(start: CurvePoint, end: CurvePoint) -> Self {
        Self { start, end }
    }

    /// Both control points on the diagonal: the timing is the identity.
    pub fn is_linear(&self) -> bool {
        self.start.x == self.start.y && self.end.x == self.end.y
    }

    /// Normalized control points `[x1, y1, x2, y2]`.
    pub fn control_points(&self) -> [f64; 4] {
        let (x1, y1) = self.start.normalized();
        let (x2, y2) = self.end.normalized();
        [x1, y1, x2, y2]
    }

    /// Map a frame fraction in [0,1] to a value fraction in [0,1] by inverting
    /// the x bezier with a binary search.
    pub fn evaluate(&self, fraction: f64) -> f64 {
        let t = fraction.clamp(0.0, 1.0);
        // Fast path: diagonal control points are exactly linear
        if self.is_linear() {
            return t;
        }
        let [x1, y1, x2, y2] = self.control_points();
        let mut lo = 0.0f64;
        let mut hi = 1.0f64;
        let mut mid = t;
        for _ in 0..INVERT_ITERATIONS {
            let x = cubic_bezier(0.0, x1, x2, 1.0, mid);
            if (x - t).abs() < 1e-9 {
                break;
            }
            if x < t {
                lo = mid;
            } else {
                hi = mid;
            }
            mid = 0.5 * (lo + hi);
        }
        cubic_bezier(0.0, y1, y2, 1.0, mid)
    }

    /// Fit a curve to a sampled value sequence spanning one segment.
    ///
    /// Samples are taken as evenly spaced in time; the first and last samples
    /// are the segment's keyframe values. Least squares over the interior
    /// samples determines the two y control points while x stays fixed at
    /// 1/3 and 2/3. Short, flat or non-normalizable sequences (start equals
    /// end) yield [`Curve::LINEAR`].
    pub fn fit(values: &[f64]) -> Curve {
        let n = values.len();
        if n <= 2 {
            return Curve::LINEAR;
        }
        let first = values[0];
        let last = values[n - 1];
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        let span = last - first;
        if !(max - min).is_finite() || max - min < FLAT_RANGE || span.abs() < FLAT_RANGE {
            return Curve::LINEAR;
        }

        let denom = (n - 1) as f64;
        let mut normal = Matrix2::<f64>::zeros();
        let mut rhs = Vector2::<f64>::zeros();
        for (i, v) in values.iter().enumerate().take(n - 1).skip(1) {
            let s = i as f64 / denom;
            let u = 1.0 - s;
            let b1 = 3.0 * u * u * s;
            let b2 = 3.0 * u * s * s;
            let residual = (v - first) / span - s * s * s;
            normal[(0, 0)] += b1 * b1;
            normal[(0, 1)] += b1 * b2;
            normal[(1, 0)] += b1 * b2;
            normal[(1, 1)] += b2 * b2;
            rhs[0] += b1 * residual;
            rhs[1] += b2 * residual;
        }
        let Some(inverse) = normal.try_inverse() else {
            return Curve::LINEAR;
        };
        let solved = inverse * rhs;
        let quantize = |y: f64| (y.clamp(0.0, 1.0) * f64::from(CURVE_GRID)).round() as u8;
        let y1 = quantize(solved[0]);
        let y2 = quantize(solved[1]);
        if y1 == FIT_X1 && y2 == FIT_X2 {
            return Curve::LINEAR;
        }
        Curve::new(CurvePoint::new(FIT_X1, y1), CurvePoint::new(FIT_X2, y2))
    }
}

#[inline]
fn cubic_bezier(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let u = 1.0 - t;
    u * u * u * p0 + 3.0 * u * u * t * p1 + 3.0 * u * t * t * p2 + t * t * t * p3
}

/// Interpolation curves for the four animated channels of a bone keyframe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoneCurves {
    #[serde(default)]
    pub translate_x: Curve,
    #[serde(default)]
    pub translate_y: Curve,
    #[serde(default)]
    pub translate_z: Curve,
    #[serde(default)]
    pub rotate: Curve,
}

impl BoneCurves {
    pub const LINEAR: BoneCurves = BoneCurves {
        translate_x: Curve::LINEAR,
        translate_y: Curve::LINEAR,
        translate_z: Curve::LINEAR,
        rotate: Curve::LINEAR,
    };

    /// Translation curve for axis 0 (x), 1 (y) or 2 (z).
    pub fn translate(&self, axis: usize) -> Curve {
        match axis {
            0 => self.translate_x,
            1 => self.translate_y,
            _ => self.translate_z,
        }
    }

    pub fn set_translate(&mut self, axis: usize, curve: Curve) {
        match axis {
            0 => self.translate_x = curve,
            1 => self.translate_y = curve,
            _ => self.translate_z = curve,
        }
    }

    pub fn is_linear(&self) -> bool {
        self.translate_x.is_linear()
            && self.translate_y.is_linear()
            && self.translate_z.is_linear()
            && self.rotate.is_linear()
    }
}
