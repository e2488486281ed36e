//! Segment curve fitting, verification refinement and merging.
//!
//! Samples that carry a key in the input may move anywhere within the
//! channel tolerance. Samples between input keys are the input's own
//! interpolation and must be reproduced exactly, so a segment never
//! silently replaces the curve the input already used there.

use std::collections::BTreeSet;

use nalgebra::UnitQuaternion;
use posefit_motion_core::math::{find_slerp_t, lerp_f64, quat_dot_abs, slerp};
use posefit_motion_core::Curve;

/// Rotations closer than this (in `1 - |dot|`) are treated as one.
const SAME_ROTATION: f64 = 1e-12;

/// Largest error allowed on a sample that has no key in the input.
const BETWEEN_KEYS: f64 = 1e-9;

#[derive(Debug, Clone)]
enum Samples<'a> {
    Position {
        axis: usize,
        values: Vec<f64>,
    },
    Rotation {
        rotations: &'a [UnitQuaternion<f64>],
        /// `|dot|` against the previous sample, 1.0 at index 0
        similarity: Vec<f64>,
    },
}

/// One animated channel of a bone, sampled densely from its first key.
#[derive(Debug, Clone)]
pub(crate) struct Channel<'a> {
    samples: Samples<'a>,
    /// Whether the input has a key at each sample
    keyed: &'a [bool],
    /// Input curve arriving at each sample
    inherited: Vec<Curve>,
    tolerance: f64,
}

impl<'a> Channel<'a> {
    pub(crate) fn position(axis: usize, values: Vec<f64>, keyed: &'a [bool], tolerance: f64) -> Self {
        let inherited = vec![Curve::LINEAR; values.len()];
        Channel {
            samples: Samples::Position { axis, values },
            keyed,
            inherited,
            tolerance,
        }
    }

    pub(crate) fn rotation(
        rotations: &'a [UnitQuaternion<f64>],
        keyed: &'a [bool],
        tolerance: f64,
    ) -> Self {
        let similarity = rotations
            .iter()
            .enumerate()
            .map(|(i, q)| if i == 0 { 1.0 } else { quat_dot_abs(q, &rotations[i - 1]) })
            .collect();
        Channel {
            samples: Samples::Rotation {
                rotations,
                similarity,
            },
            keyed,
            inherited: vec![Curve::LINEAR; rotations.len()],
            tolerance,
        }
    }

    /// Use the input's own curves, one per sample.
    pub(crate) fn with_inherited(mut self, inherited: Vec<Curve>) -> Self {
        debug_assert_eq!(inherited.len(), self.inherited.len());
        self.inherited = inherited;
        self
    }

    /// Scalar series used for inflection detection.
    pub(crate) fn series(&self) -> &[f64] {
        match &self.samples {
            Samples::Position { values, .. } => values,
            Samples::Rotation { similarity, .. } => similarity,
        }
    }

    pub(crate) fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Curve for segment `[a, b]` reproducing every interior sample, or
    /// `None` when no candidate does. A segment lying between two adjacent
    /// input keys first tries the curve the input used there.
    pub(crate) fn fit(&self, a: usize, b: usize) -> Option<Curve> {
        let inherited = (!self.spans_key(a, b)).then(|| self.inherited[b]);
        let fitted = self.fit_curve(a, b);
        inherited
            .into_iter()
            .chain([fitted, Curve::LINEAR])
            .find(|curve| self.reproduces(a, b, curve))
    }

    fn spans_key(&self, a: usize, b: usize) -> bool {
        self.keyed[a + 1..b].iter().any(|k| *k)
    }

    fn allowance(&self, i: usize) -> f64 {
        if self.keyed[i] {
            self.tolerance
        } else {
            self.tolerance.min(BETWEEN_KEYS)
        }
    }

    fn reproduces(&self, a: usize, b: usize, curve: &Curve) -> bool {
        (a + 1..b).all(|i| {
            self.error_at(a, b, i, curve.evaluate(fraction(a, b, i))) <= self.allowance(i)
        })
    }

    fn fit_curve(&self, a: usize, b: usize) -> Curve {
        match &self.samples {
            Samples::Position { values, .. } => Curve::fit(&values[a..=b]),
            Samples::Rotation { rotations, .. } => {
                let (start, end) = (&rotations[a], &rotations[b]);
                if 1.0 - quat_dot_abs(start, end) <= SAME_ROTATION {
                    return Curve::LINEAR;
                }
                let ts: Vec<f64> = (a..=b)
                    .map(|i| match i {
                        _ if i == a => 0.0,
                        _ if i == b => 1.0,
                        _ => find_slerp_t(start, end, &rotations[i]),
                    })
                    .collect();
                Curve::fit(&ts)
            }
        }
    }

    /// Interpolation error at interior sample `i` for value fraction `t`,
    /// using the same evaluation as clip sampling.
    fn error_at(&self, a: usize, b: usize, i: usize, t: f64) -> f64 {
        match &self.samples {
            Samples::Position { values, .. } => (lerp_f64(values[a], values[b], t) - values[i]).abs(),
            Samples::Rotation { rotations, .. } => {
                1.0 - quat_dot_abs(&slerp(&rotations[a], &rotations[b], t), &rotations[i])
            }
        }
    }

    /// Interior index farthest from the plain chord, preferring samples keyed
    /// in the input; where a segment is split.
    pub(crate) fn split_point(&self, a: usize, b: usize) -> usize {
        let mut keyed: Option<(usize, f64)> = None;
        let mut any: Option<(usize, f64)> = None;
        for i in a + 1..b {
            let deviation = self.error_at(a, b, i, fraction(a, b, i));
            if any.map_or(true, |(_, best)| deviation > best) {
                any = Some((i, deviation));
            }
            if self.keyed[i] && keyed.map_or(true, |(_, best)| deviation > best) {
                keyed = Some((i, deviation));
            }
        }
        keyed.or(any).map_or(a + (b - a) / 2, |(i, _)| i)
    }

    pub(crate) fn axis(&self) -> Option<usize> {
        match &self.samples {
            Samples::Position { axis, .. } => Some(*axis),
            Samples::Rotation { .. } => None,
        }
    }
}

#[inline]
fn fraction(a: usize, b: usize, i: usize) -> f64 {
    (i - a) as f64 / (b - a) as f64
}

/// A verified segment with one curve per channel, in channel order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Segment {
    pub start: usize,
    pub end: usize,
    pub curves: Vec<Curve>,
}

fn fit_all(channels: &[Channel<'_>], a: usize, b: usize) -> Option<Vec<Curve>> {
    channels.iter().map(|c| c.fit(a, b)).collect()
}

/// Turn breakpoints into segments, splitting any segment a channel cannot
/// reproduce until every sample fits. Segments come out left to right.
pub(crate) fn refine(channels: &[Channel<'_>], breakpoints: &BTreeSet<usize>) -> Vec<Segment> {
    let points: Vec<usize> = breakpoints.iter().copied().collect();
    let mut pending: Vec<(usize, usize)> = points.windows(2).rev().map(|w| (w[0], w[1])).collect();
    let mut segments = Vec::with_capacity(pending.len());

    'segments: while let Some((a, b)) = pending.pop() {
        let mut curves = Vec::with_capacity(channels.len());
        for channel in channels {
            match channel.fit(a, b) {
                Some(curve) => curves.push(curve),
                None => {
                    let mid = channel.split_point(a, b);
                    pending.push((mid, b));
                    pending.push((a, mid));
                    continue 'segments;
                }
            }
        }
        segments.push(Segment {
            start: a,
            end: b,
            curves,
        });
    }
    segments
}

/// Join neighbouring segments, left to right, wherever one set of curves
/// still reproduces every sample of the joined span.
pub(crate) fn merge(channels: &[Channel<'_>], segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(last) = merged.last_mut() {
            if let Some(curves) = fit_all(channels, last.start, segment.end) {
                last.end = segment.end;
                last.curves = curves;
                continue;
            }
        }
        merged.push(segment);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use posefit_motion_core::CurvePoint;

    fn dense(n: usize) -> Vec<bool> {
        vec![true; n]
    }

    #[test]
    fn linear_values_fit_in_one_segment() {
        let values: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let keyed = dense(20);
        let channel = Channel::position(1, values, &keyed, 0.01);
        let segments = refine(&[channel], &[0, 19].into());
        assert_eq!(segments.len(), 1);
        assert!(segments[0].curves[0].is_linear());
    }

    #[test]
    fn corner_is_split_at_max_deviation() {
        let mut values: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        values.extend((1..=10).map(|i| 10.0 - i as f64));
        let keyed = dense(21);
        let channel = Channel::position(0, values, &keyed, 0.01);
        let segments = refine(&[channel], &[0, 20].into());
        let bounds: Vec<(usize, usize)> = segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 10), (10, 20)]);
    }

    #[test]
    fn constant_rotation_speed_is_linear() {
        let rotations: Vec<UnitQuaternion<f64>> = (0..30)
            .map(|i| UnitQuaternion::from_axis_angle(&Vector3::y_axis(), i as f64 * 0.02))
            .collect();
        let keyed = dense(30);
        let channel = Channel::rotation(&rotations, &keyed, 1e-6);
        assert_eq!(channel.series()[0], 1.0);
        let segments = refine(&[channel], &[0, 29].into());
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn collinear_neighbours_are_merged() {
        let values: Vec<f64> = (0..30).map(|i| i as f64 * 0.25).collect();
        let keyed = dense(30);
        let channels = [Channel::position(2, values, &keyed, 0.01)];
        let segments = refine(&channels, &[0, 9, 17, 29].into());
        assert_eq!(segments.len(), 3);

        let merged = merge(&channels, segments);
        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].start, merged[0].end), (0, 29));
    }

    #[test]
    fn samples_between_keys_keep_the_input_curve() {
        let ease = Curve::new(CurvePoint::new(50, 0), CurvePoint::new(127, 77));
        let values: Vec<f64> = (0..=20)
            .map(|i| lerp_f64(0.0, 4.0, ease.evaluate(i as f64 / 20.0)))
            .collect();
        let mut keyed = vec![false; 21];
        keyed[0] = true;
        keyed[20] = true;
        let mut inherited = vec![Curve::LINEAR; 21];
        inherited[20] = ease;

        // A tolerance this wide would accept a straight line.
        let channel = Channel::position(1, values, &keyed, 5.0).with_inherited(inherited);
        assert_eq!(channel.fit(0, 20), Some(ease));
    }

    #[test]
    fn sparse_keys_are_not_merged_across() {
        // Keys at 0, 10 and 20 with a bend at 10 well inside the tolerance.
        let values: Vec<f64> = (0..=20)
            .map(|i| if i <= 10 { i as f64 * 0.1 } else { 1.0 + (i - 10) as f64 * 0.105 })
            .collect();
        let mut keyed = vec![false; 21];
        for i in [0, 10, 20] {
            keyed[i] = true;
        }
        let channels = [Channel::position(1, values, &keyed, 0.5)];
        let segments = merge(&channels, refine(&channels, &[0, 20].into()));
        let bounds: Vec<(usize, usize)> = segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 10), (10, 20)]);
    }
}
