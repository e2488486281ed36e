//! Keyframe reduction.
//!
//! A dense clip is reduced bone by bone. Every channel of a bone (position
//! axes when the bone moves at all, plus rotation) contributes inflection
//! points; their union, restricted to frames keyed in the input, splits the
//! bone's range into segments. Each segment is verified against its fitted
//! curves and split further where needed, neighbours that one curve set can
//! cover are merged again, and one keyframe is emitted per segment boundary
//! with the curves on the segment's end key.

mod fit;
mod inflection;

pub use inflection::{chord_deviation, find_inflection_points, merge_breakpoints, Inflections};

use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::{BoneCurves, BoneFrame, MotionClip};
use tracing::{debug, trace};

use crate::config::ReductionConfig;
use fit::{merge, refine, Channel, Segment};

/// Positions with every coordinate below this are treated as unmoved.
const STATIC_POSITION: f64 = 1e-9;

/// Which position axes of a bone are reduced and emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisMask {
    /// Rotation only; positions are copied through unchanged
    None,
    All,
    /// X and Z; the vertical channel moved to another bone
    Horizontal,
    Vertical,
}

impl AxisMask {
    fn axes(self) -> &'static [usize] {
        match self {
            AxisMask::None => &[],
            AxisMask::All => &[0, 1, 2],
            AxisMask::Horizontal => &[0, 2],
            AxisMask::Vertical => &[1],
        }
    }

    fn apply(self, position: &Vector3<f64>) -> Vector3<f64> {
        match self {
            AxisMask::None | AxisMask::All => *position,
            AxisMask::Horizontal => Vector3::new(position.x, 0.0, position.z),
            AxisMask::Vertical => Vector3::new(0.0, position.y, 0.0),
        }
    }
}

/// Reduce `clip` to a sparse clip reproducing it within the configured
/// tolerances. The input is never modified.
///
/// Only frames keyed in the input can become keys, and frames between input
/// keys are reproduced exactly, so reducing an already reduced clip returns
/// it unchanged.
pub fn reduce_clip(clip: &MotionClip, config: &ReductionConfig) -> MotionClip {
    let tolerances = config.effective_tolerances();
    let split = vertical_split(clip, config);
    let mut out = MotionClip::new(clip.name.clone());

    for bone in clip.bone_names() {
        if matches!(split, Some((_, vertical)) if vertical == bone) {
            continue;
        }
        let Some(track) = clip.track(bone) else {
            continue;
        };
        let (Some(first), Some(last)) = (track.keys().next(), track.keys().next_back()) else {
            continue;
        };
        let samples: Vec<BoneFrame> = (*first..=*last).map(|f| clip.sample(bone, f)).collect();
        let keyed: Vec<bool> = (*first..=*last).map(|f| track.contains_key(&f)).collect();
        let (position_tolerance, rotation_tolerance) = if config.is_contact_bone(bone) {
            (tolerances.contact_position, tolerances.contact_rotation)
        } else {
            (tolerances.position, tolerances.rotation)
        };
        let reduction = BoneReduction {
            first: *first,
            samples: &samples,
            keyed: &keyed,
            position_tolerance,
            rotation_tolerance,
            space: config.space,
        };

        match split {
            Some((root, vertical)) if root == bone => {
                reduction.emit(bone, AxisMask::Horizontal, true, &mut out);
                // The vertical bone ends up carrying the root height on top
                // of its own.
                let lifted: Vec<BoneFrame> = samples
                    .iter()
                    .map(|k| {
                        let own = clip.sample(vertical, k.frame).position.y;
                        let mut key = k.clone();
                        key.position = Vector3::new(0.0, k.position.y + own, 0.0);
                        key
                    })
                    .collect();
                let vertical_keyed: Vec<bool> = match clip.track(vertical) {
                    Some(own) => keyed
                        .iter()
                        .zip(&samples)
                        .map(|(k, s)| *k || own.contains_key(&s.frame))
                        .collect(),
                    None => keyed.clone(),
                };
                BoneReduction {
                    samples: &lifted,
                    keyed: &vertical_keyed,
                    ..reduction
                }
                .emit(vertical, AxisMask::Vertical, false, &mut out);
            }
            _ => {
                let moves = samples.iter().any(|k| k.position.amax() > STATIC_POSITION);
                let mask = if moves { AxisMask::All } else { AxisMask::None };
                reduction.emit(bone, mask, true, &mut out);
            }
        }
    }

    debug!(
        clip = %clip.name,
        before = clip.keyframe_count(),
        after = out.keyframe_count(),
        "clip reduced"
    );
    out
}

/// Root and vertical bone names when the root's height is split off. A root
/// that never leaves the ground plane is reduced like any other bone.
fn vertical_split<'c>(clip: &MotionClip, config: &'c ReductionConfig) -> Option<(&'c str, &'c str)> {
    let root = config.root_bone.as_deref()?;
    let vertical = config.root_vertical_bone.as_deref()?;
    let rises = clip
        .track(root)?
        .values()
        .any(|k| k.position.y.abs() > STATIC_POSITION);
    (root != vertical && rises).then_some((root, vertical))
}

#[derive(Clone, Copy)]
struct BoneReduction<'a> {
    first: u32,
    samples: &'a [BoneFrame],
    /// Whether the input has a key at each sample
    keyed: &'a [bool],
    position_tolerance: f64,
    rotation_tolerance: f64,
    space: usize,
}

impl BoneReduction<'_> {
    /// Reduce the masked channels (and the rotation when `rotate`) and write
    /// the resulting keys for `bone` into `out`.
    fn emit(&self, bone: &str, mask: AxisMask, rotate: bool, out: &mut MotionClip) {
        let rotations: Vec<UnitQuaternion<f64>> = self.samples.iter().map(|k| k.rotation).collect();
        let mut channels: Vec<Channel<'_>> = mask
            .axes()
            .iter()
            .map(|&axis| {
                let values = self.samples.iter().map(|k| k.position[axis]).collect();
                let inherited = self.samples.iter().map(|k| k.curves.translate(axis)).collect();
                Channel::position(axis, values, self.keyed, self.position_tolerance)
                    .with_inherited(inherited)
            })
            .collect();
        if rotate {
            let inherited = self.samples.iter().map(|k| k.curves.rotate).collect();
            channels.push(
                Channel::rotation(&rotations, self.keyed, self.rotation_tolerance)
                    .with_inherited(inherited),
            );
        }

        let mut breakpoints = if channels.is_empty() {
            [0, self.samples.len() - 1].into()
        } else {
            let found: Vec<_> = channels
                .iter()
                .map(|c| find_inflection_points(c.series(), c.tolerance(), self.space).breakpoints)
                .collect();
            merge_breakpoints(&found)
        };
        breakpoints.retain(|&i| self.keyed[i]);
        let segments = merge(&channels, refine(&channels, &breakpoints));
        trace!(
            bone,
            breakpoints = breakpoints.len(),
            segments = segments.len(),
            "bone reduced"
        );

        if segments.is_empty() {
            // Single-sample track.
            out.insert(bone, self.key(0, mask, rotate, BoneCurves::LINEAR));
            return;
        }
        for segment in &segments {
            let start = self.first + segment.start as u32;
            if !out.contains(bone, start) {
                out.insert(bone, self.key(segment.start, mask, rotate, BoneCurves::LINEAR));
            }
            let curves = curves_for(&channels, segment);
            out.insert(bone, self.key(segment.end, mask, rotate, curves));
        }
    }

    fn key(&self, index: usize, mask: AxisMask, rotate: bool, curves: BoneCurves) -> BoneFrame {
        let sample = &self.samples[index];
        let rotation = if rotate {
            sample.rotation
        } else {
            UnitQuaternion::identity()
        };
        BoneFrame::new(sample.frame, mask.apply(&sample.position), rotation).with_curves(curves)
    }
}

fn curves_for(channels: &[Channel<'_>], segment: &Segment) -> BoneCurves {
    let mut curves = BoneCurves::LINEAR;
    for (channel, curve) in channels.iter().zip(&segment.curves) {
        match channel.axis() {
            Some(axis) => curves.set_translate(axis, *curve),
            None => curves.rotate = *curve,
        }
    }
    curves
}
