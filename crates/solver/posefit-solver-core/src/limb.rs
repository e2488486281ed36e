//! Plumbing shared by the leg and arm stages: per-side fork/join, delta lookups.

use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::{BoneDelta, BoneDeltas, MotionClip, RigModel};
use tracing::{debug, warn};

use crate::chain::Side;
use crate::convergence::{SolveOutcome, SolveReport};
use crate::error::RetargetError;
use crate::overlay::KeyframeBatch;

/// Solve both sides concurrently, then apply the left batch and the right
/// batch to a copy of `clip` and strip the stage's auxiliary bones.
pub(crate) fn solve_both_sides<F>(
    clip: &MotionClip,
    auxiliary: &[String],
    solve: F,
) -> Result<(MotionClip, SolveReport), RetargetError>
where
    F: Fn(Side) -> Result<(KeyframeBatch, SolveReport), RetargetError> + Sync,
{
    let (left, right) = rayon::join(|| solve(Side::Left), || solve(Side::Right));
    let (left_batch, left_report) = left?;
    let (right_batch, right_report) = right?;

    let mut out = clip.clone();
    left_batch.apply_to(&mut out);
    right_batch.apply_to(&mut out);
    for bone in auxiliary {
        out.remove_bone(bone);
    }

    let mut report = left_report;
    report.merge(&right_report);
    Ok((out, report))
}

/// Off-delta lookup; a missing bone is a fatal rig mismatch.
pub(crate) fn require<'d>(
    deltas: &'d BoneDeltas,
    rig: &RigModel,
    bone: &str,
) -> Result<&'d BoneDelta, RetargetError> {
    deltas.get(bone).ok_or_else(|| RetargetError::MissingBone {
        rig: rig.name().to_string(),
        bone: bone.to_string(),
    })
}

/// Distance from an evaluated bone to `target`; a missing bone never converges.
pub(crate) fn distance(deltas: &BoneDeltas, bone: &str, target: &Vector3<f64>) -> f64 {
    deltas
        .position(bone)
        .map_or(f64::INFINITY, |p| (p - target).norm())
}

pub(crate) fn local_rotation(deltas: &BoneDeltas, bone: &str) -> UnitQuaternion<f64> {
    deltas
        .get(bone)
        .map_or_else(UnitQuaternion::identity, |d| d.local_rotation)
}

pub(crate) fn global_rotation(deltas: &BoneDeltas, bone: &str) -> UnitQuaternion<f64> {
    deltas
        .get(bone)
        .map_or_else(UnitQuaternion::identity, |d| d.global_rotation)
}

/// Twist axis of a bone (its bind direction), +X when unknown.
pub(crate) fn bone_axis(rig: &RigModel, bone: &str) -> Vector3<f64> {
    rig.bone(bone).map_or_else(Vector3::x, |b| b.axes.x)
}

/// Inclusive frame range of a clip, or `None` when empty.
pub(crate) fn frames(clip: &MotionClip) -> Option<std::ops::RangeInclusive<u32>> {
    clip.frame_range().map(|(start, end)| start..=end)
}

/// Write a joint's combined rotation and zero its twist sub-bone.
pub(crate) fn write_folded(
    batch: &mut KeyframeBatch,
    clip: &MotionClip,
    joint: &str,
    twist: &str,
    frame: u32,
    rotation: UnitQuaternion<f64>,
) {
    batch.set_rotation(clip, joint, frame, rotation);
    batch.set_rotation(clip, twist, frame, UnitQuaternion::identity());
}

/// Log a chain outcome; returns whether it was committed.
pub(crate) fn log_outcome(side: Side, chain: &str, frame: u32, outcome: &SolveOutcome) -> bool {
    match *outcome {
        SolveOutcome::Converged { .. } => {}
        SolveOutcome::BestEffort { error } => {
            debug!(?side, chain, frame, error, "best-effort commit");
        }
        SolveOutcome::Rejected { error } => {
            warn!(?side, chain, frame, error, "solve rejected; keyframe dropped");
        }
    }
    outcome.is_committed()
}
