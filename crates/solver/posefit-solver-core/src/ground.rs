//! Ground contact normalization.
//!
//! The floor height of a clip is a high percentile of the per-frame lower foot
//! height. Feet and the center bone are shifted down by it, the shift is
//! relaxed on frames where a foot would sink below zero, near-zero heights
//! snap to contact, and on contact frames the foot is rotated so its sole
//! (heel plus both toe tips) lies flat.

use nalgebra::UnitQuaternion;
use posefit_motion_core::math::rotation_between;
use posefit_motion_core::{IkMode, MotionClip, PoseEvaluator, RigModel};
use tracing::debug;

use crate::chain::{LegChain, Side};
use crate::config::GroundConfig;
use crate::error::RetargetError;
use crate::limb::{frames, require};

/// Summary of one clip's ground normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroundReport {
    /// Estimated floor height subtracted from the clip
    pub ground_height: f64,
    /// Frames with at least one foot in contact after correction
    pub contact_frames: usize,
}

/// Percentile of `values` using the sorted value at `floor(p * n)`, averaged
/// with its predecessor when `n` is even. An empty slice yields 0.0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let index = ((n as f64 * p).floor() as usize).min(n - 1);
    if n % 2 == 0 && index > 0 {
        (sorted[index - 1] + sorted[index]) / 2.0
    } else {
        sorted[index]
    }
}

/// Per-frame lower foot-IK height over the clip's frame range.
pub fn lower_foot_heights(clip: &MotionClip) -> Vec<f64> {
    let left = LegChain::new(Side::Left).leg_ik;
    let right = LegChain::new(Side::Right).leg_ik;
    let Some(range) = frames(clip) else {
        return Vec::new();
    };
    range
        .map(|frame| {
            clip.sample(&left, frame)
                .position
                .y
                .min(clip.sample(&right, frame).position.y)
        })
        .collect()
}

/// Normalize the floor contact of `clip` against the base rig.
pub fn normalize_ground(
    evaluator: &dyn PoseEvaluator,
    rig: &RigModel,
    config: &GroundConfig,
    clip: &MotionClip,
) -> Result<(MotionClip, GroundReport), RetargetError> {
    let mut out = clip.clone();
    let Some(range) = frames(clip) else {
        return Ok((out, GroundReport::default()));
    };
    let legs = Side::BOTH.map(LegChain::new);
    let ground_height = percentile(&lower_foot_heights(clip), config.percentile);
    let mut contact_frames = 0;

    for frame in range {
        let mut feet = [
            clip.sample(&legs[0].leg_ik, frame),
            clip.sample(&legs[1].leg_ik, frame),
        ];
        let lowest = feet
            .iter()
            .map(|k| k.position.y - ground_height)
            .fold(f64::INFINITY, f64::min);
        // Never let a foot go below the floor: lower the floor for this frame.
        let shift = if lowest < 0.0 {
            ground_height + lowest
        } else {
            ground_height
        };

        let mut contact = [false; 2];
        for (i, foot) in feet.iter_mut().enumerate() {
            let mut height = foot.position.y - shift;
            if height < config.contact_epsilon {
                height = 0.0;
            }
            contact[i] = height == 0.0;
            foot.position.y = height;
        }
        for (leg, foot) in legs.iter().zip(feet) {
            out.insert(&leg.leg_ik, foot);
        }

        let mut center = clip.sample(&config.center_bone, frame);
        center.position.y -= shift;
        out.insert(&config.center_bone, center);

        for (leg, _) in legs.iter().zip(contact).filter(|(_, c)| *c) {
            flatten_sole(evaluator, rig, leg, frame, &mut out)?;
        }
        if contact.iter().any(|c| *c) {
            contact_frames += 1;
        }
    }

    debug!(clip = %clip.name, ground_height, contact_frames, "ground normalized");
    Ok((
        out,
        GroundReport {
            ground_height,
            contact_frames,
        },
    ))
}

/// Rotate the ankle and the foot IK bone so the sole plane faces straight up.
fn flatten_sole(
    evaluator: &dyn PoseEvaluator,
    rig: &RigModel,
    leg: &LegChain,
    frame: u32,
    clip: &mut MotionClip,
) -> Result<(), RetargetError> {
    let deltas = evaluator.evaluate(
        &*clip,
        rig,
        frame,
        &[
            leg.heel.as_str(),
            leg.toe_big.as_str(),
            leg.toe_small.as_str(),
            leg.ankle.as_str(),
            leg.leg_ik.as_str(),
        ],
        IkMode::Disabled,
    );
    let heel = require(&deltas, rig, &leg.heel)?.global_position;
    let big = require(&deltas, rig, &leg.toe_big)?.global_position;
    let small = require(&deltas, rig, &leg.toe_small)?.global_position;
    let normal = (big - heel).cross(&(small - heel));
    let correction = rotation_between(&normal, &leg.side.sole_up());
    if correction == UnitQuaternion::identity() {
        return Ok(());
    }

    for bone in [&leg.ankle, &leg.leg_ik] {
        let delta = require(&deltas, rig, bone)?;
        let mut key = clip.sample(bone, frame);
        key.rotation = delta.local_rotation_for_global(&(correction * delta.global_rotation));
        clip.insert(bone, key);
    }
    Ok(())
}
