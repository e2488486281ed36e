//! Leg IK stage: hip/knee/ankle chain, then the ankle/toe sub-chain.
//!
//! Per frame and side:
//! - evaluate the input with IK off to get the target joint positions
//! - place the thigh IK target on the ankle and seed the knee as a pure hinge
//! - iterate the leg-IK rig, folding the leg twist into the leg each attempt
//! - with the knee fixed, iterate the toe-IK rig against the toe targets
//!   shifted by the ankle's drift, folding the ankle twist into the ankle
//! - write the foot IK bone from the ankle target and the solved foot rotation

use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::math::hinge_rotation;
use posefit_motion_core::{BoneFrame, IkMode, MotionClip, PoseEvaluator, RigSet};
use tracing::debug;

use crate::chain::{LegChain, Side};
use crate::config::RetargetConfig;
use crate::convergence::{iterate_and_retain, Attempt, SolveOutcome, SolveReport};
use crate::error::RetargetError;
use crate::limb::{
    bone_axis, distance, frames, global_rotation, local_rotation, log_outcome, require,
    solve_both_sides, write_folded,
};
use crate::overlay::{KeyframeBatch, Overlay};

/// Knee bends about the rig's global X axis.
fn knee_hinge_axis() -> Vector3<f64> {
    Vector3::x()
}

/// Solve both legs of `clip`; returns a new clip without the auxiliary IK bones.
pub fn solve_legs(
    evaluator: &dyn PoseEvaluator,
    rigs: &RigSet,
    config: &RetargetConfig,
    clip: &MotionClip,
) -> Result<(MotionClip, SolveReport), RetargetError> {
    let auxiliary: Vec<String> = Side::BOTH
        .iter()
        .flat_map(|side| {
            LegChain::new(*side)
                .auxiliary_bones()
                .map(str::to_string)
                .to_vec()
        })
        .collect();
    let (out, report) = solve_both_sides(clip, &auxiliary, |side| {
        let chain = LegChain::new(side);
        LegSolver {
            evaluator,
            rigs,
            config,
            clip,
            chain: &chain,
        }
        .solve()
    })?;
    debug!(
        clip = %clip.name,
        converged = report.converged,
        best_effort = report.best_effort,
        rejected = report.rejected,
        "leg ik solved"
    );
    Ok((out, report))
}

struct LegSolver<'a> {
    evaluator: &'a dyn PoseEvaluator,
    rigs: &'a RigSet,
    config: &'a RetargetConfig,
    clip: &'a MotionClip,
    chain: &'a LegChain,
}

#[derive(Clone, Copy)]
struct LegCandidate {
    leg: UnitQuaternion<f64>,
    ankle_position: Vector3<f64>,
}

#[derive(Clone, Copy)]
struct ToeCandidate {
    ankle: UnitQuaternion<f64>,
    foot: UnitQuaternion<f64>,
}

struct LegState {
    batch: KeyframeBatch,
    ankle_on: Vector3<f64>,
}

impl LegSolver<'_> {
    fn solve(&self) -> Result<(KeyframeBatch, SolveReport), RetargetError> {
        let mut batch = KeyframeBatch::new();
        let mut report = SolveReport::default();
        if let Some(range) = frames(self.clip) {
            for frame in range {
                batch.append(self.solve_frame(frame, &mut report)?);
            }
        }
        Ok((batch, report))
    }

    fn solve_frame(&self, frame: u32, report: &mut SolveReport) -> Result<KeyframeBatch, RetargetError> {
        let c = self.chain;
        let rig = &self.rigs.leg_ik;
        let clip = self.clip;
        let ev = self.evaluator;

        let off = ev.evaluate(
            clip,
            rig,
            frame,
            &[c.knee.as_str(), c.ankle.as_str(), c.thigh_ik.as_str()],
            IkMode::Disabled,
        );
        let knee_off = require(&off, rig, &c.knee)?;
        let ankle_off = require(&off, rig, &c.ankle)?.global_position;
        let thigh_ik = require(&off, rig, &c.thigh_ik)?;

        let mut state = LegState {
            batch: KeyframeBatch::new(),
            ankle_on: ankle_off,
        };
        state.batch.set_position(
            clip,
            &c.thigh_ik,
            frame,
            thigh_ik.offset_for_global_position(&ankle_off),
        );
        let knee_seed = hinge_rotation(
            &knee_off.local_rotation,
            &bone_axis(rig, &c.knee),
            &knee_hinge_axis(),
        );
        state.batch.set_rotation(clip, &c.knee, frame, knee_seed);
        let knee_target = knee_off.global_position;

        let primary = iterate_and_retain(
            &self.config.leg,
            &mut state,
            |state, _| {
                let on = ev.evaluate(
                    &Overlay::new(clip, &state.batch),
                    rig,
                    frame,
                    &[c.leg.as_str(), c.leg_twist.as_str(), c.knee.as_str(), c.ankle.as_str()],
                    IkMode::Enabled,
                );
                let candidate = LegCandidate {
                    leg: local_rotation(&on, &c.leg) * local_rotation(&on, &c.leg_twist),
                    ankle_position: on.position(&c.ankle).unwrap_or(ankle_off),
                };
                let distances = vec![
                    distance(&on, &c.knee, &knee_target),
                    distance(&on, &c.ankle, &ankle_off),
                ];
                write_folded(&mut state.batch, clip, &c.leg, &c.leg_twist, frame, candidate.leg);
                Attempt::new(candidate, distances)
            },
            |state, best| {
                write_folded(&mut state.batch, clip, &c.leg, &c.leg_twist, frame, best.leg);
                state.ankle_on = best.ankle_position;
            },
        );
        report.record(&primary);
        if !log_outcome(c.side, "leg", frame, &primary) {
            for bone in c.solved_bones() {
                state.batch.drop_key(bone, frame);
            }
            state.batch.drop_key(&c.leg_ik, frame);
            return Ok(state.batch);
        }

        let toe = self.solve_toe(frame, ankle_off, &mut state)?;
        report.record(&toe);
        if !log_outcome(c.side, "toe", frame, &toe) {
            for bone in [&c.ankle, &c.ankle_twist, &c.leg_ik] {
                state.batch.drop_key(bone, frame);
            }
        }
        Ok(state.batch)
    }

    fn solve_toe(
        &self,
        frame: u32,
        ankle_off: Vector3<f64>,
        state: &mut LegState,
    ) -> Result<SolveOutcome, RetargetError> {
        let c = self.chain;
        let rig = &self.rigs.toe_ik;
        let clip = self.clip;
        let ev = self.evaluator;

        let off = ev.evaluate(
            clip,
            rig,
            frame,
            &[c.toe_big.as_str(), c.toe_small.as_str(), c.toe_ik.as_str(), c.toe_twist_ik.as_str()],
            IkMode::Disabled,
        );
        let drift = state.ankle_on - ankle_off;
        let big_target = require(&off, rig, &c.toe_big)?.global_position + drift;
        let small_target = require(&off, rig, &c.toe_small)?.global_position + drift;
        let toe_ik = require(&off, rig, &c.toe_ik)?.offset_for_global_position(&big_target);
        let toe_twist_ik =
            require(&off, rig, &c.toe_twist_ik)?.offset_for_global_position(&small_target);
        state.batch.set_position(clip, &c.toe_ik, frame, toe_ik);
        state.batch.set_position(clip, &c.toe_twist_ik, frame, toe_twist_ik);

        let base = &self.rigs.base;
        let foot_off = ev.evaluate(clip, base, frame, &[c.leg_ik.as_str()], IkMode::Disabled);
        let foot = require(&foot_off, base, &c.leg_ik)?.clone();

        let outcome = iterate_and_retain(
            &self.config.toe,
            state,
            |state, _| {
                let on = ev.evaluate(
                    &Overlay::new(clip, &state.batch),
                    rig,
                    frame,
                    &[c.ankle.as_str(), c.ankle_twist.as_str(), c.toe_big.as_str(), c.toe_small.as_str()],
                    IkMode::Enabled,
                );
                let candidate = ToeCandidate {
                    ankle: local_rotation(&on, &c.ankle) * local_rotation(&on, &c.ankle_twist),
                    foot: global_rotation(&on, &c.ankle_twist),
                };
                let distances = vec![
                    distance(&on, &c.toe_big, &big_target),
                    distance(&on, &c.toe_small, &small_target),
                ];
                write_folded(&mut state.batch, clip, &c.ankle, &c.ankle_twist, frame, candidate.ankle);
                Attempt::new(candidate, distances)
            },
            |state, best| {
                write_folded(&mut state.batch, clip, &c.ankle, &c.ankle_twist, frame, best.ankle);
                let position = foot.offset_for_global_position(&ankle_off);
                let rotation = foot.local_rotation_for_global(&best.foot);
                state
                    .batch
                    .insert(&c.leg_ik, BoneFrame::new(frame, position, rotation));
            },
        );
        Ok(outcome)
    }
}
