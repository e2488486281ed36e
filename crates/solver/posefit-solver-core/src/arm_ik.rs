//! Arm IK stage: shoulder/elbow/wrist chain, then the wrist-twist sub-chain.
//!
//! The arm keeps only its swing; its twist moves into the arm-twist bone. The
//! elbow is reduced to a hinge about its local Y axis and its removed twist
//! moves into the forearm (wrist-twist) bone. The arm-twist rig then rotates
//! the twist bones about their own axes until the wrist and the hand tip land
//! on their IK-off positions.

use posefit_motion_core::math::{hinge_rotation, separate_twist};
use posefit_motion_core::{IkMode, MotionClip, PoseEvaluator, RigSet};
use tracing::debug;

use crate::chain::{ArmChain, Side};
use crate::config::RetargetConfig;
use crate::convergence::{iterate_and_retain, Attempt, SolveReport};
use crate::error::RetargetError;
use crate::limb::{bone_axis, distance, frames, local_rotation, log_outcome, require, solve_both_sides};
use crate::overlay::{KeyframeBatch, Overlay};

/// Solve both arms of `clip`; returns a new clip without the auxiliary IK bones.
pub fn solve_arms(
    evaluator: &dyn PoseEvaluator,
    rigs: &RigSet,
    config: &RetargetConfig,
    clip: &MotionClip,
) -> Result<(MotionClip, SolveReport), RetargetError> {
    let auxiliary: Vec<String> = Side::BOTH
        .iter()
        .flat_map(|side| {
            ArmChain::new(*side)
                .auxiliary_bones()
                .map(str::to_string)
                .to_vec()
        })
        .collect();
    let (out, report) = solve_both_sides(clip, &auxiliary, |side| {
        let chain = ArmChain::new(side);
        ArmSolver {
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
        "arm ik solved"
    );
    Ok((out, report))
}

struct ArmSolver<'a> {
    evaluator: &'a dyn PoseEvaluator,
    rigs: &'a RigSet,
    config: &'a RetargetConfig,
    clip: &'a MotionClip,
    chain: &'a ArmChain,
}

impl ArmSolver<'_> {
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

    fn solve_frame(
        &self,
        frame: u32,
        report: &mut SolveReport,
    ) -> Result<KeyframeBatch, RetargetError> {
        let c = self.chain;
        let rig = &self.rigs.arm_twist;
        let clip = self.clip;
        let ev = self.evaluator;

        let off = ev.evaluate(
            clip,
            rig,
            frame,
            &[
                c.arm.as_str(),
                c.arm_twist.as_str(),
                c.elbow.as_str(),
                c.wrist_twist.as_str(),
                c.wrist.as_str(),
                c.hand_tip.as_str(),
                c.arm_twist_ik.as_str(),
                c.wrist_twist_ik.as_str(),
            ],
            IkMode::Disabled,
        );
        let arm_off = require(&off, rig, &c.arm)?;
        let arm_twist_off = require(&off, rig, &c.arm_twist)?;
        let elbow_off = require(&off, rig, &c.elbow)?;
        let wrist_twist_off = require(&off, rig, &c.wrist_twist)?;
        let elbow_target = elbow_off.global_position;
        let wrist_target = require(&off, rig, &c.wrist)?.global_position;
        let tip_target = require(&off, rig, &c.hand_tip)?.global_position;

        let mut batch = KeyframeBatch::new();

        // Seeds: swing-only arm and hinge-only elbow, twists redirected.
        let (arm_twist, arm_swing) =
            separate_twist(&arm_off.local_rotation, &bone_axis(rig, &c.arm));
        let elbow_axes = rig.bone(&c.elbow).map(|b| b.axes).unwrap_or_default();
        let (elbow_twist, _) = separate_twist(&elbow_off.local_rotation, &elbow_axes.x);
        let elbow_hinge = hinge_rotation(&elbow_off.local_rotation, &elbow_axes.x, &elbow_axes.y);
        batch.set_rotation(clip, &c.arm, frame, arm_swing);
        batch.set_rotation(clip, &c.arm_twist, frame, arm_twist * arm_twist_off.local_rotation);
        batch.set_rotation(clip, &c.elbow, frame, elbow_hinge);
        batch.set_rotation(
            clip,
            &c.wrist_twist,
            frame,
            elbow_twist * wrist_twist_off.local_rotation,
        );

        let arm_ik = require(&off, rig, &c.arm_twist_ik)?.offset_for_global_position(&wrist_target);
        let wrist_ik =
            require(&off, rig, &c.wrist_twist_ik)?.offset_for_global_position(&tip_target);
        batch.set_position(clip, &c.arm_twist_ik, frame, arm_ik);
        batch.set_position(clip, &c.wrist_twist_ik, frame, wrist_ik);

        let tracked = [
            c.arm_twist.as_str(),
            c.elbow.as_str(),
            c.wrist_twist.as_str(),
            c.wrist.as_str(),
            c.hand_tip.as_str(),
        ];

        let primary = iterate_and_retain(
            &self.config.arm,
            &mut batch,
            |batch, _| {
                let on = ev.evaluate(&Overlay::new(clip, batch), rig, frame, &tracked, IkMode::Enabled);
                let candidate = local_rotation(&on, &c.arm_twist);
                let distances = vec![
                    distance(&on, &c.elbow, &elbow_target),
                    distance(&on, &c.wrist, &wrist_target),
                ];
                batch.set_rotation(clip, &c.arm_twist, frame, candidate);
                Attempt::new(candidate, distances)
            },
            |batch, best| batch.set_rotation(clip, &c.arm_twist, frame, best),
        );
        report.record(&primary);
        if !log_outcome(c.side, "arm", frame, &primary) {
            for bone in c.solved_bones() {
                batch.drop_key(bone, frame);
            }
            return Ok(batch);
        }

        let wrist = iterate_and_retain(
            &self.config.wrist,
            &mut batch,
            |batch, _| {
                let on = ev.evaluate(&Overlay::new(clip, batch), rig, frame, &tracked, IkMode::Enabled);
                let candidate = local_rotation(&on, &c.wrist_twist);
                let distances = vec![
                    distance(&on, &c.wrist, &wrist_target),
                    distance(&on, &c.hand_tip, &tip_target),
                ];
                batch.set_rotation(clip, &c.wrist_twist, frame, candidate);
                Attempt::new(candidate, distances)
            },
            |batch, best| batch.set_rotation(clip, &c.wrist_twist, frame, best),
        );
        report.record(&wrist);
        if !log_outcome(c.side, "wrist", frame, &wrist) {
            batch.drop_key(&c.wrist_twist, frame);
        }
        Ok(batch)
    }
}
