//! Fixed limb chain definitions.
//!
//! Bone names are derived from a [`Side`], so the left and right limbs of a
//! chain never share a name and can be solved concurrently.

use nalgebra::Vector3;
use posefit_motion_core::RigModel;
use serde::{Deserialize, Serialize};

use crate::error::RetargetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn prefix(self) -> &'static str {
        match self {
            Side::Left => "left_",
            Side::Right => "right_",
        }
    }

    /// Full bone name for this side.
    pub fn bone(self, base: &str) -> String {
        format!("{}{}", self.prefix(), base)
    }

    /// Up reference for the sole plane normal. The toe ordering mirrors
    /// between feet, so the heel/toe cross product flips sign with the side.
    pub fn sole_up(self) -> Vector3<f64> {
        match self {
            Side::Left => -Vector3::y(),
            Side::Right => Vector3::y(),
        }
    }
}

fn require(rig: &RigModel, bones: &[&String]) -> Result<(), RetargetError> {
    for bone in bones {
        if !rig.contains(bone) {
            return Err(RetargetError::MissingBone {
                rig: rig.name().to_string(),
                bone: (*bone).clone(),
            });
        }
    }
    Ok(())
}

/// Hip to toe chain of one leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegChain {
    pub side: Side,
    pub leg: String,
    pub leg_twist: String,
    pub knee: String,
    pub ankle: String,
    pub ankle_twist: String,
    pub toe: String,
    pub toe_big: String,
    pub toe_small: String,
    pub heel: String,
    /// Foot IK bone: ankle position and orientation in the output clip
    pub leg_ik: String,
    /// Auxiliary IK targets, present only in the leg-IK and toe-IK rigs
    pub thigh_ik: String,
    pub toe_ik: String,
    pub toe_twist_ik: String,
}

impl LegChain {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            leg: side.bone("leg"),
            leg_twist: side.bone("leg_twist"),
            knee: side.bone("knee"),
            ankle: side.bone("ankle"),
            ankle_twist: side.bone("ankle_twist"),
            toe: side.bone("toe"),
            toe_big: side.bone("toe_big"),
            toe_small: side.bone("toe_small"),
            heel: side.bone("heel"),
            leg_ik: side.bone("leg_ik"),
            thigh_ik: side.bone("thigh_ik"),
            toe_ik: side.bone("toe_ik"),
            toe_twist_ik: side.bone("toe_twist_ik"),
        }
    }

    fn skeleton(&self) -> Vec<&String> {
        vec![
            &self.leg,
            &self.leg_twist,
            &self.knee,
            &self.ankle,
            &self.ankle_twist,
            &self.toe,
            &self.toe_big,
            &self.toe_small,
            &self.heel,
        ]
    }

    /// Bones the solver writes rotations for.
    pub fn solved_bones(&self) -> [&str; 5] {
        [
            self.leg.as_str(),
            self.leg_twist.as_str(),
            self.knee.as_str(),
            self.ankle.as_str(),
            self.ankle_twist.as_str(),
        ]
    }

    /// IK target bones that exist only while the leg stage runs.
    pub fn auxiliary_bones(&self) -> [&str; 3] {
        [
            self.thigh_ik.as_str(),
            self.toe_ik.as_str(),
            self.toe_twist_ik.as_str(),
        ]
    }

    pub fn validate_base(&self, rig: &RigModel) -> Result<(), RetargetError> {
        let mut bones = self.skeleton();
        bones.push(&self.leg_ik);
        require(rig, &bones)
    }

    pub fn validate_leg_ik(&self, rig: &RigModel) -> Result<(), RetargetError> {
        let mut bones = self.skeleton();
        bones.push(&self.thigh_ik);
        require(rig, &bones)
    }

    pub fn validate_toe_ik(&self, rig: &RigModel) -> Result<(), RetargetError> {
        let mut bones = self.skeleton();
        bones.extend([&self.toe_ik, &self.toe_twist_ik]);
        require(rig, &bones)
    }
}

/// Shoulder to hand chain of one arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmChain {
    pub side: Side,
    pub arm: String,
    pub arm_twist: String,
    pub elbow: String,
    pub wrist_twist: String,
    pub wrist: String,
    pub hand_tip: String,
    pub arm_twist_ik: String,
    pub wrist_twist_ik: String,
}

impl ArmChain {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            arm: side.bone("arm"),
            arm_twist: side.bone("arm_twist"),
            elbow: side.bone("elbow"),
            wrist_twist: side.bone("wrist_twist"),
            wrist: side.bone("wrist"),
            hand_tip: side.bone("hand_tip"),
            arm_twist_ik: side.bone("arm_twist_ik"),
            wrist_twist_ik: side.bone("wrist_twist_ik"),
        }
    }

    fn skeleton(&self) -> Vec<&String> {
        vec![
            &self.arm,
            &self.arm_twist,
            &self.elbow,
            &self.wrist_twist,
            &self.wrist,
            &self.hand_tip,
        ]
    }

    pub fn solved_bones(&self) -> [&str; 4] {
        [
            self.arm.as_str(),
            self.arm_twist.as_str(),
            self.elbow.as_str(),
            self.wrist_twist.as_str(),
        ]
    }

    pub fn auxiliary_bones(&self) -> [&str; 2] {
        [self.arm_twist_ik.as_str(), self.wrist_twist_ik.as_str()]
    }

    pub fn validate_base(&self, rig: &RigModel) -> Result<(), RetargetError> {
        require(rig, &self.skeleton())
    }

    pub fn validate_arm_twist(&self, rig: &RigModel) -> Result<(), RetargetError> {
        let mut bones = self.skeleton();
        bones.extend([&self.arm_twist_ik, &self.wrist_twist_ik]);
        require(rig, &bones)
    }
}
