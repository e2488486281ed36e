//! Pose evaluation: forward kinematics with optional CCD inverse kinematics.
//!
//! `PoseEvaluator` is the seam the solver stages evaluate motion through. The
//! bundled `Deformer` is a reference implementation: every bone's global
//! transform is `G_parent * T(bind_offset + key.position) * R(key.rotation)`,
//! and with IK enabled each IK bone pulls its effector toward its own global
//! position by cyclic coordinate descent over its links.

use hashbrown::HashMap;
use nalgebra::{Isometry3, Matrix4, Point3, Translation3, UnitQuaternion, Vector3};
use tracing::trace;

use crate::clip::MotionSource;
use crate::math::{clamp_rotation_angle, rotation_between, twist_angle, GEOMETRY_EPSILON};
use crate::rig::{IkSetting, LinkConstraint, RigModel};

/// CCD stops once the effector is this close to its target.
pub const IK_REACHED_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IkMode {
    Enabled,
    Disabled,
}

/// Evaluated pose of one bone at one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDelta {
    pub global_position: Vector3<f64>,
    pub global_rotation: UnitQuaternion<f64>,
    pub local_rotation: UnitQuaternion<f64>,
    /// Keyframe position offset from the bind pose.
    pub local_position: Vector3<f64>,
    pub global_matrix: Matrix4<f64>,
    /// Global transform of the parent (identity for roots).
    pub parent_global: Isometry3<f64>,
    /// Translation from the parent head to this bone's head at bind pose.
    pub bind_offset: Vector3<f64>,
}

impl BoneDelta {
    /// Keyframe position offset that would place this bone's head at `target`
    /// with the parent held where it is.
    pub fn offset_for_global_position(&self, target: &Vector3<f64>) -> Vector3<f64> {
        let local = self
            .parent_global
            .inverse_transform_point(&Point3::from(*target))
            .coords;
        local - self.bind_offset
    }

    /// Local rotation that yields the global rotation `target` under the current parent.
    pub fn local_rotation_for_global(&self, target: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.parent_global.rotation.inverse() * target
    }
}

/// Evaluated deltas keyed by bone name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneDeltas {
    deltas: HashMap<String, BoneDelta>,
}

impl BoneDeltas {
    pub fn get(&self, bone: &str) -> Option<&BoneDelta> {
        self.deltas.get(bone)
    }

    pub fn position(&self, bone: &str) -> Option<Vector3<f64>> {
        self.get(bone).map(|d| d.global_position)
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoneDelta)> {
        self.deltas.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Evaluates a motion against a rig at one frame.
pub trait PoseEvaluator: Send + Sync {
    /// Evaluate `bones` (all bones when empty) at `frame`. Unknown names are skipped.
    fn evaluate(
        &self,
        motion: &dyn MotionSource,
        rig: &RigModel,
        frame: u32,
        bones: &[&str],
        ik: IkMode,
    ) -> BoneDeltas;
}

/// Reference forward-kinematics + CCD evaluator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deformer;

impl PoseEvaluator for Deformer {
    fn evaluate(
        &self,
        motion: &dyn MotionSource,
        rig: &RigModel,
        frame: u32,
        bones: &[&str],
        ik: IkMode,
    ) -> BoneDeltas {
        let mut pose = Pose::sample(motion, rig, frame);
        pose.propagate(rig, 0);
        if ik == IkMode::Enabled {
            for (bone, setting) in rig.ik_bones() {
                pose.solve_ik(rig, bone, setting);
            }
        }
        pose.collect(rig, bones)
    }
}

/// Scratch buffers for one evaluation.
struct Pose {
    offsets: Vec<Vector3<f64>>,
    locals: Vec<UnitQuaternion<f64>>,
    globals: Vec<Isometry3<f64>>,
}

impl Pose {
    fn sample(motion: &dyn MotionSource, rig: &RigModel, frame: u32) -> Self {
        let mut offsets = Vec::with_capacity(rig.len());
        let mut locals = Vec::with_capacity(rig.len());
        for bone in rig.bones() {
            let key = motion.sample(&bone.name, frame);
            offsets.push(key.position);
            locals.push(key.rotation);
        }
        Self {
            offsets,
            locals,
            globals: vec![Isometry3::identity(); rig.len()],
        }
    }

    fn parent_global(&self, rig: &RigModel, index: usize) -> Isometry3<f64> {
        rig.parent_index(index)
            .map(|p| self.globals[p])
            .unwrap_or_else(Isometry3::identity)
    }

    /// Recompute globals for every bone at or after `from_rank` in evaluation order.
    fn propagate(&mut self, rig: &RigModel, from_rank: usize) {
        for &i in &rig.order()[from_rank..] {
            let translation = Translation3::from(rig.bind_offset(i) + self.offsets[i]);
            let local = Isometry3::from_parts(translation, self.locals[i]);
            self.globals[i] = self.parent_global(rig, i) * local;
        }
    }

    fn solve_ik(&mut self, rig: &RigModel, target_bone: usize, setting: &IkSetting) {
        let Some(effector) = rig.index_of(&setting.effector) else {
            return;
        };
        let links: Vec<(usize, &LinkConstraint)> = setting
            .links
            .iter()
            .filter_map(|l| rig.index_of(&l.bone).map(|i| (i, &l.constraint)))
            .collect();
        let target = self.globals[target_bone].translation.vector;

        for iteration in 0..setting.loop_count {
            for &(link, constraint) in &links {
                let reach = self.globals[effector].translation.vector;
                if (reach - target).norm() < IK_REACHED_EPSILON {
                    trace!(
                        bone = %rig.bone_at(target_bone).name,
                        iteration,
                        "ik reached"
                    );
                    return;
                }
                let frame = self.globals[link];
                let to_effector = frame.rotation.inverse() * (reach - frame.translation.vector);
                let to_target = frame.rotation.inverse() * (target - frame.translation.vector);
                let updated = match constraint {
                    LinkConstraint::Free => {
                        let mut step = rotation_between(&to_effector, &to_target);
                        if setting.unit_angle > 0.0 {
                            step = clamp_rotation_angle(&step, setting.unit_angle);
                        }
                        self.locals[link] * step
                    }
                    LinkConstraint::Axis {
                        axis,
                        min_angle,
                        max_angle,
                    } => {
                        let Some(axis) = axis.try_normalize(GEOMETRY_EPSILON) else {
                            continue;
                        };
                        let pe = to_effector - axis * to_effector.dot(&axis);
                        let pt = to_target - axis * to_target.dot(&axis);
                        if pe.norm() <= GEOMETRY_EPSILON || pt.norm() <= GEOMETRY_EPSILON {
                            continue;
                        }
                        let mut angle = axis.dot(&pe.cross(&pt)).atan2(pe.dot(&pt));
                        if setting.unit_angle > 0.0 {
                            angle = angle.clamp(-setting.unit_angle, setting.unit_angle);
                        }
                        let current = twist_angle(&self.locals[link], &axis);
                        let limited = (current + angle).clamp(*min_angle, *max_angle);
                        UnitQuaternion::from_scaled_axis(axis * limited)
                    }
                };
                self.locals[link] = updated;
                self.propagate(rig, rig.rank(link));
            }
        }
    }

    fn delta(&self, rig: &RigModel, index: usize) -> BoneDelta {
        let global = self.globals[index];
        BoneDelta {
            global_position: global.translation.vector,
            global_rotation: global.rotation,
            local_rotation: self.locals[index],
            local_position: self.offsets[index],
            global_matrix: global.to_homogeneous(),
            parent_global: self.parent_global(rig, index),
            bind_offset: rig.bind_offset(index),
        }
    }

    fn collect(&self, rig: &RigModel, bones: &[&str]) -> BoneDeltas {
        let mut deltas = HashMap::new();
        if bones.is_empty() {
            for (i, bone) in rig.bones().enumerate() {
                deltas.insert(bone.name.clone(), self.delta(rig, i));
            }
        } else {
            for name in bones {
                if let Some(i) = rig.index_of(name) {
                    deltas.insert((*name).to_owned(), self.delta(rig, i));
                }
            }
        }
        BoneDeltas { deltas }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{BoneFrame, MotionClip};
    use crate::rig::{Bone, IkLink};
    use approx::assert_abs_diff_eq;

    fn two_bone_rig(ik: bool) -> RigModel {
        let mut bones = vec![
            Bone::new("root", None, Vector3::zeros()),
            Bone::new("upper", Some("root"), Vector3::new(0.0, 4.0, 0.0)),
            Bone::new("lower", Some("upper"), Vector3::new(0.0, 2.0, 0.0)),
            Bone::new("tip", Some("lower"), Vector3::new(0.0, 0.0, 0.0)),
        ];
        let target = Bone::new("target", Some("root"), Vector3::zeros());
        bones.push(if ik {
            target.with_ik(IkSetting {
                effector: "tip".into(),
                loop_count: 20,
                unit_angle: 0.0,
                links: vec![IkLink {
                    bone: "upper".into(),
                    constraint: LinkConstraint::Free,
                }],
            })
        } else {
            target
        });
        RigModel::new("test", bones).expect("valid rig")
    }

    #[test]
    fn forward_kinematics_rotates_children() {
        let rig = two_bone_rig(false);
        let mut clip = MotionClip::new("c");
        let quarter = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::FRAC_PI_2);
        clip.insert("upper", BoneFrame::with_rotation(0, quarter));
        let deltas = Deformer.evaluate(&clip, &rig, 0, &["lower"], IkMode::Disabled);
        let lower = deltas.position("lower").expect("lower evaluated");
        assert_abs_diff_eq!(lower, Vector3::new(0.0, 4.0, -2.0), epsilon = 1e-12);

        let mut clip = MotionClip::new("c");
        clip.insert("lower", BoneFrame::with_position(0, Vector3::z()));
        clip.insert("upper", BoneFrame::with_rotation(0, quarter));
        let deltas = Deformer.evaluate(&clip, &rig, 0, &["lower"], IkMode::Disabled);
        // (0,-2,1) rotated a quarter turn about X lands on (0,-1,-2) below the upper head
        let lower = deltas.position("lower").expect("lower evaluated");
        assert_abs_diff_eq!(lower, Vector3::new(0.0, 3.0, -2.0), epsilon = 1e-9);
    }

    #[test]
    fn ccd_pulls_effector_to_target() {
        let rig = two_bone_rig(true);
        let mut clip = MotionClip::new("c");
        let goal = Vector3::new(2.4, 0.8, 0.0);
        clip.insert("target", BoneFrame::with_position(0, goal));
        let deltas = Deformer.evaluate(&clip, &rig, 0, &["tip"], IkMode::Enabled);
        let tip = deltas.position("tip").expect("tip evaluated");
        assert_abs_diff_eq!(tip, goal, epsilon = 1e-6);

        let off = Deformer.evaluate(&clip, &rig, 0, &["tip"], IkMode::Disabled);
        assert_abs_diff_eq!(
            off.position("tip").expect("tip evaluated"),
            Vector3::zeros(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn offset_for_global_position_inverts_fk() {
        let rig = two_bone_rig(false);
        let clip = MotionClip::new("c");
        let deltas = Deformer.evaluate(&clip, &rig, 0, &[], IkMode::Disabled);
        let target = deltas.get("target").expect("target evaluated");
        let wanted = Vector3::new(1.0, 2.0, 3.0);
        assert_abs_diff_eq!(target.offset_for_global_position(&wanted), wanted, epsilon = 1e-12);
    }
}
