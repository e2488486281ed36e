use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::{
    BoneFrame, Deformer, IkMode, LinkConstraint, MotionClip, PoseEvaluator, RigError, RigModel,
    RigSet,
};

fn rig_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../../fixtures/rigs")
        .join(file)
}

#[test]
fn humanoid_set_loads_all_variants() {
    let rigs = RigSet::load(rig_path("humanoid.json")).expect("load humanoid rig set");
    assert_eq!(rigs.base.name(), "humanoid");
    assert_eq!(rigs.leg_ik.name(), "humanoid_leg_ik");
    assert_eq!(rigs.toe_ik.name(), "humanoid_toe_ik");
    assert_eq!(rigs.arm_twist.name(), "humanoid_arm_twist_ik");

    assert_eq!(rigs.base.ik_bones().count(), 0);
    assert_eq!(rigs.leg_ik.ik_bones().count(), 2);

    // The toe target is solved before the toe twist target on each side.
    let toe: Vec<&str> = rigs
        .toe_ik
        .ik_bones()
        .map(|(i, _)| rigs.toe_ik.bone_at(i).name.as_str())
        .filter(|n| n.starts_with("left_"))
        .collect();
    assert_eq!(toe, vec!["left_toe_ik", "left_toe_twist_ik"]);

    let (_, twist) = rigs
        .arm_twist
        .ik_bones()
        .find(|(i, _)| rigs.arm_twist.bone_at(*i).name == "right_arm_twist_ik")
        .expect("right arm twist target");
    assert!(matches!(twist.links[0].constraint, LinkConstraint::Axis { .. }));
}

#[test]
fn bone_axes_follow_the_skeleton() {
    let rig = RigModel::load(rig_path("humanoid.json")).expect("load humanoid");
    let knee = rig.bone("left_knee").expect("knee");
    assert_abs_diff_eq!((knee.axes.x - Vector3::new(0.0, -1.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
    let elbow = rig.bone("left_elbow").expect("elbow");
    assert_abs_diff_eq!((elbow.axes.x - Vector3::x()).norm(), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!((elbow.axes.y - Vector3::y()).norm(), 0.0, epsilon = 1e-12);
}

#[test]
fn unknown_parent_is_reported() {
    let err = RigModel::load(rig_path("broken_parent.json")).expect_err("broken rig");
    match err {
        RigError::UnknownParent { bone, parent } => {
            assert_eq!(bone, "left_leg");
            assert_eq!(parent, "hips");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_variant_is_an_io_error() {
    let err = RigSet::load(rig_path("broken_parent.json")).expect_err("no variants");
    assert!(matches!(err, RigError::UnknownParent { .. } | RigError::Io { .. }));
}

#[test]
fn bind_pose_evaluates_to_bind_positions() {
    let rig = RigModel::load(rig_path("humanoid.json")).expect("load humanoid");
    let clip = MotionClip::new("empty");
    let deltas = Deformer.evaluate(&clip, &rig, 0, &[], IkMode::Disabled);
    assert_eq!(deltas.len(), rig.len());
    for bone in rig.bones() {
        let p = deltas.position(&bone.name).expect("every bone evaluated");
        assert_abs_diff_eq!((p - bone.position).norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn thigh_target_pulls_the_leg() {
    let rig = RigModel::load(rig_path("humanoid_leg_ik.json")).expect("load leg ik rig");
    let mut clip = MotionClip::new("reach");
    // Move the left ankle target forward; the straight leg swings toward it.
    clip.insert("left_thigh_ik", BoneFrame::with_position(0, Vector3::new(0.0, 1.0, -3.0)));
    let deltas = Deformer.evaluate(&clip, &rig, 0, &["left_ankle", "left_leg"], IkMode::Enabled);
    let hip = Vector3::new(1.0, 8.5, 0.0);
    let target = Vector3::new(1.0, 2.0, -3.0);
    let ankle = deltas.position("left_ankle").expect("ankle");
    let expected = hip + (target - hip).normalize() * 7.5;
    assert_abs_diff_eq!((ankle - expected).norm(), 0.0, epsilon = 1e-6);
    let leg = deltas.get("left_leg").expect("leg");
    assert!(leg.local_rotation.angle_to(&UnitQuaternion::identity()) > 0.1);
}
