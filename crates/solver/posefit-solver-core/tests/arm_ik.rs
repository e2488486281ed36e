use approx::assert_abs_diff_eq;
use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::{Deformer, IkMode, PoseEvaluator};
use posefit_solver_core::{solve_arms, RetargetConfig};
use posefit_test_fixtures::evaluators::Unreachable;
use posefit_test_fixtures::{clips, rigs};

#[test]
fn bind_pose_converges_on_both_chains() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let clip = clips::bind_pose(&rigs.base, 4);

    let (out, report) = solve_arms(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;

    // 4 frames, 2 sides, arm and wrist-twist chains
    assert_eq!(report.converged, 16);
    assert_eq!(report.total(), 16);
    let arm = out.get("right_arm_twist", 2).expect("arm twist key");
    assert_abs_diff_eq!(arm.rotation.angle(), 0.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn arm_twist_moves_into_twist_bone() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let twist = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3);
    let bend = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5);
    let mut clip = clips::bind_pose(&rigs.base, 2);
    clips::rotate_all(&mut clip, "left_arm", twist);
    clips::rotate_all(&mut clip, "left_elbow", bend);

    let (out, report) = solve_arms(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;
    assert_eq!(report.rejected, 0);

    let arm = out.get("left_arm", 0).expect("arm key");
    let arm_twist = out.get("left_arm_twist", 0).expect("arm twist key");
    let elbow = out.get("left_elbow", 0).expect("elbow key");
    assert_abs_diff_eq!(arm.rotation.angle(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(arm_twist.rotation.angle_to(&twist), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(elbow.rotation.angle_to(&bend), 0.0, epsilon = 1e-6);

    let bones = ["left_wrist", "left_hand_tip"];
    let before = Deformer.evaluate(&clip, &rigs.base, 0, &bones, IkMode::Disabled);
    let after = Deformer.evaluate(&out, &rigs.base, 0, &bones, IkMode::Disabled);
    for bone in bones {
        let a = before.position(bone).expect("input position");
        let b = after.position(bone).expect("solved position");
        assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 0.01);
    }
    Ok(())
}

#[test]
fn unreachable_wrist_drops_the_arm() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let clip = clips::bind_pose(&rigs.base, 2);
    let evaluator = Unreachable::new("left_wrist", Vector3::new(0.0, 0.0, -20.0));

    let (out, report) = solve_arms(&evaluator, &rigs, &RetargetConfig::default(), &clip)?;

    // The left wrist-twist chain is skipped after the arm is rejected.
    assert_eq!(report.rejected, 2);
    assert_eq!(report.converged, 4);
    assert_eq!(report.total(), 6);
    for frame in 0..2 {
        for bone in ["left_arm", "left_arm_twist", "left_elbow", "left_wrist_twist"] {
            assert!(!out.contains(bone, frame), "{bone}@{frame} should be dropped");
        }
        assert!(out.contains("right_elbow", frame));
        assert!(out.contains("right_wrist_twist", frame));
    }
    Ok(())
}

#[test]
fn unreachable_hand_tip_drops_only_the_forearm_twist() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let clip = clips::bind_pose(&rigs.base, 2);
    let evaluator = Unreachable::new("left_hand_tip", Vector3::new(0.0, 0.0, -20.0));

    let (out, report) = solve_arms(&evaluator, &rigs, &RetargetConfig::default(), &clip)?;

    assert_eq!(report.rejected, 2);
    assert_eq!(report.converged, 6);
    for frame in 0..2 {
        assert!(!out.contains("left_wrist_twist", frame));
        for bone in ["left_arm", "left_arm_twist", "left_elbow", "right_wrist_twist"] {
            assert!(out.contains(bone, frame), "{bone}@{frame} should be kept");
        }
    }
    Ok(())
}

#[test]
fn auxiliary_twist_targets_are_stripped() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let clip = clips::bind_pose(&rigs.arm_twist, 1);
    let (out, _) = solve_arms(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;
    for bone in [
        "left_arm_twist_ik",
        "left_wrist_twist_ik",
        "right_arm_twist_ik",
        "right_wrist_twist_ik",
    ] {
        assert!(out.track(bone).is_none(), "{bone} should be removed");
    }
    Ok(())
}
