use approx::assert_abs_diff_eq;
use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::{Deformer, IkMode, PoseEvaluator};
use posefit_solver_core::{solve_legs, RetargetConfig};
use posefit_test_fixtures::evaluators::Unreachable;
use posefit_test_fixtures::{clips, rigs};

fn init_tracing() {
    let default_filter = "posefit_solver_core=debug";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[test]
fn bind_pose_converges_immediately() -> anyhow::Result<()> {
    init_tracing();
    let rigs = rigs::humanoid()?;
    let clip = clips::bind_pose(&rigs.base, 3);

    let (out, report) = solve_legs(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;

    // 3 frames, 2 sides, leg and toe chains
    assert_eq!(report.converged, 12);
    assert_eq!(report.rejected, 0);
    for frame in 0..3 {
        let foot = out.get("left_leg_ik", frame).expect("foot key written");
        assert_abs_diff_eq!(foot.position.norm(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(foot.rotation.angle(), 0.0, epsilon = 1e-9);
        for bone in [
            "left_leg",
            "left_leg_twist",
            "left_knee",
            "left_ankle",
            "left_ankle_twist",
        ] {
            let key = out.get(bone, frame).expect("solved key written");
            assert_abs_diff_eq!(key.rotation.angle(), 0.0, epsilon = 1e-9);
        }
    }
    Ok(())
}

#[test]
fn forward_knee_bend_is_preserved() -> anyhow::Result<()> {
    init_tracing();
    let rigs = rigs::humanoid()?;
    let bend = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.6);
    let mut clip = clips::bind_pose(&rigs.base, 2);
    clips::rotate_all(&mut clip, "left_knee", bend);

    let (out, report) = solve_legs(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;
    assert_eq!(report.rejected, 0);
    assert_eq!(report.best_effort, 0);

    let knee = out.get("left_knee", 1).expect("knee key");
    assert_abs_diff_eq!(knee.rotation.angle_to(&bend), 0.0, epsilon = 1e-6);

    // The foot IK bone follows the ankle and carries the foot orientation.
    let foot = out.get("left_leg_ik", 1).expect("foot key");
    let expected = Vector3::new(0.0, 4.5 - 4.5 * 0.6f64.cos(), -4.5 * 0.6f64.sin());
    assert_abs_diff_eq!((foot.position - expected).norm(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(foot.rotation.angle_to(&bend), 0.0, epsilon = 1e-6);

    // Evaluating the solved clip puts the ankle where the input had it.
    let bones = ["left_ankle"];
    let before = Deformer.evaluate(&clip, &rigs.base, 1, &bones, IkMode::Disabled);
    let after = Deformer.evaluate(&out, &rigs.base, 1, &bones, IkMode::Disabled);
    let (a, b) = (
        before.position("left_ankle").expect("ankle"),
        after.position("left_ankle").expect("ankle"),
    );
    assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 0.01);
    Ok(())
}

#[test]
fn sideways_knee_is_rejected_and_dropped() -> anyhow::Result<()> {
    init_tracing();
    let rigs = rigs::humanoid()?;
    let sideways = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
    let mut clip = clips::bind_pose(&rigs.base, 1);
    clips::rotate_all(&mut clip, "left_knee", sideways);

    let (out, report) = solve_legs(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;

    // Left leg rejected (its toe chain never runs); right leg and toe converge.
    assert_eq!(report.rejected, 1);
    assert_eq!(report.converged, 2);
    for bone in ["left_leg", "left_knee", "left_ankle", "left_leg_ik"] {
        assert!(!out.contains(bone, 0), "{bone} should be dropped");
    }
    assert!(out.contains("right_knee", 0));
    assert!(out.contains("right_leg_ik", 0));
    // The input is untouched.
    assert!(clip.contains("left_knee", 0));
    Ok(())
}

#[test]
fn unreachable_toe_drops_the_foot() -> anyhow::Result<()> {
    init_tracing();
    let rigs = rigs::humanoid()?;
    let clip = clips::bind_pose(&rigs.base, 2);
    let evaluator = Unreachable::new("left_toe_big", Vector3::new(0.0, 0.0, -20.0));

    let (out, report) = solve_legs(&evaluator, &rigs, &RetargetConfig::default(), &clip)?;

    // Both legs and the right toe converge on both frames; the left toe never does.
    assert_eq!(report.converged, 6);
    assert_eq!(report.rejected, 2);
    for frame in 0..2 {
        for bone in ["left_ankle", "left_ankle_twist", "left_leg_ik"] {
            assert!(!out.contains(bone, frame), "{bone}@{frame} should be dropped");
        }
        for bone in ["left_leg", "left_knee", "right_ankle", "right_leg_ik"] {
            assert!(out.contains(bone, frame), "{bone}@{frame} should be kept");
        }
    }
    Ok(())
}

#[test]
fn auxiliary_targets_are_stripped() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    // A clip authored against the leg-IK rig carries the thigh targets.
    let clip = clips::bind_pose(&rigs.leg_ik, 2);
    assert!(clip.track("left_thigh_ik").is_some());

    let (out, _) = solve_legs(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;
    assert!(out.track("left_thigh_ik").is_none());
    assert!(out.track("right_thigh_ik").is_none());
    assert!(out.track("left_leg").is_some());
    Ok(())
}

#[test]
fn empty_clip_is_a_no_op() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let clip = posefit_motion_core::MotionClip::new("empty");
    let (out, report) = solve_legs(&Deformer, &rigs, &RetargetConfig::default(), &clip)?;
    assert!(out.is_empty());
    assert_eq!(report.total(), 0);
    Ok(())
}

#[test]
fn solving_is_deterministic() -> anyhow::Result<()> {
    let rigs = rigs::humanoid()?;
    let mut clip = clips::bind_pose(&rigs.base, 3);
    clips::rotate_all(
        &mut clip,
        "right_knee",
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4),
    );
    let config = RetargetConfig::default();

    let (first, _) = solve_legs(&Deformer, &rigs, &config, &clip)?;
    let (second, _) = solve_legs(&Deformer, &rigs, &config, &clip)?;
    assert_eq!(first, second);
    Ok(())
}
