use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    rigs: HashMap<String, String>,
    configs: HashMap<String, String>,
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn resolve_path(rel: &str) -> PathBuf {
    fixtures_root().join(rel)
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = resolve_path(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn load_json<T: DeserializeOwned>(rel: &str) -> Result<T> {
    let text = read_to_string(rel)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON fixture {rel}"))
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

pub mod rigs {
    use super::*;
    use posefit_motion_core::{RigModel, RigSet};

    pub fn keys() -> Vec<String> {
        MANIFEST.rigs.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.rigs, "rig", name)?;
        read_to_string(rel)
    }

    pub fn path(name: &str) -> Result<PathBuf> {
        let rel = lookup(&MANIFEST.rigs, "rig", name)?;
        Ok(resolve_path(rel))
    }

    pub fn load(name: &str) -> Result<RigModel> {
        let path = path(name)?;
        RigModel::load(&path).with_context(|| format!("failed to load rig {}", path.display()))
    }

    /// The humanoid base rig and its three IK variants.
    pub fn humanoid() -> Result<RigSet> {
        let path = path("humanoid")?;
        RigSet::load(&path).with_context(|| format!("failed to load rig set {}", path.display()))
    }
}

pub mod configs {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.configs.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.configs, "config", name)?;
        read_to_string(rel)
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let rel = lookup(&MANIFEST.configs, "config", name)?;
        super::load_json(rel)
    }
}

/// Synthetic dense clips.
pub mod clips {
    use nalgebra::{UnitQuaternion, Vector3};
    use posefit_motion_core::{BoneFrame, MotionClip, RigModel};

    /// Every bone of `rig` at bind pose on frames `0..frames`.
    pub fn bind_pose(rig: &RigModel, frames: u32) -> MotionClip {
        let mut clip = MotionClip::new("bind_pose");
        for bone in rig.bones() {
            for frame in 0..frames {
                clip.insert(&bone.name, BoneFrame::identity(frame));
            }
        }
        clip
    }

    /// Overwrite the rotation of `bone` on every frame of `clip`.
    pub fn rotate_all(clip: &mut MotionClip, bone: &str, rotation: UnitQuaternion<f64>) {
        let Some((start, end)) = clip.frame_range() else {
            return;
        };
        for frame in start..=end {
            let mut key = clip.sample(bone, frame);
            key.rotation = rotation;
            clip.insert(bone, key);
        }
    }

    /// Vertical position of `bone` moving linearly from `from` to `to` over
    /// frames `0..frames` (both ends keyed).
    pub fn linear_descent(bone: &str, from: f64, to: f64, frames: u32) -> MotionClip {
        let last = f64::from(frames.saturating_sub(1).max(1));
        track(bone, frames, |f| from + (to - from) * f64::from(f) / last)
    }

    /// Vertical position of `bone` held at `value`.
    pub fn constant(bone: &str, value: f64, frames: u32) -> MotionClip {
        track(bone, frames, |_| value)
    }

    /// Vertical position of `bone` given per frame by `height`.
    pub fn track(bone: &str, frames: u32, height: impl Fn(u32) -> f64) -> MotionClip {
        let mut clip = MotionClip::new(bone);
        for frame in 0..frames {
            let position = Vector3::new(0.0, height(frame), 0.0);
            clip.insert(bone, BoneFrame::with_position(frame, position));
        }
        clip
    }

    /// A smooth position and rotation wave on `bone`, for fidelity checks.
    pub fn wave(bone: &str, frames: u32) -> MotionClip {
        let mut clip = MotionClip::new("wave");
        for frame in 0..frames {
            let f = f64::from(frame);
            let position = Vector3::new(0.02 * f, 3.0 * (f * 0.1).sin(), (f * 0.05).cos());
            let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5 * (f * 0.05).sin());
            clip.insert(bone, BoneFrame::new(frame, position, rotation));
        }
        clip
    }
}

/// Evaluators wrapping the reference [`Deformer`](posefit_motion_core::Deformer).
pub mod evaluators {
    use nalgebra::Vector3;
    use posefit_motion_core::{
        BoneDeltas, BoneFrame, Deformer, IkMode, MotionSource, PoseEvaluator, RigModel,
    };

    /// Moves one bone by a fixed offset whenever IK runs, leaving the IK-off
    /// pose (and so every solve target) where the input puts it. A chain whose
    /// effector is that bone can no longer reach its target.
    #[derive(Debug, Clone, Copy)]
    pub struct Unreachable {
        bone: &'static str,
        offset: Vector3<f64>,
    }

    impl Unreachable {
        pub fn new(bone: &'static str, offset: Vector3<f64>) -> Self {
            Self { bone, offset }
        }
    }

    struct Shifted<'a> {
        inner: &'a dyn MotionSource,
        bone: &'static str,
        offset: Vector3<f64>,
    }

    impl MotionSource for Shifted<'_> {
        fn sample(&self, bone: &str, frame: u32) -> BoneFrame {
            let mut key = self.inner.sample(bone, frame);
            if bone == self.bone {
                key.position += self.offset;
            }
            key
        }
    }

    impl PoseEvaluator for Unreachable {
        fn evaluate(
            &self,
            motion: &dyn MotionSource,
            rig: &RigModel,
            frame: u32,
            bones: &[&str],
            ik: IkMode,
        ) -> BoneDeltas {
            if ik == IkMode::Disabled {
                return Deformer.evaluate(motion, rig, frame, bones, ik);
            }
            let shifted = Shifted {
                inner: motion,
                bone: self.bone,
                offset: self.offset,
            };
            Deformer.evaluate(&shifted, rig, frame, bones, ik)
        }
    }
}
