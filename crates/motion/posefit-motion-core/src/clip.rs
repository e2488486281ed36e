//! Keyframed motion clips.
//!
//! A clip maps bone names to frame-ordered tracks holding at most one keyframe
//! per (bone, frame). Source clips are dense over their frame range; reduced
//! clips are sparse and carry fitted curves on their keyframes.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::curve::BoneCurves;
use crate::math::{lerp_f64, slerp};

/// Pose of one bone at one frame: position offset from the bind pose plus a
/// local rotation, with the curves governing interpolation INTO this key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneFrame {
    pub frame: u32,
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    #[serde(default)]
    pub curves: BoneCurves,
}

impl BoneFrame {
    pub fn new(frame: u32, position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            frame,
            position,
            rotation,
            curves: BoneCurves::LINEAR,
        }
    }

    /// Bind pose: zero offset, identity rotation.
    pub fn identity(frame: u32) -> Self {
        Self::new(frame, Vector3::zeros(), UnitQuaternion::identity())
    }

    pub fn with_rotation(frame: u32, rotation: UnitQuaternion<f64>) -> Self {
        Self::new(frame, Vector3::zeros(), rotation)
    }

    pub fn with_position(frame: u32, position: Vector3<f64>) -> Self {
        Self::new(frame, position, UnitQuaternion::identity())
    }

    pub fn with_curves(mut self, curves: BoneCurves) -> Self {
        self.curves = curves;
        self
    }

    /// Same pose re-labelled at another frame.
    pub fn at(&self, frame: u32) -> Self {
        let mut out = self.clone();
        out.frame = frame;
        out
    }
}

/// Keyframes of a single bone ordered by frame.
pub type BoneTrack = BTreeMap<u32, BoneFrame>;

/// Read access to keyframed motion, sampled at integer frames.
///
/// Implemented by [`MotionClip`] and by overlays that stage writes on top of
/// an immutable clip.
pub trait MotionSource {
    /// Keyframe value at `frame`, interpolated when no key exists there.
    fn sample(&self, bone: &str, frame: u32) -> BoneFrame;
}

/// A named set of bone tracks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionClip {
    pub name: String,
    #[serde(default)]
    pub bones: HashMap<String, BoneTrack>,
}

impl MotionClip {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bones: HashMap::new(),
        }
    }

    /// Insert a keyframe, replacing any existing key for the same (bone, frame).
    pub fn insert(&mut self, bone: &str, frame: BoneFrame) -> Option<BoneFrame> {
        self.bones
            .entry_ref(bone)
            .or_default()
            .insert(frame.frame, frame)
    }

    pub fn get(&self, bone: &str, frame: u32) -> Option<&BoneFrame> {
        self.bones.get(bone).and_then(|track| track.get(&frame))
    }

    /// Remove one keyframe; a track left empty is removed with it.
    pub fn remove(&mut self, bone: &str, frame: u32) -> Option<BoneFrame> {
        let track = self.bones.get_mut(bone)?;
        let removed = track.remove(&frame);
        if track.is_empty() {
            self.bones.remove(bone);
        }
        removed
    }

    pub fn remove_bone(&mut self, bone: &str) -> Option<BoneTrack> {
        self.bones.remove(bone)
    }

    pub fn contains(&self, bone: &str, frame: u32) -> bool {
        self.get(bone, frame).is_some()
    }

    /// Bone names with at least one keyframe, sorted for deterministic iteration.
    pub fn bone_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bones.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn track(&self, bone: &str) -> Option<&BoneTrack> {
        self.bones.get(bone)
    }

    pub fn min_frame(&self) -> Option<u32> {
        self.bones
            .values()
            .filter_map(|track| track.keys().next().copied())
            .min()
    }

    pub fn max_frame(&self) -> Option<u32> {
        self.bones
            .values()
            .filter_map(|track| track.keys().next_back().copied())
            .max()
    }

    /// Inclusive active frame range, `None` for an empty clip.
    pub fn frame_range(&self) -> Option<(u32, u32)> {
        Some((self.min_frame()?, self.max_frame()?))
    }

    pub fn keyframe_count(&self) -> usize {
        self.bones.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Sample a bone at `frame`.
    ///
    /// Between keys the position is interpolated per axis and the rotation by
    /// shortest-arc slerp, each eased by the next key's curve. Outside the
    /// keyed range the nearest key is held; a bone without keys is at bind pose.
    pub fn sample(&self, bone: &str, frame: u32) -> BoneFrame {
        match self.bones.get(bone) {
            Some(track) => sample_track(track, frame),
            None => BoneFrame::identity(frame),
        }
    }
}

impl MotionSource for MotionClip {
    fn sample(&self, bone: &str, frame: u32) -> BoneFrame {
        MotionClip::sample(self, bone, frame)
    }
}

/// Sample a single track; see [`MotionClip::sample`].
pub fn sample_track(track: &BoneTrack, frame: u32) -> BoneFrame {
    let prev = track.range(..=frame).next_back().map(|(_, k)| k);
    let next = track.range(frame..).next().map(|(_, k)| k);
    match (prev, next) {
        (Some(p), _) if p.frame == frame => p.clone(),
        (Some(p), Some(n)) => interpolate(p, n, frame),
        (Some(p), None) => p.at(frame),
        (None, Some(n)) => n.at(frame),
        (None, None) => BoneFrame::identity(frame),
    }
}

fn interpolate(prev: &BoneFrame, next: &BoneFrame, frame: u32) -> BoneFrame {
    let span = f64::from(next.frame - prev.frame);
    let x = f64::from(frame - prev.frame) / span;
    let mut position = Vector3::zeros();
    for axis in 0..3 {
        let t = next.curves.translate(axis).evaluate(x);
        position[axis] = lerp_f64(prev.position[axis], next.position[axis], t);
    }
    let t = next.curves.rotate.evaluate(x);
    let rotation = slerp(&prev.rotation, &next.rotation, t);
    BoneFrame::new(frame, position, rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn insert_replaces_same_frame() {
        let mut clip = MotionClip::new("c");
        clip.insert("a", BoneFrame::identity(3));
        let old = clip.insert("a", BoneFrame::with_position(3, Vector3::x()));
        assert!(old.is_some());
        assert_eq!(clip.keyframe_count(), 1);
        assert_eq!(clip.get("a", 3).map(|k| k.position), Some(Vector3::x()));
    }

    #[test]
    fn sample_interpolates_and_holds() {
        let mut clip = MotionClip::new("c");
        clip.insert("a", BoneFrame::with_position(0, Vector3::zeros()));
        clip.insert("a", BoneFrame::with_position(10, Vector3::new(0.0, 10.0, 0.0)));
        assert_abs_diff_eq!(clip.sample("a", 4).position.y, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(clip.sample("a", 20).position.y, 10.0, epsilon = 1e-12);
        assert_eq!(clip.sample("missing", 2), BoneFrame::identity(2));
    }

    #[test]
    fn remove_drops_empty_track() {
        let mut clip = MotionClip::new("c");
        clip.insert("a", BoneFrame::identity(1));
        assert!(clip.remove("a", 1).is_some());
        assert!(clip.track("a").is_none());
        assert_eq!(clip.frame_range(), None);
    }
}
