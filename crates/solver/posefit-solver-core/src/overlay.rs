//! Staged keyframe writes layered over an immutable clip.
//!
//! Each limb solve records its writes in its own [`KeyframeBatch`] and reads
//! the motion through an [`Overlay`] of that batch on the stage input. Batches
//! from concurrently solved limbs are applied to the output clip one after the
//! other once both limbs finish.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use nalgebra::{UnitQuaternion, Vector3};
use posefit_motion_core::{BoneFrame, MotionClip, MotionSource};

/// Pending inserts and drops for one clip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyframeBatch {
    inserts: HashMap<String, BTreeMap<u32, BoneFrame>>,
    drops: Vec<(String, u32)>,
}

impl KeyframeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bone: &str, key: BoneFrame) {
        self.inserts
            .entry_ref(bone)
            .or_default()
            .insert(key.frame, key);
    }

    pub fn get(&self, bone: &str, frame: u32) -> Option<&BoneFrame> {
        self.inserts.get(bone).and_then(|keys| keys.get(&frame))
    }

    /// Stage the key at (bone, frame) for removal, discarding any pending insert.
    pub fn drop_key(&mut self, bone: &str, frame: u32) {
        if let Some(keys) = self.inserts.get_mut(bone) {
            keys.remove(&frame);
        }
        self.drops.push((bone.to_string(), frame));
    }

    /// Replace the rotation of the current key at (bone, frame), keeping its position.
    pub fn set_rotation(
        &mut self,
        base: &MotionClip,
        bone: &str,
        frame: u32,
        rotation: UnitQuaternion<f64>,
    ) {
        let mut key = Overlay::new(base, self).sample(bone, frame);
        key.rotation = rotation;
        self.insert(bone, key);
    }

    /// Replace the position of the current key at (bone, frame), keeping its rotation.
    pub fn set_position(&mut self, base: &MotionClip, bone: &str, frame: u32, position: Vector3<f64>) {
        let mut key = Overlay::new(base, self).sample(bone, frame);
        key.position = position;
        self.insert(bone, key);
    }

    /// Move every staged write of `other` into this batch; `other` wins on conflicts.
    pub fn append(&mut self, other: KeyframeBatch) {
        for (bone, frame) in &other.drops {
            self.drop_key(bone, *frame);
        }
        for (bone, keys) in other.inserts {
            self.inserts.entry(bone).or_default().extend(keys);
        }
    }

    /// Apply drops, then inserts.
    pub fn apply_to(self, clip: &mut MotionClip) {
        for (bone, frame) in &self.drops {
            clip.remove(bone, *frame);
        }
        for (bone, keys) in self.inserts {
            for key in keys.into_values() {
                clip.insert(&bone, key);
            }
        }
    }
}

/// Read view of a clip with a batch's inserts on top.
///
/// Staged drops take effect only when the batch is applied; until then the
/// base clip is read for those keys.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    base: &'a MotionClip,
    batch: &'a KeyframeBatch,
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a MotionClip, batch: &'a KeyframeBatch) -> Self {
        Self { base, batch }
    }
}

impl MotionSource for Overlay<'_> {
    fn sample(&self, bone: &str, frame: u32) -> BoneFrame {
        match self.batch.get(bone, frame) {
            Some(key) => key.clone(),
            None => self.base.sample(bone, frame),
        }
    }
}
