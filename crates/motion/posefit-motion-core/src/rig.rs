//! Rig model: bone hierarchy, bind pose, local axes and IK settings.
//!
//! Rig assets are JSON documents `{ "name": ..., "bones": [...] }`. Bones may
//! be listed in any order; loading validates names, parents and IK references
//! and computes a parent-before-child evaluation order. Bind positions are
//! global and bind rotations are identity, so a bone's local frame at rest is
//! aligned with the global frame.

use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::RigError;
use crate::math::GEOMETRY_EPSILON;

/// Rotation constraint applied to one IK link during CCD.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConstraint {
    #[default]
    Free,
    /// Single-axis joint limited to `[min_angle, max_angle]` radians about `axis`
    /// (expressed in the link's local frame).
    Axis {
        axis: Vector3<f64>,
        min_angle: f64,
        max_angle: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IkLink {
    pub bone: String,
    #[serde(default)]
    pub constraint: LinkConstraint,
}

/// IK setting carried by an IK target bone: rotate `links` (effector-nearest
/// first) until `effector` reaches the target bone's position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IkSetting {
    pub effector: String,
    pub loop_count: u32,
    /// Per-step rotation limit in radians; 0 disables the limit.
    #[serde(default)]
    pub unit_angle: f64,
    pub links: Vec<IkLink>,
}

/// Local axes of a bone at bind pose. `x` runs along the bone and is the twist axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneAxes {
    pub x: Vector3<f64>,
    pub y: Vector3<f64>,
    pub z: Vector3<f64>,
}

impl Default for BoneAxes {
    fn default() -> Self {
        Self {
            x: Vector3::x(),
            y: Vector3::y(),
            z: Vector3::z(),
        }
    }
}

impl BoneAxes {
    /// Axes from a bone direction: `z = x × up`, `y = z × x`.
    pub fn from_direction(direction: &Vector3<f64>) -> Self {
        let Some(x) = direction.try_normalize(GEOMETRY_EPSILON) else {
            return Self::default();
        };
        let z = x
            .cross(&Vector3::y())
            .try_normalize(GEOMETRY_EPSILON)
            .or_else(|| x.cross(&Vector3::z()).try_normalize(GEOMETRY_EPSILON))
            .unwrap_or_else(Vector3::z);
        let y = z.cross(&x);
        Self { x, y, z }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Global bind position of the bone head.
    pub position: Vector3<f64>,
    /// Direction from head to tail; defaults to the first child, then to the
    /// parent-to-bone direction.
    #[serde(default)]
    pub tail: Option<Vector3<f64>>,
    #[serde(default)]
    pub ik: Option<IkSetting>,
    #[serde(skip)]
    pub axes: BoneAxes,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent: Option<&str>, position: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_owned),
            position,
            tail: None,
            ik: None,
            axes: BoneAxes::default(),
        }
    }

    pub fn with_tail(mut self, tail: Vector3<f64>) -> Self {
        self.tail = Some(tail);
        self
    }

    pub fn with_ik(mut self, ik: IkSetting) -> Self {
        self.ik = Some(ik);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RigAsset {
    #[serde(default)]
    name: String,
    bones: Vec<Bone>,
}

/// Validated, read-only bone hierarchy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RigAsset", into = "RigAsset")]
pub struct RigModel {
    name: String,
    bones: Vec<Bone>,
    index: HashMap<String, usize>,
    parents: Vec<Option<usize>>,
    /// Parent-before-child evaluation order.
    order: Vec<usize>,
    /// Position of each bone within `order`.
    rank: Vec<usize>,
}

impl TryFrom<RigAsset> for RigModel {
    type Error = RigError;

    fn try_from(asset: RigAsset) -> Result<Self, Self::Error> {
        RigModel::new(asset.name, asset.bones)
    }
}

impl From<RigModel> for RigAsset {
    fn from(rig: RigModel) -> Self {
        RigAsset {
            name: rig.name,
            bones: rig.bones,
        }
    }
}

impl RigModel {
    pub fn new(name: impl Into<String>, mut bones: Vec<Bone>) -> Result<Self, RigError> {
        let mut index = HashMap::with_capacity(bones.len());
        for (i, bone) in bones.iter().enumerate() {
            if index.insert(bone.name.clone(), i).is_some() {
                return Err(RigError::DuplicateBone {
                    name: bone.name.clone(),
                });
            }
        }

        let mut parents = Vec::with_capacity(bones.len());
        for bone in &bones {
            let parent = match &bone.parent {
                Some(p) => Some(*index.get(p).ok_or_else(|| RigError::UnknownParent {
                    bone: bone.name.clone(),
                    parent: p.clone(),
                })?),
                None => None,
            };
            parents.push(parent);
        }

        let order = evaluation_order(&bones, &parents)?;
        let mut rank = vec![0; bones.len()];
        for (r, &i) in order.iter().enumerate() {
            rank[i] = r;
        }

        for bone in &bones {
            if let Some(ik) = &bone.ik {
                if ik.links.is_empty() {
                    return Err(RigError::EmptyIkChain {
                        bone: bone.name.clone(),
                    });
                }
                let referenced =
                    std::iter::once(&ik.effector).chain(ik.links.iter().map(|l| &l.bone));
                for name in referenced {
                    if !index.contains_key(name) {
                        return Err(RigError::UnknownIkBone {
                            bone: bone.name.clone(),
                            missing: name.clone(),
                        });
                    }
                }
            }
        }

        let axes: Vec<BoneAxes> = (0..bones.len())
            .map(|i| BoneAxes::from_direction(&bone_direction(&bones, &parents, i)))
            .collect();
        for (bone, axes) in bones.iter_mut().zip(axes) {
            bone.axes = axes;
        }

        Ok(Self {
            name: name.into(),
            bones,
            index,
            parents,
            order,
            rank,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, RigError> {
        let asset: RigAsset = serde_json::from_str(json)?;
        RigModel::new(asset.name, asset.bones)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| RigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut rig = Self::from_json_str(&text)?;
        if rig.name.is_empty() {
            rig.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(rig)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.index_of(name).map(|i| &self.bones[i])
    }

    pub fn bone_at(&self, index: usize) -> &Bone {
        &self.bones[index]
    }

    pub fn parent_index(&self, index: usize) -> Option<usize> {
        self.parents[index]
    }

    /// Bones in declaration order.
    pub fn bones(&self) -> impl Iterator<Item = &Bone> {
        self.bones.iter()
    }

    /// Bone indices in parent-before-child order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn rank(&self, index: usize) -> usize {
        self.rank[index]
    }

    /// Bind translation of a bone relative to its parent's head.
    pub fn bind_offset(&self, index: usize) -> Vector3<f64> {
        let bone = &self.bones[index];
        match self.parents[index] {
            Some(p) => bone.position - self.bones[p].position,
            None => bone.position,
        }
    }

    /// IK-carrying bones in evaluation order.
    pub fn ik_bones(&self) -> impl Iterator<Item = (usize, &IkSetting)> {
        self.order
            .iter()
            .filter_map(|&i| self.bones[i].ik.as_ref().map(|ik| (i, ik)))
    }
}

fn bone_direction(bones: &[Bone], parents: &[Option<usize>], i: usize) -> Vector3<f64> {
    if let Some(tail) = bones[i].tail {
        return tail;
    }
    if let Some(child) = parents.iter().position(|p| *p == Some(i)) {
        return bones[child].position - bones[i].position;
    }
    match parents[i] {
        Some(p) => bones[i].position - bones[p].position,
        None => Vector3::zeros(),
    }
}

/// Depth-first order that keeps declaration order among siblings.
fn evaluation_order(bones: &[Bone], parents: &[Option<usize>]) -> Result<Vec<usize>, RigError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; bones.len()];
    let mut order = Vec::with_capacity(bones.len());
    for start in 0..bones.len() {
        // Walk up to the first visited ancestor, then emit the path top-down.
        let mut path = Vec::new();
        let mut cursor = Some(start);
        while let Some(i) = cursor {
            match marks[i] {
                Mark::Done => break,
                Mark::Visiting => {
                    return Err(RigError::Cycle {
                        bone: bones[i].name.clone(),
                    })
                }
                Mark::Unvisited => {
                    marks[i] = Mark::Visiting;
                    path.push(i);
                    cursor = parents[i];
                }
            }
        }
        for &i in path.iter().rev() {
            marks[i] = Mark::Done;
            order.push(i);
        }
    }
    Ok(order)
}

/// The four rig variants used by one retargeting run.
#[derive(Clone, Debug)]
pub struct RigSet {
    pub base: RigModel,
    pub leg_ik: RigModel,
    pub toe_ik: RigModel,
    pub arm_twist: RigModel,
}

impl RigSet {
    pub const LEG_IK_SUFFIX: &'static str = "_leg_ik.json";
    pub const TOE_IK_SUFFIX: &'static str = "_toe_ik.json";
    pub const ARM_TWIST_SUFFIX: &'static str = "_arm_twist_ik.json";

    /// Load `<base>.json` and its `<base>_leg_ik.json`, `<base>_toe_ik.json`
    /// and `<base>_arm_twist_ik.json` siblings.
    pub fn load(base_path: impl AsRef<Path>) -> Result<Self, RigError> {
        let base_path = base_path.as_ref();
        let variant = |suffix: &str| -> PathBuf {
            let stem = base_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            base_path.with_file_name(format!("{stem}{suffix}"))
        };
        Ok(Self {
            base: RigModel::load(base_path)?,
            leg_ik: RigModel::load(variant(Self::LEG_IK_SUFFIX))?,
            toe_ik: RigModel::load(variant(Self::TOE_IK_SUFFIX))?,
            arm_twist: RigModel::load(variant(Self::ARM_TWIST_SUFFIX))?,
        })
    }
}
