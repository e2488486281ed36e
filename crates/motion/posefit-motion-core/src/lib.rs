//! Posefit Motion Core (engine-agnostic)
//!
//! Data model shared by every retargeting stage: keyframed motion clips with
//! per-channel interpolation curves, the bone hierarchy of a rig with its IK
//! settings, and a reference pose evaluator (forward kinematics plus CCD IK)
//! behind the `PoseEvaluator` seam.

pub mod clip;
pub mod curve;
pub mod deform;
pub mod error;
pub mod math;
pub mod rig;

// Re-exports for consumers (solver stages, tests)
pub use clip::{BoneFrame, BoneTrack, MotionClip, MotionSource};
pub use curve::{BoneCurves, Curve, CurvePoint};
pub use deform::{BoneDelta, BoneDeltas, Deformer, IkMode, PoseEvaluator};
pub use error::RigError;
pub use rig::{Bone, BoneAxes, IkLink, IkSetting, LinkConstraint, RigModel, RigSet};
