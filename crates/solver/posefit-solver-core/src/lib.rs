//! Posefit Solver Core (engine-agnostic)
//!
//! Turns dense per-frame motion on a humanoid rig into rig-native, IK-consistent
//! and sparse keyframes:
//! - leg and arm IK convergence built on one iterate-and-retain routine
//! - ground contact normalization with sole flattening
//! - keyframe reduction with inflection detection and fitted curves
//!
//! The [`Pipeline`] runs the stages in order over many clips on a worker pool.

pub mod arm_ik;
pub mod chain;
pub mod config;
pub mod convergence;
pub mod error;
pub mod ground;
pub mod leg_ik;
mod limb;
pub mod overlay;
pub mod pipeline;
pub mod reduce;

// Re-exports
pub use arm_ik::solve_arms;
pub use chain::{ArmChain, LegChain, Side};
pub use config::{
    ChainSolveParams, GroundConfig, ReductionConfig, ReductionProfile, ReductionTolerances,
    RetargetConfig,
};
pub use convergence::{iterate_and_retain, Attempt, SolveOutcome, SolveReport};
pub use error::RetargetError;
pub use ground::{normalize_ground, GroundReport};
pub use leg_ik::solve_legs;
pub use overlay::{KeyframeBatch, Overlay};
pub use pipeline::{Pipeline, RetargetOutput};
pub use reduce::{find_inflection_points, reduce_clip, Inflections};
