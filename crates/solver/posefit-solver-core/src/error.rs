//! Error types for the retargeting stages

use posefit_motion_core::RigError;

/// Fatal errors that abort a retargeting stage.
///
/// Per-frame non-convergence is not an error; it is reported through
/// [`crate::convergence::SolveOutcome`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RetargetError {
    /// Rig asset failed to load or validate
    #[error(transparent)]
    Rig(#[from] RigError),

    /// A fixed chain bone is absent from a rig variant
    #[error("Bone {bone} missing from rig {rig}")]
    MissingBone { rig: String, bone: String },

    /// Configuration value out of range
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration JSON could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Worker pool could not be created
    #[error("Failed to build worker pool: {reason}")]
    ThreadPool { reason: String },
}
