//! Error types for rig loading and validation

/// Fatal errors raised while loading or validating a rig asset.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RigError {
    /// Rig JSON could not be parsed
    #[error("Failed to parse rig JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Rig asset could not be read from disk
    #[error("Failed to read rig asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Two bones share a name
    #[error("Duplicate bone name: {name}")]
    DuplicateBone { name: String },

    /// A bone names a parent that does not exist
    #[error("Bone {bone} references unknown parent {parent}")]
    UnknownParent { bone: String, parent: String },

    /// Parent pointers loop back on themselves
    #[error("Bone hierarchy contains a cycle through {bone}")]
    Cycle { bone: String },

    /// IK setting references a bone missing from the rig
    #[error("IK setting on {bone} references unknown bone {missing}")]
    UnknownIkBone { bone: String, missing: String },

    /// IK setting with nothing to rotate
    #[error("IK setting on {bone} has no links")]
    EmptyIkChain { bone: String },
}
