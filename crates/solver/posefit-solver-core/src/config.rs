//! Configuration for the retargeting stages
//!
//! Every numeric policy (loop limits, convergence epsilons, rejection
//! thresholds, ground and reduction tolerances) lives here and is passed into
//! the stage entry points explicitly.

use serde::{Deserialize, Serialize};

use crate::error::RetargetError;

/// Iterate-and-retain parameters for one chain solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChainSolveParams {
    /// Maximum number of IK-enabled evaluations per frame
    pub loop_limit: usize,
    /// Every tracked joint distance below this ends the loop early
    pub convergence_epsilon: f64,
    /// Best error above this drops the frame's keyframes
    pub rejection_threshold: f64,
}

impl ChainSolveParams {
    pub const fn new(loop_limit: usize, convergence_epsilon: f64, rejection_threshold: f64) -> Self {
        Self {
            loop_limit,
            convergence_epsilon,
            rejection_threshold,
        }
    }

    /// Leg and toe chains.
    pub const fn leg() -> Self {
        Self::new(100, 0.01, 1.0)
    }

    /// Arm and wrist-twist chains; hands drift visibly sooner than feet.
    pub const fn arm() -> Self {
        Self::new(100, 0.01, 0.5)
    }

    fn validate(&self, chain: &str) -> Result<(), RetargetError> {
        if self.loop_limit == 0 {
            return Err(invalid(format!("{chain}: loop limit must be greater than 0")));
        }
        if !is_non_negative(self.convergence_epsilon) || !is_non_negative(self.rejection_threshold) {
            return Err(invalid(format!(
                "{chain}: epsilon and rejection threshold must be finite and non-negative"
            )));
        }
        if self.rejection_threshold < self.convergence_epsilon {
            return Err(invalid(format!(
                "{chain}: rejection threshold must not be below the convergence epsilon"
            )));
        }
        Ok(())
    }
}

/// Ground contact estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundConfig {
    /// Percentile of the per-frame lower-foot height taken as the floor
    pub percentile: f64,
    /// Foot heights under this snap to exactly zero
    pub contact_epsilon: f64,
    /// Root bone shifted vertically with the floor
    pub center_bone: String,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            percentile: 0.9,
            contact_epsilon: 0.2,
            center_bone: "center".to_string(),
        }
    }
}

/// Named tolerance presets trading fidelity for keyframe count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionProfile {
    #[default]
    Narrow,
    Wide,
}

impl ReductionProfile {
    pub fn tolerances(self) -> ReductionTolerances {
        match self {
            ReductionProfile::Narrow => ReductionTolerances {
                position: 0.05,
                rotation: 1e-4,
                contact_position: 0.03,
                contact_rotation: 5e-5,
            },
            ReductionProfile::Wide => ReductionTolerances {
                position: 0.2,
                rotation: 5e-4,
                contact_position: 0.1,
                contact_rotation: 2e-4,
            },
        }
    }
}

/// Absolute tolerances: position in rig units, rotation as `1 - |dot|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionTolerances {
    pub position: f64,
    pub rotation: f64,
    /// Ground-contact (foot IK) bones
    pub contact_position: f64,
    pub contact_rotation: f64,
}

impl ReductionTolerances {
    fn validate(&self) -> Result<(), RetargetError> {
        let all = [
            self.position,
            self.rotation,
            self.contact_position,
            self.contact_rotation,
        ];
        if all.iter().any(|v| !is_non_negative(*v)) {
            return Err(invalid(
                "reduction tolerances must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub profile: ReductionProfile,
    /// Overrides the profile's tolerances when set
    pub tolerances: Option<ReductionTolerances>,
    /// Minimum frame spacing between detected inflection points
    pub space: usize,
    /// Root bone of the skeleton
    pub root_bone: Option<String>,
    /// When set and the root bone leaves the ground plane, the root's height
    /// is reduced on its own and emitted under this bone name
    pub root_vertical_bone: Option<String>,
    /// Bones reduced with the contact tolerances
    pub contact_bones: Vec<String>,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            profile: ReductionProfile::Narrow,
            tolerances: None,
            space: 2,
            root_bone: Some("center".to_string()),
            root_vertical_bone: Some("groove".to_string()),
            contact_bones: vec!["left_leg_ik".to_string(), "right_leg_ik".to_string()],
        }
    }
}

impl ReductionConfig {
    pub fn effective_tolerances(&self) -> ReductionTolerances {
        self.tolerances.unwrap_or_else(|| self.profile.tolerances())
    }

    pub fn is_contact_bone(&self, bone: &str) -> bool {
        self.contact_bones.iter().any(|b| b == bone)
    }

    #[inline]
    pub fn with_profile(mut self, profile: ReductionProfile) -> Self {
        self.profile = profile;
        self
    }

    #[inline]
    pub fn with_tolerances(mut self, tolerances: ReductionTolerances) -> Self {
        self.tolerances = Some(tolerances);
        self
    }
}

/// Configuration shared by every stage of a retargeting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetConfig {
    pub leg: ChainSolveParams,
    pub toe: ChainSolveParams,
    pub arm: ChainSolveParams,
    pub wrist: ChainSolveParams,
    pub ground: GroundConfig,
    pub reduction: ReductionConfig,
    /// Worker pool size; `None` uses one thread per CPU
    pub worker_threads: Option<usize>,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            leg: ChainSolveParams::leg(),
            toe: ChainSolveParams::leg(),
            arm: ChainSolveParams::arm(),
            wrist: ChainSolveParams::arm(),
            ground: GroundConfig::default(),
            reduction: ReductionConfig::default(),
            worker_threads: None,
        }
    }
}

impl RetargetConfig {
    /// Parse and validate a JSON configuration; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, RetargetError> {
        let config: RetargetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetargetError> {
        self.leg.validate("leg")?;
        self.toe.validate("toe")?;
        self.arm.validate("arm")?;
        self.wrist.validate("wrist")?;

        let ground = &self.ground;
        if !(0.0..=1.0).contains(&ground.percentile) {
            return Err(invalid("ground percentile must be within [0, 1]".to_string()));
        }
        if !is_non_negative(ground.contact_epsilon) {
            return Err(invalid(
                "ground contact epsilon must be finite and non-negative".to_string(),
            ));
        }

        self.reduction.effective_tolerances().validate()?;
        if self.worker_threads == Some(0) {
            return Err(invalid("worker thread count must be greater than 0".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    #[inline]
    pub fn with_reduction(mut self, reduction: ReductionConfig) -> Self {
        self.reduction = reduction;
        self
    }
}

#[inline]
fn is_non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn invalid(reason: String) -> RetargetError {
    RetargetError::InvalidConfig { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RetargetConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config = RetargetConfig::from_json_str(
            r#"{ "reduction": { "profile": "wide" }, "worker_threads": 2 }"#,
        )
        .expect("valid config");
        assert_eq!(config.reduction.profile, ReductionProfile::Wide);
        assert_eq!(config.reduction.effective_tolerances().position, 0.2);
        assert_eq!(config.leg, ChainSolveParams::leg());
        assert_eq!(config.worker_threads, Some(2));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = RetargetConfig::default();
        config.ground.percentile = 1.5;
        assert!(matches!(
            config.validate(),
            Err(RetargetError::InvalidConfig { .. })
        ));

        let mut config = RetargetConfig::default();
        config.arm.loop_limit = 0;
        assert!(config.validate().is_err());
    }
}
