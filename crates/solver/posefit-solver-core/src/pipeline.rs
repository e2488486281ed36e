//! Staged, clip-parallel retargeting pipeline.
//!
//! Stages run leg IK, arm IK, ground normalization and reduction in that
//! order. Each stage processes every clip on the pipeline's worker pool and
//! returns only once all clips are done, so a stage never sees a clip that an
//! earlier stage has not finished.

use posefit_motion_core::{Deformer, MotionClip, PoseEvaluator, RigSet};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::arm_ik::solve_arms;
use crate::chain::{ArmChain, LegChain, Side};
use crate::config::RetargetConfig;
use crate::convergence::SolveReport;
use crate::error::RetargetError;
use crate::ground::{normalize_ground, GroundReport};
use crate::leg_ik::solve_legs;
use crate::reduce::reduce_clip;

/// Everything one clip went through in [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RetargetOutput {
    /// The reduced clip
    pub clip: MotionClip,
    pub legs: SolveReport,
    pub arms: SolveReport,
    pub ground: GroundReport,
}

pub struct Pipeline {
    rigs: RigSet,
    config: RetargetConfig,
    evaluator: Box<dyn PoseEvaluator>,
    pool: ThreadPool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("rig", &self.rigs.base.name())
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl Pipeline {
    /// Validate `config` and every fixed chain bone against the rig variants,
    /// then build the worker pool.
    pub fn new(rigs: RigSet, config: RetargetConfig) -> Result<Self, RetargetError> {
        config.validate()?;
        for side in Side::BOTH {
            let leg = LegChain::new(side);
            leg.validate_base(&rigs.base)?;
            leg.validate_leg_ik(&rigs.leg_ik)?;
            leg.validate_toe_ik(&rigs.toe_ik)?;
            let arm = ArmChain::new(side);
            arm.validate_base(&rigs.base)?;
            arm.validate_arm_twist(&rigs.arm_twist)?;
        }

        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("posefit-worker-{i}"));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().map_err(|e| RetargetError::ThreadPool {
            reason: e.to_string(),
        })?;

        Ok(Self {
            rigs,
            config,
            evaluator: Box::new(Deformer),
            pool,
        })
    }

    /// Replace the pose evaluator (the built-in [`Deformer`] by default).
    pub fn with_evaluator(mut self, evaluator: Box<dyn PoseEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &RetargetConfig {
        &self.config
    }

    pub fn rigs(&self) -> &RigSet {
        &self.rigs
    }

    pub fn leg_ik(&self, clips: &[MotionClip]) -> Result<Vec<(MotionClip, SolveReport)>, RetargetError> {
        let ev = self.evaluator.as_ref();
        let out = self.pool.install(|| {
            clips
                .par_iter()
                .map(|clip| solve_legs(ev, &self.rigs, &self.config, clip))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(clips = out.len(), "leg ik stage done");
        Ok(out)
    }

    pub fn arm_ik(&self, clips: &[MotionClip]) -> Result<Vec<(MotionClip, SolveReport)>, RetargetError> {
        let ev = self.evaluator.as_ref();
        let out = self.pool.install(|| {
            clips
                .par_iter()
                .map(|clip| solve_arms(ev, &self.rigs, &self.config, clip))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(clips = out.len(), "arm ik stage done");
        Ok(out)
    }

    pub fn ground(&self, clips: &[MotionClip]) -> Result<Vec<(MotionClip, GroundReport)>, RetargetError> {
        let ev = self.evaluator.as_ref();
        let out = self.pool.install(|| {
            clips
                .par_iter()
                .map(|clip| normalize_ground(ev, &self.rigs.base, &self.config.ground, clip))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(clips = out.len(), "ground stage done");
        Ok(out)
    }

    pub fn reduce(&self, clips: &[MotionClip]) -> Vec<MotionClip> {
        let out: Vec<MotionClip> = self.pool.install(|| {
            clips
                .par_iter()
                .map(|clip| reduce_clip(clip, &self.config.reduction))
                .collect()
        });
        info!(clips = out.len(), "reduce stage done");
        out
    }

    /// Run every stage over `clips`; output order matches input order.
    pub fn run(&self, clips: &[MotionClip]) -> Result<Vec<RetargetOutput>, RetargetError> {
        let (clips, legs): (Vec<_>, Vec<_>) = self.leg_ik(clips)?.into_iter().unzip();
        let (clips, arms): (Vec<_>, Vec<_>) = self.arm_ik(&clips)?.into_iter().unzip();
        let (clips, ground): (Vec<_>, Vec<_>) = self.ground(&clips)?.into_iter().unzip();
        let reduced = self.reduce(&clips);

        Ok(reduced
            .into_iter()
            .zip(legs)
            .zip(arms)
            .zip(ground)
            .map(|(((clip, legs), arms), ground)| RetargetOutput {
                clip,
                legs,
                arms,
                ground,
            })
            .collect())
    }
}
