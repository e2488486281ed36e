//! Bounded iterate-and-retain-best convergence loop shared by every chain solve.
//!
//! Each attempt re-evaluates the chain and scores it by the sum of its tracked
//! joint distances. The lowest-scoring candidate wins (strict improvement, so
//! the earliest of equal candidates is kept); the loop stops early once every
//! distance is below the convergence epsilon. A winner whose error exceeds the
//! rejection threshold is never committed.

use tracing::trace;

use crate::config::ChainSolveParams;

/// One scored attempt: the candidate rotation set plus the per-joint distances
/// between the IK-enabled pose and the target.
#[derive(Debug, Clone)]
pub struct Attempt<C> {
    pub candidate: C,
    pub distances: Vec<f64>,
}

impl<C> Attempt<C> {
    pub fn new(candidate: C, distances: Vec<f64>) -> Self {
        Self {
            candidate,
            distances,
        }
    }

    pub fn error(&self) -> f64 {
        self.distances.iter().sum()
    }
}

/// Result of one chain solve at one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveOutcome {
    /// Every distance fell below the epsilon at attempt `iteration` (0-based).
    Converged { iteration: usize, error: f64 },
    /// Loop limit reached; the best candidate was committed.
    BestEffort { error: f64 },
    /// Loop limit reached and the best candidate was too far off; nothing committed.
    Rejected { error: f64 },
}

impl SolveOutcome {
    pub fn error(&self) -> f64 {
        match *self {
            SolveOutcome::Converged { error, .. }
            | SolveOutcome::BestEffort { error }
            | SolveOutcome::Rejected { error } => error,
        }
    }

    /// Whether the winning candidate was written.
    pub fn is_committed(&self) -> bool {
        !matches!(self, SolveOutcome::Rejected { .. })
    }
}

/// Per-clip outcome counters of an IK stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveReport {
    pub converged: usize,
    pub best_effort: usize,
    pub rejected: usize,
}

impl SolveReport {
    pub fn record(&mut self, outcome: &SolveOutcome) {
        match outcome {
            SolveOutcome::Converged { .. } => self.converged += 1,
            SolveOutcome::BestEffort { .. } => self.best_effort += 1,
            SolveOutcome::Rejected { .. } => self.rejected += 1,
        }
    }

    pub fn merge(&mut self, other: &SolveReport) {
        self.converged += other.converged;
        self.best_effort += other.best_effort;
        self.rejected += other.rejected;
    }

    pub fn total(&self) -> usize {
        self.converged + self.best_effort + self.rejected
    }
}

/// Run `attempt` up to `params.loop_limit` times and commit the best candidate.
///
/// `attempt` receives the shared state and the 0-based iteration index; it may
/// stage writes for the next iteration in `state`. `commit` runs at most once,
/// with the winning candidate, unless the solve is rejected.
pub fn iterate_and_retain<S, C>(
    params: &ChainSolveParams,
    state: &mut S,
    mut attempt: impl FnMut(&mut S, usize) -> Attempt<C>,
    commit: impl FnOnce(&mut S, C),
) -> SolveOutcome {
    let mut best: Option<(C, f64)> = None;
    let mut converged_at = None;

    for iteration in 0..params.loop_limit {
        let current = attempt(state, iteration);
        let error = current.error();
        trace!(iteration, error, "chain attempt");

        let improved = match &best {
            Some((_, best_error)) => error < *best_error,
            None => !error.is_nan(),
        };
        let converged = current
            .distances
            .iter()
            .all(|d| *d < params.convergence_epsilon);
        if improved {
            best = Some((current.candidate, error));
        }
        if converged {
            // A converged attempt that ties or loses to an earlier candidate
            // leaves that candidate, which never converged, as the winner.
            if improved {
                converged_at = Some(iteration);
            }
            break;
        }
    }

    let Some((candidate, error)) = best else {
        return SolveOutcome::Rejected {
            error: f64::INFINITY,
        };
    };
    if let Some(iteration) = converged_at {
        commit(state, candidate);
        return SolveOutcome::Converged { iteration, error };
    }
    if error > params.rejection_threshold {
        return SolveOutcome::Rejected { error };
    }
    commit(state, candidate);
    SolveOutcome::BestEffort { error }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: ChainSolveParams = ChainSolveParams::new(10, 0.01, 1.0);

    #[test]
    fn stops_on_first_converged_attempt() {
        let mut calls = 0usize;
        let mut committed = None;
        let outcome = iterate_and_retain(
            &PARAMS,
            &mut calls,
            |calls, i| {
                *calls += 1;
                Attempt::new(i, vec![0.0, 0.0])
            },
            |_, c| committed = Some(c),
        );
        assert_eq!(outcome, SolveOutcome::Converged { iteration: 0, error: 0.0 });
        assert_eq!(calls, 1);
        assert_eq!(committed, Some(0));
    }

    #[test]
    fn keeps_best_not_last() {
        let errors = [0.6, 0.2, 0.4, 0.5];
        let mut committed = None;
        let outcome = iterate_and_retain(
            &ChainSolveParams::new(4, 0.01, 1.0),
            &mut (),
            |_, i| Attempt::new(i, vec![errors[i]]),
            |_, c| committed = Some(c),
        );
        assert_eq!(outcome, SolveOutcome::BestEffort { error: 0.2 });
        assert_eq!(committed, Some(1));
    }

    #[test]
    fn ties_keep_earliest() {
        let mut committed = None;
        iterate_and_retain(
            &ChainSolveParams::new(3, 0.01, 1.0),
            &mut (),
            |_, i| Attempt::new(i, vec![0.3]),
            |_, c| committed = Some(c),
        );
        assert_eq!(committed, Some(0));
    }

    #[test]
    fn converging_attempt_that_loses_is_best_effort() {
        // The first attempt misses the epsilon on one joint but has the lower sum.
        let distances = [vec![0.0, 0.011], vec![0.009, 0.009]];
        let mut calls = 0usize;
        let mut committed = None;
        let outcome = iterate_and_retain(
            &PARAMS,
            &mut calls,
            |calls, i| {
                *calls += 1;
                Attempt::new(i, distances[i].clone())
            },
            |_, c| committed = Some(c),
        );
        assert_eq!(outcome, SolveOutcome::BestEffort { error: 0.011 });
        assert!(outcome.is_committed());
        assert_eq!(committed, Some(0));
        assert_eq!(calls, 2);
    }

    #[test]
    fn rejects_without_commit() {
        let mut committed = false;
        let outcome = iterate_and_retain(
            &PARAMS,
            &mut (),
            |_, _| Attempt::new((), vec![2.0, 0.5]),
            |_, _| committed = true,
        );
        assert_eq!(outcome, SolveOutcome::Rejected { error: 2.5 });
        assert!(!outcome.is_committed());
        assert!(!committed);
    }
}
