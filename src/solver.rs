//! The stepped solver contract shared by every algorithm in this crate.
//!
//! A solver is a cooperative state machine: `step` performs one bounded
//! unit of work, `solve` drives `step` under an iteration budget. `solved`
//! and `failed` are mutually exclusive terminal flags; once either is set,
//! further steps are no-ops. Budget exhaustion is a terminal failure with
//! a stored error, never a panic.

use thiserror::Error;

use crate::viz::Scene;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("{solver} exceeded its iteration budget after {iterations} iterations")]
    IterationBudgetExceeded {
        solver: &'static str,
        iterations: u64,
    },

    #[error("no viable candidates left for connection {connection}")]
    NoViableCandidates { connection: String },

    #[error("no via candidate available for connection {connection}")]
    ViaCandidatesExhausted { connection: String },

    #[error("all {tried} hyperparameter configurations failed")]
    ConfigurationsExhausted { tried: usize },

    #[error("no mesh node contains endpoint ({x}, {y}) on z{layer} of connection {connection}")]
    UnresolvedEndpoint {
        connection: String,
        x: f64,
        y: f64,
        layer: usize,
    },
}

/// Terminal flags and the iteration counter every solver carries.
#[derive(Debug, Clone, Default)]
pub struct SolverState {
    pub solved: bool,
    pub failed: bool,
    pub error: Option<SolverError>,
    pub iterations: u64,
}

impl SolverState {
    pub fn finish(&mut self) {
        self.solved = true;
    }

    pub fn fail(&mut self, error: SolverError) {
        tracing::warn!(%error, "solver failed");
        self.failed = true;
        self.error = Some(error);
    }
}

pub trait Solver {
    fn name(&self) -> &'static str;

    fn state(&self) -> &SolverState;

    fn state_mut(&mut self) -> &mut SolverState;

    fn max_iterations(&self) -> u64;

    /// One bounded unit of work. Implementations may assume they are never
    /// called after a terminal flag is set.
    fn step_once(&mut self);

    fn solved(&self) -> bool {
        self.state().solved
    }

    fn failed(&self) -> bool {
        self.state().failed
    }

    fn error(&self) -> Option<&SolverError> {
        self.state().error.as_ref()
    }

    fn iterations(&self) -> u64 {
        self.state().iterations
    }

    fn step(&mut self) {
        if self.solved() || self.failed() {
            return;
        }
        self.state_mut().iterations += 1;
        self.step_once();
    }

    fn solve(&mut self) -> Result<(), SolverError> {
        while !self.solved() && !self.failed() {
            if self.iterations() >= self.max_iterations() {
                let error = SolverError::IterationBudgetExceeded {
                    solver: self.name(),
                    iterations: self.iterations(),
                };
                self.state_mut().fail(error);
                break;
            }
            self.step();
        }
        match self.state().error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn visualize(&self) -> Scene {
        Scene::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        state: SolverState,
        remaining: u32,
    }

    impl Solver for Countdown {
        fn name(&self) -> &'static str {
            "countdown"
        }

        fn state(&self) -> &SolverState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut SolverState {
            &mut self.state
        }

        fn max_iterations(&self) -> u64 {
            10
        }

        fn step_once(&mut self) {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.state.finish();
            }
        }
    }

    #[test]
    fn solve_runs_to_completion() {
        let mut solver = Countdown {
            state: SolverState::default(),
            remaining: 3,
        };
        solver.solve().unwrap();
        assert!(solver.solved());
        assert_eq!(solver.iterations(), 3);
    }

    #[test]
    fn solve_fails_on_budget() {
        let mut solver = Countdown {
            state: SolverState::default(),
            remaining: 100,
        };
        let error = solver.solve().unwrap_err();
        assert!(matches!(
            error,
            SolverError::IterationBudgetExceeded { iterations: 10, .. }
        ));
        assert!(solver.failed());
        assert!(!solver.solved());
    }

    #[test]
    fn step_is_noop_after_terminal_flag() {
        let mut solver = Countdown {
            state: SolverState::default(),
            remaining: 1,
        };
        solver.step();
        assert!(solver.solved());
        solver.step();
        assert_eq!(solver.iterations(), 1);
    }
}
