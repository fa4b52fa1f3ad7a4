//! Hyperparameter plumbing: the tunable set shared by the pathing solver
//! family and the supervisor that searches over it.

use indexmap::IndexMap;

use crate::solver::{Solver, SolverError, SolverState};

/// Tunables recognized by the pathing solver family. Constructed from
/// key-value entries; unrecognized keys are ignored and missing keys keep
/// the defaults below.
#[derive(Clone, Debug, PartialEq)]
pub struct HyperParameters {
    /// Bias toward greedier choices: `f = g + greedy_multiplier * h`.
    pub greedy_multiplier: f64,
    /// Seed for the connection processing order shuffle.
    pub shuffle_seed: u64,
    /// Seed for directive via decisions.
    pub directive_seed: u64,
    /// Chance that a connection is forced through directive vias.
    pub force_via_travel_chance: f64,
    /// Minimum separation between the closest and far directive vias.
    pub far_via_min_distance: f64,
    pub max_closest_via_skip: u32,
    pub max_furthest_via_skip: u32,
    /// Per-step surcharge applied by the layer-run penalty strategy.
    pub layer_traversal_reward: f64,
}

impl Default for HyperParameters {
    fn default() -> Self {
        HyperParameters {
            greedy_multiplier: 1.5,
            shuffle_seed: 0,
            directive_seed: 0,
            force_via_travel_chance: 0.0,
            far_via_min_distance: 50.0,
            max_closest_via_skip: 0,
            max_furthest_via_skip: 0,
            layer_traversal_reward: 10.0,
        }
    }
}

impl HyperParameters {
    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, f64)>,
    {
        let mut params = HyperParameters::default();
        for (key, value) in entries {
            params.apply(key.as_ref(), value);
        }
        params
    }

    /// Applies one entry; returns false (and logs) for unrecognized keys.
    pub fn apply(&mut self, key: &str, value: f64) -> bool {
        match key {
            "GREEDY_MULTIPLIER" => self.greedy_multiplier = value,
            "SHUFFLE_SEED" => self.shuffle_seed = value as u64,
            "DIRECTIVE_SEED" => self.directive_seed = value as u64,
            "FORCE_VIA_TRAVEL_CHANCE" => self.force_via_travel_chance = value,
            "FAR_VIA_MIN_DISTANCE" => self.far_via_min_distance = value,
            "MAX_CLOSEST_VIA_SKIP" => self.max_closest_via_skip = value as u32,
            "MAX_FURTHEST_VIA_SKIP" => self.max_furthest_via_skip = value as u32,
            "LAYER_TRAVERSAL_REWARD" => self.layer_traversal_reward = value,
            _ => {
                tracing::debug!(key, "ignoring unrecognized hyperparameter");
                return false;
            }
        }
        true
    }

    pub fn merged<'a, I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut params = self.clone();
        for (key, value) in overrides {
            params.apply(key, value);
        }
        params
    }

    pub fn entries(&self) -> IndexMap<&'static str, f64> {
        IndexMap::from([
            ("GREEDY_MULTIPLIER", self.greedy_multiplier),
            ("SHUFFLE_SEED", self.shuffle_seed as f64),
            ("DIRECTIVE_SEED", self.directive_seed as f64),
            ("FORCE_VIA_TRAVEL_CHANCE", self.force_via_travel_chance),
            ("FAR_VIA_MIN_DISTANCE", self.far_via_min_distance),
            ("MAX_CLOSEST_VIA_SKIP", self.max_closest_via_skip as f64),
            (
                "MAX_FURTHEST_VIA_SKIP",
                self.max_furthest_via_skip as f64,
            ),
            ("LAYER_TRAVERSAL_REWARD", self.layer_traversal_reward),
        ])
    }
}

/// One named dimension of the configuration space, with the enumerated
/// override sets a supervisor may pick from.
#[derive(Clone, Debug)]
pub struct HyperParameterDef {
    pub name: &'static str,
    pub values: Vec<Vec<(&'static str, f64)>>,
}

/// The catalogue explored when supervising the assignable-via pathing
/// solver: connection-order seeds crossed with forced-via-travel chances.
pub fn assignable_via_defs() -> Vec<HyperParameterDef> {
    vec![
        HyperParameterDef {
            name: "trace_ordering_seed",
            values: (0..10)
                .map(|seed| vec![("SHUFFLE_SEED", seed as f64)])
                .collect(),
        },
        HyperParameterDef {
            name: "force_via_travel_chance",
            values: [0.6, 0.8, 0.9]
                .iter()
                .map(|chance| vec![("FORCE_VIA_TRAVEL_CHANCE", *chance)])
                .collect(),
        },
    ]
}

/// Cartesian product of the defs' values applied over `base`.
pub fn combinations(base: &HyperParameters, defs: &[HyperParameterDef]) -> Vec<HyperParameters> {
    let mut combos = vec![base.clone()];
    for def in defs {
        if def.values.is_empty() {
            continue;
        }
        let mut next = Vec::with_capacity(combos.len() * def.values.len());
        for combo in &combos {
            for value in &def.values {
                next.push(combo.merged(value.iter().copied()));
            }
        }
        combos = next;
    }
    combos
}

/// A solver the supervisor can rank by partial progress.
pub trait Supervised: Solver {
    /// Fraction of the wrapped workload already completed, in `0.0..=1.0`.
    fn completion_ratio(&self) -> f64;
}

#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Sub-steps granted to a candidate solver per supervisor step.
    pub min_substeps: u64,
    pub greedy_multiplier: f64,
    pub max_iterations: u64,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisorOptions {
            min_substeps: 5,
            greedy_multiplier: 1.35,
            max_iterations: 120_000,
        }
    }
}

struct ScoredCandidate<S> {
    solver: S,
    f: f64,
}

/// Ranks a candidate solver's partial progress; lower is better.
pub type ScoreFn<S> = Box<dyn Fn(&S) -> f64>;

/// Default supervisor `g`: fraction of the iteration budget consumed plus
/// the unsolved fraction of the workload.
pub fn budget_and_backlog_g<S: Supervised>(solver: &S) -> f64 {
    let ratio = solver.completion_ratio().clamp(0.0, 1.0);
    let budget_used = if solver.max_iterations() > 0 {
        solver.iterations() as f64 / solver.max_iterations() as f64
    } else {
        0.0
    };
    budget_used + (1.0 - ratio)
}

/// Default supervisor `h`: the unsolved fraction of the workload.
pub fn backlog_h<S: Supervised>(solver: &S) -> f64 {
    1.0 - solver.completion_ratio().clamp(0.0, 1.0)
}

/// Best-first search over solver configurations: the same greedy ranking
/// the inner solvers use, applied one level up. Succeeds as soon as any
/// wrapped solver solves; fails only once every configuration has failed.
pub struct HyperParameterSupervisor<S: Supervised> {
    state: SolverState,
    opts: SupervisorOptions,
    factory: Box<dyn Fn(HyperParameters) -> Result<S, SolverError>>,
    compute_g: ScoreFn<S>,
    compute_h: ScoreFn<S>,
    combos: Vec<HyperParameters>,
    next_combo: usize,
    candidates: Vec<ScoredCandidate<S>>,
    winner: Option<S>,
}

impl<S: Supervised> HyperParameterSupervisor<S> {
    pub fn new(
        base: HyperParameters,
        defs: Vec<HyperParameterDef>,
        opts: SupervisorOptions,
        factory: Box<dyn Fn(HyperParameters) -> Result<S, SolverError>>,
    ) -> Self
    where
        S: 'static,
    {
        Self::with_scoring(
            base,
            defs,
            opts,
            factory,
            Box::new(budget_and_backlog_g),
            Box::new(backlog_h),
        )
    }

    /// Supervisor with a caller-supplied cost pair replacing the default
    /// budget/backlog scoring.
    pub fn with_scoring(
        base: HyperParameters,
        defs: Vec<HyperParameterDef>,
        opts: SupervisorOptions,
        factory: Box<dyn Fn(HyperParameters) -> Result<S, SolverError>>,
        compute_g: ScoreFn<S>,
        compute_h: ScoreFn<S>,
    ) -> Self {
        let combos = combinations(&base, &defs);
        HyperParameterSupervisor {
            state: SolverState::default(),
            opts,
            factory,
            compute_g,
            compute_h,
            combos,
            next_combo: 0,
            candidates: Vec::new(),
            winner: None,
        }
    }

    pub fn winner(&self) -> Option<&S> {
        self.winner.as_ref()
    }

    /// The winning solver. Panics when called before the supervisor
    /// solved; that is a caller bug, not a routing failure.
    pub fn into_winner(self) -> S {
        self.winner
            .expect("supervisor winner requested before any configuration solved")
    }

    fn score(&self, solver: &S) -> f64 {
        (self.compute_g)(solver) + self.opts.greedy_multiplier * (self.compute_h)(solver)
    }

    /// Runs a candidate for a bounded burst, enforcing the candidate's own
    /// iteration budget.
    fn run_substeps(&self, solver: &mut S) {
        for _ in 0..self.opts.min_substeps {
            if solver.solved() || solver.failed() {
                break;
            }
            if solver.iterations() >= solver.max_iterations() {
                let error = SolverError::IterationBudgetExceeded {
                    solver: solver.name(),
                    iterations: solver.iterations(),
                };
                solver.state_mut().fail(error);
                break;
            }
            solver.step();
        }
    }

    fn absorb(&mut self, mut candidate: ScoredCandidate<S>) {
        if candidate.solver.solved() {
            tracing::info!("supervised configuration solved");
            self.winner = Some(candidate.solver);
            self.state.finish();
        } else if candidate.solver.failed() {
            tracing::debug!(
                error = ?candidate.solver.error(),
                "supervised configuration failed, discarding"
            );
        } else {
            candidate.f = self.score(&candidate.solver);
            self.candidates.push(candidate);
        }
    }
}

impl<S: Supervised> Solver for HyperParameterSupervisor<S> {
    fn name(&self) -> &'static str {
        "hyper_supervisor"
    }

    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn max_iterations(&self) -> u64 {
        self.opts.max_iterations
    }

    fn step_once(&mut self) {
        // Untried configurations enter the pool first; afterwards the
        // best-ranked candidate keeps running.
        if self.next_combo < self.combos.len() {
            let hyper = self.combos[self.next_combo].clone();
            self.next_combo += 1;
            match (self.factory)(hyper) {
                Ok(mut solver) => {
                    self.run_substeps(&mut solver);
                    self.absorb(ScoredCandidate { solver, f: 0.0 });
                }
                Err(error) => {
                    tracing::debug!(%error, "configuration rejected at construction");
                }
            }
            return;
        }

        let best = self
            .candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.f.total_cmp(&b.f))
            .map(|(index, _)| index);
        match best {
            Some(index) => {
                let mut candidate = self.candidates.swap_remove(index);
                self.run_substeps(&mut candidate.solver);
                self.absorb(candidate);
            }
            None => {
                let tried = self.next_combo;
                self.state
                    .fail(SolverError::ConfigurationsExhausted { tried });
            }
        }
    }

    fn visualize(&self) -> crate::viz::Scene {
        if let Some(winner) = &self.winner {
            return winner.visualize();
        }
        self.candidates
            .iter()
            .min_by(|a, b| a.f.total_cmp(&b.f))
            .map(|candidate| candidate.solver.visualize())
            .unwrap_or_default()
    }
}
