// Fix the important integer columns at the relaxation and search the rest.

use std::marker::PhantomData;

use log::{debug, warn};

use crate::{
    cuts::{CutPool, RowCut},
    heuristic::{accept_if_better, ConfigBuilder, Heuristic, HeuristicConfig, HeuristicOutcome},
    history::{BranchHistoryList, BranchHistoryRecord},
    interval::Interval,
    model::{Model, Row},
    submip::{small_branch_and_bound, SubMipSolver, SubMipStatus, TreeSearchSolver},
};

/// Columns whose absolute priority is at most this are fixed by default.
pub const DEFAULT_FIX_PRIORITY: i32 = 10_000;

#[derive(Debug)]
pub struct PriorityFix<S: SubMipSolver = TreeSearchSolver> {
    config: HeuristicConfig,
    fix_priority: i32,
    history: BranchHistoryList,
    last_status: Option<SubMipStatus>,
    solver: PhantomData<fn() -> S>,
}

impl<S: SubMipSolver> Clone for PriorityFix<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            fix_priority: self.fix_priority,
            history: self.history.clone(),
            last_status: self.last_status,
            solver: PhantomData,
        }
    }
}

impl<S: SubMipSolver> Default for PriorityFix<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one restricted solve plus what it fixed.
struct Attempt {
    outcome: HeuristicOutcome,
    status: Option<SubMipStatus>,
    fixed: Vec<(usize, f64)>,
    all_binary: bool,
    /// The unfixed columns kept their problem bounds.
    root_box: bool,
}

impl Attempt {
    fn skipped() -> Attempt {
        Attempt {
            outcome: HeuristicOutcome::NoSolution,
            status: None,
            fixed: Vec::new(),
            all_binary: false,
            root_box: false,
        }
    }
}

impl<S: SubMipSolver> PriorityFix<S> {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new("priority fix").build())
    }

    pub fn with_config(config: HeuristicConfig) -> Self {
        Self {
            config,
            fix_priority: DEFAULT_FIX_PRIORITY,
            history: BranchHistoryList::new(),
            last_status: None,
            solver: PhantomData,
        }
    }

    pub fn fix_priority(&self) -> i32 {
        self.fix_priority
    }

    pub fn set_fix_priority(&mut self, fix_priority: i32) {
        assert!(
            fix_priority >= 0,
            "{}: fix priority must be non-negative, got {}",
            self.config.name(),
            fix_priority
        );
        self.fix_priority = fix_priority;
    }

    pub fn history(&self) -> &BranchHistoryList {
        &self.history
    }

    /// Status of the most recent restricted solve, if one was attempted.
    pub fn last_status(&self) -> Option<SubMipStatus> {
        self.last_status
    }

    fn attempt(&mut self, model: &Model, objective: &mut f64, out: &mut [f64]) -> Attempt {
        let problem = model.problem();
        let mut solver = match S::from_model(model) {
            Ok(solver) => solver,
            Err(err) => {
                warn!("{}: could not load restriction: {}", self.config.name(), err);
                return Attempt::skipped();
            }
        };

        let relaxation = model.relaxation();
        let mut fixed = Vec::new();
        let mut all_binary = true;
        for (j, column) in problem.columns().iter().enumerate() {
            if !column.is_integer || column.priority.abs() > self.fix_priority {
                continue;
            }
            let (lower, upper) = solver.column_bounds(j);
            let value = Interval(lower, upper).clamp(relaxation[j].round());
            solver.set_column_bounds(j, value, value);
            fixed.push((j, value));
            all_binary &= column.is_binary();
        }

        let root_box = problem.columns().iter().enumerate().all(|(j, column)| {
            (column.is_integer && column.priority.abs() <= self.fix_priority)
                || (model.lower()[j] == column.lower && model.upper()[j] == column.upper)
        });

        let n_rows = solver.num_rows();
        let n_columns = solver.num_columns();
        let is_free = |j: usize| {
            let (lower, upper) = solver.column_bounds(j);
            lower < upper
        };
        let free_columns = (0..n_columns).filter(|j| is_free(*j)).count();
        let active_rows = problem
            .rows()
            .iter()
            .filter(|row| row.coeffs.iter().any(|(j, _)| is_free(*j)))
            .count();
        let ratio = (active_rows + free_columns) as f64 / ((n_rows + n_columns).max(1)) as f64;
        if ratio > self.config.fraction_small() {
            debug!(
                "{}: restriction keeps {:.2} of the problem, above {}",
                self.config.name(),
                ratio,
                self.config.fraction_small()
            );
            return Attempt::skipped();
        }

        let record = BranchHistoryRecord::from_model(model);
        if !self
            .history
            .far_from(&record, self.config.history_threshold())
        {
            debug!(
                "{}: node at depth {} too close to an earlier success",
                self.config.name(),
                model.node_depth()
            );
            return Attempt::skipped();
        }

        debug!(
            "{}: fixed {} columns, {} free, {} active rows",
            self.config.name(),
            fixed.len(),
            free_columns,
            active_rows
        );

        let mut candidate = vec![0.; n_columns];
        let mut value = *objective;
        let status = small_branch_and_bound(
            &solver,
            Some(self.config.node_budget()),
            &mut candidate,
            &mut value,
            *objective,
            self.config.name(),
        );

        let mut outcome = HeuristicOutcome::NoSolution;
        if status.found {
            match problem.check_point(&candidate) {
                Ok(()) => {
                    outcome = accept_if_better(&candidate, value, objective, out);
                }
                Err(violation) => {
                    warn!(
                        "{}: sub-MIP returned an infeasible point ({:?})",
                        self.config.name(),
                        violation
                    );
                }
            }
        }
        if outcome.is_improved() {
            self.history.append(record);
        }

        Attempt {
            outcome,
            status: Some(status),
            fixed,
            all_binary,
            root_box,
        }
    }

    fn run(&mut self, model: &Model, objective: &mut f64, out: &mut [f64]) -> Option<Attempt> {
        if !self.config.should_run(model) {
            return None;
        }
        let attempt = self.attempt(model, objective, out);
        self.last_status = attempt.status;
        self.config.record_outcome(attempt.outcome.is_improved());
        Some(attempt)
    }
}

/// `sum(x_j, fixed at 0) - sum(x_j, fixed at 1) >= 1 - |fixed at 1|`, which
/// excludes exactly the given binary assignment. Only global when the rest of
/// the search ran over the problem bounds.
fn no_good_cut(fixed: &[(usize, f64)], global: bool) -> RowCut {
    let ones = fixed.iter().filter(|(_, v)| *v > 0.5).count();
    let coeffs = fixed
        .iter()
        .map(|(j, v)| (*j, if *v > 0.5 { -1. } else { 1. }))
        .collect();
    RowCut {
        row: Row::greater_equal(1. - ones as f64, coeffs).with_name("priority_fix_no_good"),
        global,
    }
}

impl<S: SubMipSolver + 'static> Heuristic for PriorityFix<S> {
    fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut HeuristicConfig {
        &mut self.config
    }

    fn reset_model(&mut self, _model: &Model) {
        self.history = BranchHistoryList::new();
        self.last_status = None;
    }

    fn generates_cuts(&self) -> bool {
        true
    }

    fn solution(&mut self, model: &Model, objective: &mut f64, out: &mut [f64]) -> HeuristicOutcome {
        self.run(model, objective, out)
            .map(|attempt| attempt.outcome)
            .unwrap_or(HeuristicOutcome::NoSolution)
    }

    fn solution_with_cuts(
        &mut self,
        model: &Model,
        objective: &mut f64,
        out: &mut [f64],
        cuts: &mut CutPool,
    ) -> HeuristicOutcome {
        let attempt = match self.run(model, objective, out) {
            Some(attempt) => attempt,
            None => return HeuristicOutcome::NoSolution,
        };
        let exhausted = attempt.status.map(|s| s.finished && !s.found).unwrap_or(false);
        if exhausted && attempt.all_binary && !attempt.fixed.is_empty() {
            if cuts.insert(no_good_cut(&attempt.fixed, attempt.root_box)) {
                debug!(
                    "{}: added {} no-good cut over {} columns",
                    self.config.name(),
                    if attempt.root_box { "global" } else { "local" },
                    attempt.fixed.len()
                );
            }
        }
        attempt.outcome
    }

    fn box_clone(&self) -> Box<dyn Heuristic> {
        Box::new(self.clone())
    }
}
