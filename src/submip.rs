// Bounded branch-and-bound on a restricted copy of the problem.

use log::{debug, warn};

use crate::{
    interval::Interval,
    model::{Model, ModelError},
    FEASIBILITY_TOLERANCE, OBJECTIVE_TOLERANCE,
};

const MAX_PROPAGATION_PASSES: usize = 20;

/// Solver the reduced sub-MIP primitive runs on. Implementations must be
/// cheap to clone: every solve works on a private copy.
pub trait SubMipSolver: Clone + Send {
    /// Loads the model's problem with its current node bounds.
    fn from_model(model: &Model) -> Result<Self, ModelError>;

    fn num_rows(&self) -> usize;

    fn num_columns(&self) -> usize;

    fn column_bounds(&self, column: usize) -> (f64, f64);

    fn set_column_bounds(&mut self, column: usize, lower: f64, upper: f64);

    /// Searches at most `node_limit` nodes for a solution with objective
    /// below `cutoff`. Returns whether the search finished.
    fn branch_and_bound(&mut self, node_limit: Option<usize>, cutoff: f64) -> Result<bool, ModelError>;

    /// Best solution found, as (minimization-form objective, values).
    fn best_solution(&self) -> Option<(f64, &[f64])>;

    fn nodes_explored(&self) -> usize;
}

/// Two-bit outcome of a reduced solve.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct SubMipStatus {
    pub finished: bool,
    pub found: bool,
}

impl SubMipStatus {
    /// 0 not finished/no solution, 1 not finished/solution,
    /// 2 finished/no solution, 3 finished/solution.
    pub fn code(self) -> u8 {
        (self.finished as u8) << 1 | self.found as u8
    }
}

/// Runs a node-bounded branch-and-bound on a clone of `solver`, which the
/// caller has already restricted. On success the solution and its value are
/// written to `out` / `out_value`; otherwise neither is touched.
pub fn small_branch_and_bound<S: SubMipSolver>(
    solver: &S,
    node_budget: Option<usize>,
    out: &mut [f64],
    out_value: &mut f64,
    cutoff: f64,
    label: &str,
) -> SubMipStatus {
    let mut sub = solver.clone();
    let finished = match sub.branch_and_bound(node_budget, cutoff) {
        Ok(finished) => finished,
        Err(err) => {
            warn!("{}: sub-MIP not attempted: {}", label, err);
            return SubMipStatus {
                finished: false,
                found: false,
            };
        }
    };

    let found = match sub.best_solution() {
        Some((value, values)) => {
            out.copy_from_slice(values);
            *out_value = value;
            true
        }
        None => false,
    };

    debug!(
        "{}: sub-MIP with {} rows {} columns, {} nodes, finished:{} found:{}",
        label,
        sub.num_rows(),
        sub.num_columns(),
        sub.nodes_explored(),
        finished,
        found
    );

    SubMipStatus { finished, found }
}

#[derive(Debug, Clone)]
struct SubRow {
    bounds: Interval,
    coeffs: Vec<(usize, f64)>,
}

/// Depth-first branch-and-bound over integer columns with row-activity
/// propagation. Continuous columns have to be fixed before solving.
#[derive(Debug, Clone)]
pub struct TreeSearchSolver {
    objective: Vec<f64>,
    offset: f64,
    is_integer: Vec<bool>,
    rows: Vec<SubRow>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    best: Option<(f64, Vec<f64>)>,
    nodes: usize,
}

impl TreeSearchSolver {
    fn value(&self, x: &[f64]) -> f64 {
        self.offset
            + self
                .objective
                .iter()
                .zip(x.iter())
                .map(|(c, v)| c * v)
                .sum::<f64>()
    }

    fn objective_bound(&self, lo: &[f64], hi: &[f64]) -> f64 {
        self.offset
            + self
                .objective
                .iter()
                .enumerate()
                .filter(|(_, c)| **c != 0.)
                .map(|(j, c)| (c * lo[j]).min(c * hi[j]))
                .sum::<f64>()
    }

    /// Tightens `lo`/`hi` from the rows. False if some row can't be satisfied.
    fn propagate(&self, lo: &mut [f64], hi: &mut [f64]) -> bool {
        for _ in 0..MAX_PROPAGATION_PASSES {
            let mut changed = false;
            for row in self.rows.iter() {
                let activity: Interval = row
                    .coeffs
                    .iter()
                    .map(|(j, c)| *c * Interval(lo[*j], hi[*j]))
                    .sum();

                if activity.0 > row.bounds.1 + FEASIBILITY_TOLERANCE
                    || activity.1 < row.bounds.0 - FEASIBILITY_TOLERANCE
                {
                    return false;
                }

                for (j, c) in row.coeffs.iter() {
                    let (j, c) = (*j, *c);
                    if c == 0. {
                        continue;
                    }
                    let own = c * Interval(lo[j], hi[j]);
                    let mut range = Interval(lo[j], hi[j]);

                    if row.bounds.1.is_finite() && activity.0.is_finite() {
                        let slack = (row.bounds.1 - (activity.0 - own.0)) / c;
                        range = if c > 0. {
                            range.intersect(Interval(f64::NEG_INFINITY, slack))
                        } else {
                            range.intersect(Interval(slack, f64::INFINITY))
                        };
                    }
                    if row.bounds.0.is_finite() && activity.1.is_finite() {
                        let slack = (row.bounds.0 - (activity.1 - own.1)) / c;
                        range = if c > 0. {
                            range.intersect(Interval(slack, f64::INFINITY))
                        } else {
                            range.intersect(Interval(f64::NEG_INFINITY, slack))
                        };
                    }
                    if self.is_integer[j] {
                        range = Interval(
                            (range.0 - FEASIBILITY_TOLERANCE).ceil(),
                            (range.1 + FEASIBILITY_TOLERANCE).floor(),
                        );
                    }
                    if range.0 > range.1 + FEASIBILITY_TOLERANCE {
                        return false;
                    }
                    if range.0 > lo[j] + FEASIBILITY_TOLERANCE {
                        lo[j] = range.0.min(hi[j]);
                        changed = true;
                    }
                    if range.1 < hi[j] - FEASIBILITY_TOLERANCE {
                        hi[j] = range.1.max(lo[j]);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        true
    }

    fn is_feasible(&self, x: &[f64]) -> bool {
        self.rows.iter().all(|row| {
            let lhs = row.coeffs.iter().map(|(j, c)| c * x[*j]).sum::<f64>();
            row.bounds.0 - FEASIBILITY_TOLERANCE <= lhs && lhs <= row.bounds.1 + FEASIBILITY_TOLERANCE
        })
    }

    fn split_point(lo: f64, hi: f64) -> f64 {
        match (lo.is_finite(), hi.is_finite()) {
            (true, true) => ((lo + hi) / 2.).floor(),
            (true, false) => lo,
            (false, true) => hi - 1.,
            (false, false) => 0.,
        }
    }
}

impl SubMipSolver for TreeSearchSolver {
    fn from_model(model: &Model) -> Result<Self, ModelError> {
        let problem = model.problem();
        let factor = problem.sense().factor();

        let mut lower = model.lower().to_vec();
        let mut upper = model.upper().to_vec();
        for (j, column) in problem.columns().iter().enumerate() {
            if column.is_integer {
                let range = Interval(lower[j], upper[j]).tighten(true);
                lower[j] = range.0;
                upper[j] = range.1;
            }
        }

        Ok(TreeSearchSolver {
            objective: (0..problem.num_columns())
                .map(|j| problem.min_objective(j))
                .collect(),
            offset: factor * problem.objective_offset(),
            is_integer: problem.columns().iter().map(|c| c.is_integer).collect(),
            rows: problem
                .rows()
                .iter()
                .map(|r| SubRow {
                    bounds: Interval(r.lower, r.upper),
                    coeffs: r.coeffs.iter().copied().filter(|(_, c)| *c != 0.).collect(),
                })
                .collect(),
            lower,
            upper,
            best: None,
            nodes: 0,
        })
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn num_columns(&self) -> usize {
        self.objective.len()
    }

    fn column_bounds(&self, column: usize) -> (f64, f64) {
        (self.lower[column], self.upper[column])
    }

    fn set_column_bounds(&mut self, column: usize, lower: f64, upper: f64) {
        self.lower[column] = lower;
        self.upper[column] = upper;
    }

    fn branch_and_bound(&mut self, node_limit: Option<usize>, cutoff: f64) -> Result<bool, ModelError> {
        if let Some(j) = (0..self.num_columns())
            .find(|j| !self.is_integer[*j] && self.lower[*j] != self.upper[*j])
        {
            return Err(ModelError::UnfixedContinuous(j));
        }

        self.best = None;
        self.nodes = 0;
        let mut stack = vec![(self.lower.clone(), self.upper.clone())];
        while let Some((mut lo, mut hi)) = stack.pop() {
            if node_limit.map(|limit| self.nodes >= limit).unwrap_or(false) {
                return Ok(false);
            }
            self.nodes += 1;

            if lo.iter().zip(hi.iter()).any(|(l, h)| l > h) || !self.propagate(&mut lo, &mut hi) {
                continue;
            }

            let incumbent = self.best.as_ref().map(|b| b.0).unwrap_or(f64::INFINITY);
            let limit = cutoff.min(incumbent);
            if self.objective_bound(&lo, &hi) >= limit - OBJECTIVE_TOLERANCE {
                continue;
            }

            match (0..lo.len()).find(|j| self.is_integer[*j] && lo[*j] < hi[*j]) {
                None => {
                    let value = self.value(&lo);
                    if value < limit - OBJECTIVE_TOLERANCE && self.is_feasible(&lo) {
                        self.best = Some((value, lo));
                    }
                }
                Some(j) => {
                    let mid = Self::split_point(lo[j], hi[j]);
                    let mut down = (lo.clone(), hi.clone());
                    down.1[j] = mid;
                    let mut up = (lo, hi);
                    up.0[j] = mid + 1.;

                    // The half preferred by the objective is popped first.
                    if self.objective[j] < 0. {
                        stack.push(down);
                        stack.push(up);
                    } else {
                        stack.push(up);
                        stack.push(down);
                    }
                }
            }
        }
        Ok(true)
    }

    fn best_solution(&self) -> Option<(f64, &[f64])> {
        self.best.as_ref().map(|(v, x)| (*v, x.as_slice()))
    }

    fn nodes_explored(&self) -> usize {
        self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{tests::small_knapsack, Column, ObjectiveSense, Problem, Row};

    /// 2 * (x0 + ... + x9) = 7 has no integer solution, but propagation
    /// can't see that until most columns are fixed.
    fn parity_model() -> Model {
        let mut problem = Problem::new("parity", ObjectiveSense::Minimize);
        for _ in 0..10 {
            problem.add_column(Column::binary(1.)).unwrap();
        }
        problem
            .add_row(Row::equal(7., (0..10).map(|j| (j, 2.)).collect()))
            .unwrap();
        Model::new(problem)
    }

    #[test]
    fn test_status_codes() {
        let code = |finished, found| SubMipStatus { finished, found }.code();
        assert_eq!(code(false, false), 0);
        assert_eq!(code(false, true), 1);
        assert_eq!(code(true, false), 2);
        assert_eq!(code(true, true), 3);
    }

    #[test]
    fn test_unlimited_budget_solves_knapsack() {
        let model = small_knapsack();
        let solver = TreeSearchSolver::from_model(&model).unwrap();
        let mut out = vec![0.; 3];
        let mut value = 0.;
        let status = small_branch_and_bound(&solver, None, &mut out, &mut value, f64::INFINITY, "test");
        assert_eq!(status.code(), 3);
        assert_eq!(out, vec![1., 1., 0.]);
        assert_eq!(value, -9.);
        assert_eq!(model.problem().check_point(&out), Ok(()));
    }

    #[test]
    fn test_budget_is_respected() {
        let model = parity_model();
        let solver = TreeSearchSolver::from_model(&model).unwrap();
        let mut out = vec![-1.; 10];
        let mut value = 123.;

        let status = small_branch_and_bound(&solver, Some(5), &mut out, &mut value, f64::INFINITY, "test");
        assert!(!status.finished);
        assert!(!status.found);
        assert_eq!(value, 123.);
        assert!(out.iter().all(|v| *v == -1.));

        let status = small_branch_and_bound(&solver, None, &mut out, &mut value, f64::INFINITY, "test");
        assert_eq!(status.code(), 2);
        assert_eq!(value, 123.);
    }

    #[test]
    fn test_caller_solver_is_not_modified() {
        let model = small_knapsack();
        let solver = TreeSearchSolver::from_model(&model).unwrap();
        let mut out = vec![0.; 3];
        let mut value = 0.;
        small_branch_and_bound(&solver, None, &mut out, &mut value, f64::INFINITY, "test");
        assert_eq!(solver.nodes_explored(), 0);
        assert!(solver.best_solution().is_none());
    }

    #[test]
    fn test_cutoff_excludes_worse_solutions() {
        let model = small_knapsack();
        let solver = TreeSearchSolver::from_model(&model).unwrap();
        let mut out = vec![0.; 3];
        let mut value = 0.;
        let status = small_branch_and_bound(&solver, None, &mut out, &mut value, -9., "test");
        assert_eq!(status.code(), 2);
    }

    #[test]
    fn test_fully_fixed_restriction_takes_one_node() {
        let model = small_knapsack();
        let mut solver = TreeSearchSolver::from_model(&model).unwrap();
        for (j, v) in [1., 0., 1.].into_iter().enumerate() {
            solver.set_column_bounds(j, v, v);
        }
        let finished = solver.branch_and_bound(Some(1), f64::INFINITY).unwrap();
        assert!(finished);
        assert_eq!(solver.nodes_explored(), 1);
        assert_eq!(solver.best_solution(), Some((-8., &[1., 0., 1.][..])));
    }

    #[test]
    fn test_unfixed_continuous_column_is_rejected() {
        let mut problem = Problem::new("mixed", ObjectiveSense::Minimize);
        problem.add_column(Column::binary(1.)).unwrap();
        problem.add_column(Column::continuous(0., 4., 1.)).unwrap();
        problem
            .add_row(Row::greater_equal(1., vec![(0, 1.), (1, 1.)]))
            .unwrap();
        let model = Model::new(problem);
        let mut solver = TreeSearchSolver::from_model(&model).unwrap();
        assert_eq!(
            solver.branch_and_bound(None, f64::INFINITY),
            Err(ModelError::UnfixedContinuous(1))
        );

        let mut out = vec![0.; 2];
        let mut value = 0.;
        let status = small_branch_and_bound(&solver, None, &mut out, &mut value, f64::INFINITY, "test");
        assert_eq!(status.code(), 0);

        solver.set_column_bounds(1, 0.5, 0.5);
        assert_eq!(solver.branch_and_bound(None, f64::INFINITY), Ok(true));
        assert_eq!(solver.best_solution().map(|(v, _)| v), Some(1.5));
    }

    #[test]
    fn test_general_integer_with_open_upper_bound() {
        // min x0 s.t. 3 x0 >= 10, x0 >= 0 integer without upper bound
        let mut problem = Problem::new("open", ObjectiveSense::Minimize);
        problem
            .add_column(Column::integer(0., f64::INFINITY, 1.))
            .unwrap();
        problem.add_row(Row::greater_equal(10., vec![(0, 3.)])).unwrap();
        let model = Model::new(problem);
        let mut solver = TreeSearchSolver::from_model(&model).unwrap();
        assert_eq!(solver.branch_and_bound(Some(100), f64::INFINITY), Ok(true));
        assert_eq!(solver.best_solution().map(|(v, _)| v), Some(4.));
    }

    #[test]
    fn test_zero_coefficient_does_not_prune() {
        // min -x0 - x1 s.t. 0 x0 + x1 <= 5
        let mut problem = Problem::new("zero", ObjectiveSense::Minimize);
        problem.add_column(Column::binary(-1.)).unwrap();
        problem.add_column(Column::binary(-1.)).unwrap();
        problem
            .add_row(Row::less_equal(5., vec![(0, 0.), (1, 1.)]))
            .unwrap();
        let model = Model::new(problem);
        assert!(model.problem().check_point(&[1., 1.]).is_ok());

        let solver = TreeSearchSolver::from_model(&model).unwrap();
        let mut out = vec![0.; 2];
        let mut value = 0.;
        let status = small_branch_and_bound(&solver, None, &mut out, &mut value, f64::INFINITY, "test");
        assert_eq!(status.code(), 3);
        assert_eq!(out, vec![1., 1.]);
        assert_eq!(value, -2.);
    }

    #[test]
    fn test_solved_solver_starts_fresh() {
        let model = small_knapsack();
        let mut solver = TreeSearchSolver::from_model(&model).unwrap();
        assert_eq!(solver.branch_and_bound(None, f64::INFINITY), Ok(true));
        assert!(solver.best_solution().is_some());
        let solved_nodes = solver.nodes_explored();
        assert!(solved_nodes > 0);

        let mut out = vec![0.; 3];
        let mut value = 0.;
        let status = small_branch_and_bound(&solver, None, &mut out, &mut value, -9., "test");
        assert_eq!(status.code(), 2);
        assert_eq!(out, vec![0.; 3]);
        assert_eq!(value, 0.);

        let mut again = solver.clone();
        assert_eq!(again.branch_and_bound(None, f64::INFINITY), Ok(true));
        assert_eq!(again.nodes_explored(), solved_nodes);
        assert_eq!(again.best_solution(), solver.best_solution());
    }
}
