// Rounding of the relaxation solution in directions that can't break a row.

use log::{debug, warn};

use crate::{
    heuristic::{accept_if_better, ConfigBuilder, Heuristic, HeuristicConfig, HeuristicOutcome},
    interval::Interval,
    model::{Model, Stamp},
    FEASIBILITY_TOLERANCE, INTEGER_TOLERANCE,
};

/// Half-width of the band the tie-breaking threshold is drawn from.
pub const ROUNDING_JITTER: f64 = 0.1;

/// Per-column directions in which a column can move without any row
/// becoming violated, whatever the other columns do.
#[derive(Debug, Clone)]
pub struct RoundingLocks {
    down_safe: Vec<bool>,
    up_safe: Vec<bool>,
    equal_safe: Vec<bool>,
    by_column: Vec<Vec<(usize, f64)>>,
    by_row: Vec<Vec<(usize, f64)>>,
    row_bounds: Vec<Interval>,
    stamp: Stamp,
}

impl RoundingLocks {
    pub fn build(model: &Model) -> RoundingLocks {
        let problem = model.problem();
        let by_column = problem.column_matrix();
        let by_row = problem
            .rows()
            .iter()
            .map(|r| r.coeffs.clone())
            .collect::<Vec<_>>();
        let row_bounds = problem
            .rows()
            .iter()
            .map(|r| Interval(r.lower, r.upper))
            .collect::<Vec<_>>();

        let n = problem.num_columns();
        let mut down_safe = vec![false; n];
        let mut up_safe = vec![false; n];
        let mut equal_safe = vec![false; n];

        for (j, column) in problem.columns().iter().enumerate() {
            if !column.is_integer {
                continue;
            }
            let mut up_blocked = false;
            let mut down_blocked = false;
            for (i, coeff) in by_column[j].iter() {
                let bounds = row_bounds[*i];
                if *coeff > 0. {
                    up_blocked |= bounds.1.is_finite();
                    down_blocked |= bounds.0.is_finite();
                } else if *coeff < 0. {
                    up_blocked |= bounds.0.is_finite();
                    down_blocked |= bounds.1.is_finite();
                }
            }
            up_safe[j] = !up_blocked;
            down_safe[j] = !down_blocked;
            equal_safe[j] = !up_blocked && !down_blocked;
        }

        RoundingLocks {
            down_safe,
            up_safe,
            equal_safe,
            by_column,
            by_row,
            row_bounds,
            stamp: model.stamp(),
        }
    }

    pub fn down_safe(&self, column: usize) -> bool {
        self.down_safe[column]
    }

    pub fn up_safe(&self, column: usize) -> bool {
        self.up_safe[column]
    }

    pub fn equal_safe(&self, column: usize) -> bool {
        self.equal_safe[column]
    }

    /// Number of rows column `column` appears in.
    pub fn column_length(&self, column: usize) -> usize {
        self.by_column[column].len()
    }

    /// False once the model's structure changed after the locks were built.
    pub fn is_current(&self, model: &Model) -> bool {
        self.stamp == model.stamp()
    }

    pub fn first_violated_row(&self, x: &[f64]) -> Option<usize> {
        self.by_row.iter().enumerate().find_map(|(i, coeffs)| {
            let lhs = coeffs.iter().map(|(j, c)| c * x[*j]).sum::<f64>();
            let bounds = self.row_bounds[i];
            (lhs < bounds.0 - FEASIBILITY_TOLERANCE || lhs > bounds.1 + FEASIBILITY_TOLERANCE)
                .then_some(i)
        })
    }
}

/// Rounds every fractional integer column of the relaxation, preferring
/// directions the locks say are safe and breaking the rest randomly.
#[derive(Debug, Clone)]
pub struct Rounding {
    config: HeuristicConfig,
    locks: Option<RoundingLocks>,
}

impl Default for Rounding {
    fn default() -> Self {
        Self::new()
    }
}

impl Rounding {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new("rounding").build())
    }

    pub fn with_config(config: HeuristicConfig) -> Self {
        Self {
            config,
            locks: None,
        }
    }

    pub fn locks(&self) -> Option<&RoundingLocks> {
        self.locks.as_ref()
    }

    /// Rounds `point` instead of the model's relaxation solution.
    pub fn solution_from_point(
        &mut self,
        model: &Model,
        point: &[f64],
        objective: &mut f64,
        out: &mut [f64],
    ) -> HeuristicOutcome {
        self.config.check_bound(model);
        let problem = model.problem();
        assert_eq!(
            point.len(),
            problem.num_columns(),
            "{}: point has the wrong dimension",
            self.config.name()
        );

        let locks = match &self.locks {
            Some(locks) if locks.is_current(model) => locks,
            _ => {
                warn!(
                    "{}: rounding locks do not match the model structure, skipping",
                    self.config.name()
                );
                return HeuristicOutcome::NoSolution;
            }
        };

        let mut x = point.to_vec();
        let mut n_fractional = 0;
        for (j, column) in problem.columns().iter().enumerate() {
            if !column.is_integer {
                continue;
            }
            let value = point[j];
            let below = value.floor();
            let fraction = value - below;
            if fraction <= INTEGER_TOLERANCE || 1. - fraction <= INTEGER_TOLERANCE {
                x[j] = value.round();
                continue;
            }
            n_fractional += 1;

            let rounded = if locks.equal_safe(j) {
                value.round()
            } else if locks.up_safe(j) && !locks.down_safe(j) {
                below + 1.
            } else if locks.down_safe(j) && !locks.up_safe(j) {
                below
            } else {
                let threshold = self
                    .config
                    .rng()
                    .uniform(0.5 - ROUNDING_JITTER, 0.5 + ROUNDING_JITTER);
                if fraction > threshold {
                    below + 1.
                } else {
                    below
                }
            };
            x[j] = Interval(model.lower()[j], model.upper()[j])
                .tighten(true)
                .clamp(rounded);
        }

        if n_fractional == 0 {
            debug!("{}: nothing fractional to round", self.config.name());
            return HeuristicOutcome::NoSolution;
        }

        if let Some(j) = (0..x.len()).find(|j| {
            x[*j] < model.lower()[*j] - FEASIBILITY_TOLERANCE
                || x[*j] > model.upper()[*j] + FEASIBILITY_TOLERANCE
        }) {
            debug!("{}: column {} outside its node bounds", self.config.name(), j);
            return HeuristicOutcome::NoSolution;
        }
        if let Some(row) = locks.first_violated_row(&x) {
            debug!(
                "{}: rounded {} columns, row {} violated",
                self.config.name(),
                n_fractional,
                row
            );
            return HeuristicOutcome::NoSolution;
        }

        let value = problem.objective_value(&x);
        let outcome = accept_if_better(&x, value, objective, out);
        debug!(
            "{}: rounded {} columns, objective {} {:?}",
            self.config.name(),
            n_fractional,
            value,
            outcome
        );
        outcome
    }
}

impl Heuristic for Rounding {
    fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut HeuristicConfig {
        &mut self.config
    }

    fn reset_model(&mut self, model: &Model) {
        self.locks = Some(RoundingLocks::build(model));
    }

    fn solution(&mut self, model: &Model, objective: &mut f64, out: &mut [f64]) -> HeuristicOutcome {
        if !self.config.should_run(model) {
            return HeuristicOutcome::NoSolution;
        }
        let point = model.relaxation().to_vec();
        let outcome = self.solution_from_point(model, &point, objective, out);
        self.config.record_outcome(outcome.is_improved());
        outcome
    }

    fn box_clone(&self) -> Box<dyn Heuristic> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cuts::CutPool,
        heuristic::When,
        model::{Column, ObjectiveSense, Problem, Row},
    };
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::SplitMix64;

    /// max 5x0 + 4x1 + 3x2, 2x0 + 3x1 + x2 <= capacity, x0 + x1 + x2 >= 1.
    fn knapsack(capacity: f64) -> Model {
        let mut problem = Problem::new("knapsack", ObjectiveSense::Maximize);
        for profit in [5., 4., 3.] {
            problem.add_column(Column::binary(profit)).unwrap();
        }
        problem
            .add_row(Row::less_equal(capacity, vec![(0, 2.), (1, 3.), (2, 1.)]))
            .unwrap();
        problem
            .add_row(Row::greater_equal(1., vec![(0, 1.), (1, 1.), (2, 1.)]))
            .unwrap();
        Model::new(problem)
    }

    fn attached(model: &Model) -> Rounding {
        let mut rounding = Rounding::new();
        rounding.attach_model(model);
        rounding
    }

    fn rows_hold(problem: &Problem, x: &[f64]) -> bool {
        problem.rows().iter().all(|row| {
            let lhs: f64 = row.coeffs.iter().map(|(j, c)| c * x[*j]).sum();
            lhs >= row.lower - 1e-6 && lhs <= row.upper + 1e-6
        })
    }

    #[test]
    fn test_knapsack_rounds_to_expected_point() {
        let mut model = knapsack(5.);
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);

        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        let outcome = rounding.solution(&model, &mut objective, &mut out);
        assert_eq!(outcome, HeuristicOutcome::Improved);
        assert_eq!(out, vec![1., 0., 1.]);
        assert_eq!(objective, -8.);
    }

    #[test]
    fn test_knapsack_over_capacity_is_rejected() {
        let mut model = knapsack(2.5);
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);

        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        let outcome = rounding.solution(&model, &mut objective, &mut out);
        assert_eq!(outcome, HeuristicOutcome::NoSolution);
        assert_eq!(objective, f64::INFINITY);
        assert_eq!(out, vec![0.; 3]);
    }

    #[test]
    fn test_integral_relaxation_is_left_alone() {
        let mut model = knapsack(5.);
        model.set_relaxation(vec![1., 0., 1.]).unwrap();
        let mut rounding = attached(&model);

        let mut objective = -8.;
        let mut out = vec![0.; 3];
        let outcome = rounding.solution(&model, &mut objective, &mut out);
        assert_eq!(outcome, HeuristicOutcome::NoSolution);
        assert_eq!(objective, -8.);
        assert_eq!(out, vec![0.; 3]);
    }

    #[test]
    fn test_result_must_beat_objective() {
        let mut model = knapsack(5.);
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);

        let mut objective = -9.;
        let mut out = vec![0.; 3];
        let outcome = rounding.solution(&model, &mut objective, &mut out);
        assert_eq!(outcome, HeuristicOutcome::NoSolution);
        assert_eq!(objective, -9.);
    }

    #[test]
    fn test_rounds_caller_point() {
        let mut model = knapsack(5.);
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);

        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        let outcome = rounding.solution_from_point(&model, &[0.2, 0.9, 0.1], &mut objective, &mut out);
        assert_eq!(outcome, HeuristicOutcome::Improved);
        assert_eq!(out, vec![0., 1., 0.]);
        assert_eq!(objective, -4.);
    }

    #[test]
    fn test_lock_directions() {
        // min x0 - x1 + x2, x0 + x1 <= 3, x1 - x2 >= -1, x3 free of rows
        let mut problem = Problem::new("locks", ObjectiveSense::Minimize);
        for obj in [1., -1., 1., 0.] {
            problem.add_column(Column::integer(0., 3., obj)).unwrap();
        }
        problem
            .add_row(Row::less_equal(3., vec![(0, 1.), (1, 1.)]))
            .unwrap();
        problem
            .add_row(Row::greater_equal(-1., vec![(1, 1.), (2, -1.)]))
            .unwrap();
        let model = Model::new(problem);
        let locks = RoundingLocks::build(&model);

        assert!(locks.down_safe(0) && !locks.up_safe(0));
        // x1 is blocked upwards by row 0 and downwards by row 1
        assert!(!locks.down_safe(1) && !locks.up_safe(1));
        assert!(locks.down_safe(2) && !locks.up_safe(2));
        assert!(locks.equal_safe(3));
        assert!(!locks.equal_safe(0));
        assert_eq!(locks.column_length(1), 2);
        assert_eq!(locks.column_length(3), 0);
    }

    #[test]
    fn test_stale_locks_are_not_used() {
        let mut model = knapsack(5.);
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);

        model
            .add_row(Row::less_equal(10., vec![(0, 1.)]))
            .unwrap();
        assert!(!rounding.locks().unwrap().is_current(&model));

        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        assert_eq!(
            rounding.solution(&model, &mut objective, &mut out),
            HeuristicOutcome::NoSolution
        );

        rounding.reset_model(&model);
        assert_eq!(
            rounding.solution(&model, &mut objective, &mut out),
            HeuristicOutcome::Improved
        );
        assert_eq!(out, vec![1., 0., 1.]);
    }

    #[test]
    fn test_same_seed_same_rounding() {
        // Ties at 0.5 are decided by the random stream.
        let mut model = knapsack(6.);
        model.set_relaxation(vec![0.5, 0.5, 0.5]).unwrap();
        let mut a = Rounding::with_config(ConfigBuilder::new("a").seed(11).build());
        a.attach_model(&model);
        let mut b = a.clone();

        for _ in 0..5 {
            let (mut obj_a, mut obj_b) = (f64::INFINITY, f64::INFINITY);
            let (mut out_a, mut out_b) = (vec![0.; 3], vec![0.; 3]);
            let res_a = a.solution(&model, &mut obj_a, &mut out_a);
            let res_b = b.solution(&model, &mut obj_b, &mut out_b);
            assert_eq!(res_a, res_b);
            assert_eq!(out_a, out_b);
        }
    }

    #[test]
    fn test_rounding_respects_node_bounds() {
        let mut model = knapsack(5.);
        model.set_node_bounds(0, 0., 0.).unwrap();
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);

        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        assert_eq!(
            rounding.solution(&model, &mut objective, &mut out),
            HeuristicOutcome::Improved
        );
        assert_eq!(out, vec![0., 0., 1.]);
    }

    #[test]
    fn test_sos_switches_rounding_off() {
        let mut model = knapsack(5.);
        model.add_special_ordered_set(vec![0, 1]).unwrap();

        let mut rounding = attached(&model);
        rounding.validate(&model);
        assert_eq!(rounding.config().when(), When::Off);

        let mut forced = Rounding::with_config(ConfigBuilder::new("forced").force(true).build());
        forced.attach_model(&model);
        forced.validate(&model);
        assert_eq!(forced.config().when(), When::Always);
    }

    #[test]
    fn test_cut_variant_is_inert() {
        let mut model = knapsack(5.);
        model.set_relaxation(vec![0.7, 0.3, 0.9]).unwrap();
        let mut rounding = attached(&model);
        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        let mut cuts = CutPool::new();
        let outcome = rounding.solution_with_cuts(&model, &mut objective, &mut out, &mut cuts);
        assert_eq!(outcome.code(), 0);
        assert!(cuts.is_empty());
    }

    #[test]
    #[should_panic(expected = "used before a model was attached")]
    fn test_unattached_rounding_panics() {
        let model = knapsack(5.);
        let mut rounding = Rounding::new();
        let mut objective = f64::INFINITY;
        let mut out = vec![0.; 3];
        rounding.solution(&model, &mut objective, &mut out);
    }

    /// Random instance whose rows all hold at a fractional point `p`.
    fn random_instance(rng: &mut SplitMix64, covering: bool) -> Model {
        let n = rng.gen_range(3..8);
        let m = rng.gen_range(1..5);
        let mut problem = Problem::new("random", ObjectiveSense::Minimize);
        let mut point = Vec::new();
        for _ in 0..n {
            let upper = rng.gen_range(1..5) as f64;
            problem
                .add_column(Column::integer(0., upper, rng.gen_range(-3..4) as f64))
                .unwrap();
            point.push(rng.gen_range(0. ..upper));
        }
        for _ in 0..m {
            let mut coeffs = Vec::new();
            for j in 0..n {
                if rng.gen_bool(0.6) {
                    let coeff = if covering {
                        rng.gen_range(1..4) as f64
                    } else {
                        [-3., -2., -1., 1., 2., 3.][rng.gen_range(0..6)]
                    };
                    coeffs.push((j, coeff));
                }
            }
            let activity: f64 = coeffs.iter().map(|(j, c)| c * point[*j]).sum();
            let slack = rng.gen_range(0. ..2.);
            let row = if covering || rng.gen_bool(0.5) {
                Row::greater_equal(activity - slack, coeffs)
            } else {
                Row::less_equal(activity + slack, coeffs)
            };
            problem.add_row(row).unwrap();
        }
        let mut model = Model::new(problem);
        model.set_relaxation(point).unwrap();
        model
    }

    #[test]
    fn test_lock_soundness_on_random_instances() {
        let mut rng = SplitMix64::seed_from_u64(2024);
        for round in 0..300 {
            let model = random_instance(&mut rng, round % 3 == 0);
            let mut rounding =
                Rounding::with_config(ConfigBuilder::new("random").seed(round).build());
            rounding.attach_model(&model);

            let all_safe = model.fractional_columns().all(|j| {
                let locks = rounding.locks().unwrap();
                locks.up_safe(j) || locks.down_safe(j)
            });
            let any_fractional = model.fractional_columns().next().is_some();

            let mut objective = f64::INFINITY;
            let mut out = vec![f64::NAN; model.problem().num_columns()];
            let outcome = rounding.solution(&model, &mut objective, &mut out);

            if outcome.is_improved() {
                assert!(rows_hold(model.problem(), &out), "round {}", round);
                assert!(out.iter().all(|v| v.fract() == 0.));
                assert_eq!(objective, model.problem().objective_value(&out));
            }
            if all_safe && any_fractional {
                assert!(outcome.is_improved(), "round {}", round);
            }
        }
    }
}
