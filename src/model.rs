// Host-side problem structure and node state that heuristics read from.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::{history::BranchDecision, interval::Interval, FEASIBILITY_TOLERANCE, INTEGER_TOLERANCE};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("row {row} references unknown column {column}")]
    UnknownColumn { row: usize, column: usize },
    #[error("column {0} is out of range")]
    ColumnOutOfRange(usize),
    #[error("invalid bounds [{lower}, {upper}] for {what}")]
    InvalidBounds { what: String, lower: f64, upper: f64 },
    #[error("non-finite coefficient for column {column} in row {row}")]
    NonFiniteCoefficient { row: usize, column: usize },
    #[error("expected a vector of length {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("column {0} is continuous and not fixed")]
    UnfixedContinuous(usize),
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum ObjectiveSense {
    #[default]
    Minimize,
    Maximize,
}

impl ObjectiveSense {
    /// Multiplier that turns the objective into a minimization.
    pub fn factor(self) -> f64 {
        match self {
            ObjectiveSense::Minimize => 1.,
            ObjectiveSense::Maximize => -1.,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub objective: f64,
    pub is_integer: bool,
    /// Branching priority, smaller is more important.
    pub priority: i32,
}

pub const DEFAULT_PRIORITY: i32 = 1000;

impl Column {
    pub fn integer(lower: f64, upper: f64, objective: f64) -> Column {
        Column {
            name: String::new(),
            lower,
            upper,
            objective,
            is_integer: true,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn binary(objective: f64) -> Column {
        Self::integer(0., 1., objective)
    }

    pub fn continuous(lower: f64, upper: f64, objective: f64) -> Column {
        Column {
            is_integer: false,
            ..Self::integer(lower, upper, objective)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Column {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Column {
        self.priority = priority;
        self
    }

    pub fn is_binary(&self) -> bool {
        self.is_integer && self.lower >= 0. && self.upper <= 1.
    }
}

/// Range row `lower <= sum(coeff * x) <= upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub coeffs: Vec<(usize, f64)>,
}

impl Row {
    pub fn new(lower: f64, upper: f64, coeffs: Vec<(usize, f64)>) -> Row {
        Row {
            name: String::new(),
            lower,
            upper,
            coeffs,
        }
    }

    pub fn less_equal(rhs: f64, coeffs: Vec<(usize, f64)>) -> Row {
        Self::new(f64::NEG_INFINITY, rhs, coeffs)
    }

    pub fn greater_equal(rhs: f64, coeffs: Vec<(usize, f64)>) -> Row {
        Self::new(rhs, f64::INFINITY, coeffs)
    }

    pub fn equal(rhs: f64, coeffs: Vec<(usize, f64)>) -> Row {
        Self::new(rhs, rhs, coeffs)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Row {
        self.name = name.into();
        self
    }

    pub fn activity(&self, x: &[f64]) -> f64 {
        self.coeffs.iter().map(|(v, c)| c * x[*v]).sum()
    }

    pub fn is_equality(&self) -> bool {
        self.lower == self.upper
    }
}

/// Why a point is not feasible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Violation {
    Bound(usize),
    Integrality(usize),
    Row(usize),
}

/// Columns, rows and objective of a MIP. Structural edits bump `version`.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub name: String,
    sense: ObjectiveSense,
    objective_offset: f64,
    columns: Vec<Column>,
    rows: Vec<Row>,
    special_ordered_sets: Vec<Vec<usize>>,
    version: u64,
}

impl Problem {
    pub fn new(name: impl Into<String>, sense: ObjectiveSense) -> Problem {
        Problem {
            name: name.into(),
            sense,
            ..Default::default()
        }
    }

    pub fn sense(&self) -> ObjectiveSense {
        self.sense
    }

    pub fn objective_offset(&self) -> f64 {
        self.objective_offset
    }

    pub fn set_objective_offset(&mut self, offset: f64) {
        self.objective_offset = offset;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn add_column(&mut self, column: Column) -> Result<usize, ModelError> {
        if column.lower > column.upper || column.lower.is_nan() || column.upper.is_nan() {
            return Err(ModelError::InvalidBounds {
                what: format!("column {}", self.columns.len()),
                lower: column.lower,
                upper: column.upper,
            });
        }
        self.columns.push(column);
        self.version += 1;
        Ok(self.columns.len() - 1)
    }

    pub fn add_row(&mut self, row: Row) -> Result<usize, ModelError> {
        let row_idx = self.rows.len();
        if row.lower > row.upper || row.lower.is_nan() || row.upper.is_nan() {
            return Err(ModelError::InvalidBounds {
                what: format!("row {}", row_idx),
                lower: row.lower,
                upper: row.upper,
            });
        }
        for (column, coeff) in row.coeffs.iter() {
            if *column >= self.columns.len() {
                return Err(ModelError::UnknownColumn {
                    row: row_idx,
                    column: *column,
                });
            }
            if !coeff.is_finite() {
                return Err(ModelError::NonFiniteCoefficient {
                    row: row_idx,
                    column: *column,
                });
            }
        }
        self.rows.push(row);
        self.version += 1;
        Ok(row_idx)
    }

    pub fn add_special_ordered_set(&mut self, members: Vec<usize>) -> Result<(), ModelError> {
        if let Some(c) = members.iter().find(|c| **c >= self.columns.len()) {
            return Err(ModelError::ColumnOutOfRange(*c));
        }
        self.special_ordered_sets.push(members);
        self.version += 1;
        Ok(())
    }

    pub fn has_special_ordered_sets(&self) -> bool {
        !self.special_ordered_sets.is_empty()
    }

    pub fn set_priority(&mut self, column: usize, priority: i32) {
        self.columns[column].priority = priority;
    }

    /// Objective in minimization form.
    pub fn objective_value(&self, x: &[f64]) -> f64 {
        self.sense.factor()
            * (self.objective_offset
                + self
                    .columns
                    .iter()
                    .zip(x.iter())
                    .map(|(c, v)| c.objective * v)
                    .sum::<f64>())
    }

    /// Minimization-form objective coefficient of a column.
    pub fn min_objective(&self, column: usize) -> f64 {
        self.sense.factor() * self.columns[column].objective
    }

    /// Column-major copy of the matrix.
    pub fn column_matrix(&self) -> Vec<Vec<(usize, f64)>> {
        let mut by_column = vec![Vec::new(); self.columns.len()];
        for (row_idx, row) in self.rows.iter().enumerate() {
            for (column, coeff) in row.coeffs.iter() {
                by_column[*column].push((row_idx, *coeff));
            }
        }
        by_column
    }

    /// First violated requirement of `x`, checked against the column bounds,
    /// integrality and every row.
    pub fn check_point(&self, x: &[f64]) -> Result<(), Violation> {
        for (idx, column) in self.columns.iter().enumerate() {
            let value = x[idx];
            if value < column.lower - FEASIBILITY_TOLERANCE
                || value > column.upper + FEASIBILITY_TOLERANCE
            {
                return Err(Violation::Bound(idx));
            }
            if column.is_integer && (value - value.round()).abs() > INTEGER_TOLERANCE {
                return Err(Violation::Integrality(idx));
            }
        }
        for (idx, row) in self.rows.iter().enumerate() {
            let lhs = row.activity(x);
            if lhs < row.lower - FEASIBILITY_TOLERANCE || lhs > row.upper + FEASIBILITY_TOLERANCE {
                return Err(Violation::Row(idx));
            }
        }
        Ok(())
    }
}

/// A solution the relaxation solver found on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundSolution {
    pub objective: f64,
    pub values: Vec<f64>,
}

/// Identifies the structure a cache was built from.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Stamp {
    pub model_id: u64,
    pub version: u64,
}

/// The host model: a problem plus the state of the node being processed.
///
/// Every model (clones included) carries a distinct id, so heuristics can
/// tell which instance they are bound to.
#[derive(Debug)]
pub struct Model {
    id: u64,
    problem: Problem,
    lower: Vec<f64>,
    upper: Vec<f64>,
    relaxation: Vec<f64>,
    cutoff: f64,
    node_count: usize,
    branch_path: Vec<BranchDecision>,
    solver_solution: Option<FoundSolution>,
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Model {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            problem: self.problem.clone(),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            relaxation: self.relaxation.clone(),
            cutoff: self.cutoff,
            node_count: self.node_count,
            branch_path: self.branch_path.clone(),
            solver_solution: self.solver_solution.clone(),
        }
    }
}

impl Model {
    pub fn new(problem: Problem) -> Model {
        let lower = problem.columns().iter().map(|c| c.lower).collect();
        let upper = problem.columns().iter().map(|c| c.upper).collect();
        let relaxation = problem
            .columns()
            .iter()
            .map(|c| c.lower.max(c.upper.min(0.)))
            .collect();
        Model {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            problem,
            lower,
            upper,
            relaxation,
            cutoff: f64::INFINITY,
            node_count: 0,
            branch_path: Vec::new(),
            solver_solution: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            model_id: self.id,
            version: self.problem.version(),
        }
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn add_column(&mut self, column: Column) -> Result<usize, ModelError> {
        let (lower, upper) = (column.lower, column.upper);
        let idx = self.problem.add_column(column)?;
        self.lower.push(lower);
        self.upper.push(upper);
        self.relaxation.push(lower.max(upper.min(0.)));
        Ok(idx)
    }

    pub fn add_row(&mut self, row: Row) -> Result<usize, ModelError> {
        self.problem.add_row(row)
    }

    pub fn add_special_ordered_set(&mut self, members: Vec<usize>) -> Result<(), ModelError> {
        self.problem.add_special_ordered_set(members)
    }

    pub fn set_priority(&mut self, column: usize, priority: i32) {
        self.problem.set_priority(column, priority);
    }

    pub fn has_special_ordered_sets(&self) -> bool {
        self.problem.has_special_ordered_sets()
    }

    pub fn relaxation(&self) -> &[f64] {
        &self.relaxation
    }

    pub fn set_relaxation(&mut self, values: Vec<f64>) -> Result<(), ModelError> {
        if values.len() != self.problem.num_columns() {
            return Err(ModelError::DimensionMismatch {
                expected: self.problem.num_columns(),
                found: values.len(),
            });
        }
        self.relaxation = values;
        Ok(())
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn set_node_bounds(&mut self, column: usize, lower: f64, upper: f64) -> Result<(), ModelError> {
        if column >= self.problem.num_columns() {
            return Err(ModelError::ColumnOutOfRange(column));
        }
        if lower > upper {
            return Err(ModelError::InvalidBounds {
                what: format!("node bounds of column {}", column),
                lower,
                upper,
            });
        }
        self.lower[column] = lower;
        self.upper[column] = upper;
        Ok(())
    }

    /// Moves to the node reached from the root by `path`: node bounds are
    /// reset to the problem bounds and tightened by every decision.
    pub fn enter_node(&mut self, path: Vec<BranchDecision>) -> Result<(), ModelError> {
        let mut lower: Vec<f64> = self.problem.columns().iter().map(|c| c.lower).collect();
        let mut upper: Vec<f64> = self.problem.columns().iter().map(|c| c.upper).collect();
        for decision in path.iter() {
            let j = decision.column;
            if j >= self.problem.num_columns() {
                return Err(ModelError::ColumnOutOfRange(j));
            }
            let range = decision.apply(Interval(lower[j], upper[j]));
            if range.0 > range.1 + FEASIBILITY_TOLERANCE {
                return Err(ModelError::InvalidBounds {
                    what: format!("node bounds of column {}", j),
                    lower: range.0,
                    upper: range.1,
                });
            }
            lower[j] = range.0;
            upper[j] = range.1;
        }
        self.lower = lower;
        self.upper = upper;
        self.branch_path = path;
        self.node_count += 1;
        Ok(())
    }

    pub fn branch_path(&self) -> &[BranchDecision] {
        &self.branch_path
    }

    pub fn node_depth(&self) -> usize {
        self.branch_path.len()
    }

    pub fn is_root(&self) -> bool {
        self.branch_path.is_empty()
    }

    /// Number of nodes processed so far.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn set_node_count(&mut self, count: usize) {
        self.node_count = count;
    }

    /// Minimization-form objective value that new solutions have to beat.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn set_cutoff(&mut self, cutoff: f64) {
        self.cutoff = cutoff;
    }

    pub fn solver_solution(&self) -> Option<&FoundSolution> {
        self.solver_solution.as_ref()
    }

    pub fn set_solver_solution(&mut self, solution: Option<FoundSolution>) {
        self.solver_solution = solution;
    }

    /// Fractional integer columns of the relaxation solution.
    pub fn fractional_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.problem
            .columns()
            .iter()
            .enumerate()
            .filter(move |(idx, column)| {
                let value = self.relaxation[*idx];
                column.is_integer && (value - value.round()).abs() > INTEGER_TOLERANCE
            })
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// max 5x0 + 4x1 + 3x2, 2x0 + 3x1 + x2 <= 5, x0 + x1 + x2 >= 1, binaries.
    pub(crate) fn small_knapsack() -> Model {
        let mut problem = Problem::new("knapsack", ObjectiveSense::Maximize);
        for profit in [5., 4., 3.] {
            problem.add_column(Column::binary(profit)).unwrap();
        }
        problem
            .add_row(Row::less_equal(5., vec![(0, 2.), (1, 3.), (2, 1.)]))
            .unwrap();
        problem
            .add_row(Row::greater_equal(1., vec![(0, 1.), (1, 1.), (2, 1.)]))
            .unwrap();
        Model::new(problem)
    }

    #[test]
    fn test_structural_edits_bump_version() {
        let mut model = small_knapsack();
        let before = model.stamp();
        model.set_priority(0, 5);
        assert_eq!(model.stamp(), before);
        model.add_row(Row::less_equal(1., vec![(0, 1.), (1, 1.)])).unwrap();
        assert_ne!(model.stamp(), before);
    }

    #[test]
    fn test_clone_gets_a_new_identity() {
        let model = small_knapsack();
        let copy = model.clone();
        assert_ne!(model.id(), copy.id());
        assert_eq!(model.problem().version(), copy.problem().version());
    }

    #[test]
    fn test_objective_is_in_minimization_form() {
        let model = small_knapsack();
        assert_eq!(model.problem().objective_value(&[1., 0., 1.]), -8.);
    }

    #[test]
    fn test_check_point_reports_first_violation() {
        let model = small_knapsack();
        let problem = model.problem();
        assert_eq!(problem.check_point(&[1., 0., 1.]), Ok(()));
        assert_eq!(problem.check_point(&[1., 1., 1.]), Err(Violation::Row(0)));
        assert_eq!(problem.check_point(&[0., 0., 0.]), Err(Violation::Row(1)));
        assert_eq!(problem.check_point(&[0.5, 0., 1.]), Err(Violation::Integrality(0)));
        assert_eq!(problem.check_point(&[2., 0., 0.]), Err(Violation::Bound(0)));
    }

    #[test]
    fn test_rejects_rows_with_unknown_columns() {
        let mut model = small_knapsack();
        assert_eq!(
            model.add_row(Row::less_equal(1., vec![(7, 1.)])),
            Err(ModelError::UnknownColumn { row: 2, column: 7 })
        );
    }

    #[test]
    fn test_enter_node_applies_path() {
        let mut model = small_knapsack();
        model
            .enter_node(vec![BranchDecision::down(0, 0.), BranchDecision::up(2, 1.)])
            .unwrap();
        assert_eq!(model.lower(), &[0., 0., 1.]);
        assert_eq!(model.upper(), &[0., 1., 1.]);
        assert_eq!(model.node_depth(), 2);

        model.enter_node(Vec::new()).unwrap();
        assert!(model.is_root());
        assert_eq!(model.upper(), &[1., 1., 1.]);
    }

    #[test]
    fn test_rejected_path_leaves_node_unchanged() {
        let mut model = small_knapsack();
        model.enter_node(vec![BranchDecision::up(1, 1.)]).unwrap();
        let count = model.node_count();

        assert_eq!(
            model.enter_node(vec![BranchDecision::down(0, 0.), BranchDecision::up(7, 1.)]),
            Err(ModelError::ColumnOutOfRange(7))
        );
        assert!(matches!(
            model.enter_node(vec![BranchDecision::down(0, 0.), BranchDecision::up(0, 1.)]),
            Err(ModelError::InvalidBounds { .. })
        ));

        assert_eq!(model.lower(), &[0., 1., 0.]);
        assert_eq!(model.upper(), &[1., 1., 1.]);
        assert_eq!(model.branch_path(), &[BranchDecision::up(1, 1.)]);
        assert_eq!(model.node_count(), count);
    }

    #[test]
    fn test_fractional_columns() {
        let mut model = small_knapsack();
        model.set_relaxation(vec![1., 0.5, 0.]).unwrap();
        assert_eq!(model.fractional_columns().collect::<Vec<_>>(), vec![1]);
        assert!(model.set_relaxation(vec![1.]).is_err());
    }
}
