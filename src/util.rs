use std::collections::BTreeMap;

use log::info;

use crate::model::{Problem, Row};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DomainStats {
    pub continuous: usize,
    pub integer: usize,
    pub binary: usize,
    pub integer_unbounded: usize,
}

pub fn check_domains(problem: &Problem) -> DomainStats {
    let mut stats = DomainStats::default();
    for column in problem.columns() {
        if !column.is_integer {
            stats.continuous += 1;
        } else if column.is_binary() {
            stats.binary += 1;
        } else {
            stats.integer += 1;
            if !column.lower.is_finite() || !column.upper.is_finite() {
                stats.integer_unbounded += 1;
            }
        }
    }
    info!(
        "  cont:{} int:{} bin:{} unbounded:{}",
        stats.continuous, stats.integer, stats.binary, stats.integer_unbounded
    );
    stats
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RowStats {
    pub clauses: usize,
    pub at_most_one: usize,
    pub cardinality: usize,
    pub pseudo_boolean: usize,
    pub general: usize,
}

pub fn check_constraints(problem: &Problem) -> RowStats {
    let mut stats = RowStats::default();
    let mut row_sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for row in problem.rows() {
        *row_sizes.entry(row.coeffs.len()).or_default() += 1;
        if !only_binaries(problem, row) {
            stats.general += 1;
        } else if constraint_is_clause(row) {
            stats.clauses += 1;
        } else if constraint_is_atmost1(row) {
            stats.at_most_one += 1;
        } else if constraint_is_card(row) {
            stats.cardinality += 1;
        } else {
            stats.pseudo_boolean += 1;
        }
    }
    info!(
        "  clauses:{} atm1:{} card:{} pb:{} general:{}",
        stats.clauses, stats.at_most_one, stats.cardinality, stats.pseudo_boolean, stats.general
    );
    info!("  rowlens {:?}", row_sizes);
    stats
}

fn only_binaries(problem: &Problem, row: &Row) -> bool {
    row.coeffs
        .iter()
        .all(|(j, _)| problem.columns()[*j].is_binary())
}

/// Number of negated literals if every coefficient is +1 or -1.
fn negated_literals(row: &Row) -> Option<f64> {
    let mut negated = 0.;
    for (_, coeff) in row.coeffs.iter() {
        if *coeff == -1. {
            negated += 1.;
        } else if *coeff != 1. {
            return None;
        }
    }
    Some(negated)
}

fn constraint_is_clause(row: &Row) -> bool {
    // x + y + (1 - z) >= 1  is  x + y - z >= 0
    row.upper == f64::INFINITY
        && negated_literals(row).map_or(false, |k| row.lower + k == 1.)
}

fn constraint_is_atmost1(row: &Row) -> bool {
    // x + y + (1 - z) <= 1  is  x + y - z <= 0
    row.lower == f64::NEG_INFINITY
        && negated_literals(row).map_or(false, |k| row.upper + k == 1.)
}

fn constraint_is_card(row: &Row) -> bool {
    row.upper == f64::INFINITY
        && negated_literals(row).map_or(false, |k| row.lower + k >= 1.)
}
