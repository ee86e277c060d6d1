// Inequalities heuristics may hand back to the host alongside a solution.

use crate::{model::Row, FEASIBILITY_TOLERANCE};

/// Row cut `lower <= sum(coeff * x) <= upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCut {
    pub row: Row,
    /// Valid in the whole tree, not only below the current node.
    pub global: bool,
}

impl RowCut {
    pub fn violation(&self, x: &[f64]) -> f64 {
        let lhs = self.row.activity(x);
        (self.row.lower - lhs).max(lhs - self.row.upper).max(0.)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CutPool {
    cuts: Vec<RowCut>,
}

impl CutPool {
    pub fn new() -> CutPool {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    pub fn cuts(&self) -> &[RowCut] {
        &self.cuts
    }

    /// Adds `cut` unless an identical one is already stored.
    pub fn insert(&mut self, cut: RowCut) -> bool {
        if self.cuts.contains(&cut) {
            return false;
        }
        self.cuts.push(cut);
        true
    }

    pub fn violated_by<'a>(&'a self, x: &'a [f64]) -> impl Iterator<Item = &'a RowCut> + 'a {
        self.cuts
            .iter()
            .filter(move |c| c.violation(x) > FEASIBILITY_TOLERANCE)
    }

    pub fn drain(&mut self) -> Vec<RowCut> {
        std::mem::take(&mut self.cuts)
    }
}
