// Records of the branching decisions that led to the nodes where a heuristic
// ran, and the novelty check used to skip reruns in already explored regions.

use std::collections::BTreeMap;

use crate::{
    interval::{Interval, RangeCompare},
    model::Model,
    EQ_TOLERANCE,
};

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BranchWay {
    /// `x <= bound`
    Down,
    /// `x >= bound`
    Up,
}

/// One branching decision on the path from the root.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct BranchDecision {
    pub column: usize,
    pub way: BranchWay,
    pub bound: f64,
}

impl BranchDecision {
    pub fn down(column: usize, bound: f64) -> BranchDecision {
        BranchDecision {
            column,
            way: BranchWay::Down,
            bound,
        }
    }

    pub fn up(column: usize, bound: f64) -> BranchDecision {
        BranchDecision {
            column,
            way: BranchWay::Up,
            bound,
        }
    }

    pub fn apply(&self, range: Interval) -> Interval {
        match self.way {
            BranchWay::Down => Interval(range.0, range.1.min(self.bound)),
            BranchWay::Up => Interval(range.0.max(self.bound), range.1),
        }
    }
}

/// The branching decisions that produced a tree node. The same column may
/// appear several times (a general integer branched on repeatedly).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchHistoryRecord {
    decisions: Vec<BranchDecision>,
}

impl BranchHistoryRecord {
    pub fn from_path(path: &[BranchDecision]) -> BranchHistoryRecord {
        BranchHistoryRecord {
            decisions: path.to_vec(),
        }
    }

    pub fn from_model(model: &Model) -> BranchHistoryRecord {
        Self::from_path(model.branch_path())
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn decisions(&self) -> &[BranchDecision] {
        &self.decisions
    }

    /// The box each branched column is restricted to by this record.
    fn boxes(&self) -> BTreeMap<usize, Interval> {
        let mut boxes = BTreeMap::new();
        for decision in self.decisions.iter() {
            let range = boxes
                .entry(decision.column)
                .or_insert(Interval::UNBOUNDED);
            *range = decision.apply(*range);
        }
        boxes
    }

    /// Structural divergence between two records: 0 for records restricting
    /// the same columns to the same boxes, `INFINITY` when no column is shared.
    pub fn distance(&self, other: &BranchHistoryRecord) -> f64 {
        let mine = self.boxes();
        let theirs = other.boxes();

        if mine.is_empty() && theirs.is_empty() {
            return 0.;
        }
        if !mine.keys().any(|c| theirs.contains_key(c)) {
            return f64::INFINITY;
        }

        let mut union = 0;
        let mut score = 0.;
        for (column, range) in mine.iter() {
            union += 1;
            score += match theirs.get(column) {
                None => 1.,
                Some(other_range) => match range.compare(other_range, EQ_TOLERANCE) {
                    RangeCompare::Same => 0.,
                    RangeCompare::Subset | RangeCompare::Superset => 0.25,
                    RangeCompare::Overlap => 0.5,
                    RangeCompare::Disjoint => 1.,
                },
            };
        }
        for column in theirs.keys() {
            if !mine.contains_key(column) {
                union += 1;
                score += 1.;
            }
        }

        score / union as f64
    }
}

/// Records of the nodes where a heuristic found something, in firing order.
#[derive(Debug, Clone, Default)]
pub struct BranchHistoryList {
    records: Vec<BranchHistoryRecord>,
}

impl BranchHistoryList {
    pub fn new() -> BranchHistoryList {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[BranchHistoryRecord] {
        &self.records
    }

    pub fn append(&mut self, record: BranchHistoryRecord) {
        self.records.push(record);
    }

    /// Moves every record of `other` to the end of this list.
    pub fn append_list(&mut self, other: &mut BranchHistoryList) {
        self.records.append(&mut other.records);
    }

    pub fn min_distance(&self, record: &BranchHistoryRecord) -> f64 {
        self.records
            .iter()
            .map(|r| r.distance(record))
            .fold(f64::INFINITY, f64::min)
    }

    /// True when `record` is farther than `threshold` from every stored record.
    pub fn far_from(&self, record: &BranchHistoryRecord, threshold: f64) -> bool {
        self.min_distance(record) > threshold
    }
}
