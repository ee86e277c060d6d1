use std::{
    iter::Sum,
    ops::{Add, Mul},
};

type Num = f64;

/// Closed range `[lo, hi]`. Either end may be infinite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval(pub Num, pub Num);

/// How two ranges relate to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeCompare {
    Same,
    Subset,
    Superset,
    Overlap,
    Disjoint,
}

impl Interval {
    pub const UNBOUNDED: Interval = Interval(Num::NEG_INFINITY, Num::INFINITY);

    pub fn is_empty(&self) -> bool {
        self.0 > self.1
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        !(other.1 < self.0 || self.1 < other.0)
    }

    pub fn tighten(self, is_integer: bool) -> Interval {
        if !is_integer {
            return self;
        }
        Interval(self.0.ceil(), self.1.floor())
    }

    pub fn intersect(self, other: Interval) -> Interval {
        let lb = self.0.max(other.0);
        let ub = self.1.min(other.1);
        Interval(lb, ub)
    }

    pub fn eq_tol(&self, other: &Interval, tol: Num) -> bool {
        let close = |a: Num, b: Num| a == b || (a - b).abs() < tol;
        close(self.0, other.0) && close(self.1, other.1)
    }

    pub fn clamp(&self, x: Num) -> Num {
        x.max(self.0).min(self.1)
    }

    pub fn is_subset_of(&self, other: &Interval) -> bool {
        other.0 <= self.0 && self.1 <= other.1
    }

    pub fn compare(&self, other: &Interval, tol: Num) -> RangeCompare {
        if self.eq_tol(other, tol) {
            RangeCompare::Same
        } else if !self.intersects(other) {
            RangeCompare::Disjoint
        } else if self.is_subset_of(other) {
            RangeCompare::Subset
        } else if other.is_subset_of(self) {
            RangeCompare::Superset
        } else {
            RangeCompare::Overlap
        }
    }
}

impl Mul<Interval> for Num {
    type Output = Interval;

    fn mul(self, rhs: Interval) -> Interval {
        if self == 0. {
            Interval(0., 0.)
        } else if self > 0. {
            Interval(self * rhs.0, self * rhs.1)
        } else {
            Interval(self * rhs.1, self * rhs.0)
        }
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Self) -> Self::Output {
        Interval(self.0 + rhs.0, self.1 + rhs.1)
    }
}

impl Sum for Interval {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        let mut i = Interval(0., 0.);
        for x in iter {
            i = i + x;
        }
        i
    }
}
