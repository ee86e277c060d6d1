pub mod cuts;
pub mod heuristic;
pub mod history;
pub mod interval;
pub mod model;
pub mod mps;
pub mod priority_fix;
pub mod rounding;
pub mod serendipity;
pub mod submip;
pub mod util;

pub use heuristic::{ConfigBuilder, Heuristic, HeuristicConfig, HeuristicOutcome, When};
pub use history::{BranchDecision, BranchHistoryList, BranchHistoryRecord};
pub use model::{Model, Problem};
pub use priority_fix::PriorityFix;
pub use rounding::Rounding;
pub use serendipity::Serendipity;
pub use submip::{small_branch_and_bound, SubMipSolver, SubMipStatus, TreeSearchSolver};

/// Allowed violation of a row or column bound.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;
/// Distance to the nearest integer below which a value counts as integral.
pub const INTEGER_TOLERANCE: f64 = 1e-6;
/// Tolerance for comparing branching bounds.
pub const EQ_TOLERANCE: f64 = 1e-9;
/// Margin by which a new objective must beat the old one.
pub const OBJECTIVE_TOLERANCE: f64 = 1e-9;
