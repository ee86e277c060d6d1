// Picks up feasible points the relaxation solver stumbled on by itself.

use log::debug;

use crate::{
    heuristic::{accept_if_better, ConfigBuilder, Heuristic, HeuristicConfig, HeuristicOutcome},
    interval::Interval,
    model::Model,
};

/// Integer columns closer than this to an integer are snapped onto it.
pub const REPAIR_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct Serendipity {
    config: HeuristicConfig,
}

impl Default for Serendipity {
    fn default() -> Self {
        Self::new()
    }
}

impl Serendipity {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new("serendipity").build())
    }

    pub fn with_config(config: HeuristicConfig) -> Self {
        Self { config }
    }

    /// Snaps near-integral values and clamps to the node bounds. None if an
    /// integer column is too far from any integer.
    fn repair(model: &Model, values: &[f64]) -> Option<Vec<f64>> {
        let problem = model.problem();
        if values.len() != problem.num_columns() {
            return None;
        }
        let mut x = Vec::with_capacity(values.len());
        for (j, column) in problem.columns().iter().enumerate() {
            let mut value = values[j];
            let range = Interval(model.lower()[j], model.upper()[j]);
            if column.is_integer {
                if (value - value.round()).abs() > REPAIR_TOLERANCE {
                    return None;
                }
                value = range.tighten(true).clamp(value.round());
            } else {
                value = range.clamp(value);
            }
            x.push(value);
        }
        Some(x)
    }
}

impl Heuristic for Serendipity {
    fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut HeuristicConfig {
        &mut self.config
    }

    fn reset_model(&mut self, _model: &Model) {}

    fn solution(&mut self, model: &Model, objective: &mut f64, out: &mut [f64]) -> HeuristicOutcome {
        if !self.config.should_run(model) {
            return HeuristicOutcome::NoSolution;
        }
        let found = match model.solver_solution() {
            Some(found) => found,
            None => return HeuristicOutcome::NoSolution,
        };

        let outcome = match Self::repair(model, &found.values) {
            Some(x) => match model.problem().check_point(&x) {
                Ok(()) => {
                    let value = model.problem().objective_value(&x);
                    if (value - found.objective).abs() > crate::FEASIBILITY_TOLERANCE {
                        debug!(
                            "{}: solver reported {} but the point evaluates to {}",
                            self.config.name(),
                            found.objective,
                            value
                        );
                    }
                    accept_if_better(&x, value, objective, out)
                }
                Err(violation) => {
                    debug!("{}: repaired point rejected: {:?}", self.config.name(), violation);
                    HeuristicOutcome::NoSolution
                }
            },
            None => {
                debug!("{}: solver point is not near-integral", self.config.name());
                HeuristicOutcome::NoSolution
            }
        };
        self.config.record_outcome(outcome.is_improved());
        outcome
    }

    fn box_clone(&self) -> Box<dyn Heuristic> {
        Box::new(self.clone())
    }
}
