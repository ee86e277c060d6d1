// Contract shared by all primal heuristics plugged into the tree search.

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_xoshiro::SplitMix64;

use crate::{cuts::CutPool, model::Model};

/// Where in the tree a heuristic may run.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum When {
    Off,
    Root,
    NonRoot,
    Always,
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            When::Off => write!(f, "off"),
            When::Root => write!(f, "root"),
            When::NonRoot => write!(f, "non-root"),
            When::Always => write!(f, "always"),
        }
    }
}

/// Result of a heuristic call.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum HeuristicOutcome {
    /// Objective and solution were left untouched.
    NoSolution,
    /// A feasible point strictly better than the passed-in objective was
    /// written and the objective updated.
    Improved,
    /// Nothing written; only produced by the variant that runs with the
    /// cut generators.
    EstimateOnly,
}

impl HeuristicOutcome {
    pub fn code(self) -> i32 {
        match self {
            HeuristicOutcome::NoSolution => 0,
            HeuristicOutcome::Improved => 1,
            HeuristicOutcome::EstimateOnly => -1,
        }
    }

    pub fn is_improved(self) -> bool {
        self == HeuristicOutcome::Improved
    }
}

/// Seedable random stream owned by a single heuristic instance.
#[derive(Clone)]
pub struct RandomStream {
    seed: u64,
    rng: SplitMix64,
}

impl fmt::Debug for RandomStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomStream(seed: {})", self.seed)
    }
}

impl RandomStream {
    pub fn new(seed: u64) -> RandomStream {
        RandomStream {
            seed,
            rng: SplitMix64::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform draw in `[lo, hi]`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

pub const MAX_HOW_OFTEN: usize = 1_000_000;

/// How often a heuristic runs, stretched after unsuccessful runs.
#[derive(Debug, Clone)]
pub struct ActivationPolicy {
    base_how_often: usize,
    how_often: usize,
    decay_factor: f64,
    runs: usize,
    successes: usize,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            base_how_often: 1,
            how_often: 1,
            decay_factor: 0.,
            runs: 0,
            successes: 0,
        }
    }
}

impl ActivationPolicy {
    pub fn how_often(&self) -> usize {
        self.how_often
    }

    pub fn decay_factor(&self) -> f64 {
        self.decay_factor
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn set_how_often(&mut self, how_often: usize) {
        assert!(how_often > 0, "how_often must be positive");
        self.base_how_often = how_often.min(MAX_HOW_OFTEN);
        self.how_often = self.base_how_often;
    }

    pub fn set_decay_factor(&mut self, decay_factor: f64) {
        assert!(
            decay_factor.is_finite() && decay_factor >= 0.,
            "decay factor must be finite and non-negative, got {}",
            decay_factor
        );
        self.decay_factor = decay_factor;
    }

    pub fn due(&self, node_count: usize) -> bool {
        self.how_often <= 1 || node_count % self.how_often == 0
    }

    pub fn record_outcome(&mut self, found: bool) {
        self.runs += 1;
        if found {
            self.successes += 1;
            self.how_often = self.base_how_often;
        } else if self.decay_factor > 0. {
            let step = ((self.how_often as f64 * self.decay_factor).round() as usize).max(1);
            self.how_often = (self.how_often + step).min(MAX_HOW_OFTEN);
        }
    }
}

/// Settings and bookkeeping embedded in every heuristic.
#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    name: String,
    when: When,
    /// Keep running even if `validate` finds structure the heuristic can't handle.
    force: bool,
    node_budget: usize,
    feasibility_pump: Option<u32>,
    /// Largest (rows + columns) ratio of a restriction worth a sub-MIP solve.
    fraction_small: f64,
    history_threshold: f64,
    policy: ActivationPolicy,
    rng: RandomStream,
    model_id: Option<u64>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            when: When::Always,
            force: false,
            node_budget: 200,
            feasibility_pump: None,
            fraction_small: 1.0,
            history_threshold: 0.5,
            policy: ActivationPolicy::default(),
            rng: RandomStream::new(1),
            model_id: None,
        }
    }
}

impl HeuristicConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn when(&self) -> When {
        self.when
    }

    pub fn set_when(&mut self, when: When) {
        self.when = when;
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    pub fn node_budget(&self) -> usize {
        self.node_budget
    }

    pub fn set_node_budget(&mut self, node_budget: usize) {
        assert!(node_budget > 0, "{}: node budget must be positive", self.name);
        self.node_budget = node_budget;
    }

    pub fn feasibility_pump(&self) -> Option<u32> {
        self.feasibility_pump
    }

    pub fn set_feasibility_pump(&mut self, options: Option<u32>) {
        self.feasibility_pump = options;
    }

    pub fn fraction_small(&self) -> f64 {
        self.fraction_small
    }

    pub fn set_fraction_small(&mut self, fraction: f64) {
        assert!(
            fraction.is_finite() && fraction > 0.,
            "{}: size ratio threshold must be positive, got {}",
            self.name,
            fraction
        );
        self.fraction_small = fraction;
    }

    pub fn history_threshold(&self) -> f64 {
        self.history_threshold
    }

    pub fn set_history_threshold(&mut self, threshold: f64) {
        assert!(
            threshold >= 0.,
            "{}: history threshold must be non-negative, got {}",
            self.name,
            threshold
        );
        self.history_threshold = threshold;
    }

    pub fn policy(&self) -> &ActivationPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ActivationPolicy {
        &mut self.policy
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = RandomStream::new(seed);
    }

    pub fn rng(&mut self) -> &mut RandomStream {
        &mut self.rng
    }

    pub fn bind(&mut self, model: &Model) {
        self.model_id = Some(model.id());
    }

    pub fn is_bound(&self) -> bool {
        self.model_id.is_some()
    }

    /// Panics unless this heuristic was attached to `model`.
    pub fn check_bound(&self, model: &Model) {
        match self.model_id {
            None => panic!("heuristic {} used before a model was attached", self.name),
            Some(id) if id != model.id() => panic!(
                "heuristic {} is attached to model {} but was called with model {}",
                self.name,
                id,
                model.id()
            ),
            Some(_) => {}
        }
    }

    /// Whether the heuristic should run at the model's current node.
    pub fn should_run(&self, model: &Model) -> bool {
        self.check_bound(model);
        let placed = match self.when {
            When::Off => false,
            When::Root => model.is_root(),
            When::NonRoot => !model.is_root(),
            When::Always => true,
        };
        placed && self.policy.due(model.node_count())
    }

    pub fn record_outcome(&mut self, found: bool) {
        self.policy.record_outcome(found);
    }
}

impl fmt::Display for HeuristicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name = {}", self.name)?;
        writeln!(f, "when = {}", self.when)?;
        writeln!(f, "force = {}", self.force)?;
        writeln!(f, "node_budget = {}", self.node_budget)?;
        match self.feasibility_pump {
            Some(options) => writeln!(f, "feasibility_pump = {}", options)?,
            None => writeln!(f, "feasibility_pump = off")?,
        }
        writeln!(f, "fraction_small = {}", self.fraction_small)?;
        writeln!(f, "seed = {}", self.rng.seed())?;
        writeln!(f, "how_often = {}", self.policy.how_often)?;
        writeln!(f, "decay_factor = {}", self.policy.decay_factor)?;
        write!(f, "history_threshold = {}", self.history_threshold)
    }
}

/// Builder for heuristic settings
pub struct ConfigBuilder {
    config: HeuristicConfig,
}

impl ConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: HeuristicConfig::named(name),
        }
    }

    pub fn when(mut self, when: When) -> Self {
        self.config.set_when(when);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.set_force(force);
        self
    }

    pub fn node_budget(mut self, nodes: usize) -> Self {
        self.config.set_node_budget(nodes);
        self
    }

    pub fn fraction_small(mut self, fraction: f64) -> Self {
        self.config.set_fraction_small(fraction);
        self
    }

    pub fn feasibility_pump(mut self, options: Option<u32>) -> Self {
        self.config.set_feasibility_pump(options);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.set_seed(seed);
        self
    }

    pub fn how_often(mut self, how_often: usize) -> Self {
        self.config.policy_mut().set_how_often(how_often);
        self
    }

    pub fn decay_factor(mut self, decay: f64) -> Self {
        self.config.policy_mut().set_decay_factor(decay);
        self
    }

    pub fn history_threshold(mut self, threshold: f64) -> Self {
        self.config.set_history_threshold(threshold);
        self
    }

    pub fn build(self) -> HeuristicConfig {
        self.config
    }
}

/// A primal heuristic the tree search calls at selected nodes.
///
/// Every call receives the model the heuristic was attached to; calling with
/// any other model is a contract violation and panics. Infeasibility of
/// whatever the heuristic tries is never an error, only `NoSolution`.
pub trait Heuristic: Send {
    fn config(&self) -> &HeuristicConfig;

    fn config_mut(&mut self) -> &mut HeuristicConfig;

    fn name(&self) -> &str {
        self.config().name()
    }

    /// Binds the heuristic to `model` and rebuilds cached structure.
    fn attach_model(&mut self, model: &Model) {
        self.config_mut().bind(model);
        self.reset_model(model);
    }

    /// Rebuilds everything derived from the model's structure.
    fn reset_model(&mut self, model: &Model);

    /// True if special ordered sets and similar structure are handled.
    fn can_deal_with_odd(&self) -> bool {
        false
    }

    /// Switches the heuristic off when the model has structure it can't
    /// handle, unless forced.
    fn validate(&mut self, model: &Model) {
        if model.has_special_ordered_sets() && !self.can_deal_with_odd() {
            let config = self.config_mut();
            if config.force() {
                log::debug!("{}: special ordered sets present, forced on", config.name());
            } else if config.when() != When::Off {
                log::warn!("{}: special ordered sets present, switching off", config.name());
                config.set_when(When::Off);
            }
        }
    }

    /// True if the heuristic belongs with the cut generators, so a node
    /// calls `solution_with_cuts` instead of `solution`.
    fn generates_cuts(&self) -> bool {
        false
    }

    /// Called after cuts were added at a node.
    fn solution(&mut self, model: &Model, objective: &mut f64, out: &mut [f64]) -> HeuristicOutcome;

    /// Called together with the cut generators; may add cuts to `cuts`.
    fn solution_with_cuts(
        &mut self,
        _model: &Model,
        _objective: &mut f64,
        _out: &mut [f64],
        _cuts: &mut CutPool,
    ) -> HeuristicOutcome {
        HeuristicOutcome::NoSolution
    }

    fn box_clone(&self) -> Box<dyn Heuristic>;
}

impl Clone for Box<dyn Heuristic> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl fmt::Debug for dyn Heuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Heuristic({})", self.name())
    }
}

/// Calls the one entry point `heuristic` runs through at a node.
pub fn run_at_node(
    heuristic: &mut dyn Heuristic,
    model: &Model,
    objective: &mut f64,
    out: &mut [f64],
    cuts: &mut CutPool,
) -> HeuristicOutcome {
    if heuristic.generates_cuts() {
        heuristic.solution_with_cuts(model, objective, out, cuts)
    } else {
        heuristic.solution(model, objective, out)
    }
}

/// Writes `candidate` to `out` if it is strictly better than `objective`.
pub(crate) fn accept_if_better(
    candidate: &[f64],
    value: f64,
    objective: &mut f64,
    out: &mut [f64],
) -> HeuristicOutcome {
    if value < *objective - crate::OBJECTIVE_TOLERANCE {
        out.copy_from_slice(candidate);
        *objective = value;
        HeuristicOutcome::Improved
    } else {
        HeuristicOutcome::NoSolution
    }
}
