use std::path::PathBuf;

use log::{info, warn};
use mipheur::{
    cuts::CutPool,
    heuristic::{run_at_node, ConfigBuilder, Heuristic},
    model::{FoundSolution, Model},
    mps, util, PriorityFix, Rounding, Serendipity, TreeSearchSolver,
};
use ordered_float::OrderedFloat;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "Runs MIP primal heuristics from a relaxation point")]
struct Opts {
    /// Instance in MPS format, optionally gzipped
    #[structopt(name = "INPUT", parse(from_os_str))]
    input_file: PathBuf,

    /// Relaxation point as `name value` lines
    #[structopt(long, parse(from_os_str))]
    relaxation: Option<PathBuf>,

    /// Feasible point the relaxation solver already found
    #[structopt(long, parse(from_os_str))]
    known_solution: Option<PathBuf>,

    /// Where to write the best solution
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,

    #[structopt(long, default_value = "4")]
    threads: usize,

    #[structopt(long, default_value = "1")]
    seed: u64,

    #[structopt(long, default_value = "200")]
    node_budget: usize,

    #[structopt(long, default_value = "1.0")]
    fraction_small: f64,

    #[structopt(long, default_value = "10000")]
    fix_priority: i32,
}

struct Found {
    thread_idx: usize,
    heuristic: String,
    objective: f64,
    values: Vec<f64>,
}

fn heuristics(opt: &Opts) -> Vec<Box<dyn Heuristic>> {
    let mut priority_fix = PriorityFix::<TreeSearchSolver>::with_config(
        ConfigBuilder::new("priority fix")
            .node_budget(opt.node_budget)
            .fraction_small(opt.fraction_small)
            .build(),
    );
    priority_fix.set_fix_priority(opt.fix_priority);

    vec![
        Box::new(Serendipity::new()),
        Box::new(Rounding::with_config(ConfigBuilder::new("rounding").build())),
        Box::new(priority_fix),
    ]
}

fn load_model(opt: &Opts) -> Result<Model, Box<dyn std::error::Error>> {
    let _p = hprof::enter("read and parse");
    let problem = mps::read_problem(&opt.input_file)?;
    info!(
        "instance:{} rows:{} columns:{}",
        problem.name,
        problem.num_rows(),
        problem.num_columns()
    );
    util::check_domains(&problem);
    util::check_constraints(&problem);

    let mut model = Model::new(problem);
    if let Some(path) = &opt.relaxation {
        let text = std::fs::read_to_string(path)?;
        let point = mps::point_from_solution(model.problem(), &text)?;
        model.set_relaxation(point)?;
    }
    if let Some(path) = &opt.known_solution {
        let text = std::fs::read_to_string(path)?;
        let values = mps::point_from_solution(model.problem(), &text)?;
        let objective = model.problem().objective_value(&values);
        model.set_solver_solution(Some(FoundSolution { objective, values }));
    }
    Ok(model)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::env_logger::Builder::from_env(
        pretty_env_logger::env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let opt = Opts::from_args();
    info!("{:?}", opt);

    let model = load_model(&opt)?;
    let templates = heuristics(&opt);
    for heuristic in templates.iter() {
        info!("{}", heuristic.config());
    }

    let (sol_tx, sol_rx) = std::sync::mpsc::channel::<Found>();

    let _p = hprof::enter("heuristics");
    crossbeam::scope(|s| {
        for thread_idx in 0..opt.threads.max(1) {
            let sol_tx = sol_tx.clone();
            let model = model.clone();
            let mut heuristics = templates.clone();
            let seed = opt.seed + thread_idx as u64;

            s.spawn(move |_| {
                let mut objective = model.cutoff();
                let mut out = vec![0.; model.problem().num_columns()];
                let mut cuts = CutPool::new();

                for heuristic in heuristics.iter_mut() {
                    heuristic.config_mut().set_seed(seed);
                    heuristic.attach_model(&model);
                    heuristic.validate(&model);

                    let outcome =
                        run_at_node(heuristic.as_mut(), &model, &mut objective, &mut out, &mut cuts);
                    if outcome.is_improved() {
                        info!(
                            "thread {} {}: objective {}",
                            thread_idx,
                            heuristic.name(),
                            objective
                        );
                        let found = Found {
                            thread_idx,
                            heuristic: heuristic.name().to_string(),
                            objective,
                            values: out.clone(),
                        };
                        if sol_tx.send(found).is_err() {
                            return;
                        }
                    }
                }
                if !cuts.is_empty() {
                    info!("thread {}: {} cuts generated", thread_idx, cuts.len());
                }
            });
        }
        drop(sol_tx);
    })
    .map_err(|_| "a heuristic thread panicked")?;
    drop(_p);

    let best = sol_rx
        .into_iter()
        .min_by_key(|found| (OrderedFloat(found.objective), found.thread_idx));

    match best {
        Some(found) => {
            info!(
                "best objective {} from {} on thread {}",
                found.objective, found.heuristic, found.thread_idx
            );
            if let Some(path) = &opt.output {
                let _p = hprof::enter("write solution file");
                let mut file = std::fs::File::create(path)?;
                mps::write_solution(&mut file, model.problem(), found.objective, &found.values)?;
                info!("Saved solution to file {:?}", path);
            }
        }
        None => warn!("No feasible solution found"),
    }

    hprof::profiler().print_timing();
    Ok(())
}
