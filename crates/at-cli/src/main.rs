//! autotune: tune an external program's parameters against one or more
//! objectives.
//!
//! Usage:
//!   autotune --target target.json --objective number
//!   autotune --target target.json --objective number:contigs:100:1:100 --objective elapsed:0:1:600
//!   RUST_LOG=debug autotune --target target.json --report report.json

use anyhow::{bail, Context, Result};
use at_optimizer::{
    parse_objective_spec, Experiment, ExperimentConfig, ExperimentReport, FailurePolicy,
    ObjectiveDirection, ObjectiveRegistry, TabuConfig,
};
use at_target::{CommandTarget, TargetDeclaration};
use at_types::{Candidate, ParameterDef, ParameterSpace, ParameterValue};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "autotune")]
#[command(about = "Black-box parameter optimization for external programs")]
struct Args {
    /// JSON target declaration
    #[arg(long)]
    target: PathBuf,

    /// Objective spec: number, number:<key>, number:<key>:<optimum>:<weighting>:<max>,
    /// elapsed or elapsed:<optimum>:<weighting>:<max>. Repeatable.
    #[arg(long = "objective", default_value = "number")]
    objectives: Vec<String>,

    /// Spaces with fewer candidates are swept exhaustively
    #[arg(long, default_value_t = 100)]
    cutoff: usize,

    /// Tabu tenure in iterations
    #[arg(long, default_value_t = 5)]
    tenure: usize,

    /// Neighbours scored around each tabu centre
    #[arg(long, default_value_t = 16)]
    neighbourhood: usize,

    /// Tabu iteration budget, 0 for none
    #[arg(long, default_value_t = 200)]
    max_iterations: usize,

    /// Tabu iterations without improvement before stopping, 0 for none
    #[arg(long, default_value_t = 50)]
    stall_limit: usize,

    #[arg(long)]
    seed: Option<u64>,

    /// Worker hint passed to objectives
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Run objectives one after another instead of concurrently
    #[arg(long, default_value_t = false)]
    sequential_objectives: bool,

    /// Scalarize even a single objective
    #[arg(long, default_value_t = false)]
    all_results: bool,

    /// Minimize a single scalar objective instead of maximizing it
    #[arg(long, default_value_t = false)]
    minimize: bool,

    /// Re-run a failed candidate this many times before scoring it worst
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Stop on the first failed candidate
    #[arg(long, default_value_t = false, conflicts_with = "retries")]
    abort_on_failure: bool,

    /// First candidate as name=value pairs. Repeatable.
    #[arg(long = "start")]
    start: Vec<String>,

    /// Directory holding one sub-directory per run
    #[arg(long)]
    run_root: Option<PathBuf>,

    /// Write the JSON report here
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Integers first, then floats, otherwise text.
fn parse_value(raw: &str) -> ParameterValue {
    if let Ok(v) = raw.parse::<i64>() {
        ParameterValue::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        ParameterValue::Float(v)
    } else {
        ParameterValue::from(raw)
    }
}

/// The declared value `raw` spells, read as that value's own type.
fn declared_value(def: &ParameterDef, raw: &str) -> Option<ParameterValue> {
    def.values
        .iter()
        .find(|value| match value {
            ParameterValue::Int(v) => raw.parse::<i64>().is_ok_and(|r| r == *v),
            ParameterValue::Float(v) => raw.parse::<f64>().is_ok_and(|r| r == *v),
            ParameterValue::Text(v) => v == raw,
        })
        .cloned()
}

/// Values are read against the declared ranges; anything that matches no
/// declared value is kept as typed and rejected when the experiment starts.
fn parse_start(pairs: &[String], space: &ParameterSpace) -> Result<Option<Candidate>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut candidate = Candidate::default();
    for pair in pairs {
        let Some((name, raw)) = pair.split_once('=') else {
            bail!("start value {pair:?} is not name=value");
        };
        let (name, raw) = (name.trim(), raw.trim());
        let value = space
            .get(name)
            .and_then(|def| declared_value(def, raw))
            .unwrap_or_else(|| parse_value(raw));
        candidate = candidate.with(name, value);
    }
    Ok(Some(candidate))
}

fn limit(value: usize) -> Option<usize> {
    (value > 0).then_some(value)
}

fn experiment_config(args: &Args, name: &str, space: &ParameterSpace) -> Result<ExperimentConfig> {
    let tabu = TabuConfig::default()
        .with_tenure(args.tenure)
        .with_neighbourhood_size(args.neighbourhood)
        .with_max_iterations(limit(args.max_iterations))
        .with_stall_limit(limit(args.stall_limit));
    let failure_policy = if args.abort_on_failure {
        FailurePolicy::Abort
    } else if args.retries > 0 {
        FailurePolicy::Retry {
            attempts: args.retries,
        }
    } else {
        FailurePolicy::WorstFitness
    };
    let direction = if args.minimize {
        ObjectiveDirection::Minimize
    } else {
        ObjectiveDirection::Maximize
    };

    let mut config = ExperimentConfig::new(name)
        .with_sweep_cutoff(args.cutoff)
        .with_tabu(tabu)
        .with_failure_policy(failure_policy)
        .with_direction(direction)
        .with_all_results(args.all_results)
        .with_threads(args.threads)
        .with_parallel_objectives(!args.sequential_objectives);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(start) = parse_start(&args.start, space)? {
        config = config.with_start(start);
    }
    Ok(config)
}

fn write_report(path: &Path, report: &ExperimentReport) -> Result<()> {
    let json = report.to_json()?;
    std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

fn print_summary(report: &ExperimentReport) {
    println!("experiment:  {} ({})", report.name, report.id);
    println!(
        "algorithm:   {}",
        report.algorithm_name.as_deref().unwrap_or("none")
    );
    println!("state:       {:?}", report.state);
    if let Some(termination) = report.termination {
        println!("termination: {termination:?}");
    }
    println!(
        "iterations:  {} ({} failed)",
        report.iterations, report.failures
    );
    match &report.best {
        Some(best) => {
            println!("best:        {}", best.candidate);
            println!("fitness:     {}", best.fitness);
        }
        None => println!("best:        none (every candidate failed)"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let declaration = TargetDeclaration::load(&args.target)
        .with_context(|| format!("loading target {}", args.target.display()))?;
    let name = declaration.name.clone();
    let space = declaration.parameter_space()?;
    let run_root = args
        .run_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("autotune-runs").join(&name));
    let target = CommandTarget::new(declaration, &run_root)
        .with_context(|| format!("preparing run directory {}", run_root.display()))?;

    let mut registry = ObjectiveRegistry::new();
    for spec in &args.objectives {
        let objective = parse_objective_spec(spec)?;
        registry.register(objective)?;
    }

    let config = experiment_config(&args, &name, &space)?;
    let mut experiment = Experiment::new(target, registry, config)?;
    let outcome = experiment.run();

    let report = experiment.report();
    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    outcome.context("experiment failed")?;
    print_summary(&report);
    Ok(())
}
