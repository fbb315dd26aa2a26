use ambit::config::{Config, ProblemType};
use ambit::coupling::{SolidFlow0DProblem, SolidFlow0DSolver};
use ambit::flow0d::problem::{Flow0DProblem, Flow0DSolver};
use ambit::multiscale::{LumpedGrowthRemodeling, MultiscaleGrowthRemodelingSolver};
use clap::Parser;
use eyre::{eyre, Context};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ambit")]
#[command(about = "Cardiovascular 0D, coupled chamber and growth and remodeling simulations")]
struct Args {
    /// Path to the JSON simulation input
    input: PathBuf,

    /// Restart from the checkpoint of this step, overriding the input file
    #[arg(long)]
    restart_step: Option<usize>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut config = Config::from_file(&args.input)?;
    if let Some(step) = args.restart_step {
        config.io.restart_step = step;
    }
    info!(
        "Running {:?} problem {} from {}",
        config.io.problem_type,
        config.io.simname,
        args.input.display()
    );

    match config.io.problem_type {
        ProblemType::Flow0D => {
            let problem = Flow0DProblem::from_config(&config).wrap_err("failed to set up 0D problem")?;
            let summary = Flow0DSolver::new(problem, config.solver.clone()).solve_problem()?;
            info!(
                "Finished after step {} (t = {:.4}), periodic: {}",
                summary.last_step, summary.final_time, summary.periodic
            );
        }
        ProblemType::SolidFlow0D => {
            let problem = SolidFlow0DProblem::from_config(&config).wrap_err("failed to set up coupled problem")?;
            let summary = SolidFlow0DSolver::new(problem, config.solver.clone()).solve_problem()?;
            info!(
                "Finished after step {} (t = {:.4}), periodic: {}",
                summary.last_step, summary.final_time, summary.periodic
            );
        }
        ProblemType::SolidFlow0DMultiscaleGrowthRemodeling => {
            let params = config
                .multiscale
                .as_ref()
                .ok_or_else(|| eyre!("multiscale parameters are missing"))?;
            let scales = LumpedGrowthRemodeling::from_config(&config)
                .wrap_err("failed to set up growth and remodeling problem")?;
            let summary = MultiscaleGrowthRemodelingSolver::new(scales, params).solve_problem()?;
            info!(
                "Finished after growth and remodeling cycle {}, converged: {}",
                summary.last_cycle, summary.converged
            );
        }
    }
    Ok(())
}
