//! Staggered multiscale-in-time growth and remodeling.
//!
//! Cardiac cycles (the small time scale) and tissue growth (the large time scale) are solved
//! alternately. Each outer iteration runs the coupled cycle problem to periodicity and captures
//! the loads at the set point, then grows the tissue quasi-statically under those loads. The
//! small scale continues from the grown state. The iteration stops once the relative change of
//! tissue volume over one large-scale solve falls below a tolerance.
use crate::config::{Config, LargeScaleTimeParams, MultiscaleParams, SolverParams, TriggerPhase};
use crate::coupling::{ChamberStructure, SolidFlow0DProblem, SolidFlow0DSolver, SphericalChamber};
use crate::io::{checkpoint_path, SeriesWriter};
use eyre::{bail, eyre, Context};
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// The two time scales of a growth and remodeling problem.
///
/// All methods receive the (1-based) outer cycle they act in.
pub trait GrowthRemodelingScales {
    /// Transfers the grown state of the large scale to the small scale.
    fn prepare_small_scale(&mut self, cycle: usize) -> eyre::Result<()>;

    /// Solves cardiac cycles until periodicity, capturing the set point.
    fn solve_small_scale(&mut self, cycle: usize) -> eyre::Result<()>;

    fn write_small_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()>;

    fn read_small_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()>;

    /// Transfers set-point state and loads of the small scale to the large scale.
    fn prepare_large_scale(&mut self, cycle: usize) -> eyre::Result<()>;

    /// Grows the tissue under the set-point loads.
    fn solve_large_scale(&mut self, cycle: usize) -> eyre::Result<()>;

    fn write_large_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()>;

    fn read_large_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()>;

    /// Current tissue volume of the large scale.
    fn tissue_volume(&self) -> f64;
}

/// Outcome of a multiscale run.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiscaleSummary {
    /// The last completed outer cycle.
    pub last_cycle: usize,
    /// Relative tissue volume change of every completed outer cycle.
    pub volume_changes: Vec<f64>,
    pub converged: bool,
    pub wall_time: Duration,
}

pub struct MultiscaleGrowthRemodelingSolver<G> {
    scales: G,
    numcycles: usize,
    tol_outer: f64,
    restart_cycle: usize,
    restart_from_small: bool,
}

impl<G: GrowthRemodelingScales> MultiscaleGrowthRemodelingSolver<G> {
    pub fn new(scales: G, params: &MultiscaleParams) -> Self {
        Self {
            scales,
            numcycles: params.numcycles,
            tol_outer: params.tol_outer,
            restart_cycle: params.restart_cycle,
            restart_from_small: params.restart_from_small,
        }
    }

    pub fn scales(&self) -> &G {
        &self.scales
    }

    pub fn into_scales(self) -> G {
        self.scales
    }

    pub fn solve_problem(&mut self) -> eyre::Result<MultiscaleSummary> {
        let start = Instant::now();
        if self.restart_cycle > 0 {
            info!("Restarting growth and remodeling from cycle {}", self.restart_cycle);
            self.scales
                .read_small_scale_checkpoint(self.restart_cycle)
                .wrap_err("failed to read small scale restart data")?;
            self.scales
                .read_large_scale_checkpoint(self.restart_cycle)
                .wrap_err("failed to read large scale restart data")?;
        }

        let mut summary = MultiscaleSummary {
            last_cycle: self.restart_cycle,
            volume_changes: Vec::new(),
            converged: false,
            wall_time: Duration::ZERO,
        };

        for cycle in self.restart_cycle + 1..=self.numcycles {
            let cycle_start = Instant::now();
            info!("### GROWTH AND REMODELING CYCLE {} / {}", cycle, self.numcycles);

            self.scales.prepare_small_scale(cycle)?;
            if self.restart_from_small {
                info!("Reading small scale results of cycle {} instead of solving", cycle);
                self.scales.read_small_scale_checkpoint(cycle)?;
                self.restart_from_small = false;
            } else {
                self.scales
                    .solve_small_scale(cycle)
                    .wrap_err_with(|| format!("small scale solve failed in cycle {}", cycle))?;
                self.scales.write_small_scale_checkpoint(cycle)?;
            }

            self.scales.prepare_large_scale(cycle)?;
            let volume_before = self.scales.tissue_volume();
            self.scales
                .solve_large_scale(cycle)
                .wrap_err_with(|| format!("large scale solve failed in cycle {}", cycle))?;
            self.scales.write_large_scale_checkpoint(cycle)?;
            let volume_after = self.scales.tissue_volume();

            if volume_before <= 0.0 {
                bail!("tissue volume must be positive, got {}", volume_before);
            }
            let change = (volume_after - volume_before) / volume_before;
            summary.last_cycle = cycle;
            summary.volume_changes.push(change);
            info!(
                "Cycle {}: tissue volume {:.6e} -> {:.6e}, relative change {:.6e} --- {:.4e} s",
                cycle,
                volume_before,
                volume_after,
                change,
                cycle_start.elapsed().as_secs_f64()
            );

            if change.abs() <= self.tol_outer {
                info!("Growth and remodeling converged after {} cycles", cycle);
                summary.converged = true;
                break;
            }
        }

        if !summary.converged {
            warn!(
                "Growth and remodeling did not converge within {} cycles",
                self.numcycles
            );
        }
        summary.wall_time = start.elapsed();
        info!(
            "Program complete. Time for computation: {:.4} s",
            summary.wall_time.as_secs_f64()
        );
        Ok(summary)
    }
}

/// Growth and remodeling of a spherical chamber in a closed-loop circulation.
///
/// The small scale is the coupled chamber and 0D problem. The large scale is a quasi-static copy
/// of the chamber, loaded with the set-point pressure as a dead load on the set-point
/// configuration and the set-point active tension.
pub struct LumpedGrowthRemodeling {
    small: SolidFlow0DSolver<SphericalChamber>,
    large: SphericalChamber,
    simname: String,
    output_path: PathBuf,
    large_time: LargeScaleTimeParams,
    large_solver: SolverParams,
    tol_large: f64,
    prestressed: bool,
    small_runs: usize,
    /// Last step of the latest small scale run.
    small_last_step: usize,
    writer: Option<SeriesWriter>,
    append_results: bool,
}

impl LumpedGrowthRemodeling {
    pub fn new(
        mut problem: SolidFlow0DProblem<SphericalChamber>,
        solver: SolverParams,
        params: &MultiscaleParams,
    ) -> eyre::Result<Self> {
        let model = problem.flow0d.model();
        let set_point_time = match params.gandr_trigger_phase {
            TriggerPhase::EndDiastole => model.end_diastole(),
            TriggerPhase::EndSystole => model.end_systole(),
        }
        .ok_or_else(|| eyre!("the 0D model defines no {:?} time", params.gandr_trigger_phase))?;
        if params.large_scale.numstep == 0 || params.large_scale.maxtime <= 0.0 {
            bail!("large scale time parameters must be positive");
        }

        problem.set_set_point_time(Some(set_point_time));
        problem.flow0d.set_eps_periodic(params.tol_small);
        let large = problem.structure.quasi_static();
        let output = problem.flow0d.output().clone();
        let prestressed = problem.prestress_numstep().is_some();

        Ok(Self {
            small: SolidFlow0DSolver::new(problem, solver.clone()),
            large,
            simname: output.simname,
            output_path: output.path,
            large_time: params.large_scale,
            large_solver: solver,
            tol_large: params.tol_large,
            prestressed,
            small_runs: 0,
            small_last_step: 0,
            writer: None,
            append_results: params.restart_cycle > 0,
        })
    }

    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let params = config
            .multiscale
            .as_ref()
            .ok_or_else(|| eyre!("multiscale problems require multiscale parameters"))?;
        let problem = SolidFlow0DProblem::from_config(config)?;
        Self::new(problem, config.solver.clone(), params)
    }

    pub fn small_scale(&self) -> &SolidFlow0DProblem<SphericalChamber> {
        self.small.problem()
    }

    pub fn large_scale(&self) -> &SphericalChamber {
        &self.large
    }

    fn small_simname(&self, cycle: usize) -> String {
        format!("{}_small{}", self.simname, cycle)
    }

    fn large_simname(&self, cycle: usize) -> String {
        format!("{}_large{}", self.simname, cycle)
    }

    fn write_large_results(&mut self, cycle: usize) -> eyre::Result<()> {
        if self.writer.is_none() {
            let names = vec!["theta".to_string(), "lambda".to_string()];
            let simname = format!("{}_large", self.simname);
            self.writer = Some(SeriesWriter::create(&self.output_path, &simname, &names, self.append_results)?);
        }
        let values = [self.large.growth_stretch(), self.large.stretch()];
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write(cycle as f64, &values)?;
                writer.flush()
            }
            None => Err(eyre!("result writer is not available")),
        }
    }
}

impl GrowthRemodelingScales for LumpedGrowthRemodeling {
    fn prepare_small_scale(&mut self, cycle: usize) -> eyre::Result<()> {
        let simname = self.small_simname(cycle);
        let problem = self.small.problem_mut();
        problem.set_simname(simname)?;
        if cycle > 1 {
            // Shift the cycle state by the growth-induced deformation at the set point
            let shift = self.large.stretch() - problem.u_set[0];
            problem.u[0] += shift;
            problem.structure.set_stretch(problem.u[0]);
            problem
                .structure
                .set_growth_stretch(self.large.growth_stretch());
            info!(
                "Small scale continues with theta = {:.6}, stretch shifted by {:.6e}",
                self.large.growth_stretch(),
                shift
            );
        }
        Ok(())
    }

    fn solve_small_scale(&mut self, cycle: usize) -> eyre::Result<()> {
        let summary = if self.small_runs == 0 {
            self.small.solve_problem()?
        } else {
            self.small.solve_next_cycles()?
        };
        self.small_runs += 1;
        self.small_last_step = summary.last_step;
        if !summary.periodic {
            warn!("Small scale of cycle {} did not reach periodicity", cycle);
        }
        if self.small.problem().structure.set_point().is_none() {
            bail!("no set point was captured during the small scale solve");
        }
        Ok(())
    }

    fn write_small_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()> {
        let step = self.small_last_step;
        let simname = self.small_simname(cycle);
        let problem = self.small.problem_mut();
        problem.write_restart(step)?;
        let dir = problem.flow0d.output().path.clone();
        let path = checkpoint_path(dir, &simname, "cycle", cycle);
        std::fs::write(&path, format!("{}", step)).wrap_err_with(|| format!("failed to write {}", path.display()))
    }

    fn read_small_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()> {
        let simname = self.small_simname(cycle);
        let problem = self.small.problem_mut();
        problem.set_simname(simname.clone())?;
        let dir = problem.flow0d.output().path.clone();
        let path = checkpoint_path(dir, &simname, "cycle", cycle);
        let content = std::fs::read_to_string(&path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let step = content
            .trim()
            .parse::<usize>()
            .wrap_err_with(|| format!("invalid step number in {}", path.display()))?;
        problem.read_restart(step)?;
        self.small_last_step = step;
        self.small_runs += 1;
        Ok(())
    }

    fn prepare_large_scale(&mut self, _cycle: usize) -> eyre::Result<()> {
        let set_point = self
            .large
            .adopt_set_point(&self.small.problem().structure, self.prestressed)?;
        info!(
            "Large scale loads: pressure {:.6e}, active tension {:.6e}, stretch {:.6}",
            set_point.pressure, set_point.tension, set_point.stretch
        );
        Ok(())
    }

    fn solve_large_scale(&mut self, cycle: usize) -> eyre::Result<()> {
        let pressure = self
            .large
            .set_point()
            .map(|set_point| set_point.pressure)
            .ok_or_else(|| eyre!("large scale has no set point"))?;
        let numstep = self.large_time.numstep;
        let dt = self.large_time.maxtime / numstep as f64;
        let summary = self
            .large
            .solve_growth(pressure, numstep, dt, self.tol_large, &self.large_solver)?;
        if summary.rate > self.tol_large {
            warn!(
                "Large scale of cycle {} stopped after {} steps with growth rate {:.4e}",
                cycle, summary.steps, summary.rate
            );
        }
        self.write_large_results(cycle)
    }

    fn write_large_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()> {
        std::fs::create_dir_all(&self.output_path)?;
        let path = checkpoint_path(&self.output_path, &self.large_simname(cycle), "structure", cycle);
        self.large.write_checkpoint(&path)
    }

    fn read_large_scale_checkpoint(&mut self, cycle: usize) -> eyre::Result<()> {
        let path = checkpoint_path(&self.output_path, &self.large_simname(cycle), "structure", cycle);
        self.large.read_checkpoint(&path)
    }

    fn tissue_volume(&self) -> f64 {
        self.large.tissue_volume()
    }
}
