//! Time-dependent 0D problems and their solver.
use crate::config::{Config, IoParams, SolverParams, TimeParams};
use crate::flow0d::{create_model, initial_state, read_initial_conditions, Cardiovascular0D, Evaluation, Perturbation};
use crate::io::{checkpoint_path, initial_data_path, read_vector, write_named_values, write_vector, SeriesWriter};
use crate::nonlinear::solve_nonlinear;
use crate::time_curves::TimeCurves;
use crate::timeint::{midpoint, periodicity_error, CycleState, OneStepTheta, OneStepThetaResidual};
use ambit_optimize::newton::{NewtonError, NewtonStatistics};
use eyre::{bail, eyre, Context};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Where and how often 0D results and restart files are written.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSettings {
    pub path: PathBuf,
    pub simname: String,
    pub write_results_every: usize,
    pub write_restart_every: Option<usize>,
}

impl OutputSettings {
    pub fn from_io_params(io: &IoParams) -> Self {
        Self {
            path: io.output_path_0d().to_path_buf(),
            simname: io.simname.clone(),
            write_results_every: io.write_results_every_0d(),
            write_restart_every: io.write_restart_every,
        }
    }
}

/// A 0D model together with its time-discrete state.
pub struct Flow0DProblem {
    model: Box<dyn Cardiovascular0D>,
    curves: TimeCurves,
    integrator: OneStepTheta,
    dt: f64,
    numstep: usize,
    numstep_stop: Option<usize>,
    eps_periodic: f64,
    periodic_indices: Vec<usize>,
    /// State at the end of the current step.
    pub s: DVector<f64>,
    pub s_old: DVector<f64>,
    /// Midpoint state $\theta \vec s + (1 - \theta) \vec s_{old}$, used for output.
    pub s_mid: DVector<f64>,
    /// State at the end of the last completed cycle.
    pub s_tc_old: DVector<f64>,
    /// State at the multiscale set point.
    pub s_set: DVector<f64>,
    df_old: DVector<f64>,
    f_old: DVector<f64>,
    pub cycle: CycleState,
    output: OutputSettings,
    writer: Option<SeriesWriter>,
    restart_step: usize,
    perturbation: Option<Perturbation>,
    perturbation_applied: bool,
}

impl Flow0DProblem {
    pub fn new(
        model: Box<dyn Cardiovascular0D>,
        curves: TimeCurves,
        time: &TimeParams,
        output: OutputSettings,
        perturbation: Option<Perturbation>,
    ) -> eyre::Result<Self> {
        time.validate()?;
        for curve in model.required_curves() {
            curves
                .get(curve)
                .wrap_err("0D model refers to a missing time curve")?;
        }

        let conditions = match &time.initial_file {
            Some(path) => read_initial_conditions(path)?,
            None => time.initial_conditions.clone(),
        };
        let s = initial_state(model.as_ref(), &conditions)?;
        let periodic_indices = time.periodic_checktype.indices(model.as_ref())?;
        let n = model.num_dof();

        Ok(Self {
            integrator: OneStepTheta::new(time.theta_ost, time.initial_backwardeuler),
            dt: time.dt(),
            numstep: time.numstep,
            numstep_stop: time.numstep_stop,
            eps_periodic: time.eps_periodic,
            periodic_indices,
            s_old: s.clone(),
            s_mid: s.clone(),
            s_tc_old: s.clone(),
            s_set: s.clone(),
            s,
            df_old: DVector::zeros(n),
            f_old: DVector::zeros(n),
            cycle: CycleState::default(),
            output,
            writer: None,
            restart_step: 0,
            perturbation,
            perturbation_applied: false,
            model,
            curves,
        })
    }

    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let model = create_model(&config.model).wrap_err("failed to set up 0D model")?;
        let curves = TimeCurves::from_specs(&config.time_curves)?;
        let output = OutputSettings::from_io_params(&config.io);
        let mut problem = Self::new(model, curves, &config.time, output, config.model.perturbation)?;
        problem.restart_step = config.io.restart_step;
        Ok(problem)
    }

    pub fn model(&self) -> &dyn Cardiovascular0D {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Cardiovascular0D {
        self.model.as_mut()
    }

    pub fn curves(&self) -> &TimeCurves {
        &self.curves
    }

    pub fn integrator(&self) -> &OneStepTheta {
        &self.integrator
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn numstep(&self) -> usize {
        self.numstep
    }

    pub fn numstep_stop(&self) -> Option<usize> {
        self.numstep_stop
    }

    pub fn restart_step(&self) -> usize {
        self.restart_step
    }

    pub fn set_restart_step(&mut self, step: usize) {
        self.restart_step = step;
    }

    pub fn eps_periodic(&self) -> f64 {
        self.eps_periodic
    }

    pub fn set_eps_periodic(&mut self, eps: f64) {
        self.eps_periodic = eps;
    }

    pub fn output(&self) -> &OutputSettings {
        &self.output
    }

    /// Redirects all further output to files of a different simulation name.
    pub fn set_simname(&mut self, simname: impl Into<String>) -> eyre::Result<()> {
        self.flush()?;
        self.writer = None;
        self.output.simname = simname.into();
        Ok(())
    }

    /// Whether the step ending at `t` is the end-diastolic or end-systolic time within the cycle.
    pub fn is_cycle_time(&self, t: f64, t_cycle: f64) -> bool {
        self.model
            .cycle_period()
            .map(|period| self.cycle.is_cycle_time(t, period, self.dt, t_cycle))
            .unwrap_or(false)
    }

    /// Makes the current state the start of the next step.
    pub fn initialize(&mut self, t: f64) {
        self.s_mid.copy_from(&self.s);
        self.accept_state(t);
    }

    fn accept_state(&mut self, t: f64) {
        self.s_old.copy_from(&self.s);
        let mut evaluation = Evaluation::zeros(self.model.num_dof());
        self.model
            .evaluate(&self.s_old, t, &self.curves, &mut evaluation);
        self.df_old = evaluation.df;
        self.f_old = evaluation.f;
    }

    fn step_function(&self, t: f64, theta: f64) -> OneStepThetaResidual<'_> {
        OneStepThetaResidual::new(
            self.model.as_ref(),
            &self.curves,
            &self.df_old,
            &self.f_old,
            t,
            self.dt,
            theta,
        )
    }

    /// Solves for the state at the end of the step ending at `t`, starting from the current `s`.
    pub fn solve_step(&mut self, t: f64, theta: f64, params: &SolverParams) -> Result<NewtonStatistics<f64>, NewtonError> {
        let mut s = self.s.clone();
        let result = solve_nonlinear(self.step_function(t, theta), &mut s, params);
        if result.is_ok() {
            self.s = s;
        }
        result
    }

    /// The one-step-theta residual at the current state.
    pub fn step_residual(&self, t: f64, theta: f64) -> DVector<f64> {
        self.step_function(t, theta).residual(&self.s)
    }

    /// The one-step-theta Jacobian at the current state.
    pub fn step_jacobian(&self, t: f64, theta: f64) -> DMatrix<f64> {
        self.step_function(t, theta).jacobian(&self.s)
    }

    /// Accepts the current state, computing midpoint values and the old-step contributions.
    pub fn update(&mut self, t: f64, theta: f64) {
        self.s_mid = midpoint(&self.s, &self.s_old, theta);
        self.accept_state(t);
    }

    /// Detects the end of a cycle and evaluates the periodicity error, returning whether the
    /// solution has become periodic.
    pub fn check_periodicity(&mut self, t: f64) -> eyre::Result<bool> {
        let period = match self.model.cycle_period() {
            Some(period) if self.cycle.is_cycle_end(t, period, self.dt) => period,
            _ => return Ok(false),
        };

        let error = periodicity_error(&self.s, &self.s_tc_old, &self.periodic_indices);
        let completed = self.cycle.cycle;
        self.cycle.cycle += 1;
        self.cycle.error = error;
        self.s_tc_old.copy_from(&self.s);
        self.write_cycle_initial_data(completed)?;
        info!(
            "Cycle {} completed at t = {:.4} (period {}), cycle error {:.6e}",
            completed, t, period, error
        );

        let perturbation_done = self.perturbation.is_none() || self.perturbation_applied;
        Ok(error <= self.eps_periodic && perturbation_done)
    }

    /// Applies the configured perturbation once its cycle has been completed.
    pub fn induce_perturbation(&mut self) -> eyre::Result<()> {
        if let Some(perturbation) = self.perturbation {
            if !self.perturbation_applied && self.cycle.cycle > perturbation.after_cycle {
                self.model
                    .apply_perturbation(&perturbation)
                    .wrap_err("failed to induce perturbation")?;
                self.perturbation_applied = true;
                info!(
                    "Induced perturbation {:?} of valve {:?} after cycle {}",
                    perturbation.kind, perturbation.valve, perturbation.after_cycle
                );
            }
        }
        Ok(())
    }

    fn write_cycle_initial_data(&self, cycle: usize) -> eyre::Result<()> {
        std::fs::create_dir_all(&self.output.path)?;
        let names = self.model.variable_names();
        let path = initial_data_path(&self.output.path, &self.output.simname, cycle);
        let keys: Vec<String> = names.iter().map(|name| format!("{}_0", name)).collect();
        write_named_values(path, keys.iter().map(String::as_str).zip(self.s.iter().copied()))
    }

    /// Logs the midpoint values of all unknowns.
    pub fn log_state(&self) {
        for (name, value) in self.model.variable_names().iter().zip(self.s_mid.iter()) {
            debug!("{:>12} = {:.6e}", name, value);
        }
    }

    /// Writes midpoint values and compartment volumes of the step ending at `t`, if due.
    pub fn write_results(&mut self, step: usize, t: f64) -> eyre::Result<()> {
        if self.output.write_results_every == 0 || step % self.output.write_results_every != 0 {
            return Ok(());
        }
        let variable_names = self.model.variable_names();
        // Interface volumes are unknowns already
        let volumes: Vec<(String, f64)> = self
            .model
            .compartment_volumes(&self.s_mid, t, &self.curves)
            .into_iter()
            .filter(|(name, _)| !variable_names.contains(name))
            .collect();
        if self.writer.is_none() {
            let mut names = variable_names;
            names.extend(volumes.iter().map(|(name, _)| name.clone()));
            let append = self.restart_step > 0;
            self.writer = Some(SeriesWriter::create(&self.output.path, &self.output.simname, &names, append)?);
        }
        let mut values: Vec<f64> = self.s_mid.iter().copied().collect();
        values.extend(volumes.iter().map(|(_, volume)| *volume));
        match self.writer.as_mut() {
            Some(writer) => writer.write(t, &values),
            None => Err(eyre!("result writer is not available")),
        }
    }

    pub fn flush(&mut self) -> eyre::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn is_restart_due(&self, step: usize) -> bool {
        self.output
            .write_restart_every
            .map(|every| every > 0 && step % every == 0)
            .unwrap_or(false)
    }

    pub fn write_restart(&mut self, step: usize) -> eyre::Result<()> {
        let dir = &self.output.path;
        let simname = &self.output.simname;
        std::fs::create_dir_all(dir)?;
        write_vector(checkpoint_path(dir, simname, "s", step), &self.s)?;
        write_vector(checkpoint_path(dir, simname, "sTc_old", step), &self.s_tc_old)?;
        write_vector(checkpoint_path(dir, simname, "s_set", step), &self.s_set)?;
        if self.model.cycle_period().is_some() {
            let path = checkpoint_path(dir, simname, "cycledata", step);
            std::fs::write(&path, format!("{} {:.8}", self.cycle.cycle, self.cycle.error))
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        }
        self.flush()?;
        debug!("Wrote 0D restart files of step {}", step);
        Ok(())
    }

    pub fn read_restart(&mut self, step: usize) -> eyre::Result<()> {
        let n = self.model.num_dof();
        let dir = self.output.path.clone();
        let simname = self.output.simname.clone();
        let read = |tag: &str| -> eyre::Result<DVector<f64>> {
            let v = read_vector(checkpoint_path(&dir, &simname, tag, step))
                .wrap_err_with(|| format!("failed to read 0D restart data {} of step {}", tag, step))?;
            if v.len() != n {
                bail!("restart data {} has {} entries, expected {}", tag, v.len(), n);
            }
            Ok(v)
        };
        self.s = read("s")?;
        self.s_tc_old = read("sTc_old")?;
        self.s_set = read("s_set")?;

        if self.model.cycle_period().is_some() {
            let path = checkpoint_path(&dir, &simname, "cycledata", step);
            let content =
                std::fs::read_to_string(&path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
            let mut columns = content.split_whitespace();
            let cycle = columns
                .next()
                .ok_or_else(|| eyre!("missing cycle number in {}", path.display()))?
                .parse::<usize>()
                .wrap_err("invalid cycle number")?;
            let error = columns
                .next()
                .ok_or_else(|| eyre!("missing cycle error in {}", path.display()))?
                .parse::<f64>()
                .wrap_err("invalid cycle error")?;
            self.cycle = CycleState { cycle, error };
        }
        if let Some(perturbation) = self.perturbation {
            // A perturbation due before the restart point has been applied in the earlier run
            if self.cycle.cycle > perturbation.after_cycle {
                self.model.apply_perturbation(&perturbation)?;
                self.perturbation_applied = true;
            }
        }
        self.restart_step = step;
        Ok(())
    }
}

/// Outcome of a 0D run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Flow0DSummary {
    /// Number of the last computed step.
    pub last_step: usize,
    pub final_time: f64,
    pub cycle: CycleState,
    pub periodic: bool,
    pub wall_time: Duration,
}

pub struct Flow0DSolver {
    problem: Flow0DProblem,
    solver: SolverParams,
}

impl Flow0DSolver {
    pub fn new(problem: Flow0DProblem, solver: SolverParams) -> Self {
        Self { problem, solver }
    }

    pub fn problem(&self) -> &Flow0DProblem {
        &self.problem
    }

    pub fn into_problem(self) -> Flow0DProblem {
        self.problem
    }

    pub fn solve_problem(&mut self) -> eyre::Result<Flow0DSummary> {
        let start = Instant::now();
        let pb = &mut self.problem;
        let dt = pb.dt();
        let restart_step = pb.restart_step();
        if restart_step > 0 {
            pb.read_restart(restart_step)?;
            info!("Restarting 0D problem from step {}", restart_step);
        }
        pb.initialize(restart_step as f64 * dt);

        let mut summary = Flow0DSummary {
            last_step: restart_step,
            final_time: restart_step as f64 * dt,
            cycle: pb.cycle,
            periodic: false,
            wall_time: Duration::ZERO,
        };

        for step in restart_step + 1..=pb.numstep() {
            let step_start = Instant::now();
            let t = step as f64 * dt;
            let theta = if restart_step == 0 {
                pb.integrator().theta_for_step(step)
            } else {
                pb.integrator().theta
            };

            let statistics = pb
                .solve_step(t, theta, &self.solver)
                .wrap_err_with(|| format!("0D solve failed in step {} (t = {})", step, t))?;
            pb.update(t, theta);

            info!(
                "### TIME STEP {} / {} --- t = {:.4} --- {} Newton iter, |r| = {:.4e} --- {:.4e} s",
                step,
                pb.numstep(),
                t,
                statistics.iterations,
                statistics.residual_norm,
                step_start.elapsed().as_secs_f64()
            );
            pb.log_state();

            let periodic = pb.check_periodicity(t)?;
            pb.induce_perturbation()?;
            pb.write_results(step, t)?;
            if pb.is_restart_due(step) {
                pb.write_restart(step)?;
            }

            summary.last_step = step;
            summary.final_time = t;
            summary.cycle = pb.cycle;
            if periodic {
                info!(
                    "Periodicity reached after {} cycles with error {:.6e}",
                    pb.cycle.cycle - 1,
                    pb.cycle.error
                );
                summary.periodic = true;
                break;
            }
            if pb.numstep_stop() == Some(step) {
                info!("Stopping after step {}", step);
                break;
            }
        }

        pb.flush()?;
        summary.wall_time = start.elapsed();
        info!("Program complete. Time for computation: {:.4} s", summary.wall_time.as_secs_f64());
        Ok(summary)
    }
}
