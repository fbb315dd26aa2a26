//! Coupled structure and 0D problems and their monolithic solver.
use crate::config::{Config, SolverParams};
use crate::coupling::{ChamberStructure, SphericalChamber};
use crate::flow0d::problem::{Flow0DProblem, Flow0DSummary};
use crate::flow0d::read_initial_conditions;
use crate::io::{checkpoint_path, read_vector, write_vector, SeriesWriter};
use crate::nonlinear::solve_nonlinear;
use ambit_optimize::calculus::{solve_dense_shifted, DifferentiableVectorFunction, VectorFunction};
use ambit_optimize::newton::NewtonStatistics;
use ambit_solid::prestress::prestress_load_factor;
use eyre::{bail, eyre, Context};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::error::Error;
use std::time::{Duration, Instant};

/// A chamber structure coupled to a 0D model through the chamber pressures.
pub struct SolidFlow0DProblem<S> {
    pub structure: S,
    pub flow0d: Flow0DProblem,
    /// Structural state at the end of the current step.
    pub u: DVector<f64>,
    /// Chamber pressures, the Lagrange multipliers of the volume constraints.
    pub pressures: DVector<f64>,
    /// Pressures and structural state at the multiscale set point.
    pub pressures_set: DVector<f64>,
    pub u_set: DVector<f64>,
    /// Time within the cycle at which the set point is captured.
    set_point_time: Option<f64>,
    prestress_numstep: Option<usize>,
    solver_flow0d: SolverParams,
    writer: Option<SeriesWriter>,
}

impl<S: ChamberStructure> SolidFlow0DProblem<S> {
    pub fn new(
        structure: S,
        mut flow0d: Flow0DProblem,
        initial_pressures: DVector<f64>,
        solver_flow0d: SolverParams,
        prestress_numstep: Option<usize>,
    ) -> eyre::Result<Self> {
        let slots = flow0d.model().interface_slots();
        if slots.len() != structure.num_chambers() {
            bail!(
                "0D model has {} interface chambers, but the structure encloses {}",
                slots.len(),
                structure.num_chambers()
            );
        }
        if initial_pressures.len() != slots.len() {
            bail!(
                "expected {} initial chamber pressures, got {}",
                slots.len(),
                initial_pressures.len()
            );
        }
        if prestress_numstep == Some(0) {
            bail!("prestressing requires at least one load step");
        }
        flow0d
            .model_mut()
            .set_interface_pressures(initial_pressures.as_slice())?;
        let u = structure.state();
        Ok(Self {
            u_set: u.clone(),
            u,
            pressures_set: initial_pressures.clone(),
            pressures: initial_pressures,
            structure,
            flow0d,
            set_point_time: None,
            prestress_numstep,
            solver_flow0d,
            writer: None,
        })
    }

    pub fn num_chambers(&self) -> usize {
        self.pressures.len()
    }

    pub fn set_point_time(&self) -> Option<f64> {
        self.set_point_time
    }

    /// Captures the multiscale set point at time `t_set` of every cycle.
    pub fn set_set_point_time(&mut self, t_set: Option<f64>) {
        self.set_point_time = t_set;
    }

    pub fn prestress_numstep(&self) -> Option<usize> {
        self.prestress_numstep
    }

    pub fn set_simname(&mut self, simname: impl Into<String>) -> eyre::Result<()> {
        self.flush()?;
        self.writer = None;
        self.flow0d.set_simname(simname)
    }

    /// Imprints the initial chamber pressures into the structure with MULF, ramping the load
    /// linearly over the configured number of steps.
    pub fn prestress(&mut self, solver: &SolverParams) -> eyre::Result<()> {
        let numstep = match self.prestress_numstep {
            Some(numstep) => numstep,
            None => return Ok(()),
        };
        info!("Prestressing in {} load steps", numstep);
        for step in 1..=numstep {
            let factor: f64 = prestress_load_factor(step, numstep);
            let loads = &self.pressures * factor;
            let mut u = self.u.clone();
            let statistics = solve_nonlinear(
                StructureEquilibrium {
                    structure: &self.structure,
                    pressures: &loads,
                },
                &mut u,
                solver,
            )
            .wrap_err_with(|| format!("prestress solve failed in load step {}", step))?;
            self.u = self.structure.prestress_update(&u);
            info!(
                "Prestress step {} / {}: load factor {:.4}, {} Newton iter",
                step, numstep, factor, statistics.iterations
            );
        }
        Ok(())
    }

    /// Makes the current state the start of the next step, with the 0D interface volumes taken
    /// from the structure.
    pub fn initialize(&mut self, t: f64) {
        let volumes = self.structure.chamber_volumes(&self.u);
        for (slot, volume) in self.flow0d.model().interface_slots().into_iter().zip(volumes.iter()) {
            self.flow0d.s[slot] = *volume;
        }
        self.flow0d.initialize(t);
    }

    /// Solves the coupled step ending at `t`. On a failed Newton solve the state is left
    /// unchanged and the `NewtonError` is returned as the root cause of the report.
    pub fn solve_step(&mut self, t: f64, theta: f64, params: &SolverParams) -> eyre::Result<NewtonStatistics<f64>> {
        let dt = self.flow0d.dt();
        self.structure
            .prepare_step(t, dt, self.flow0d.curves())
            .wrap_err("failed to prepare structure for the step")?;

        let n_u = self.u.len();
        let mut x = DVector::zeros(n_u + self.pressures.len());
        x.rows_mut(0, n_u).copy_from(&self.u);
        x.rows_mut(n_u, self.pressures.len())
            .copy_from(&self.pressures);
        let s_start = self.flow0d.s.clone();

        let mut system = CoupledSystem {
            structure: &self.structure,
            flow0d: &mut self.flow0d,
            solver: &self.solver_flow0d,
            t,
            theta,
            n_u,
        };
        let result = solve_nonlinear(&mut system, &mut x, params);

        match result {
            Ok(statistics) => {
                self.u = x.rows(0, n_u).clone_owned();
                self.pressures = x.rows(n_u, self.pressures.len()).clone_owned();
                Ok(statistics)
            }
            Err(err) => {
                self.flow0d.s = s_start;
                self.flow0d
                    .model_mut()
                    .set_interface_pressures(self.pressures.as_slice())
                    .wrap_err_with(|| format!("failed to restore interface pressures after: {}", err))?;
                Err(err.into())
            }
        }
    }

    /// Accepts the converged step in both sub-problems.
    pub fn update(&mut self, t: f64, theta: f64) {
        self.structure.update(&self.u);
        self.flow0d.update(t, theta);
    }

    /// Captures the set point if the step ending at `t` hits the set-point time.
    pub fn capture_set_point_if_due(&mut self, t: f64) -> bool {
        let (t_set, period) = match (self.set_point_time, self.flow0d.model().cycle_period()) {
            (Some(t_set), Some(period)) => (t_set, period),
            _ => return false,
        };
        // A set point at the cycle start coincides with the end of the cycle
        let t_set = if t_set <= 0.5 * self.flow0d.dt() { period } else { t_set };
        if !self.flow0d.is_cycle_time(t, t_set) {
            return false;
        }
        self.structure
            .capture_set_point(&self.u, &self.pressures);
        self.u_set.copy_from(&self.u);
        self.pressures_set.copy_from(&self.pressures);
        self.flow0d.s_set = self.flow0d.s.clone();
        info!("Captured set point at t = {:.4}, pressures {:?}", t, self.pressures.as_slice());
        true
    }

    pub fn log_state(&self) {
        self.flow0d.log_state();
        for (name, value) in self.structure.output_values(&self.u) {
            debug!("{:>12} = {:.6e}", name, value);
        }
    }

    /// Writes the 0D results together with the chamber pressures and structural outputs.
    pub fn write_results(&mut self, step: usize, t: f64) -> eyre::Result<()> {
        self.flow0d.write_results(step, t)?;
        let output = self.flow0d.output();
        if output.write_results_every == 0 || step % output.write_results_every != 0 {
            return Ok(());
        }
        let structural = self.structure.output_values(&self.u);
        if self.writer.is_none() {
            let mut names: Vec<String> = self
                .flow0d
                .model()
                .interface_pressure_names();
            names.extend(structural.iter().map(|(name, _)| name.clone()));
            let append = self.flow0d.restart_step() > 0;
            self.writer = Some(SeriesWriter::create(&output.path, &output.simname, &names, append)?);
        }
        let mut values: Vec<f64> = self.pressures.iter().copied().collect();
        values.extend(structural.iter().map(|(_, value)| *value));
        match self.writer.as_mut() {
            Some(writer) => writer.write(t, &values),
            None => Err(eyre!("result writer is not available")),
        }
    }

    pub fn flush(&mut self) -> eyre::Result<()> {
        self.flow0d.flush()?;
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn write_restart(&mut self, step: usize) -> eyre::Result<()> {
        self.flow0d.write_restart(step)?;
        let output = self.flow0d.output();
        let (dir, simname) = (&output.path, &output.simname);
        write_vector(checkpoint_path(dir, simname, "u", step), &self.u)?;
        write_vector(checkpoint_path(dir, simname, "p", step), &self.pressures)?;
        write_vector(checkpoint_path(dir, simname, "u_set", step), &self.u_set)?;
        write_vector(checkpoint_path(dir, simname, "p_set", step), &self.pressures_set)?;
        self.structure
            .write_checkpoint(&checkpoint_path(dir, simname, "structure", step))?;
        self.flush()
    }

    pub fn read_restart(&mut self, step: usize) -> eyre::Result<()> {
        self.flow0d.read_restart(step)?;
        let output = self.flow0d.output().clone();
        let (dir, simname) = (&output.path, &output.simname);
        let read = |tag: &str, n: usize| -> eyre::Result<DVector<f64>> {
            let v = read_vector(checkpoint_path(dir, simname, tag, step))
                .wrap_err_with(|| format!("failed to read restart data {} of step {}", tag, step))?;
            if v.len() != n {
                bail!("restart data {} has {} entries, expected {}", tag, v.len(), n);
            }
            Ok(v)
        };
        self.u = read("u", self.u.len())?;
        self.pressures = read("p", self.pressures.len())?;
        self.u_set = read("u_set", self.u.len())?;
        self.pressures_set = read("p_set", self.pressures.len())?;
        self.structure
            .read_checkpoint(&checkpoint_path(dir, simname, "structure", step))?;
        self.flow0d
            .model_mut()
            .set_interface_pressures(self.pressures.as_slice())?;
        Ok(())
    }
}

impl SolidFlow0DProblem<SphericalChamber> {
    /// Sets up a spherical chamber coupled to the configured 0D model.
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let structure_params = config
            .structure
            .as_ref()
            .ok_or_else(|| eyre!("coupled problems require structure parameters"))?;
        let structure = SphericalChamber::from_params(structure_params, config.time.theta_ost)
            .wrap_err("failed to set up chamber structure")?;
        let flow0d = Flow0DProblem::from_config(config)?;

        let conditions = match &config.time.initial_file {
            Some(path) => read_initial_conditions(path)?,
            None => config.time.initial_conditions.clone(),
        };
        let names = flow0d.model().interface_pressure_names();
        let initial_pressures = DVector::from_iterator(
            names.len(),
            names
                .iter()
                .map(|name| conditions.get(&format!("{}_0", name)).copied().unwrap_or(0.0)),
        );

        Self::new(
            structure,
            flow0d,
            initial_pressures,
            config.solver_flow0d(),
            structure_params.prestress_numstep,
        )
    }
}

/// Structural equilibrium under fixed chamber pressures.
struct StructureEquilibrium<'a, S> {
    structure: &'a S,
    pressures: &'a DVector<f64>,
}

impl<'a, S: ChamberStructure> VectorFunction<f64> for StructureEquilibrium<'a, S> {
    fn dimension(&self) -> usize {
        self.structure.num_dof()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) {
        let r = self.structure.residual(&x.clone_owned(), self.pressures);
        f.copy_from(&r);
    }
}

impl<'a, S: ChamberStructure> DifferentiableVectorFunction<f64> for StructureEquilibrium<'a, S> {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.solve_shifted_jacobian_system(sol, x, rhs, 0.0)
    }

    fn solve_shifted_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
        shift: f64,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (k_uu, _) = self.structure.stiffness(&x.clone_owned(), self.pressures);
        solve_dense_shifted(&k_uu, shift, sol, rhs)
    }
}

/// The monolithic residual in the structural unknowns and the chamber pressures.
///
/// Every evaluation imposes the pressures on the 0D model and solves its time step, so the
/// 0D state is condensed out of the coupled system.
struct CoupledSystem<'a, S> {
    structure: &'a S,
    flow0d: &'a mut Flow0DProblem,
    solver: &'a SolverParams,
    t: f64,
    theta: f64,
    n_u: usize,
}

impl<'a, S: ChamberStructure> CoupledSystem<'a, S> {
    fn split(&self, x: &DVectorView<f64>) -> (DVector<f64>, DVector<f64>) {
        let n_p = x.len() - self.n_u;
        (x.rows(0, self.n_u).clone_owned(), x.rows(self.n_u, n_p).clone_owned())
    }

    /// Solves the 0D step under the given interface pressures.
    fn solve_flow0d(&mut self, pressures: &DVector<f64>) -> eyre::Result<()> {
        self.flow0d
            .model_mut()
            .set_interface_pressures(pressures.as_slice())?;
        self.flow0d.solve_step(self.t, self.theta, self.solver)?;
        Ok(())
    }

    fn interface_volumes(&self) -> DVector<f64> {
        let slots = self.flow0d.model().interface_slots();
        DVector::from_iterator(slots.len(), slots.iter().map(|&slot| self.flow0d.s[slot]))
    }

    /// $\pd{\vec V^{0D}}{\vec \Lambda}$ from the sensitivity
    /// $\pd{\vec s}{\vec \Lambda} = -\vec K_{ss}^{-1} \pd{\vec r_{0D}}{\vec \Lambda}$.
    ///
    /// The pressure derivative of the 0D residual is taken by central differences at the
    /// converged 0D state.
    fn volume_sensitivity(&mut self, pressures: &DVector<f64>) -> eyre::Result<DMatrix<f64>> {
        let n_p = pressures.len();
        let n_s = self.flow0d.s.len();
        let k_ss = self.flow0d.step_jacobian(self.t, self.theta);
        let mut dr_dp = DMatrix::zeros(n_s, n_p);
        let mut perturbed = pressures.clone();
        for j in 0..n_p {
            let h = 1e-6 * pressures[j].abs().max(1.0);
            perturbed[j] = pressures[j] + h;
            self.flow0d
                .model_mut()
                .set_interface_pressures(perturbed.as_slice())?;
            let r_plus = self.flow0d.step_residual(self.t, self.theta);
            perturbed[j] = pressures[j] - h;
            self.flow0d
                .model_mut()
                .set_interface_pressures(perturbed.as_slice())?;
            let r_minus = self.flow0d.step_residual(self.t, self.theta);
            perturbed[j] = pressures[j];
            dr_dp.set_column(j, &((r_plus - r_minus) / (2.0 * h)));
        }
        self.flow0d
            .model_mut()
            .set_interface_pressures(pressures.as_slice())?;

        let ds_dp = k_ss
            .lu()
            .solve(&(-dr_dp))
            .ok_or_else(|| eyre!("singular 0D Jacobian in sensitivity computation"))?;
        let slots = self.flow0d.model().interface_slots();
        Ok(ds_dp.select_rows(slots.iter()))
    }
}

impl<'a, S: ChamberStructure> VectorFunction<f64> for CoupledSystem<'a, S> {
    fn dimension(&self) -> usize {
        self.n_u + self.structure.num_chambers()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) {
        let (u, pressures) = self.split(x);
        if let Err(err) = self.solve_flow0d(&pressures) {
            warn!("0D sub-solve failed: {:#}", err);
            f.fill(f64::NAN);
            return;
        }
        let r_u = self.structure.residual(&u, &pressures);
        let r_v = self.structure.chamber_volumes(&u) - self.interface_volumes();
        f.rows_mut(0, self.n_u).copy_from(&r_u);
        f.rows_mut(self.n_u, r_v.len()).copy_from(&r_v);
    }
}

impl<'a, S: ChamberStructure> DifferentiableVectorFunction<f64> for CoupledSystem<'a, S> {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.solve_shifted_jacobian_system(sol, x, rhs, 0.0)
    }

    fn solve_shifted_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
        shift: f64,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (u, pressures) = self.split(x);
        let n_u = self.n_u;
        let n_p = pressures.len();
        self.solve_flow0d(&pressures)?;
        let dv0d_dp = self.volume_sensitivity(&pressures)?;

        let (k_uu, k_up) = self.structure.stiffness(&u, &pressures);
        let dv_du = self.structure.volume_derivative(&u);

        let mut jacobian = DMatrix::zeros(n_u + n_p, n_u + n_p);
        jacobian.view_mut((0, 0), (n_u, n_u)).copy_from(&k_uu);
        jacobian.view_mut((0, n_u), (n_u, n_p)).copy_from(&k_up);
        jacobian.view_mut((n_u, 0), (n_p, n_u)).copy_from(&dv_du);
        jacobian
            .view_mut((n_u, n_u), (n_p, n_p))
            .copy_from(&(-dv0d_dp));
        solve_dense_shifted(&jacobian, shift, sol, rhs)
    }
}

/// Solves a coupled problem over the configured time steps.
pub struct SolidFlow0DSolver<S> {
    problem: SolidFlow0DProblem<S>,
    solver: SolverParams,
    /// Whether the next run starts a fresh simulation, using the initial backward Euler step
    /// and the prestress phase.
    fresh: bool,
}

impl<S: ChamberStructure> SolidFlow0DSolver<S> {
    pub fn new(problem: SolidFlow0DProblem<S>, solver: SolverParams) -> Self {
        Self {
            problem,
            solver,
            fresh: true,
        }
    }

    pub fn problem(&self) -> &SolidFlow0DProblem<S> {
        &self.problem
    }

    pub fn problem_mut(&mut self) -> &mut SolidFlow0DProblem<S> {
        &mut self.problem
    }

    pub fn into_problem(self) -> SolidFlow0DProblem<S> {
        self.problem
    }

    /// Runs the time loop from the restart step, or from the start after prestressing.
    pub fn solve_problem(&mut self) -> eyre::Result<Flow0DSummary> {
        let restart_step = self.problem.flow0d.restart_step();
        if self.fresh {
            if restart_step > 0 {
                self.problem.read_restart(restart_step)?;
                info!("Restarting coupled problem from step {}", restart_step);
            } else {
                self.problem.prestress(&self.solver)?;
            }
        }
        let t_start = restart_step as f64 * self.problem.flow0d.dt();
        self.problem.initialize(t_start);
        self.run(restart_step)
    }

    /// Runs a further sequence of cycles from the current state, restarting time and the cycle
    /// count at zero.
    pub fn solve_next_cycles(&mut self) -> eyre::Result<Flow0DSummary> {
        self.fresh = false;
        let pb = &mut self.problem;
        pb.flow0d.set_restart_step(0);
        pb.flow0d.cycle = Default::default();
        pb.flow0d.s_tc_old = pb.flow0d.s.clone();
        pb.initialize(0.0);
        self.run(0)
    }

    fn run(&mut self, restart_step: usize) -> eyre::Result<Flow0DSummary> {
        let start = Instant::now();
        let first_run = self.fresh && restart_step == 0;
        self.fresh = false;
        let pb = &mut self.problem;
        let dt = pb.flow0d.dt();
        let numstep = pb.flow0d.numstep();

        let mut summary = Flow0DSummary {
            last_step: restart_step,
            final_time: restart_step as f64 * dt,
            cycle: pb.flow0d.cycle,
            periodic: false,
            wall_time: Duration::ZERO,
        };

        for step in restart_step + 1..=numstep {
            let step_start = Instant::now();
            let t = step as f64 * dt;
            let theta = if first_run {
                pb.flow0d.integrator().theta_for_step(step)
            } else {
                pb.flow0d.integrator().theta
            };

            let statistics = pb
                .solve_step(t, theta, &self.solver)
                .wrap_err_with(|| format!("coupled solve failed in step {} (t = {})", step, t))?;
            pb.update(t, theta);

            info!(
                "### TIME STEP {} / {} --- t = {:.4} --- {} Newton iter, |r| = {:.4e} --- {:.4e} s",
                step,
                numstep,
                t,
                statistics.iterations,
                statistics.residual_norm,
                step_start.elapsed().as_secs_f64()
            );
            pb.log_state();

            pb.capture_set_point_if_due(t);
            let periodic = pb.flow0d.check_periodicity(t)?;
            pb.flow0d.induce_perturbation()?;
            pb.write_results(step, t)?;
            if pb.flow0d.is_restart_due(step) {
                pb.write_restart(step)?;
            }

            summary.last_step = step;
            summary.final_time = t;
            summary.cycle = pb.flow0d.cycle;
            if periodic {
                info!(
                    "Periodicity reached after {} cycles with error {:.6e}",
                    pb.flow0d.cycle.cycle - 1,
                    pb.flow0d.cycle.error
                );
                summary.periodic = true;
                break;
            }
            if pb.flow0d.numstep_stop() == Some(step) {
                info!("Stopping after step {}", step);
                break;
            }
        }

        pb.flush()?;
        summary.wall_time = start.elapsed();
        info!("Coupled run complete. Time for computation: {:.4} s", summary.wall_time.as_secs_f64());
        Ok(summary)
    }
}
