//! Simulation input, deserialized from JSON.
//!
//! Every parameter group mirrors one block of the input file. Optional parameters carry the
//! defaults of the reference workflow, so a minimal input only names the model, the time
//! discretization and the output location.
use crate::flow0d::{PeriodicCheck, Perturbation};
use crate::flow0d::{BleedingParameters, ChamberModels, SyspulParameters, ValveLaws, WindkesselParameters};
use crate::time_curves::TimeCurveSpec;
use ambit_optimize::newton::{NewtonSettings, PtcRestartSettings, PtcSettings};
use ambit_solid::active::ActiveStressParameters;
use ambit_solid::growth::{GrowthDirection, GrowthParameters, GrowthTrigger};
use ambit_solid::materials::HolzapfelOgdenParameters;
use ambit_solid::viscous::StrainRateViscosity;
use eyre::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemType {
    #[serde(rename = "flow0d")]
    Flow0D,
    #[serde(rename = "solid_flow0d")]
    SolidFlow0D,
    #[serde(rename = "solid_flow0d_multiscale_gandr")]
    SolidFlow0DMultiscaleGrowthRemodeling,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IoParams {
    pub problem_type: ProblemType,
    pub output_path: PathBuf,
    /// Separate output directory for the 0D results, defaults to `output_path`.
    #[serde(default, rename = "output_path_0D")]
    pub output_path_0d: Option<PathBuf>,
    pub simname: String,
    #[serde(default = "default_write_every")]
    pub write_results_every: usize,
    /// Separate output frequency for the 0D results, defaults to `write_results_every`.
    #[serde(default, rename = "write_results_every_0D")]
    pub write_results_every_0d: Option<usize>,
    /// Restart files are only written if this is given.
    #[serde(default)]
    pub write_restart_every: Option<usize>,
    #[serde(default)]
    pub restart_step: usize,
}

fn default_write_every() -> usize {
    1
}

impl IoParams {
    pub fn output_path_0d(&self) -> &Path {
        self.output_path_0d.as_deref().unwrap_or(&self.output_path)
    }

    pub fn write_results_every_0d(&self) -> usize {
        self.write_results_every_0d.unwrap_or(self.write_results_every)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeParams {
    pub maxtime: f64,
    pub numstep: usize,
    /// Stop the time loop early after this step.
    #[serde(default)]
    pub numstep_stop: Option<usize>,
    #[serde(default = "default_theta_ost")]
    pub theta_ost: f64,
    /// Use backward Euler for the very first step, which damps inconsistent initial data.
    #[serde(default)]
    pub initial_backwardeuler: bool,
    /// Initial values, keyed by `<variable>_0`.
    #[serde(default)]
    pub initial_conditions: BTreeMap<String, f64>,
    /// File with `<variable>_0 value` lines, takes precedence over `initial_conditions`.
    #[serde(default)]
    pub initial_file: Option<PathBuf>,
    #[serde(default = "default_eps_periodic")]
    pub eps_periodic: f64,
    #[serde(default)]
    pub periodic_checktype: PeriodicCheck,
}

fn default_theta_ost() -> f64 {
    0.5
}

fn default_eps_periodic() -> f64 {
    1.0e-20
}

impl TimeParams {
    pub fn dt(&self) -> f64 {
        self.maxtime / self.numstep as f64
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.numstep == 0 {
            bail!("numstep must be positive");
        }
        if !(self.maxtime > 0.0) {
            bail!("maxtime must be positive, got {}", self.maxtime);
        }
        if !(self.theta_ost > 0.0 && self.theta_ost <= 1.0) {
            bail!("theta_ost must lie in (0, 1], got {}", self.theta_ost);
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceContinuation {
    /// Restart a diverged Newton solve with pseudo-transient continuation.
    #[serde(rename = "PTC", alias = "ptc")]
    Ptc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub tol_res: f64,
    pub tol_inc: f64,
    pub maxiter: usize,
    pub ptc: bool,
    pub k_ptc_initial: f64,
    pub divergence_continue: Option<DivergenceContinuation>,
    pub catch_max_res_value: f64,
    /// Iteration budget of solves restarted with PTC.
    pub ptc_maxiter: usize,
    /// Range of the factors rescaling `k_ptc_initial` on repeated PTC restarts.
    pub ptc_randadapt_range: [f64; 2],
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tol_res: 1.0e-8,
            tol_inc: 1.0e-8,
            maxiter: 25,
            ptc: false,
            k_ptc_initial: 0.1,
            divergence_continue: None,
            catch_max_res_value: 1.0e16,
            ptc_maxiter: 250,
            ptc_randadapt_range: [0.85, 1.35],
        }
    }
}

impl SolverParams {
    pub fn newton_settings(&self) -> NewtonSettings<f64> {
        NewtonSettings {
            max_iterations: Some(self.maxiter),
            tolerance: self.tol_res,
            increment_tolerance: Some(self.tol_inc),
            max_residual: Some(self.catch_max_res_value),
            ptc: self.ptc.then(|| self.ptc_settings()),
        }
    }

    pub fn ptc_settings(&self) -> PtcSettings<f64> {
        PtcSettings {
            initial_shift: self.k_ptc_initial,
        }
    }

    pub fn ptc_restart_settings(&self) -> PtcRestartSettings<f64> {
        let [lo, hi] = self.ptc_randadapt_range;
        PtcRestartSettings {
            initial_shift: self.k_ptc_initial,
            max_iterations: Some(self.ptc_maxiter),
            factor_range: (lo, hi),
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.maxiter == 0 || self.ptc_maxiter == 0 {
            bail!("iteration budgets must be positive");
        }
        if !(self.k_ptc_initial > 0.0) {
            bail!("k_ptc_initial must be positive, got {}", self.k_ptc_initial);
        }
        let [lo, hi] = self.ptc_randadapt_range;
        if !(lo > 0.0 && lo <= hi) {
            bail!("ptc_randadapt_range must be a positive interval, got [{}, {}]", lo, hi);
        }
        Ok(())
    }
}

/// The 0D model, selected by its `modeltype` name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modeltype")]
pub enum ModelKind {
    #[serde(rename = "2elwindkessel")]
    Windkessel2El { parameters: WindkesselParameters },
    #[serde(rename = "4elwindkesselLsZ")]
    Windkessel4ElLsZ { parameters: WindkesselParameters },
    #[serde(rename = "4elwindkesselLpZ")]
    Windkessel4ElLpZ { parameters: WindkesselParameters },
    #[serde(rename = "syspul")]
    Syspul {
        parameters: SyspulParameters,
        #[serde(default)]
        chamber_models: ChamberModels,
        #[serde(default)]
        valve_laws: ValveLaws,
        #[serde(default)]
        bleeding: Option<BleedingParameters>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(flatten)]
    pub kind: ModelKind,
    #[serde(default)]
    pub perturbation: Option<Perturbation>,
}

/// Coupling of the structure to the 0D model. Chamber pressures always enter as Lagrange
/// multipliers enforcing equal 3D and 0D volumes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingParams {
    /// Solver for the 0D sub-solve, defaults to the main solver settings.
    #[serde(default, rename = "solver_flow0D")]
    pub solver_flow0d: Option<SolverParams>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveStressConfig {
    #[serde(flatten)]
    pub parameters: ActiveStressParameters<f64>,
    #[serde(default = "default_activation_curve")]
    pub activation_curve: usize,
}

fn default_activation_curve() -> usize {
    2
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrowthConfig {
    pub direction: GrowthDirection,
    #[serde(default = "default_growth_trigger")]
    pub trigger: GrowthTrigger<f64>,
    #[serde(flatten)]
    pub parameters: GrowthParameters<f64>,
}

fn default_growth_trigger() -> GrowthTrigger<f64> {
    GrowthTrigger::FiberStretch
}

/// Parameters of the lumped spherical chamber standing in for the ventricular wall.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructureParams {
    /// Cavity volume of the reference configuration.
    pub cavity_volume: f64,
    /// Tissue volume of the wall.
    pub wall_volume: f64,
    #[serde(default)]
    pub material: HolzapfelOgdenParameters<f64>,
    #[serde(default)]
    pub active_stress: Option<ActiveStressConfig>,
    #[serde(default)]
    pub viscosity: Option<StrainRateViscosity<f64>>,
    #[serde(default)]
    pub growth: Option<GrowthConfig>,
    /// Number of MULF load steps, no prestressing if absent.
    #[serde(default)]
    pub prestress_numstep: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    EndDiastole,
    EndSystole,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LargeScaleTimeParams {
    pub maxtime: f64,
    pub numstep: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiscaleParams {
    pub numcycles: usize,
    /// Periodicity tolerance of the small scale, overrides `eps_periodic`.
    pub tol_small: f64,
    /// Tolerance on the growth rate of the large scale.
    pub tol_large: f64,
    /// Tolerance on the relative tissue volume change between cycles.
    pub tol_outer: f64,
    pub gandr_trigger_phase: TriggerPhase,
    #[serde(default)]
    pub restart_cycle: usize,
    #[serde(default)]
    pub restart_from_small: bool,
    pub large_scale: LargeScaleTimeParams,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub io: IoParams,
    pub time: TimeParams,
    #[serde(default)]
    pub solver: SolverParams,
    pub model: ModelParams,
    #[serde(default)]
    pub time_curves: BTreeMap<usize, TimeCurveSpec>,
    #[serde(default)]
    pub coupling: Option<CouplingParams>,
    #[serde(default)]
    pub structure: Option<StructureParams>,
    #[serde(default)]
    pub multiscale: Option<MultiscaleParams>,
}

impl Config {
    pub fn from_json_str(json: &str) -> eyre::Result<Self> {
        let config: Self = serde_json::from_str(json).wrap_err("failed to parse simulation input")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&json).wrap_err_with(|| format!("invalid input file {}", path.display()))
    }

    /// Checks that the parameter groups required by the problem type are present.
    pub fn validate(&self) -> eyre::Result<()> {
        self.time.validate().wrap_err("invalid time parameters")?;
        self.solver.validate().wrap_err("invalid solver parameters")?;
        if let Some(solver) = self.coupling.as_ref().and_then(|coupling| coupling.solver_flow0d.as_ref()) {
            solver.validate().wrap_err("invalid 0D solver parameters")?;
        }
        for (id, curve) in &self.time_curves {
            curve
                .validate()
                .wrap_err_with(|| format!("invalid time curve {}", id))?;
        }
        match self.io.problem_type {
            ProblemType::Flow0D => {}
            ProblemType::SolidFlow0D => {
                if self.structure.is_none() {
                    bail!("problem type solid_flow0d requires structure parameters");
                }
            }
            ProblemType::SolidFlow0DMultiscaleGrowthRemodeling => {
                let structure = self
                    .structure
                    .as_ref()
                    .ok_or_else(|| eyre::eyre!("multiscale problems require structure parameters"))?;
                if structure.growth.is_none() {
                    bail!("multiscale problems require growth parameters");
                }
                if self.multiscale.is_none() {
                    bail!("multiscale problems require multiscale parameters");
                }
            }
        }
        Ok(())
    }

    /// Solver settings of the 0D sub-solve inside coupled problems.
    pub fn solver_flow0d(&self) -> SolverParams {
        self.coupling
            .as_ref()
            .and_then(|coupling| coupling.solver_flow0d.clone())
            .unwrap_or_else(|| self.solver.clone())
    }
}
