use crate::config::{SolverParams, StructureParams};
use crate::coupling::ChamberStructure;
use crate::nonlinear::solve_nonlinear;
use crate::time_curves::TimeCurves;
use ambit_optimize::calculus::{approximate_jacobian, solve_dense_shifted, DifferentiableVectorFunction, VectorFunction};
use ambit_solid::active::{ActiveStress, ActiveStressParameters};
use ambit_solid::growth::{GrowthDirection, GrowthError, GrowthLaw, GrowthParameters, GrowthTrigger};
use ambit_solid::materials::{HolzapfelOgdenMaterial, HolzapfelOgdenParameters};
use ambit_solid::prestress::MulfPrestress;
use ambit_solid::viscous::StrainRateViscosity;
use ambit_solid::{contract_second_variation, HyperelasticMaterial};
use eyre::{bail, eyre, Context};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;

/// How the cavity pressure loads the wall.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PressureLoad {
    /// The pressure acts on the current configuration.
    Follower,
    /// The pressure acts on a fixed configuration with the given stretch.
    Dead { reference_stretch: f64 },
}

/// State and loads captured at the growth and remodeling set point of a cycle.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetPoint {
    pub stretch: f64,
    pub pressure: f64,
    pub tension: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphereGrowth {
    pub direction: GrowthDirection,
    pub trigger: GrowthTrigger<f64>,
    pub law: GrowthLaw<f64>,
}

#[allow(non_snake_case)]
struct Kinematics {
    F: Matrix3<f64>,
    F_u: Matrix3<f64>,
    F_e: Matrix3<f64>,
    /// $\mathrm{d} \vec F_e / \mathrm{d} \lambda$.
    G: Matrix3<f64>,
    /// $\mathrm{d}^2 \vec F_e / \mathrm{d} \lambda^2$.
    H: Matrix3<f64>,
    J_g: f64,
}

/// A thin-walled spherical chamber, the lumped counterpart of a ventricle.
///
/// The single unknown is the circumferential stretch $\lambda$. In the local frame
/// $(\vec e_1, \vec e_2)$ circumferential and $\vec e_3$ radial, the displacement part of the
/// deformation gradient is $\vec F_u = \operatorname{diag}(\lambda, \lambda, \rho)$, where the
/// radial stretch $\rho = J_g / (\lambda^2 \det \vec F_{hist})$ renders the elastic part
/// $\vec F_e = \vec F_u \vec F_{hist} \vec F_g^{-1}$ isochoric. Fibers run along $\vec e_1$,
/// sheets along $\vec e_3$.
///
/// Equilibrium follows from the principle of virtual work,
/// $$
/// V_w J_g \\, \vec P(\vec F_e) : \frac{\mathrm{d} \vec F_e}{\mathrm{d} \lambda}
///     - p \frac{\mathrm{d} V}{\mathrm{d} \lambda} = 0, \qquad V = V_0 \lambda^3,
/// $$
/// with the wall volume $V_w$, the reference cavity volume $V_0$ and the total first
/// Piola-Kirchhoff stress $\vec P$ of the Holzapfel-Ogden material, active stress and viscosity.
#[derive(Clone, Debug)]
pub struct SphericalChamber {
    cavity_volume: f64,
    wall_volume: f64,
    material: HolzapfelOgdenParameters<f64>,
    active: Option<ActiveStress<f64>>,
    activation_curve: usize,
    viscosity: Option<StrainRateViscosity<f64>>,
    growth: Option<SphereGrowth>,
    theta: f64,
    theta_old: f64,
    threshold: Option<f64>,
    prestress: MulfPrestress<f64>,
    stretch: f64,
    /// Step size of the current dynamic step, `None` in quasi-static settings.
    dt: Option<f64>,
    load: PressureLoad,
    set_point: Option<SetPoint>,
}

#[derive(Serialize, Deserialize)]
struct SphereCheckpoint {
    stretch: f64,
    theta: f64,
    threshold: Option<f64>,
    tension: f64,
    f_hist: Matrix3<f64>,
    set_point: Option<SetPoint>,
    dead_load_stretch: Option<f64>,
}

fn fiber() -> Vector3<f64> {
    Vector3::x()
}

#[allow(non_snake_case)]
impl SphericalChamber {
    pub fn new(cavity_volume: f64, wall_volume: f64, material: HolzapfelOgdenParameters<f64>) -> eyre::Result<Self> {
        if !(cavity_volume > 0.0 && wall_volume > 0.0) {
            bail!(
                "cavity and wall volume must be positive, got {} and {}",
                cavity_volume,
                wall_volume
            );
        }
        let material = HolzapfelOgdenParameters {
            fiber: fiber(),
            sheet: Vector3::z(),
            ..material
        };
        Ok(Self {
            cavity_volume,
            wall_volume,
            material,
            active: None,
            activation_curve: 2,
            viscosity: None,
            growth: None,
            theta: 1.0,
            theta_old: 1.0,
            threshold: None,
            prestress: MulfPrestress::new(),
            stretch: 1.0,
            dt: None,
            load: PressureLoad::Follower,
            set_point: None,
        })
    }

    /// Active tension driven by `activation_curve`, integrated with the one-step-theta parameter `theta`.
    pub fn with_active_stress(mut self, parameters: ActiveStressParameters<f64>, activation_curve: usize, theta: f64) -> Self {
        self.active = Some(ActiveStress::new(parameters, theta));
        self.activation_curve = activation_curve;
        self
    }

    pub fn with_viscosity(mut self, viscosity: StrainRateViscosity<f64>) -> Self {
        self.viscosity = Some(viscosity);
        self
    }

    pub fn with_growth(
        mut self,
        direction: GrowthDirection,
        trigger: GrowthTrigger<f64>,
        parameters: GrowthParameters<f64>,
    ) -> eyre::Result<Self> {
        let law = GrowthLaw::new(parameters)?;
        self.growth = Some(SphereGrowth { direction, trigger, law });
        Ok(self)
    }

    pub fn from_params(params: &StructureParams, theta_ost: f64) -> eyre::Result<Self> {
        let mut chamber = Self::new(params.cavity_volume, params.wall_volume, params.material)?;
        if let Some(active) = &params.active_stress {
            chamber = chamber.with_active_stress(active.parameters, active.activation_curve, theta_ost);
        }
        if let Some(viscosity) = params.viscosity {
            chamber = chamber.with_viscosity(viscosity);
        }
        if let Some(growth) = &params.growth {
            chamber = chamber
                .with_growth(growth.direction, growth.trigger, growth.parameters)
                .wrap_err("invalid growth parameters")?;
        }
        Ok(chamber)
    }

    /// A copy for quasi-static growth computations: no viscosity, pressure as dead load on the
    /// current configuration.
    pub fn quasi_static(&self) -> Self {
        Self {
            viscosity: None,
            dt: None,
            load: PressureLoad::Dead {
                reference_stretch: self.stretch,
            },
            ..self.clone()
        }
    }

    pub fn stretch(&self) -> f64 {
        self.stretch
    }

    pub fn set_stretch(&mut self, stretch: f64) {
        self.stretch = stretch;
    }

    pub fn growth_stretch(&self) -> f64 {
        self.theta
    }

    pub fn set_growth_stretch(&mut self, theta: f64) {
        self.theta = theta;
        self.theta_old = theta;
    }

    pub fn growth_threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn set_point(&self) -> Option<SetPoint> {
        self.set_point
    }

    pub fn active_tension(&self) -> f64 {
        self.active
            .as_ref()
            .map(|active| active.tension())
            .unwrap_or(0.0)
    }

    pub fn prestress_history(&self) -> &Matrix3<f64> {
        self.prestress.history()
    }

    pub fn load(&self) -> PressureLoad {
        self.load
    }

    pub fn cavity_volume(&self, stretch: f64) -> f64 {
        self.cavity_volume * stretch.powi(3)
    }

    /// Tissue volume of the wall, $V_w \det \vec F_u$.
    pub fn tissue_volume(&self) -> f64 {
        self.wall_volume * self.kinematics(self.stretch, self.theta).F_u.determinant()
    }

    fn growth_tensor(&self, theta: f64) -> Matrix3<f64> {
        self.growth
            .as_ref()
            .map(|growth| growth.direction.growth_tensor(theta, &fiber()))
            .unwrap_or_else(Matrix3::identity)
    }

    fn kinematics(&self, stretch: f64, theta: f64) -> Kinematics {
        let F_g = self.growth_tensor(theta);
        // All growth tensors are diagonal in the local frame
        let F_g_inv = Matrix3::from_diagonal(&F_g.diagonal().map(|g| 1.0 / g));
        let J_g = F_g.determinant();
        let F_hist = self.prestress.history();
        let rho = J_g / (stretch * stretch * F_hist.determinant());

        let F_u = Matrix3::from_diagonal(&Vector3::new(stretch, stretch, rho));
        let dF_u = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -2.0 * rho / stretch));
        let ddF_u = Matrix3::from_diagonal(&Vector3::new(0.0, 0.0, 6.0 * rho / (stretch * stretch)));
        let M = F_hist * F_g_inv;

        Kinematics {
            F: F_u * F_hist,
            F_e: F_u * M,
            G: dF_u * M,
            H: ddF_u * M,
            F_u,
            J_g,
        }
    }

    fn viscous_step(&self) -> Option<(&StrainRateViscosity<f64>, f64)> {
        match (&self.viscosity, self.dt) {
            (Some(viscosity), Some(dt)) => Some((viscosity, dt)),
            _ => None,
        }
    }

    fn total_stress(&self, F_e: &Matrix3<f64>, F_e_old: &Matrix3<f64>) -> Matrix3<f64> {
        let mut P = HolzapfelOgdenMaterial.compute_stress_tensor(F_e, &self.material);
        if let Some(active) = &self.active {
            P += active.first_piola_kirchhoff(F_e, &fiber());
        }
        if let Some((viscosity, dt)) = self.viscous_step() {
            P += viscosity.first_piola_kirchhoff(F_e, F_e_old, dt);
        }
        P
    }

    /// Cavity volume derivatives $(\mathrm{d}V/\mathrm{d}\lambda, \mathrm{d}^2V/\mathrm{d}\lambda^2)$
    /// of the configuration the pressure acts on.
    fn load_derivatives(&self, stretch: f64) -> (f64, f64) {
        match self.load {
            PressureLoad::Follower => (
                3.0 * self.cavity_volume * stretch * stretch,
                6.0 * self.cavity_volume * stretch,
            ),
            PressureLoad::Dead { reference_stretch } => {
                (3.0 * self.cavity_volume * reference_stretch * reference_stretch, 0.0)
            }
        }
    }

    /// Virtual work residual at the given stretch, growth stretch and pressure.
    pub fn equilibrium_residual(&self, stretch: f64, theta: f64, pressure: f64) -> f64 {
        let kin = self.kinematics(stretch, theta);
        let F_e_old = self.kinematics(self.stretch, theta).F_e;
        let P = self.total_stress(&kin.F_e, &F_e_old);
        let (dV, _) = self.load_derivatives(stretch);
        self.wall_volume * kin.J_g * P.dot(&kin.G) - pressure * dV
    }

    /// Derivative of [`Self::equilibrium_residual`] with respect to the stretch.
    pub fn equilibrium_tangent(&self, stretch: f64, theta: f64, pressure: f64) -> f64 {
        let kin = self.kinematics(stretch, theta);
        let F_e_old = self.kinematics(self.stretch, theta).F_e;
        let F_e = kin.F_e;
        let f = fiber();
        let P = self.total_stress(&F_e, &F_e_old);
        let second_variation = contract_second_variation(
            |a, b| {
                let mut C = HolzapfelOgdenMaterial.compute_stress_contraction(&F_e, a, b, &self.material);
                if let Some(active) = &self.active {
                    C += active.stress_contraction(a, b, &f);
                }
                if let Some((viscosity, dt)) = self.viscous_step() {
                    C += viscosity.stress_contraction(&F_e, &F_e_old, dt, a, b);
                }
                C
            },
            &kin.G,
        );
        let (_, ddV) = self.load_derivatives(stretch);
        self.wall_volume * kin.J_g * (second_variation + P.dot(&kin.H)) - pressure * ddV
    }

    fn growth_trigger(&self, growth: &SphereGrowth, stretch: f64, theta: f64) -> (f64, f64) {
        let F = self.kinematics(stretch, theta).F;
        growth
            .trigger
            .evaluate(growth.direction, &F, &fiber(), theta)
    }

    /// Integrates the growth law over `dt` at a fixed stretch, starting from the accepted growth stretch.
    pub fn integrate_growth(&self, stretch: f64, dt: f64) -> Result<f64, GrowthError> {
        match (&self.growth, self.threshold) {
            (Some(growth), Some(threshold)) => growth
                .law
                .integrate(self.theta_old, dt, threshold, |theta| self.growth_trigger(growth, stretch, theta)),
            _ => Ok(self.theta_old),
        }
    }

    /// Quasi-static growth under constant loads, until the growth rate falls below `tol_rate`
    /// or `numstep` pseudo-time steps of size `dt` have been taken.
    pub fn solve_growth(
        &mut self,
        pressure: f64,
        numstep: usize,
        dt: f64,
        tol_rate: f64,
        solver: &SolverParams,
    ) -> eyre::Result<GrowthSummary> {
        if self.growth.is_none() {
            bail!("chamber has no growth law");
        }
        if self.threshold.is_none() {
            bail!("growth threshold has not been set");
        }

        let mut summary = GrowthSummary {
            steps: 0,
            stretch: self.stretch,
            theta: self.theta,
            rate: 0.0,
        };
        for step in 1..=numstep {
            let mut x = DVector::from_element(1, self.stretch);
            let mut equilibrium = GrowthEquilibrium {
                chamber: &*self,
                pressure,
                dt,
                growth_error: None,
            };
            let result = solve_nonlinear(&mut equilibrium, &mut x, solver);
            if let Some(err) = equilibrium.growth_error.take() {
                return Err(err).wrap_err_with(|| format!("growth integration failed in step {}", step));
            }
            let statistics = result.wrap_err_with(|| format!("large scale solve failed in step {}", step))?;

            let theta = self.integrate_growth(x[0], dt)?;
            let rate = (theta - self.theta_old).abs() / dt;
            self.stretch = x[0];
            self.set_growth_stretch(theta);

            info!(
                "Growth step {} / {}: lambda = {:.6}, theta = {:.6}, |dtheta/dt| = {:.4e}, {} Newton iter",
                step, numstep, self.stretch, theta, rate, statistics.iterations
            );
            summary = GrowthSummary {
                steps: step,
                stretch: self.stretch,
                theta,
                rate,
            };
            if rate <= tol_rate {
                break;
            }
        }
        Ok(summary)
    }

    /// Takes over the set-point state of the dynamic chamber `small` as the initial state and
    /// loading of a quasi-static growth computation.
    pub fn adopt_set_point(&mut self, small: &SphericalChamber, copy_prestress: bool) -> eyre::Result<SetPoint> {
        let set_point = small
            .set_point
            .ok_or_else(|| eyre!("no set point has been captured on the small scale"))?;
        if copy_prestress {
            self.prestress = small.prestress;
        }
        self.stretch = set_point.stretch;
        self.load = PressureLoad::Dead {
            reference_stretch: set_point.stretch,
        };
        if let Some(active) = self.active.as_mut() {
            active.set_tension(set_point.tension);
        }
        self.threshold = small.threshold;
        self.set_point = Some(set_point);
        Ok(set_point)
    }
}

/// Outcome of a quasi-static growth computation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GrowthSummary {
    pub steps: usize,
    pub stretch: f64,
    pub theta: f64,
    /// Growth rate of the last step.
    pub rate: f64,
}

/// Equilibrium with the growth stretch condensed out by the local growth integration.
struct GrowthEquilibrium<'a> {
    chamber: &'a SphericalChamber,
    pressure: f64,
    dt: f64,
    growth_error: Option<GrowthError>,
}

impl<'a> VectorFunction<f64> for GrowthEquilibrium<'a> {
    fn dimension(&self) -> usize {
        1
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) {
        let stretch = x[0];
        match self.chamber.integrate_growth(stretch, self.dt) {
            Ok(theta) => f[0] = self.chamber.equilibrium_residual(stretch, theta, self.pressure),
            Err(err) => {
                debug!("Growth integration failed at stretch {}: {}", stretch, err);
                self.growth_error = Some(err);
                f[0] = f64::NAN;
            }
        }
    }
}

impl<'a> DifferentiableVectorFunction<f64> for GrowthEquilibrium<'a> {
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
        let x = x.clone_owned();
        let h = 1e-7 * x[0].abs().max(1.0);
        let jacobian = approximate_jacobian(&mut *self, &x, &h);
        solve_dense_shifted(&jacobian, shift, sol, rhs)
    }
}

#[allow(non_snake_case)]
impl ChamberStructure for SphericalChamber {
    fn num_dof(&self) -> usize {
        1
    }

    fn num_chambers(&self) -> usize {
        1
    }

    fn state(&self) -> DVector<f64> {
        DVector::from_element(1, self.stretch)
    }

    fn prepare_step(&mut self, t: f64, dt: f64, curves: &TimeCurves) -> eyre::Result<()> {
        self.dt = Some(dt);
        if let Some(active) = self.active.as_mut() {
            let curve = curves
                .get(self.activation_curve)
                .wrap_err("active stress refers to a missing activation curve")?;
            active.update(dt, curve.evaluate(t), curve.evaluate(t - dt));
        }
        Ok(())
    }

    fn residual(&self, u: &DVector<f64>, pressures: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, self.equilibrium_residual(u[0], self.theta, pressures[0]))
    }

    fn stiffness(&self, u: &DVector<f64>, pressures: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let k_uu = self.equilibrium_tangent(u[0], self.theta, pressures[0]);
        let (dV, _) = self.load_derivatives(u[0]);
        (DMatrix::from_element(1, 1, k_uu), DMatrix::from_element(1, 1, -dV))
    }

    fn chamber_volumes(&self, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, self.cavity_volume(u[0]))
    }

    fn volume_derivative(&self, u: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, 3.0 * self.cavity_volume * u[0] * u[0])
    }

    fn update(&mut self, u: &DVector<f64>) {
        self.stretch = u[0];
        if let Some(active) = self.active.as_mut() {
            active.commit();
        }
    }

    fn prestress_update(&mut self, u: &DVector<f64>) -> DVector<f64> {
        let F_u = self.kinematics(u[0], self.theta).F_u;
        self.prestress.update(&F_u);
        self.stretch = 1.0;
        DVector::from_element(1, 1.0)
    }

    fn capture_set_point(&mut self, u: &DVector<f64>, pressures: &DVector<f64>) {
        let set_point = SetPoint {
            stretch: u[0],
            pressure: pressures[0],
            tension: self.active_tension(),
        };
        if self.threshold.is_none() {
            if let Some(growth) = &self.growth {
                let (threshold, _) = self.growth_trigger(growth, u[0], self.theta);
                info!("Growth threshold set to {:.6}", threshold);
                self.threshold = Some(threshold);
            }
        }
        debug!("Captured set point {:?}", set_point);
        self.set_point = Some(set_point);
    }

    fn output_values(&self, u: &DVector<f64>) -> Vec<(String, f64)> {
        vec![
            ("lambda".to_string(), u[0]),
            ("tau_a".to_string(), self.active_tension()),
            ("theta".to_string(), self.theta),
        ]
    }

    fn write_checkpoint(&self, path: &Path) -> eyre::Result<()> {
        let checkpoint = SphereCheckpoint {
            stretch: self.stretch,
            theta: self.theta,
            threshold: self.threshold,
            tension: self.active_tension(),
            f_hist: *self.prestress.history(),
            set_point: self.set_point,
            dead_load_stretch: match self.load {
                PressureLoad::Follower => None,
                PressureLoad::Dead { reference_stretch } => Some(reference_stretch),
            },
        };
        let json = serde_json::to_string_pretty(&checkpoint)?;
        std::fs::write(path, json).wrap_err_with(|| format!("failed to write {}", path.display()))
    }

    fn read_checkpoint(&mut self, path: &Path) -> eyre::Result<()> {
        let json = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let checkpoint: SphereCheckpoint =
            serde_json::from_str(&json).wrap_err_with(|| format!("invalid chamber checkpoint {}", path.display()))?;
        self.stretch = checkpoint.stretch;
        self.set_growth_stretch(checkpoint.theta);
        self.threshold = checkpoint.threshold;
        if let Some(active) = self.active.as_mut() {
            active.set_tension(checkpoint.tension);
        }
        self.prestress = MulfPrestress::from_history(checkpoint.f_hist);
        self.set_point = checkpoint.set_point;
        self.load = match checkpoint.dead_load_stretch {
            None => PressureLoad::Follower,
            Some(reference_stretch) => PressureLoad::Dead { reference_stretch },
        };
        Ok(())
    }
}
