//! One-step-theta time integration of 0D models.
use crate::flow0d::{Cardiovascular0D, Evaluation};
use crate::time_curves::TimeCurves;
use ambit_optimize::calculus::{solve_dense_shifted, DifferentiableVectorFunction, VectorFunction};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::error::Error;

/// The one-step-theta scheme for $\frac{\mathrm{d}}{\mathrm{d} t} \vec d(\vec s) + \vec f(\vec s) = \vec 0$,
/// $$
/// \vec r(\vec s) = \frac{\vec d(\vec s) - \vec d_{old}}{\Delta t} + \theta \vec f(\vec s) + (1 - \theta) \vec f_{old}.
/// $$
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OneStepTheta {
    pub theta: f64,
    /// Use $\theta = 1$ in the first step of a (non-restarted) run.
    pub initial_backward_euler: bool,
}

impl OneStepTheta {
    pub fn new(theta: f64, initial_backward_euler: bool) -> Self {
        Self {
            theta,
            initial_backward_euler,
        }
    }

    /// The $\theta$ used in the given (1-based) step.
    pub fn theta_for_step(&self, step: usize) -> f64 {
        if step == 1 && self.initial_backward_euler {
            1.0
        } else {
            self.theta
        }
    }
}

pub fn residual_into(r: &mut DVector<f64>, evaluation: &Evaluation, df_old: &DVector<f64>, f_old: &DVector<f64>, dt: f64, theta: f64) {
    r.copy_from(&((&evaluation.df - df_old) / dt + &evaluation.f * theta + f_old * (1.0 - theta)));
}

/// $\vec K = \frac{1}{\Delta t} \pd{\vec d}{\vec s} + \theta \pd{\vec f}{\vec s}$.
pub fn jacobian(evaluation: &Evaluation, dt: f64, theta: f64) -> DMatrix<f64> {
    &evaluation.df_jacobian / dt + &evaluation.f_jacobian * theta
}

/// $\theta \vec s + (1 - \theta) \vec s_{old}$.
pub fn midpoint(s: &DVector<f64>, s_old: &DVector<f64>, theta: f64) -> DVector<f64> {
    s * theta + s_old * (1.0 - theta)
}

/// Cardiac cycle counter and the periodicity error of the last completed cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleState {
    /// The current cycle, starting at 1.
    pub cycle: usize,
    pub error: f64,
}

impl Default for CycleState {
    fn default() -> Self {
        Self { cycle: 1, error: 0.0 }
    }
}

impl CycleState {
    /// Start time $t_{off} = (N_{cycle} - 1) T$ of the current cycle.
    pub fn offset(&self, period: f64) -> f64 {
        (self.cycle - 1) as f64 * period
    }

    /// Whether the step ending at `t` completes the current cycle.
    pub fn is_cycle_end(&self, t: f64, period: f64, dt: f64) -> bool {
        period > 0.0 && (t - self.offset(period) - period).abs() <= 0.5 * dt
    }

    /// Whether `t` hits the given time within the current cycle.
    pub fn is_cycle_time(&self, t: f64, period: f64, dt: f64, t_cycle: f64) -> bool {
        period > 0.0 && (t - self.offset(period) - t_cycle).abs() <= 0.5 * dt
    }
}

/// $\sum_i |s_i - s_i^{old}| / \max(1, |s_i^{old}|)$ over the given indices.
pub fn periodicity_error(s: &DVector<f64>, s_old: &DVector<f64>, indices: &[usize]) -> f64 {
    indices
        .iter()
        .map(|&i| (s[i] - s_old[i]).abs() / s_old[i].abs().max(1.0))
        .sum()
}

/// The one-step-theta residual of a 0D model over a single step, as a function of the
/// end-of-step state.
pub struct OneStepThetaResidual<'a> {
    pub model: &'a dyn Cardiovascular0D,
    pub curves: &'a TimeCurves,
    pub df_old: &'a DVector<f64>,
    pub f_old: &'a DVector<f64>,
    pub t: f64,
    pub dt: f64,
    pub theta: f64,
    evaluation: Evaluation,
    state: DVector<f64>,
}

impl<'a> OneStepThetaResidual<'a> {
    pub fn new(
        model: &'a dyn Cardiovascular0D,
        curves: &'a TimeCurves,
        df_old: &'a DVector<f64>,
        f_old: &'a DVector<f64>,
        t: f64,
        dt: f64,
        theta: f64,
    ) -> Self {
        let n = model.num_dof();
        Self {
            model,
            curves,
            df_old,
            f_old,
            t,
            dt,
            theta,
            evaluation: Evaluation::zeros(n),
            state: DVector::zeros(n),
        }
    }

    fn evaluate_at(&mut self, x: &DVectorView<f64>) {
        self.state.copy_from(x);
        self.model
            .evaluate(&self.state, self.t, self.curves, &mut self.evaluation);
    }

    pub fn residual(&mut self, s: &DVector<f64>) -> DVector<f64> {
        self.evaluate_at(&DVectorView::from(s));
        let mut r = DVector::zeros(s.len());
        residual_into(&mut r, &self.evaluation, self.df_old, self.f_old, self.dt, self.theta);
        r
    }

    pub fn jacobian(&mut self, s: &DVector<f64>) -> DMatrix<f64> {
        self.evaluate_at(&DVectorView::from(s));
        jacobian(&self.evaluation, self.dt, self.theta)
    }
}

impl<'a> VectorFunction<f64> for OneStepThetaResidual<'a> {
    fn dimension(&self) -> usize {
        self.model.num_dof()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) {
        self.evaluate_at(x);
        let ev = &self.evaluation;
        let (dt, theta) = (self.dt, self.theta);
        for i in 0..f.len() {
            f[i] = (ev.df[i] - self.df_old[i]) / dt + theta * ev.f[i] + (1.0 - theta) * self.f_old[i];
        }
    }
}

impl<'a> DifferentiableVectorFunction<f64> for OneStepThetaResidual<'a> {
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
        self.evaluate_at(x);
        let k = jacobian(&self.evaluation, self.dt, self.theta);
        solve_dense_shifted(&k, shift, sol, rhs)
    }
}
