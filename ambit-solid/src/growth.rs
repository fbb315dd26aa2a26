//! Volumetric growth kinematics and the stretch-driven growth law.
use ambit_traits::{outer, Real};
use log::debug;
use nalgebra::{Matrix3, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Direction in which the tissue grows, determining the growth tensor $\vec F_g(\vartheta)$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthDirection {
    /// $\vec F_g = \vartheta \vec I$.
    Isotropic,
    /// $\vec F_g = \vec I + (\vartheta - 1) \vec f_0 \otimes \vec f_0$.
    Fiber,
    /// $\vec F_g = \vartheta \vec I + (1 - \vartheta) \vec f_0 \otimes \vec f_0$.
    CrossFiber,
}

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl GrowthDirection {
    pub fn growth_tensor<T: Real>(&self, theta: T, fiber: &Vector3<T>) -> Matrix3<T> {
        let I = Matrix3::identity();
        let ff = outer(fiber, fiber);
        match self {
            Self::Isotropic => I * theta,
            Self::Fiber => I + ff * (theta - 1.0),
            Self::CrossFiber => I * theta + ff * (1.0 - theta),
        }
    }

    /// The derivative $\mathrm{d} \vec F_g / \mathrm{d} \vartheta$.
    pub fn growth_tensor_derivative<T: Real>(&self, fiber: &Vector3<T>) -> Matrix3<T> {
        let I = Matrix3::identity();
        let ff = outer(fiber, fiber);
        match self {
            Self::Isotropic => I,
            Self::Fiber => ff,
            Self::CrossFiber => I - ff,
        }
    }

    /// Fiber stretch of the elastic part $\vec F_e = \vec F \vec F_g^{-1}$ and its derivative with
    /// respect to $\vartheta$.
    ///
    /// For all growth directions $\vec F_g^{-1} \vec f_0$ is parallel to $\vec f_0$, so the
    /// stretch is $\lambda_e = |\vec F \vec f_0| / \vartheta_f$, with $\vartheta_f = \vartheta$
    /// except for cross-fiber growth where the fibers do not grow.
    #[allow(non_snake_case)]
    pub fn elastic_fiber_stretch<T: Real>(&self, F: &Matrix3<T>, fiber: &Vector3<T>, theta: T) -> (T, T) {
        let total_stretch = (F * fiber).norm();
        match self {
            Self::Isotropic | Self::Fiber => {
                let stretch = total_stretch / theta;
                (stretch, -stretch / theta)
            }
            Self::CrossFiber => (total_stretch, 0.0),
        }
    }
}

/// Quantity driving the growth law.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthTrigger<T> {
    /// Elastic fiber stretch $\sqrt{\vec f_0 \cdot \vec C_e \vec f_0}$.
    FiberStretch,
    /// A fixed trigger value, independent of the deformation.
    Prescribed(T),
}

impl<T: Real> GrowthTrigger<T> {
    /// Evaluates the trigger and its derivative with respect to the growth stretch.
    #[allow(non_snake_case)]
    pub fn evaluate(&self, direction: GrowthDirection, F: &Matrix3<T>, fiber: &Vector3<T>, theta: T) -> (T, T) {
        match self {
            Self::FiberStretch => direction.elastic_fiber_stretch(F, fiber, theta),
            Self::Prescribed(value) => (*value, T::zero()),
        }
    }
}

/// Parameters of the growth law.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrowthParameters<T> {
    pub tau_gr: T,
    pub tau_gr_rev: T,
    pub gamma_gr: T,
    pub gamma_gr_rev: T,
    pub thetamax: T,
    pub thetamin: T,
    /// Half-width of the band around the threshold in which no growth occurs.
    pub thres_tol: T,
    /// Residual tolerance of the local Newton iteration.
    pub tol_res_local: T,
    /// Increment tolerance of the local Newton iteration.
    pub tol_inc_local: T,
}

#[derive(Debug)]
pub enum GrowthError {
    /// The local Newton iteration for the growth stretch did not converge.
    LocalNewtonFailed { iterations: usize, residual: f64 },
    /// The parameters do not satisfy `thetamin < 1 < thetamax` or have non-positive time constants.
    InvalidParameters(String),
}

impl Display for GrowthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            GrowthError::LocalNewtonFailed { iterations, residual } => write!(
                f,
                "Local growth Newton iteration failed to converge within {} iterations (residual {:e}).",
                iterations, residual
            ),
            GrowthError::InvalidParameters(msg) => write!(f, "Invalid growth parameters: {}", msg),
        }
    }
}

impl Error for GrowthError {}

const LOCAL_MAX_ITERATIONS: usize = 20;

/// The stretch-driven growth law
/// $$
/// \dot \vartheta = k(\vartheta) \\, (\varphi - \varphi_{crit}),
/// $$
/// with the growth branch ($\varphi > \varphi_{crit}$)
/// $$
/// k(\vartheta) = \frac{1}{\tau_{gr}} \left( \frac{\vartheta_{max} - \vartheta}{\vartheta_{max} - 1} \right)^{\gamma_{gr}}
/// $$
/// and the reverse branch ($\varphi < \varphi_{crit}$)
/// $$
/// k(\vartheta) = \frac{1}{\tau_{gr,rev}} \left( \frac{\vartheta - \vartheta_{min}}{1 - \vartheta_{min}} \right)^{\gamma_{gr,rev}}.
/// $$
/// Inside the band $|\varphi - \varphi_{crit}| \leq$ `thres_tol` the tissue does not grow.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GrowthLaw<T> {
    parameters: GrowthParameters<T>,
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> GrowthLaw<T> {
    pub fn new(parameters: GrowthParameters<T>) -> Result<Self, GrowthError> {
        let p = &parameters;
        if !(p.thetamin < 1.0 && p.thetamax > 1.0) {
            return Err(GrowthError::InvalidParameters(format!(
                "expected thetamin < 1 < thetamax, got thetamin = {}, thetamax = {}",
                p.thetamin, p.thetamax
            )));
        }
        if !(p.tau_gr > 0.0 && p.tau_gr_rev > 0.0) {
            return Err(GrowthError::InvalidParameters(format!(
                "time constants must be positive, got tau_gr = {}, tau_gr_rev = {}",
                p.tau_gr, p.tau_gr_rev
            )));
        }
        Ok(Self { parameters })
    }

    pub fn parameters(&self) -> &GrowthParameters<T> {
        &self.parameters
    }

    /// Returns $k(\vartheta)$ and $k'(\vartheta)$ for the branch selected by the trigger excess
    /// $\varphi - \varphi_{crit}$, or zeros inside the threshold band.
    pub fn rate_coefficient(&self, theta: T, excess: T) -> (T, T) {
        let p = &self.parameters;
        if excess > p.thres_tol {
            let width = p.thetamax - 1.0;
            let base = ((p.thetamax - theta) / width).max(0.0);
            let k = base.powf(p.gamma_gr) / p.tau_gr;
            let dk = if base > 0.0 {
                -p.gamma_gr / (p.tau_gr * width) * base.powf(p.gamma_gr - 1.0)
            } else {
                0.0
            };
            (k, dk)
        } else if excess < -p.thres_tol {
            let width = 1.0 - p.thetamin;
            let base = ((theta - p.thetamin) / width).max(0.0);
            let k = base.powf(p.gamma_gr_rev) / p.tau_gr_rev;
            let dk = if base > 0.0 {
                p.gamma_gr_rev / (p.tau_gr_rev * width) * base.powf(p.gamma_gr_rev - 1.0)
            } else {
                0.0
            };
            (k, dk)
        } else {
            (0.0, 0.0)
        }
    }

    /// The growth rate $\dot \vartheta$ for a given trigger value.
    pub fn growth_rate(&self, theta: T, trigger: T, threshold: T) -> T {
        let excess = trigger - threshold;
        let (k, _) = self.rate_coefficient(theta, excess);
        k * excess
    }

    /// Integrates the growth law over a step `dt` with backward Euler.
    ///
    /// `trigger` returns the trigger value $\varphi$ and its derivative with respect to $\vartheta$,
    /// since the elastic stretch generally depends on the growth itself. The scalar residual
    /// $$
    /// R(\vartheta) = \vartheta - \vartheta_{old} - \Delta t \\, k(\vartheta) (\varphi(\vartheta) - \varphi_{crit})
    /// $$
    /// is solved with a local Newton iteration, and the result is clamped to
    /// $[\vartheta_{min}, \vartheta_{max}]$.
    pub fn integrate(
        &self,
        theta_old: T,
        dt: T,
        threshold: T,
        mut trigger: impl FnMut(T) -> (T, T),
    ) -> Result<T, GrowthError> {
        let p = &self.parameters;
        let clamp = |theta: T| theta.max(p.thetamin).min(p.thetamax);

        let mut theta = clamp(theta_old);
        for iteration in 0..LOCAL_MAX_ITERATIONS {
            let (phi, dphi) = trigger(theta);
            let excess = phi - threshold;
            let (k, dk) = self.rate_coefficient(theta, excess);
            let residual = theta - theta_old - dt * k * excess;
            let tangent = 1.0 - dt * (dk * excess + k * dphi);
            let increment = -residual / tangent;
            theta = clamp(theta + increment);

            debug!(
                "Local growth iter {}: |r| = {}, |dtheta| = {}",
                iteration,
                residual.abs(),
                increment.abs()
            );
            if residual.abs() <= p.tol_res_local && increment.abs() <= p.tol_inc_local {
                return Ok(theta);
            }
        }

        let (phi, _) = trigger(theta);
        let excess = phi - threshold;
        let (k, _) = self.rate_coefficient(theta, excess);
        let residual = (theta - theta_old - dt * k * excess).abs();
        // A clamped solution leaves a residual that no further iteration can reduce
        if theta == p.thetamax || theta == p.thetamin {
            return Ok(theta);
        }
        Err(GrowthError::LocalNewtonFailed {
            iterations: LOCAL_MAX_ITERATIONS,
            residual: residual.to_subset().unwrap_or(f64::NAN),
        })
    }
}
