//! Active fiber stress driven by a prescribed activation curve.
use ambit_traits::{outer, Real};
use nalgebra::{Matrix3, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveStressParameters<T> {
    /// Contractility $\sigma_0$, the asymptotic active tension.
    pub sigma0: T,
    /// Activation rate during contraction.
    pub alpha_max: T,
    /// Activation rate during relaxation (negative).
    pub alpha_min: T,
}

/// Active tension evolving by the ODE
/// $$
/// \dot \tau = -|u(t)| \\, \tau + \sigma_0 |u(t)|_+,
/// \qquad u(t) = \alpha_{max} \\, y(t) + \alpha_{min} (1 - y(t)),
/// $$
/// with an activation curve $y(t) \in [0, 1]$ and $|u|_+ = \max(u, 0)$.
///
/// The tension acts along the reference fiber direction, i.e. the active second Piola-Kirchhoff
/// stress is $\vec S_a = \tau \\, \vec f_0 \otimes \vec f_0$ and $\vec P_a = \vec F \vec S_a$.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ActiveStress<T> {
    parameters: ActiveStressParameters<T>,
    theta: T,
    tau: T,
    tau_old: T,
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> ActiveStress<T> {
    /// Creates an unloaded active stress, integrated with the one-step-theta parameter `theta`.
    pub fn new(parameters: ActiveStressParameters<T>, theta: T) -> Self {
        Self {
            parameters,
            theta,
            tau: 0.0,
            tau_old: 0.0,
        }
    }

    pub fn parameters(&self) -> &ActiveStressParameters<T> {
        &self.parameters
    }

    pub fn activation_rate(&self, y: T) -> T {
        self.parameters.alpha_max * y + self.parameters.alpha_min * (1.0 - y)
    }

    /// Advances the tension from the last committed value over a step of length `dt`,
    /// given the activation curve values at the end (`y_new`) and start (`y_old`) of the step.
    ///
    /// The ODE is linear in $\tau$, so the one-step-theta update has a closed form.
    pub fn update(&mut self, dt: T, y_new: T, y_old: T) {
        let sigma0 = self.parameters.sigma0;
        let theta = self.theta;
        let u_new = self.activation_rate(y_new);
        let u_old = self.activation_rate(y_old);
        let source_new = sigma0 * u_new.max(0.0);
        let rate_old = -u_old.abs() * self.tau_old + sigma0 * u_old.max(0.0);

        self.tau = (self.tau_old / dt + theta * source_new + (1.0 - theta) * rate_old) / (1.0 / dt + theta * u_new.abs());
    }

    /// Accepts the current tension as the start value of the next step.
    pub fn commit(&mut self) {
        self.tau_old = self.tau;
    }

    /// Discards the current (uncommitted) update.
    pub fn reset(&mut self) {
        self.tau = self.tau_old;
    }

    pub fn tension(&self) -> T {
        self.tau
    }

    /// Overwrites both current and committed tension, e.g. when restoring a stored state.
    pub fn set_tension(&mut self, tau: T) {
        self.tau = tau;
        self.tau_old = tau;
    }

    pub fn second_piola_kirchhoff(&self, fiber: &Vector3<T>) -> Matrix3<T> {
        outer(fiber, fiber) * self.tau
    }

    #[allow(non_snake_case)]
    pub fn first_piola_kirchhoff(&self, F: &Matrix3<T>, fiber: &Vector3<T>) -> Matrix3<T> {
        F * self.second_piola_kirchhoff(fiber)
    }

    /// The stress contraction of $\vec P_a = \vec F \vec S_a$ at fixed tension,
    /// $(\vec a \cdot \vec S_a \vec b) \vec I$.
    pub fn stress_contraction(&self, a: &Vector3<T>, b: &Vector3<T>, fiber: &Vector3<T>) -> Matrix3<T> {
        Matrix3::identity() * (self.tau * a.dot(fiber) * b.dot(fiber))
    }
}
