use ambit_traits::{green_strain, outer, Real};
use nalgebra::{Matrix3, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Strain-rate viscosity acting on the Green strain rate.
///
/// With the rate approximated from the last converged state,
/// $\dot{\vec E} \approx (\vec E(\vec F) - \vec E(\vec F_{old})) / \Delta t$, the viscous stresses are
/// $$
/// \vec S_v = \frac{\eta}{2} \dot{\vec E}, \qquad \vec P_v = \vec F \vec S_v,
/// $$
/// and the contraction operator is
/// $$
/// \mathcal{C}_{\vec P_v}(\vec F, \vec a, \vec b) = (\vec a \cdot \vec S_v \vec b) \vec I
///     + \frac{\eta}{4 \Delta t} \left[ (\vec a \cdot \vec b) \vec F \vec F^T + (\vec F \vec b)(\vec F \vec a)^T \right].
/// $$
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrainRateViscosity<T> {
    pub eta: T,
}

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> StrainRateViscosity<T> {
    pub fn second_piola_kirchhoff(&self, F: &Matrix3<T>, F_old: &Matrix3<T>, dt: T) -> Matrix3<T> {
        let E_dot = (green_strain(F) - green_strain(F_old)) / dt;
        E_dot * (0.5 * self.eta)
    }

    pub fn first_piola_kirchhoff(&self, F: &Matrix3<T>, F_old: &Matrix3<T>, dt: T) -> Matrix3<T> {
        F * self.second_piola_kirchhoff(F, F_old, dt)
    }

    pub fn stress_contraction(
        &self,
        F: &Matrix3<T>,
        F_old: &Matrix3<T>,
        dt: T,
        a: &Vector3<T>,
        b: &Vector3<T>,
    ) -> Matrix3<T> {
        let S = self.second_piola_kirchhoff(F, F_old, dt);
        let ref Fa = F * a;
        let ref Fb = F * b;
        let c = 0.25 * self.eta / dt;
        Matrix3::identity() * a.dot(&(S * b)) + (F * F.transpose() * a.dot(b) + outer(Fb, Fa)) * c
    }
}
