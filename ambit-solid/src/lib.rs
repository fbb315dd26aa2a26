//! Constitutive laws for cardiac tissue, evaluated at a single material point.
//!
//! All laws are formulated in terms of the deformation gradient $\vec F$ and return
//! first Piola-Kirchhoff stresses together with the associated stress contraction operators,
//! which is what the structural residual and its consistent linearization need.
use ambit_traits::Real;
use nalgebra::{Matrix3, Vector3};

pub mod active;
pub mod growth;
pub mod materials;
pub mod prestress;
pub mod viscous;

pub trait HyperelasticMaterial<T>
where
    T: Real,
{
    type Parameters: Clone + 'static;

    /// Compute the energy density $\psi = \psi(\vec F)$ associated with the material.
    fn compute_energy_density(&self, deformation_gradient: &Matrix3<T>, parameters: &Self::Parameters) -> T;

    /// Compute the First Piola-Kirchhoff stress tensor $\vec P = \vec P(\vec F)$.
    fn compute_stress_tensor(&self, deformation_gradient: &Matrix3<T>, parameters: &Self::Parameters) -> Matrix3<T>;

    /// Compute the stress contraction operator $\\mathcal{C}\_{\vec P}(\vec F, \vec a, \vec b)$ with the given
    /// material parameters.
    ///
    /// The contraction operator is defined by
    /// $$
    /// \\mathcal{C}\_{\vec P} (\vec F, \vec a, \vec b)
    ///     := a_k \pd{P_{ik}}{F_{jm}} (\vec F) \\, b_m \enspace \vec e_i \otimes \vec e_j.
    /// $$
    fn compute_stress_contraction(
        &self,
        deformation_gradient: &Matrix3<T>,
        a: &Vector3<T>,
        b: &Vector3<T>,
        parameters: &Self::Parameters,
    ) -> Matrix3<T>;
}

/// Computes the second variation $\vec G : (\pd{\vec P}{\vec F} : \vec G)$ from a stress contraction.
///
/// With $\vec a = \vec e_k$ and $\vec b = \vec e_m$ the contraction operator holds the entries
/// $\pd{P_{ik}}{F_{jm}}$, so the quadratic form can be accumulated from nine contractions.
/// This is the building block for tangents of kinematically constrained structures where
/// $\vec F$ depends on a few scalar degrees of freedom.
#[allow(non_snake_case)]
pub fn contract_second_variation<T, C>(mut contraction: C, G: &Matrix3<T>) -> T
where
    T: Real,
    C: FnMut(&Vector3<T>, &Vector3<T>) -> Matrix3<T>,
{
    let mut result = T::zero();
    for k in 0..3 {
        let e_k = Vector3::ith(k, T::one());
        for m in 0..3 {
            let e_m = Vector3::ith(m, T::one());
            let C_km = contraction(&e_k, &e_m);
            let G_k = G.column(k);
            let G_m = G.column(m);
            result += G_k.dot(&(C_km * G_m));
        }
    }
    result
}
