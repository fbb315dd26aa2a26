use nalgebra::{Matrix3, RealField, Vector3};
use numeric_literals::replace_float_literals;

pub use nalgebra;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Converts an `f64` constant into `T`.
///
/// # Panics
///
/// Panics if the value cannot be represented by `T`.
pub fn cast<T: Real>(value: f64) -> T {
    T::from_f64(value).expect("constant must fit in T")
}

/// The dyadic product $\vec a \otimes \vec b = \vec a \vec b^T$.
pub fn outer<T: Real>(a: &Vector3<T>, b: &Vector3<T>) -> Matrix3<T> {
    a * b.transpose()
}

/// The symmetric dyadic product $\vec a \otimes \vec b + \vec b \otimes \vec a$.
pub fn outer_sym<T: Real>(a: &Vector3<T>, b: &Vector3<T>) -> Matrix3<T> {
    a * b.transpose() + b * a.transpose()
}

/// The Green-Lagrange strain $\vec E = \frac{1}{2}(\vec F^T \vec F - \vec I)$.
#[allow(non_snake_case)]
#[replace_float_literals(cast::<T>(literal))]
pub fn green_strain<T: Real>(F: &Matrix3<T>) -> Matrix3<T> {
    (F.transpose() * F - Matrix3::identity()) * 0.5
}

/// Returns $\vec F^{-T}$, or `None` if $\vec F$ is singular.
#[allow(non_snake_case)]
pub fn inverse_transpose<T: Real>(F: &Matrix3<T>) -> Option<Matrix3<T>> {
    F.try_inverse().map(|F_inv| F_inv.transpose())
}
