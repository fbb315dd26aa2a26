use ambit_traits::Real;
use nalgebra::Matrix3;

/// State of the Modified Updated Lagrangian Formulation (MULF) of prestressing.
///
/// The total deformation gradient is $\vec F = \vec F_u \vec F_{hist}$, where
/// $\vec F_u = \vec I + \nabla \vec u$ is computed from the current displacement. After each
/// prestress load step the history is updated, $\vec F_{hist} \leftarrow \vec F_u \vec F_{hist}$,
/// and the displacement is reset to zero. The stresses from the imaged load are thereby stored
/// in $\vec F_{hist}$ while the reference geometry stays unchanged.
#[allow(non_snake_case)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MulfPrestress<T: Real> {
    F_hist: Matrix3<T>,
}

impl<T: Real> Default for MulfPrestress<T> {
    fn default() -> Self {
        Self {
            F_hist: Matrix3::identity(),
        }
    }
}

#[allow(non_snake_case)]
impl<T: Real> MulfPrestress<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(F_hist: Matrix3<T>) -> Self {
        Self { F_hist }
    }

    pub fn history(&self) -> &Matrix3<T> {
        &self.F_hist
    }

    pub fn deformation_gradient(&self, F_u: &Matrix3<T>) -> Matrix3<T> {
        F_u * self.F_hist
    }

    /// Absorbs the displacement part into the history. The caller resets the displacement.
    pub fn update(&mut self, F_u: &Matrix3<T>) {
        self.F_hist = F_u * self.F_hist;
    }
}

/// Load factor of prestress step `step` (1-based) out of `numstep` linearly ramped steps.
pub fn prestress_load_factor<T: Real>(step: usize, numstep: usize) -> T {
    assert!(numstep > 0, "Prestressing requires at least one load step");
    let step = T::from_usize(step.min(numstep)).unwrap_or_else(T::one);
    let numstep = T::from_usize(numstep).unwrap_or_else(T::one);
    step / numstep
}
