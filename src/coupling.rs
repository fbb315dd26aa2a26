//! Monolithic coupling of chamber structures to 0D circulation models.
//!
//! The chamber pressures act as Lagrange multipliers $\vec \Lambda$ enforcing equal chamber
//! volumes in the structure and in the 0D model. The monolithic residual is
//! $$
//! \begin{pmatrix} \vec r_u(\vec u, \vec \Lambda) \\\\ \vec V(\vec u) - \vec V^{0D}(\vec \Lambda) \end{pmatrix} = \vec 0,
//! $$
//! where $\vec V^{0D}(\vec \Lambda)$ is obtained by solving the 0D time step with the
//! interface pressures imposed.
use crate::time_curves::TimeCurves;
use nalgebra::{DMatrix, DVector};
use std::path::Path;

mod problem;
mod sphere;

pub use problem::*;
pub use sphere::*;

/// A structure enclosing one or more chambers loaded by their cavity pressures.
pub trait ChamberStructure {
    fn num_dof(&self) -> usize;

    fn num_chambers(&self) -> usize;

    /// The last accepted state.
    fn state(&self) -> DVector<f64>;

    /// Evaluates time-dependent contributions (e.g. active stress) for the step ending at `t`.
    fn prepare_step(&mut self, t: f64, dt: f64, curves: &TimeCurves) -> eyre::Result<()>;

    /// Structural residual at state `u` under the chamber pressures.
    fn residual(&self, u: &DVector<f64>, pressures: &DVector<f64>) -> DVector<f64>;

    /// Returns $\pd{\vec r_u}{\vec u}$ and $\pd{\vec r_u}{\vec \Lambda}$.
    fn stiffness(&self, u: &DVector<f64>, pressures: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>);

    fn chamber_volumes(&self, u: &DVector<f64>) -> DVector<f64>;

    /// $\pd{\vec V}{\vec u}$, one row per chamber.
    fn volume_derivative(&self, u: &DVector<f64>) -> DMatrix<f64>;

    /// Accepts `u` as the converged state of the current step.
    fn update(&mut self, u: &DVector<f64>);

    /// Imprints the state `u` into the prestress history and returns the reset state.
    fn prestress_update(&mut self, u: &DVector<f64>) -> DVector<f64>;

    /// Stores the state and loads at the growth and remodeling set point.
    fn capture_set_point(&mut self, u: &DVector<f64>, pressures: &DVector<f64>);

    /// Named scalar quantities written alongside the 0D results.
    fn output_values(&self, u: &DVector<f64>) -> Vec<(String, f64)>;

    fn write_checkpoint(&self, path: &Path) -> eyre::Result<()>;

    fn read_checkpoint(&mut self, path: &Path) -> eyre::Result<()>;
}
