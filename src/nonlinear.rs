//! Dispatch of nonlinear solves according to the solver parameters.
use crate::config::{DivergenceContinuation, SolverParams};
use ambit_optimize::calculus::DifferentiableVectorFunction;
use ambit_optimize::newton::{newton, newton_with_divergence_continuation, NewtonError, NewtonStatistics};
use nalgebra::DVector;

/// Solves `function(x) = 0` in place, starting from the current `x`.
pub fn solve_nonlinear<F>(function: F, x: &mut DVector<f64>, params: &SolverParams) -> Result<NewtonStatistics<f64>, NewtonError>
where
    F: DifferentiableVectorFunction<f64>,
{
    let n = x.len();
    let mut f = DVector::zeros(n);
    let mut dx = DVector::zeros(n);
    let settings = params.newton_settings();
    match params.divergence_continue {
        Some(DivergenceContinuation::Ptc) => {
            newton_with_divergence_continuation(function, x, &mut f, &mut dx, settings, params.ptc_restart_settings())
        }
        None => newton(function, x, &mut f, &mut dx, settings),
    }
}
