use crate::calculus::{DifferentiableVectorFunction, VectorFunction};
use ambit_traits::{cast, Real};
use itertools::iterate;
use log::{debug, warn};
use nalgebra::{DVectorView, DVectorViewMut, Scalar};
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Summary of a converged Newton solve.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NewtonStatistics<T> {
    pub iterations: usize,
    pub residual_norm: T,
    /// Norm of the last increment, zero if no step was taken.
    pub increment_norm: T,
}

/// Settings for pseudo-transient continuation (PTC).
///
/// With PTC the Jacobian system is shifted by $k \vec I$, and $k$ is scaled by the ratio
/// $\norm{\vec F_{new}} / \norm{\vec F_{old}}$ after every step, so that the iteration recovers
/// the quadratic convergence of Newton's method close to the solution.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PtcSettings<T> {
    pub initial_shift: T,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NewtonSettings<T> {
    pub max_iterations: Option<usize>,
    /// Tolerance on the residual norm $\norm{\vec F(\vec x)}_2$.
    pub tolerance: T,
    /// Optional tolerance on the norm of the last increment. If given, at least one
    /// iteration is always performed.
    pub increment_tolerance: Option<T>,
    /// Residual norms above this value (or NaN) are treated as divergence.
    pub max_residual: Option<T>,
    pub ptc: Option<PtcSettings<T>>,
}

impl<T: Real> NewtonSettings<T> {
    /// Settings that only check the residual norm.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn with_tolerance(tolerance: T) -> Self {
        Self {
            max_iterations: Some(25),
            tolerance,
            increment_tolerance: None,
            max_residual: Some(1e16),
            ptc: None,
        }
    }
}

#[derive(Debug)]
pub enum NewtonError {
    /// The procedure failed because the maximum number of iterations was reached.
    MaximumIterationsReached(usize),
    /// The procedure failed because solving the Jacobian system failed.
    JacobianError(Box<dyn Error + Send + Sync>),
    // The line search failed to produce a valid step direction.
    LineSearchError(Box<dyn Error + Send + Sync>),
    /// The residual norm exceeded the admissible maximum or became NaN.
    Diverged { iteration: usize },
}

impl Display for NewtonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            &NewtonError::MaximumIterationsReached(maxit) => {
                write!(f, "Failed to converge within maximum number of iterations ({}).", maxit)
            }
            &NewtonError::JacobianError(ref err) => {
                write!(f, "Failed to solve Jacobian system. Error: {}", err)
            }
            &NewtonError::LineSearchError(ref err) => {
                write!(f, "Line search failed to produce valid step direction. Error: {}", err)
            }
            &NewtonError::Diverged { iteration } => {
                write!(f, "Residual diverged at iteration {}.", iteration)
            }
        }
    }
}

impl Error for NewtonError {}

/// Attempts to solve the non-linear equation F(u) = 0.
///
/// No heap allocation is performed. The solution is said to have converged if
/// ```|F(u)|_2 <= tolerance``` and, if an increment tolerance is given, the norm of the
/// last increment is below it.
#[replace_float_literals(T::from_f64(literal).unwrap())]
pub fn newton<'a, T, F>(
    function: F,
    x: impl Into<DVectorViewMut<'a, T>>,
    f: impl Into<DVectorViewMut<'a, T>>,
    dx: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
) -> Result<NewtonStatistics<T>, NewtonError>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    newton_line_search(function, x, f, dx, settings, &mut NoLineSearch {})
}

/// Same as `newton`, but allows specifying a line search.
#[replace_float_literals(T::from_f64(literal).unwrap())]
pub fn newton_line_search<'a, T, F>(
    mut function: F,
    x: impl Into<DVectorViewMut<'a, T>>,
    f: impl Into<DVectorViewMut<'a, T>>,
    dx: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
    line_search: &mut impl LineSearch<T, F>,
) -> Result<NewtonStatistics<T>, NewtonError>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    let mut x = x.into();
    let mut f = f.into();
    let mut minus_dx = dx.into();

    assert_eq!(x.nrows(), f.nrows());
    assert_eq!(minus_dx.nrows(), f.nrows());

    function.eval_into(&mut f, &DVectorView::from(&x));

    let mut iter = 0;
    let mut residual_norm = f.norm();
    let mut increment_norm = T::zero();
    let mut shift = settings.ptc.map(|ptc| ptc.initial_shift);
    debug!("Newton iter {}: |r| = {}", iter, residual_norm);

    loop {
        check_divergence(&settings, iter, residual_norm)?;

        let increment_converged = match settings.increment_tolerance {
            Some(tol) => iter > 0 && increment_norm <= tol,
            None => true,
        };
        if residual_norm <= settings.tolerance && increment_converged {
            break;
        }

        if settings
            .max_iterations
            .map(|max_iter| iter == max_iter)
            .unwrap_or(false)
        {
            return Err(NewtonError::MaximumIterationsReached(iter));
        }

        // Solve the system J dx = -f   <=>   J (-dx) = f
        let j_result = match shift {
            Some(k) => function.solve_shifted_jacobian_system(
                &mut minus_dx,
                &DVectorView::from(&x),
                &DVectorView::from(&f),
                k,
            ),
            None => function.solve_jacobian_system(&mut minus_dx, &DVectorView::from(&x), &DVectorView::from(&f)),
        };
        if let Err(err) = j_result {
            return Err(NewtonError::JacobianError(err));
        }

        // Flip sign to make it consistent with line search
        minus_dx *= -1.0;
        let dx = &minus_dx;

        let step_length = line_search
            .step(
                &mut function,
                DVectorViewMut::from(&mut f),
                DVectorViewMut::from(&mut x),
                DVectorView::from(dx),
            )
            .map_err(|err| NewtonError::LineSearchError(err))?;

        let previous_residual_norm = residual_norm;
        residual_norm = f.norm();
        increment_norm = dx.norm() * step_length;
        iter += 1;

        if let Some(k) = shift.as_mut() {
            if previous_residual_norm > T::zero() {
                *k *= residual_norm / previous_residual_norm;
            }
        }

        debug!(
            "Newton iter {}: |r| = {}, |dx| = {}, step length {}",
            iter, residual_norm, increment_norm, step_length
        );
    }

    Ok(NewtonStatistics {
        iterations: iter,
        residual_norm,
        increment_norm,
    })
}

fn check_divergence<T: Real>(settings: &NewtonSettings<T>, iteration: usize, residual_norm: T) -> Result<(), NewtonError> {
    let exceeds_max = settings
        .max_residual
        .map(|max_residual| residual_norm > max_residual)
        .unwrap_or(false);
    if !residual_norm.is_finite() || exceeds_max {
        warn!("Residual norm {} at iteration {} is not admissible.", residual_norm, iteration);
        Err(NewtonError::Diverged { iteration })
    } else {
        Ok(())
    }
}

/// Settings for restarting a failed solve with pseudo-transient continuation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PtcRestartSettings<T> {
    pub initial_shift: T,
    /// Iteration budget of each restart. PTC converges linearly far from the solution, so this
    /// is typically much larger than the budget of the plain Newton solve.
    pub max_iterations: Option<usize>,
    /// Range `(lo, hi)` of the factors applied to the initial shift on later restarts.
    pub factor_range: (T, T),
}

impl<T: Real> PtcRestartSettings<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn new(initial_shift: T) -> Self {
        Self {
            initial_shift,
            max_iterations: Some(250),
            factor_range: (0.85, 1.35),
        }
    }

    /// Shift factor of every restart after the first one.
    pub fn factors(&self) -> impl Iterator<Item = T> + '_ {
        let (lo, hi) = self.factor_range;
        PTC_RESTART_POSITIONS
            .iter()
            .map(move |&position| lo + cast::<T>(position) * (hi - lo))
    }
}

/// Positions within the factor range used by consecutive restarts.
const PTC_RESTART_POSITIONS: [f64; 9] = [1.0, 0.0, 0.8, 0.1, 0.6, 0.2, 0.9, 0.05, 0.4];

/// Newton's method that restarts with pseudo-transient continuation on divergence.
///
/// The function is first solved with the given settings. If the solve diverges or runs out of
/// iterations, `x` is reset to its initial value and the solve is repeated with PTC enabled and
/// the restart iteration budget. The first restart uses the configured shift, later ones scale
/// it by factors spread over the configured range. After ten unsuccessful restarts the last
/// error is returned.
pub fn newton_with_divergence_continuation<'a, T, F>(
    mut function: F,
    x: impl Into<DVectorViewMut<'a, T>>,
    f: impl Into<DVectorViewMut<'a, T>>,
    dx: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
    restart: PtcRestartSettings<T>,
) -> Result<NewtonStatistics<T>, NewtonError>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    let mut x = x.into();
    let mut f = f.into();
    let mut dx = dx.into();
    let x_start = x.clone_owned();

    let first_attempt = newton(
        &mut function,
        DVectorViewMut::from(&mut x),
        DVectorViewMut::from(&mut f),
        DVectorViewMut::from(&mut dx),
        settings,
    );
    let mut last_error = match first_attempt {
        Ok(statistics) => return Ok(statistics),
        Err(err @ NewtonError::Diverged { .. }) | Err(err @ NewtonError::MaximumIterationsReached(_)) => err,
        Err(err) => return Err(err),
    };

    for factor in std::iter::once(T::one()).chain(restart.factors()) {
        let initial_shift = restart.initial_shift * factor;
        warn!("{} Restarting with PTC, shift {}.", last_error, initial_shift);
        x.copy_from(&x_start);
        let ptc_settings = NewtonSettings {
            max_iterations: restart.max_iterations,
            ptc: Some(PtcSettings { initial_shift }),
            ..settings
        };
        let attempt = newton(
            &mut function,
            DVectorViewMut::from(&mut x),
            DVectorViewMut::from(&mut f),
            DVectorViewMut::from(&mut dx),
            ptc_settings,
        );
        match attempt {
            Ok(statistics) => return Ok(statistics),
            Err(err @ NewtonError::Diverged { .. }) | Err(err @ NewtonError::MaximumIterationsReached(_)) => {
                last_error = err
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error)
}

pub trait LineSearch<T: Scalar, F: VectorFunction<T>> {
    fn step(
        &mut self,
        function: &mut F,
        f: DVectorViewMut<T>,
        x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, Box<dyn Error + Send + Sync>>;
}

/// Trivial implementation of line search. Equivalent to a single, full Newton step.
#[derive(Clone, Debug)]
pub struct NoLineSearch;

impl<T, F> LineSearch<T, F> for NoLineSearch
where
    T: Real,
    F: VectorFunction<T>,
{
    fn step(
        &mut self,
        function: &mut F,
        mut f: DVectorViewMut<T>,
        mut x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, Box<dyn Error + Send + Sync>> {
        let p = direction;
        x.axpy(T::one(), &p, T::one());
        function.eval_into(&mut f, &DVectorView::from(&x));
        Ok(T::one())
    }
}

/// Standard backtracking line search using the Armijo condition.
///
/// See Jorge & Nocedal (2006), Numerical Optimization, Chapter 3.1.
#[derive(Clone, Debug)]
pub struct BacktrackingLineSearch;

impl<T, F> LineSearch<T, F> for BacktrackingLineSearch
where
    T: Real,
    F: VectorFunction<T>,
{
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn step(
        &mut self,
        function: &mut F,
        mut f: DVectorViewMut<T>,
        mut x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, Box<dyn Error + Send + Sync>> {
        // We minimize g(x) = (1/2) || F(x) ||^2 along p, for which the sufficient decrease
        // condition becomes
        //  g(x_k + alpha * p_k) <= (1 - c * alpha) * g(x_k)
        // assuming p_k solves the Newton step equation.
        let c = 1e-4;
        let alpha_min = 1e-6;

        let p = direction;
        let g_initial = 0.5 * f.magnitude_squared();

        // Start out with some alphas that don't decrease too quickly, then
        // start decreasing them much faster if the first few iterations don't let us
        // take a step.
        let initial_alphas = [0.0, 1.0, 0.75, 0.5];
        let mut alpha_iter = initial_alphas
            .iter()
            .copied()
            .chain(iterate(0.25, |alpha_i| 0.25 * *alpha_i));

        let mut alpha_prev = alpha_iter.next().unwrap();
        let mut alpha = alpha_iter.next().unwrap();

        loop {
            // x^{k + 1} = x^k + (alpha^k - alpha^{k - 1}) * p
            let delta_alpha = alpha - alpha_prev;
            x.axpy(delta_alpha, &p, T::one());
            function.eval_into(&mut f, &DVectorView::from(&x));

            let g = 0.5 * f.magnitude_squared();
            if g <= (1.0 - c * alpha) * g_initial {
                break;
            } else if alpha < alpha_min {
                return Err(Box::from(format!(
                    "Failed to produce valid step direction.\
                    Alpha {} is smaller than minimum allowed alpha {}.",
                    alpha, alpha_min
                )));
            } else {
                alpha_prev = alpha;
                alpha = alpha_iter.next().unwrap();
            }
        }

        Ok(alpha)
    }
}
