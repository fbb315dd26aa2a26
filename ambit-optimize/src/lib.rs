/// Calculus helper traits and numerical differentiation
pub mod calculus;
/// Newton's method with residual and increment control, line searches and
/// pseudo-transient continuation
pub mod newton;
