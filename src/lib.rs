//! Lumped-parameter cardiovascular models coupled to nonlinear cardiac mechanics.
//!
//! The crate provides 0D circulation models integrated in time with the one-step-theta scheme,
//! their monolithic coupling to chamber structures through Lagrange multipliers, a staggered
//! multiscale driver for growth and remodeling, and post-processing of result files. The
//! constitutive laws live in [`solid`] and the nonlinear solvers in [`optimize`].
pub mod config;
pub mod coupling;
pub mod flow0d;
pub mod io;
pub mod multiscale;
pub mod nonlinear;
pub mod postprocess;
pub mod time_curves;
pub mod timeint;

pub mod optimize {
    pub use ambit_optimize::*;
}

pub mod solid {
    pub use ambit_solid::*;
}

pub extern crate nalgebra;
