//! Lumped-parameter (0D) models of the circulation.
//!
//! Every model is written as a system of differential-algebraic equations
//! $$
//! \frac{\mathrm{d}}{\mathrm{d} t} \vec d(\vec s, t) + \vec f(\vec s, t) = \vec 0
//! $$
//! in the unknowns $\vec s$. Rows whose $\vec d$ vanishes are algebraic constraints, e.g. the
//! valve laws. Models provide $\vec d$, $\vec f$ and their Jacobians; the time discretization
//! lives in [`crate::timeint`].
use crate::config::{ModelKind, ModelParams};
use crate::io::read_named_values;
use crate::time_curves::TimeCurves;
use eyre::{bail, Context};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

mod perturbation;
pub mod problem;
mod syspul;
mod valve;
mod windkessel;

pub use perturbation::*;
pub use syspul::*;
pub use valve::*;
pub use windkessel::*;

/// Residual contributions of a 0D model and their Jacobians with respect to the state.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub df: DVector<f64>,
    pub f: DVector<f64>,
    pub df_jacobian: DMatrix<f64>,
    pub f_jacobian: DMatrix<f64>,
}

impl Evaluation {
    pub fn zeros(num_dof: usize) -> Self {
        Self {
            df: DVector::zeros(num_dof),
            f: DVector::zeros(num_dof),
            df_jacobian: DMatrix::zeros(num_dof, num_dof),
            f_jacobian: DMatrix::zeros(num_dof, num_dof),
        }
    }

    pub fn reset(&mut self) {
        self.df.fill(0.0);
        self.f.fill(0.0);
        self.df_jacobian.fill(0.0);
        self.f_jacobian.fill(0.0);
    }
}

/// A lumped model of (a part of) the cardiovascular system.
///
/// Times passed to the model are absolute simulation times; periodic quantities are evaluated
/// modulo the cycle period by the model or its time curves.
pub trait Cardiovascular0D {
    fn num_dof(&self) -> usize;

    fn variable_names(&self) -> Vec<String>;

    /// Evaluates $\vec d$, $\vec f$ and their Jacobians at state `s` and time `t`, overwriting `out`.
    fn evaluate(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves, out: &mut Evaluation);

    /// Time curves the model evaluates.
    fn required_curves(&self) -> Vec<usize> {
        Vec::new()
    }

    /// Named compartment volumes, reported alongside the unknowns.
    fn compartment_volumes(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves) -> Vec<(String, f64)> {
        let _ = (s, t, curves);
        Vec::new()
    }

    /// Length of the cardiac cycle, `None` for models without a cycle.
    fn cycle_period(&self) -> Option<f64> {
        None
    }

    fn end_diastole(&self) -> Option<f64> {
        None
    }

    fn end_systole(&self) -> Option<f64> {
        None
    }

    /// State indices holding the volumes of chambers whose pressure is imposed from outside.
    fn interface_slots(&self) -> Vec<usize> {
        Vec::new()
    }

    /// Names of the imposed chamber pressures, in the order of [`Self::interface_slots`].
    fn interface_pressure_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn set_interface_pressures(&mut self, pressures: &[f64]) -> eyre::Result<()> {
        if !pressures.is_empty() {
            bail!("model has no interface chambers");
        }
        Ok(())
    }

    fn apply_perturbation(&mut self, perturbation: &Perturbation) -> eyre::Result<()> {
        bail!("model does not support perturbation {:?}", perturbation.kind)
    }
}

/// Which unknowns enter the periodicity error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodicCheck {
    #[default]
    #[serde(alias = "allvar")]
    AllVariables,
    Variables(Vec<String>),
}

impl PeriodicCheck {
    /// Resolves the checked variables to state indices.
    pub fn indices(&self, model: &dyn Cardiovascular0D) -> eyre::Result<Vec<usize>> {
        let names = model.variable_names();
        match self {
            Self::AllVariables => Ok((0..names.len()).collect()),
            Self::Variables(checked) => checked
                .iter()
                .map(|name| {
                    names
                        .iter()
                        .position(|candidate| candidate == name)
                        .ok_or_else(|| eyre::eyre!("unknown variable {} in periodicity check", name))
                })
                .collect(),
        }
    }
}

/// Instantiates the model named in the input.
pub fn create_model(params: &ModelParams) -> eyre::Result<Box<dyn Cardiovascular0D>> {
    let model: Box<dyn Cardiovascular0D> = match &params.kind {
        ModelKind::Windkessel2El { parameters } => Box::new(Windkessel2El::new(parameters.clone())?),
        ModelKind::Windkessel4ElLsZ { parameters } => Box::new(Windkessel4ElLsZ::new(parameters.clone())?),
        ModelKind::Windkessel4ElLpZ { parameters } => Box::new(Windkessel4ElLpZ::new(parameters.clone())?),
        ModelKind::Syspul {
            parameters,
            chamber_models,
            valve_laws,
            bleeding,
        } => Box::new(Syspul::new(
            parameters.clone(),
            chamber_models.clone(),
            valve_laws.clone(),
            bleeding.clone(),
        )?),
    };
    Ok(model)
}

/// Builds the initial state from `<variable>_0` entries.
///
/// Interface chamber volumes may be omitted, since they are determined by the coupled structure.
pub fn initial_state(model: &dyn Cardiovascular0D, conditions: &BTreeMap<String, f64>) -> eyre::Result<DVector<f64>> {
    let interface_slots = model.interface_slots();
    let names = model.variable_names();
    let mut s = DVector::zeros(names.len());
    for (i, name) in names.iter().enumerate() {
        let key = format!("{}_0", name);
        match conditions.get(&key) {
            Some(value) => s[i] = *value,
            None if interface_slots.contains(&i) => {
                debug!("No initial value for interface variable {}, starting from zero.", name)
            }
            None => bail!("missing initial condition {}", key),
        }
    }
    Ok(s)
}

/// Reads initial conditions from a file with `<variable>_0 value` lines.
pub fn read_initial_conditions(path: impl AsRef<Path>) -> eyre::Result<BTreeMap<String, f64>> {
    let path = path.as_ref();
    read_named_values(path).wrap_err_with(|| format!("failed to read initial conditions from {}", path.display()))
}
