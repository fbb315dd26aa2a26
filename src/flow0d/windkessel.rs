use crate::flow0d::{Cardiovascular0D, Evaluation};
use crate::time_curves::TimeCurves;
use eyre::bail;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Parameters shared by the windkessel models.
///
/// The inflow $q(t)$ is prescribed by time curve `flux_curve`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindkesselParameters {
    /// Compliance.
    pub c: f64,
    /// Peripheral resistance.
    pub r: f64,
    #[serde(default)]
    pub p_ref: f64,
    /// Characteristic impedance.
    #[serde(default)]
    pub z: f64,
    /// Inertance.
    #[serde(default)]
    pub l: f64,
    #[serde(default = "default_flux_curve")]
    pub flux_curve: usize,
}

fn default_flux_curve() -> usize {
    1
}

impl WindkesselParameters {
    fn validate(&self, needs_inertance: bool) -> eyre::Result<()> {
        if !(self.c > 0.0 && self.r > 0.0) {
            bail!("windkessel requires positive C and R, got C = {}, R = {}", self.c, self.r);
        }
        if needs_inertance && !(self.l > 0.0) {
            bail!("windkessel requires a positive inertance L, got {}", self.l);
        }
        Ok(())
    }

    fn inflow(&self, t: f64, curves: &TimeCurves) -> f64 {
        curves.evaluate_or_zero(self.flux_curve, t)
    }
}

/// Two-element windkessel, $C \dot p + (p - p_{ref})/R - q(t) = 0$.
#[derive(Clone, Debug, PartialEq)]
pub struct Windkessel2El {
    parameters: WindkesselParameters,
}

impl Windkessel2El {
    pub fn new(parameters: WindkesselParameters) -> eyre::Result<Self> {
        parameters.validate(false)?;
        Ok(Self { parameters })
    }
}

impl Cardiovascular0D for Windkessel2El {
    fn num_dof(&self) -> usize {
        1
    }

    fn variable_names(&self) -> Vec<String> {
        vec!["p".to_string()]
    }

    fn evaluate(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves, out: &mut Evaluation) {
        let WindkesselParameters { c, r, p_ref, .. } = self.parameters;
        let q = self.parameters.inflow(t, curves);
        out.reset();
        out.df[0] = c * s[0];
        out.df_jacobian[(0, 0)] = c;
        out.f[0] = (s[0] - p_ref) / r - q;
        out.f_jacobian[(0, 0)] = 1.0 / r;
    }

    fn required_curves(&self) -> Vec<usize> {
        vec![self.parameters.flux_curve]
    }
}

/// Four-element windkessel with the inertance in series to the characteristic impedance,
/// unknowns $[p, p_c]$:
/// $$
/// p - p_c - Z q - L \dot q = 0, \qquad C \dot p_c + (p_c - p_{ref})/R - q = 0.
/// $$
#[derive(Clone, Debug, PartialEq)]
pub struct Windkessel4ElLsZ {
    parameters: WindkesselParameters,
}

impl Windkessel4ElLsZ {
    pub fn new(parameters: WindkesselParameters) -> eyre::Result<Self> {
        parameters.validate(true)?;
        Ok(Self { parameters })
    }
}

impl Cardiovascular0D for Windkessel4ElLsZ {
    fn num_dof(&self) -> usize {
        2
    }

    fn variable_names(&self) -> Vec<String> {
        vec!["p".to_string(), "p_c".to_string()]
    }

    fn evaluate(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves, out: &mut Evaluation) {
        let WindkesselParameters { c, r, p_ref, z, l, .. } = self.parameters;
        let q = self.parameters.inflow(t, curves);
        out.reset();

        // The flux derivative enters through the time derivative of -L q
        out.df[0] = -l * q;
        out.f[0] = s[0] - s[1] - z * q;
        out.f_jacobian[(0, 0)] = 1.0;
        out.f_jacobian[(0, 1)] = -1.0;

        out.df[1] = c * s[1];
        out.df_jacobian[(1, 1)] = c;
        out.f[1] = (s[1] - p_ref) / r - q;
        out.f_jacobian[(1, 1)] = 1.0 / r;
    }

    fn required_curves(&self) -> Vec<usize> {
        vec![self.parameters.flux_curve]
    }
}

/// Four-element windkessel with the inertance parallel to the characteristic impedance,
/// unknowns $[p, p_c, q_L]$:
/// $$
/// p - p_c - Z (q - q_L) = 0, \qquad L \dot q_L - (p - p_c) = 0, \qquad
/// C \dot p_c + (p_c - p_{ref})/R - q = 0.
/// $$
#[derive(Clone, Debug, PartialEq)]
pub struct Windkessel4ElLpZ {
    parameters: WindkesselParameters,
}

impl Windkessel4ElLpZ {
    pub fn new(parameters: WindkesselParameters) -> eyre::Result<Self> {
        parameters.validate(true)?;
        Ok(Self { parameters })
    }
}

impl Cardiovascular0D for Windkessel4ElLpZ {
    fn num_dof(&self) -> usize {
        3
    }

    fn variable_names(&self) -> Vec<String> {
        vec!["p".to_string(), "p_c".to_string(), "q_l".to_string()]
    }

    fn evaluate(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves, out: &mut Evaluation) {
        let WindkesselParameters { c, r, p_ref, z, l, .. } = self.parameters;
        let q = self.parameters.inflow(t, curves);
        out.reset();

        out.f[0] = s[0] - s[1] - z * (q - s[2]);
        out.f_jacobian[(0, 0)] = 1.0;
        out.f_jacobian[(0, 1)] = -1.0;
        out.f_jacobian[(0, 2)] = z;

        out.df[1] = l * s[2];
        out.df_jacobian[(1, 2)] = l;
        out.f[1] = -(s[0] - s[1]);
        out.f_jacobian[(1, 0)] = -1.0;
        out.f_jacobian[(1, 1)] = 1.0;

        out.df[2] = c * s[1];
        out.df_jacobian[(2, 1)] = c;
        out.f[2] = (s[1] - p_ref) / r - q;
        out.f_jacobian[(2, 1)] = 1.0 / r;
    }

    fn required_curves(&self) -> Vec<usize> {
        vec![self.parameters.flux_curve]
    }
}
