//! Prescribed time curves, e.g. chamber activation or external fluxes.
use eyre::{bail, eyre, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

/// A scalar function of time.
pub trait TimeCurve {
    fn evaluate(&self, t: f64) -> f64;
}

impl<F> TimeCurve for F
where
    F: Fn(f64) -> f64,
{
    fn evaluate(&self, t: f64) -> f64 {
        self(t)
    }
}

/// Serializable description of the supported time curves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeCurveSpec {
    Constant {
        value: f64,
    },
    /// $\frac{1}{2}(1 - \cos(2 \pi (t_{mod} - t_0) / d))$ for $t_0 \leq t_{mod} \leq t_0 + d$, zero otherwise,
    /// where $t_{mod} = t \bmod T$.
    CosineActivation {
        t0: f64,
        duration: f64,
        period: f64,
    },
    /// Smooth (cosine) transition from `start` to `end` over `[0, t_ramp]`, constant afterwards.
    SmoothRamp {
        t_ramp: f64,
        start: f64,
        end: f64,
    },
    /// Linear interpolation between `(t, value)` points, constant extrapolation outside.
    PiecewiseLinear {
        points: Vec<(f64, f64)>,
    },
}

impl TimeCurve for TimeCurveSpec {
    fn evaluate(&self, t: f64) -> f64 {
        match self {
            Self::Constant { value } => *value,
            Self::CosineActivation { t0, duration, period } => {
                let t_mod = if *period > 0.0 { t.rem_euclid(*period) } else { t };
                if t_mod >= *t0 && t_mod <= t0 + duration {
                    0.5 * (1.0 - (2.0 * PI * (t_mod - t0) / duration).cos())
                } else {
                    0.0
                }
            }
            Self::SmoothRamp { t_ramp, start, end } => {
                if t >= *t_ramp {
                    *end
                } else if t <= 0.0 {
                    *start
                } else {
                    start + (end - start) * 0.5 * (1.0 - (PI * t / t_ramp).cos())
                }
            }
            Self::PiecewiseLinear { points } => piecewise_linear(points, t),
        }
    }
}

impl TimeCurveSpec {
    /// Rejects curves that would evaluate to NaN or interpolate between unordered points.
    pub fn validate(&self) -> eyre::Result<()> {
        match self {
            Self::Constant { value } => {
                if !value.is_finite() {
                    bail!("constant value must be finite, got {}", value);
                }
            }
            Self::CosineActivation { t0, duration, period } => {
                if !(*duration > 0.0) {
                    bail!("activation duration must be positive, got {}", duration);
                }
                if !t0.is_finite() || !(*period >= 0.0) {
                    bail!("invalid activation window: t0 = {}, period = {}", t0, period);
                }
            }
            Self::SmoothRamp { t_ramp, .. } => {
                if !(*t_ramp > 0.0) {
                    bail!("ramp time must be positive, got {}", t_ramp);
                }
            }
            Self::PiecewiseLinear { points } => {
                if points.iter().any(|(t, value)| !t.is_finite() || !value.is_finite()) {
                    bail!("piecewise linear points must be finite");
                }
                if let Some(pair) = points.windows(2).find(|pair| pair[1].0 < pair[0].0) {
                    bail!(
                        "piecewise linear points must be sorted by time, but t = {} follows t = {}",
                        pair[1].0,
                        pair[0].0
                    );
                }
            }
        }
        Ok(())
    }
}

fn piecewise_linear(points: &[(f64, f64)], t: f64) -> f64 {
    match points {
        [] => 0.0,
        [(_, value)] => *value,
        [(t_first, v_first), ..] if t <= *t_first => *v_first,
        [.., (t_last, v_last)] if t >= *t_last => *v_last,
        _ => {
            let i = points.partition_point(|(t_i, _)| *t_i <= t);
            let (t_a, v_a) = points[i - 1];
            let (t_b, v_b) = points[i];
            v_a + (v_b - v_a) * (t - t_a) / (t_b - t_a)
        }
    }
}

/// Registry of time curves, addressed by their (1-based) curve number.
#[derive(Default)]
pub struct TimeCurves {
    curves: BTreeMap<usize, Box<dyn TimeCurve>>,
}

impl fmt::Debug for TimeCurves {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeCurves")
            .field("curve_numbers", &self.curves.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TimeCurves {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &BTreeMap<usize, TimeCurveSpec>) -> eyre::Result<Self> {
        let mut curves = Self::new();
        for (&number, spec) in specs {
            spec.validate()
                .wrap_err_with(|| format!("invalid time curve {}", number))?;
            curves.insert(number, spec.clone());
        }
        Ok(curves)
    }

    pub fn with_curve(mut self, number: usize, curve: impl TimeCurve + 'static) -> Self {
        self.insert(number, curve);
        self
    }

    pub fn insert(&mut self, number: usize, curve: impl TimeCurve + 'static) {
        self.curves.insert(number, Box::new(curve));
    }

    pub fn contains(&self, number: usize) -> bool {
        self.curves.contains_key(&number)
    }

    pub fn get(&self, number: usize) -> eyre::Result<&dyn TimeCurve> {
        self.curves
            .get(&number)
            .map(|curve| curve.as_ref())
            .ok_or_else(|| eyre!("time curve {} is not defined", number))
    }

    /// Evaluates curve `number` at `t`, or returns zero if no such curve exists.
    pub fn evaluate_or_zero(&self, number: usize, t: f64) -> f64 {
        self.curves
            .get(&number)
            .map(|curve| curve.evaluate(t))
            .unwrap_or(0.0)
    }
}
