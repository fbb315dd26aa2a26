use serde::{Deserialize, Serialize};

/// The four heart valves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Valve {
    /// Mitral valve, left atrium to left ventricle.
    Mv,
    /// Aortic valve, left ventricle to systemic arteries.
    Av,
    /// Tricuspid valve, right atrium to right ventricle.
    Tv,
    /// Pulmonary valve, right ventricle to pulmonary arteries.
    Pv,
}

impl Valve {
    pub const ALL: [Valve; 4] = [Valve::Mv, Valve::Av, Valve::Tv, Valve::Pv];

    /// Whether the valve lets blood into a ventricle (as opposed to out of it).
    pub fn is_inflow(&self) -> bool {
        matches!(self, Valve::Mv | Valve::Tv)
    }
}

/// Pressure-flux relation of a valve, expressed as a resistance depending on the
/// pressure difference $\Delta p = p_{up} - p_{down}$ across the valve.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValveLaw {
    /// $R_{min}$ for $\Delta p \geq 0$, $R_{max}$ otherwise.
    #[default]
    PwlinPres,
    /// Open ($R_{min}$) or closed ($R_{max}$) depending on the cardiac phase only.
    PwlinTime,
    /// $R = \frac{1}{2}(R_{max} - R_{min})(1 - \tanh(\Delta p / \epsilon)) + R_{min}$.
    SmoothPresResistance { epsilon: f64 },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValveLaws {
    pub mv: ValveLaw,
    pub av: ValveLaw,
    pub tv: ValveLaw,
    pub pv: ValveLaw,
}

impl ValveLaws {
    pub fn get(&self, valve: Valve) -> ValveLaw {
        match valve {
            Valve::Mv => self.mv,
            Valve::Av => self.av,
            Valve::Tv => self.tv,
            Valve::Pv => self.pv,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ValveResistance {
    pub law: ValveLaw,
    pub r_min: f64,
    pub r_max: f64,
}

impl ValveResistance {
    /// Returns $R(\Delta p)$ and $\mathrm{d}R / \mathrm{d}\Delta p$.
    ///
    /// `open_by_phase` is only consulted by [`ValveLaw::PwlinTime`].
    pub fn evaluate(&self, dp: f64, open_by_phase: bool) -> (f64, f64) {
        match self.law {
            ValveLaw::PwlinPres => {
                if dp < 0.0 {
                    (self.r_max, 0.0)
                } else {
                    (self.r_min, 0.0)
                }
            }
            ValveLaw::PwlinTime => {
                if open_by_phase {
                    (self.r_min, 0.0)
                } else {
                    (self.r_max, 0.0)
                }
            }
            ValveLaw::SmoothPresResistance { epsilon } => {
                let tanh = (dp / epsilon).tanh();
                let half_range = 0.5 * (self.r_max - self.r_min);
                let r = half_range * (1.0 - tanh) + self.r_min;
                let dr = -half_range * (1.0 - tanh * tanh) / epsilon;
                (r, dr)
            }
        }
    }
}
