use crate::flow0d::Valve;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PerturbationKind {
    /// Scales the open-valve resistance $R_{min}$.
    Stenosis { factor: f64 },
    /// Replaces the closed-valve resistance $R_{max}$, letting blood leak back.
    Regurgitation { r_max: f64 },
}

/// A valve disease induced once the given cycle has been completed.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Perturbation {
    #[serde(flatten)]
    pub kind: PerturbationKind,
    pub valve: Valve,
    pub after_cycle: usize,
}
