use crate::flow0d::{Cardiovascular0D, Evaluation, Perturbation, PerturbationKind, Valve, ValveLaws, ValveResistance};
use crate::time_curves::TimeCurves;
use eyre::bail;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

const Q_VIN_L: usize = 0;
const P_AT_L: usize = 1;
const Q_VOUT_L: usize = 2;
const P_V_L: usize = 3;
const P_AR_SYS: usize = 4;
const Q_AR_SYS: usize = 5;
const P_VEN_SYS: usize = 6;
const Q_VEN_SYS: usize = 7;
const Q_VIN_R: usize = 8;
const P_AT_R: usize = 9;
const Q_VOUT_R: usize = 10;
const P_V_R: usize = 11;
const P_AR_PUL: usize = 12;
const Q_AR_PUL: usize = 13;
const P_VEN_PUL: usize = 14;
const Q_VEN_PUL: usize = 15;

const NUM_DOF: usize = 16;

const VARIABLE_NAMES: [&str; NUM_DOF] = [
    "q_vin_l",
    "p_at_l",
    "q_vout_l",
    "p_v_l",
    "p_ar_sys",
    "q_ar_sys",
    "p_ven_sys",
    "q_ven_sys",
    "q_vin_r",
    "p_at_r",
    "q_vout_r",
    "p_v_r",
    "p_ar_pul",
    "q_ar_pul",
    "p_ven_pul",
    "q_ven_pul",
];

/// Parameters of the closed-loop circulation. Pressures, volumes and times must be given in
/// one consistent unit system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyspulParameters {
    pub r_ar_sys: f64,
    pub c_ar_sys: f64,
    pub l_ar_sys: f64,
    #[serde(default)]
    pub z_ar_sys: f64,
    pub r_ven_sys: f64,
    pub c_ven_sys: f64,
    pub l_ven_sys: f64,
    pub r_ar_pul: f64,
    pub c_ar_pul: f64,
    pub l_ar_pul: f64,
    pub r_ven_pul: f64,
    pub c_ven_pul: f64,
    pub l_ven_pul: f64,

    pub r_vin_l_min: f64,
    pub r_vin_l_max: f64,
    pub r_vout_l_min: f64,
    pub r_vout_l_max: f64,
    pub r_vin_r_min: f64,
    pub r_vin_r_max: f64,
    pub r_vout_r_min: f64,
    pub r_vout_r_max: f64,

    pub e_v_max_l: f64,
    pub e_v_min_l: f64,
    pub e_v_max_r: f64,
    pub e_v_min_r: f64,
    pub e_at_max_l: f64,
    pub e_at_min_l: f64,
    pub e_at_max_r: f64,
    pub e_at_min_r: f64,

    pub v_at_l_u: f64,
    pub v_v_l_u: f64,
    pub v_at_r_u: f64,
    pub v_v_r_u: f64,
    pub v_ar_sys_u: f64,
    pub v_ven_sys_u: f64,
    pub v_ar_pul_u: f64,
    pub v_ven_pul_u: f64,

    /// Length of the cardiac cycle.
    pub t_cycl: f64,
    /// End-diastolic time within the cycle.
    pub t_ed: f64,
    /// End-systolic time within the cycle.
    pub t_es: f64,
}

/// The four heart chambers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chamber {
    Lv,
    Rv,
    La,
    Ra,
}

impl Chamber {
    pub const ALL: [Chamber; 4] = [Chamber::Lv, Chamber::Rv, Chamber::La, Chamber::Ra];

    fn slot(&self) -> usize {
        match self {
            Chamber::Lv => P_V_L,
            Chamber::Rv => P_V_R,
            Chamber::La => P_AT_L,
            Chamber::Ra => P_AT_R,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Chamber::Lv => "v_l",
            Chamber::Rv => "v_r",
            Chamber::La => "at_l",
            Chamber::Ra => "at_r",
        }
    }

    pub fn pressure_name(&self) -> String {
        format!("p_{}", self.suffix())
    }

    pub fn volume_name(&self) -> String {
        format!("V_{}", self.suffix())
    }
}

/// How a heart chamber is represented.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChamberModel {
    /// Time-varying elastance $E(t) = (E_{max} - E_{min}) y(t) + E_{min}$ with the
    /// activation curve $y$, such that $V = p / E + V_u$.
    #[serde(alias = "0D_elast")]
    Elastance { activation_curve: usize },
    /// Constant volume $V_u$.
    #[serde(alias = "0D_rigid")]
    Rigid,
    /// Pressure imposed from outside, the unknown is the chamber volume.
    #[serde(alias = "3D_solid")]
    Interface,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChamberModels {
    pub lv: ChamberModel,
    pub rv: ChamberModel,
    pub la: ChamberModel,
    pub ra: ChamberModel,
}

impl Default for ChamberModels {
    fn default() -> Self {
        let ventricle = ChamberModel::Elastance { activation_curve: 2 };
        let atrium = ChamberModel::Elastance { activation_curve: 1 };
        Self {
            lv: ventricle,
            rv: ventricle,
            la: atrium,
            ra: atrium,
        }
    }
}

impl ChamberModels {
    pub fn get(&self, chamber: Chamber) -> ChamberModel {
        match chamber {
            Chamber::Lv => self.lv,
            Chamber::Rv => self.rv,
            Chamber::La => self.la,
            Chamber::Ra => self.ra,
        }
    }
}

/// External blood loss, drained from the systemic veins at a constant rate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BleedingParameters {
    pub start: f64,
    pub duration: f64,
    /// Total volume lost over the bleeding window.
    pub volume_loss: f64,
}

impl BleedingParameters {
    pub fn flux(&self, t: f64) -> f64 {
        if t >= self.start && t < self.start + self.duration {
            self.volume_loss / self.duration
        } else {
            0.0
        }
    }
}

/// Closed-loop model of the systemic and pulmonary circulation with four chambers and valves.
///
/// The chamber rows express the volume balance $\dot V + q_{out} - q_{in} = 0$, the valve rows
/// the pressure form $R(\Delta p) q - \Delta p = 0$ of the valve law, the arterial and venous
/// compartments are compliances with series inertances $\frac{L}{R} \dot q + q - \Delta p / R = 0$.
/// The systemic arteries additionally carry a characteristic impedance $Z$.
#[derive(Clone, Debug, PartialEq)]
pub struct Syspul {
    parameters: SyspulParameters,
    chamber_models: ChamberModels,
    valve_laws: ValveLaws,
    bleeding: Option<BleedingParameters>,
    /// Indexed like [`Chamber::ALL`].
    interface_pressures: [f64; 4],
}

/// A pressure entering a residual, with the unknown it depends on (if any).
#[derive(Copy, Clone, Debug)]
struct PressureRef {
    value: f64,
    dof: Option<usize>,
}

impl PressureRef {
    fn dof(s: &DVector<f64>, index: usize) -> Self {
        Self {
            value: s[index],
            dof: Some(index),
        }
    }
}

impl Syspul {
    pub fn new(
        parameters: SyspulParameters,
        chamber_models: ChamberModels,
        valve_laws: ValveLaws,
        bleeding: Option<BleedingParameters>,
    ) -> eyre::Result<Self> {
        let p = &parameters;
        if !(p.t_cycl > 0.0 && p.t_ed >= 0.0 && p.t_ed < p.t_es && p.t_es < p.t_cycl) {
            bail!(
                "expected 0 <= t_ed < t_es < t_cycl, got t_ed = {}, t_es = {}, t_cycl = {}",
                p.t_ed,
                p.t_es,
                p.t_cycl
            );
        }
        let compliances = [p.c_ar_sys, p.c_ven_sys, p.c_ar_pul, p.c_ven_pul];
        let resistances = [p.r_ar_sys, p.r_ven_sys, p.r_ar_pul, p.r_ven_pul];
        if compliances.iter().chain(&resistances).any(|value| !(*value > 0.0)) {
            bail!("compliances and resistances of the circulation must be positive");
        }
        if let Some(bleeding) = &bleeding {
            if !(bleeding.duration > 0.0) {
                bail!("bleeding duration must be positive, got {}", bleeding.duration);
            }
        }
        Ok(Self {
            parameters,
            chamber_models,
            valve_laws,
            bleeding,
            interface_pressures: [0.0; 4],
        })
    }

    pub fn parameters(&self) -> &SyspulParameters {
        &self.parameters
    }

    pub fn valve_resistance(&self, valve: Valve) -> ValveResistance {
        let p = &self.parameters;
        let (r_min, r_max) = match valve {
            Valve::Mv => (p.r_vin_l_min, p.r_vin_l_max),
            Valve::Av => (p.r_vout_l_min, p.r_vout_l_max),
            Valve::Tv => (p.r_vin_r_min, p.r_vin_r_max),
            Valve::Pv => (p.r_vout_r_min, p.r_vout_r_max),
        };
        ValveResistance {
            law: self.valve_laws.get(valve),
            r_min,
            r_max,
        }
    }

    fn valve_resistances_mut(&mut self, valve: Valve) -> (&mut f64, &mut f64) {
        let p = &mut self.parameters;
        match valve {
            Valve::Mv => (&mut p.r_vin_l_min, &mut p.r_vin_l_max),
            Valve::Av => (&mut p.r_vout_l_min, &mut p.r_vout_l_max),
            Valve::Tv => (&mut p.r_vin_r_min, &mut p.r_vin_r_max),
            Valve::Pv => (&mut p.r_vout_r_min, &mut p.r_vout_r_max),
        }
    }

    /// $(E_{max}, E_{min}, V_u)$ of a chamber.
    fn chamber_constants(&self, chamber: Chamber) -> (f64, f64, f64) {
        let p = &self.parameters;
        match chamber {
            Chamber::Lv => (p.e_v_max_l, p.e_v_min_l, p.v_v_l_u),
            Chamber::Rv => (p.e_v_max_r, p.e_v_min_r, p.v_v_r_u),
            Chamber::La => (p.e_at_max_l, p.e_at_min_l, p.v_at_l_u),
            Chamber::Ra => (p.e_at_max_r, p.e_at_min_r, p.v_at_r_u),
        }
    }

    fn elastance(&self, chamber: Chamber, activation_curve: usize, t: f64, curves: &TimeCurves) -> f64 {
        let (e_max, e_min, _) = self.chamber_constants(chamber);
        let y = curves.evaluate_or_zero(activation_curve, t);
        (e_max - e_min) * y + e_min
    }

    fn chamber_index(chamber: Chamber) -> usize {
        match chamber {
            Chamber::Lv => 0,
            Chamber::Rv => 1,
            Chamber::La => 2,
            Chamber::Ra => 3,
        }
    }

    fn chamber_pressure(&self, chamber: Chamber, s: &DVector<f64>) -> PressureRef {
        match self.chamber_models.get(chamber) {
            ChamberModel::Interface => PressureRef {
                value: self.interface_pressures[Self::chamber_index(chamber)],
                dof: None,
            },
            _ => PressureRef::dof(s, chamber.slot()),
        }
    }

    fn chamber_volume(&self, chamber: Chamber, s: &DVector<f64>, t: f64, curves: &TimeCurves) -> f64 {
        let (_, _, v_u) = self.chamber_constants(chamber);
        match self.chamber_models.get(chamber) {
            ChamberModel::Elastance { activation_curve } => {
                s[chamber.slot()] / self.elastance(chamber, activation_curve, t, curves) + v_u
            }
            ChamberModel::Rigid => v_u,
            ChamberModel::Interface => s[chamber.slot()],
        }
    }

    fn interface_chambers(&self) -> impl Iterator<Item = Chamber> + '_ {
        Chamber::ALL
            .into_iter()
            .filter(|chamber| self.chamber_models.get(*chamber) == ChamberModel::Interface)
    }

    fn open_by_phase(&self, valve: Valve, t: f64) -> bool {
        let p = &self.parameters;
        let t_mod = t.rem_euclid(p.t_cycl);
        let systole = t_mod >= p.t_ed && t_mod < p.t_es;
        if valve.is_inflow() {
            !systole
        } else {
            systole
        }
    }

    fn valve_row(&self, valve: Valve, row: usize, up: PressureRef, down: PressureRef, s: &DVector<f64>, t: f64, out: &mut Evaluation) {
        let dp = up.value - down.value;
        let (r, dr) = self
            .valve_resistance(valve)
            .evaluate(dp, self.open_by_phase(valve, t));
        let q = s[row];
        out.f[row] = r * q - dp;
        out.f_jacobian[(row, row)] = r;
        if let Some(dof) = up.dof {
            out.f_jacobian[(row, dof)] += dr * q - 1.0;
        }
        if let Some(dof) = down.dof {
            out.f_jacobian[(row, dof)] += 1.0 - dr * q;
        }
    }

    fn chamber_row(
        &self,
        chamber: Chamber,
        q_in: usize,
        q_out: usize,
        s: &DVector<f64>,
        t: f64,
        curves: &TimeCurves,
        out: &mut Evaluation,
    ) {
        let row = chamber.slot();
        match self.chamber_models.get(chamber) {
            ChamberModel::Elastance { activation_curve } => {
                let e = self.elastance(chamber, activation_curve, t, curves);
                out.df[row] = s[row] / e;
                out.df_jacobian[(row, row)] = 1.0 / e;
            }
            ChamberModel::Rigid => {}
            ChamberModel::Interface => {
                out.df[row] = s[row];
                out.df_jacobian[(row, row)] = 1.0;
            }
        }
        out.f[row] = s[q_out] - s[q_in];
        out.f_jacobian[(row, q_out)] = 1.0;
        out.f_jacobian[(row, q_in)] = -1.0;
    }

    fn compliance_row(row: usize, c: f64, q_in: usize, q_out: usize, s: &DVector<f64>, out: &mut Evaluation) {
        out.df[row] = c * s[row];
        out.df_jacobian[(row, row)] = c;
        out.f[row] = s[q_out] - s[q_in];
        out.f_jacobian[(row, q_out)] = 1.0;
        out.f_jacobian[(row, q_in)] = -1.0;
    }

    fn inertance_row(row: usize, r: f64, l: f64, up: PressureRef, down: PressureRef, s: &DVector<f64>, out: &mut Evaluation) {
        out.df[row] = l / r * s[row];
        out.df_jacobian[(row, row)] = l / r;
        out.f[row] = s[row] - (up.value - down.value) / r;
        out.f_jacobian[(row, row)] = 1.0;
        if let Some(dof) = up.dof {
            out.f_jacobian[(row, dof)] -= 1.0 / r;
        }
        if let Some(dof) = down.dof {
            out.f_jacobian[(row, dof)] += 1.0 / r;
        }
    }

    /// External outflow at time `t`.
    pub fn bleeding_flux(&self, t: f64) -> f64 {
        self.bleeding
            .as_ref()
            .map(|bleeding| bleeding.flux(t))
            .unwrap_or(0.0)
    }
}

impl Cardiovascular0D for Syspul {
    fn num_dof(&self) -> usize {
        NUM_DOF
    }

    fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = VARIABLE_NAMES.iter().map(|name| name.to_string()).collect();
        for chamber in self.interface_chambers() {
            names[chamber.slot()] = chamber.volume_name();
        }
        names
    }

    fn evaluate(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves, out: &mut Evaluation) {
        let p = &self.parameters;
        out.reset();

        let p_at_l = self.chamber_pressure(Chamber::La, s);
        let p_v_l = self.chamber_pressure(Chamber::Lv, s);
        let p_at_r = self.chamber_pressure(Chamber::Ra, s);
        let p_v_r = self.chamber_pressure(Chamber::Rv, s);
        let p_ar_sys = PressureRef::dof(s, P_AR_SYS);
        let p_ven_sys = PressureRef::dof(s, P_VEN_SYS);
        let p_ar_pul = PressureRef::dof(s, P_AR_PUL);
        let p_ven_pul = PressureRef::dof(s, P_VEN_PUL);

        self.valve_row(Valve::Mv, Q_VIN_L, p_at_l, p_v_l, s, t, out);
        self.valve_row(Valve::Av, Q_VOUT_L, p_v_l, p_ar_sys, s, t, out);
        self.valve_row(Valve::Tv, Q_VIN_R, p_at_r, p_v_r, s, t, out);
        self.valve_row(Valve::Pv, Q_VOUT_R, p_v_r, p_ar_pul, s, t, out);

        self.chamber_row(Chamber::La, Q_VEN_PUL, Q_VIN_L, s, t, curves, out);
        self.chamber_row(Chamber::Lv, Q_VIN_L, Q_VOUT_L, s, t, curves, out);
        self.chamber_row(Chamber::Ra, Q_VEN_SYS, Q_VIN_R, s, t, curves, out);
        self.chamber_row(Chamber::Rv, Q_VIN_R, Q_VOUT_R, s, t, curves, out);

        // Systemic arteries, compliance behind the characteristic impedance
        out.df[P_AR_SYS] = p.c_ar_sys * (s[P_AR_SYS] - p.z_ar_sys * s[Q_VOUT_L]);
        out.df_jacobian[(P_AR_SYS, P_AR_SYS)] = p.c_ar_sys;
        out.df_jacobian[(P_AR_SYS, Q_VOUT_L)] = -p.c_ar_sys * p.z_ar_sys;
        out.f[P_AR_SYS] = s[Q_AR_SYS] - s[Q_VOUT_L];
        out.f_jacobian[(P_AR_SYS, Q_AR_SYS)] = 1.0;
        out.f_jacobian[(P_AR_SYS, Q_VOUT_L)] = -1.0;
        Self::inertance_row(Q_AR_SYS, p.r_ar_sys, p.l_ar_sys, p_ar_sys, p_ven_sys, s, out);

        Self::compliance_row(P_VEN_SYS, p.c_ven_sys, Q_AR_SYS, Q_VEN_SYS, s, out);
        out.f[P_VEN_SYS] += self.bleeding_flux(t);
        Self::inertance_row(Q_VEN_SYS, p.r_ven_sys, p.l_ven_sys, p_ven_sys, p_at_r, s, out);

        Self::compliance_row(P_AR_PUL, p.c_ar_pul, Q_VOUT_R, Q_AR_PUL, s, out);
        Self::inertance_row(Q_AR_PUL, p.r_ar_pul, p.l_ar_pul, p_ar_pul, p_ven_pul, s, out);

        Self::compliance_row(P_VEN_PUL, p.c_ven_pul, Q_AR_PUL, Q_VEN_PUL, s, out);
        Self::inertance_row(Q_VEN_PUL, p.r_ven_pul, p.l_ven_pul, p_ven_pul, p_at_l, s, out);
    }

    fn required_curves(&self) -> Vec<usize> {
        let mut curves: Vec<usize> = Chamber::ALL
            .iter()
            .filter_map(|chamber| match self.chamber_models.get(*chamber) {
                ChamberModel::Elastance { activation_curve } => Some(activation_curve),
                _ => None,
            })
            .collect();
        curves.sort_unstable();
        curves.dedup();
        curves
    }

    fn compartment_volumes(&self, s: &DVector<f64>, t: f64, curves: &TimeCurves) -> Vec<(String, f64)> {
        let p = &self.parameters;
        let mut volumes = vec![
            (Chamber::La.volume_name(), self.chamber_volume(Chamber::La, s, t, curves)),
            (Chamber::Lv.volume_name(), self.chamber_volume(Chamber::Lv, s, t, curves)),
            (Chamber::Ra.volume_name(), self.chamber_volume(Chamber::Ra, s, t, curves)),
            (Chamber::Rv.volume_name(), self.chamber_volume(Chamber::Rv, s, t, curves)),
            (
                "V_ar_sys".to_string(),
                p.c_ar_sys * (s[P_AR_SYS] - p.z_ar_sys * s[Q_VOUT_L]) + p.v_ar_sys_u,
            ),
            ("V_ven_sys".to_string(), p.c_ven_sys * s[P_VEN_SYS] + p.v_ven_sys_u),
            ("V_ar_pul".to_string(), p.c_ar_pul * s[P_AR_PUL] + p.v_ar_pul_u),
            ("V_ven_pul".to_string(), p.c_ven_pul * s[P_VEN_PUL] + p.v_ven_pul_u),
        ];
        let total = volumes.iter().map(|(_, volume)| volume).sum();
        volumes.push(("V_all".to_string(), total));
        volumes
    }

    fn cycle_period(&self) -> Option<f64> {
        Some(self.parameters.t_cycl)
    }

    fn end_diastole(&self) -> Option<f64> {
        Some(self.parameters.t_ed)
    }

    fn end_systole(&self) -> Option<f64> {
        Some(self.parameters.t_es)
    }

    fn interface_slots(&self) -> Vec<usize> {
        self.interface_chambers()
            .map(|chamber| chamber.slot())
            .collect()
    }

    fn interface_pressure_names(&self) -> Vec<String> {
        self.interface_chambers()
            .map(|chamber| chamber.pressure_name())
            .collect()
    }

    fn set_interface_pressures(&mut self, pressures: &[f64]) -> eyre::Result<()> {
        let chambers: Vec<Chamber> = self.interface_chambers().collect();
        if pressures.len() != chambers.len() {
            bail!(
                "expected {} interface pressures, got {}",
                chambers.len(),
                pressures.len()
            );
        }
        for (chamber, pressure) in chambers.into_iter().zip(pressures) {
            self.interface_pressures[Self::chamber_index(chamber)] = *pressure;
        }
        Ok(())
    }

    fn apply_perturbation(&mut self, perturbation: &Perturbation) -> eyre::Result<()> {
        let (r_min, r_max) = self.valve_resistances_mut(perturbation.valve);
        match perturbation.kind {
            PerturbationKind::Stenosis { factor } => {
                if !(factor > 0.0) {
                    bail!("stenosis factor must be positive, got {}", factor);
                }
                *r_min *= factor;
            }
            PerturbationKind::Regurgitation { r_max: value } => {
                if !(value > 0.0) {
                    bail!("regurgitation resistance must be positive, got {}", value);
                }
                *r_max = value;
            }
        }
        Ok(())
    }
}
