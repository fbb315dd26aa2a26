//! Chamber volumes and ventricular function indicators from flux results of closed-loop runs.
use crate::flow0d::Chamber;
use crate::io::{read_series, results_path, SeriesWriter};
use eyre::{bail, eyre, Context};
use itertools::Itertools;
use log::info;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

impl Chamber {
    /// Names of the fluxes into and out of the chamber.
    pub fn flux_names(&self) -> (&'static str, &'static str) {
        match self {
            Chamber::Lv => ("q_vin_l", "q_vout_l"),
            Chamber::Rv => ("q_vin_r", "q_vout_r"),
            Chamber::La => ("q_ven_pul", "q_vin_l"),
            Chamber::Ra => ("q_ven_sys", "q_vin_r"),
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Chamber::Lv => "lv",
            Chamber::Rv => "rv",
            Chamber::La => "la",
            Chamber::Ra => "ra",
        }
    }
}

/// Integrates $\dot V = q_{in} - q_{out}$ with the trapezoidal rule, starting from `v0`.
///
/// `v0` is the volume at the first time point. Both flux series must share their time points.
pub fn integrate_volume(inflow: &[(f64, f64)], outflow: &[(f64, f64)], v0: f64) -> eyre::Result<Vec<(f64, f64)>> {
    if inflow.len() != outflow.len() {
        bail!(
            "flux series differ in length ({} and {})",
            inflow.len(),
            outflow.len()
        );
    }
    let net: Vec<(f64, f64)> = inflow
        .iter()
        .zip(outflow)
        .map(|(&(t_in, q_in), &(t_out, q_out))| {
            if (t_in - t_out).abs() > 1e-12 * t_in.abs().max(1.0) {
                bail!("flux series have different time points {} and {}", t_in, t_out);
            }
            Ok((t_in, q_in - q_out))
        })
        .collect::<eyre::Result<_>>()?;

    let mut volumes = Vec::with_capacity(net.len());
    let mut volume = v0;
    if let Some(&(t0, _)) = net.first() {
        volumes.push((t0, volume));
    }
    for ((t_a, q_a), (t_b, q_b)) in net.iter().copied().tuple_windows() {
        volume += 0.5 * (t_b - t_a) * (q_a + q_b);
        volumes.push((t_b, volume));
    }
    Ok(volumes)
}

/// End-diastolic and end-systolic volume, stroke volume and ejection fraction of one cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChamberFunction {
    pub edv: f64,
    pub esv: f64,
    pub stroke_volume: f64,
    pub ejection_fraction: f64,
}

/// Evaluates the chamber function over the last cycle of length `period` in the volume series.
pub fn chamber_function(volumes: &[(f64, f64)], period: f64) -> Option<ChamberFunction> {
    let t_end = volumes.last()?.0;
    let (esv, edv) = volumes
        .iter()
        .filter(|(t, _)| *t >= t_end - period - 1e-12)
        .map(|(_, v)| *v)
        .minmax()
        .into_option()?;
    let stroke_volume = edv - esv;
    Some(ChamberFunction {
        edv,
        esv,
        stroke_volume,
        ejection_fraction: if edv.abs() > 0.0 { stroke_volume / edv } else { 0.0 },
    })
}

/// Settings of a post-processing run.
#[derive(Clone, Debug, PartialEq)]
pub struct PostprocessSettings {
    pub path: PathBuf,
    pub prefix: String,
    /// Initial volumes per chamber; chambers without an initial volume are skipped.
    pub initial_volumes: Vec<(Chamber, f64)>,
    /// Cycle duration for the function indicators, none if absent.
    pub period: Option<f64>,
    /// Initial state of the run, keyed by `<variable>_0`. Result files start at the first
    /// step, so without it the initial volumes are taken to hold at the first result time
    /// instead of at `t = 0`.
    pub initial_state: Option<BTreeMap<String, f64>>,
}

/// Computes and writes `results_<prefix>_V_<chamber>_post.txt` for every chamber with an
/// initial volume and returns the chamber function of the last cycle.
pub fn postprocess_volumes(settings: &PostprocessSettings) -> eyre::Result<Vec<(Chamber, Option<ChamberFunction>)>> {
    let mut results = Vec::new();
    for &(chamber, v0) in &settings.initial_volumes {
        let (inflow_name, outflow_name) = chamber.flux_names();
        let read = |name: &str| -> eyre::Result<Vec<(f64, f64)>> {
            let mut series = read_flux(&settings.path, &settings.prefix, name)?;
            if let Some(state) = &settings.initial_state {
                let key = format!("{}_0", name);
                let q0 = state
                    .get(&key)
                    .copied()
                    .ok_or_else(|| eyre!("initial state lacks {}", key))?;
                series.insert(0, (0.0, q0));
            }
            Ok(series)
        };
        let volumes = integrate_volume(&read(inflow_name)?, &read(outflow_name)?, v0)
            .wrap_err_with(|| format!("failed to integrate volume of chamber {}", chamber.short_name()))?;

        let name = format!("V_{}_post", chamber.short_name());
        let mut writer = SeriesWriter::create(&settings.path, &settings.prefix, &[name], false)?;
        for &(t, volume) in &volumes {
            writer.write(t, &[volume])?;
        }
        writer.flush()?;

        let function = settings
            .period
            .and_then(|period| chamber_function(&volumes, period));
        if let Some(f) = &function {
            info!(
                "{}: EDV = {:.4}, ESV = {:.4}, SV = {:.4}, EF = {:.4}",
                chamber.short_name(),
                f.edv,
                f.esv,
                f.stroke_volume,
                f.ejection_fraction
            );
        }
        results.push((chamber, function));
    }
    Ok(results)
}

fn read_flux(dir: &Path, prefix: &str, name: &str) -> eyre::Result<Vec<(f64, f64)>> {
    read_series(results_path(dir, prefix, name)).wrap_err_with(|| format!("missing flux results {}", name))
}
