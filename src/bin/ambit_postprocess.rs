use ambit::flow0d::{read_initial_conditions, Chamber};
use ambit::postprocess::{postprocess_volumes, PostprocessSettings};
use clap::Parser;
use eyre::bail;
use std::path::PathBuf;

/// Integrates chamber volumes from the flux results of a closed-loop 0D run.
#[derive(Parser)]
#[command(name = "ambit-postprocess")]
struct Args {
    /// Directory holding the result files
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Simulation name of the results, as in results_<prefix>_q_vin_l.txt
    #[arg(long)]
    prefix: String,

    /// Initial left ventricular volume
    #[arg(long)]
    v0_lv: Option<f64>,

    /// Initial right ventricular volume
    #[arg(long)]
    v0_rv: Option<f64>,

    /// Initial left atrial volume
    #[arg(long)]
    v0_la: Option<f64>,

    /// Initial right atrial volume
    #[arg(long)]
    v0_ra: Option<f64>,

    /// Cycle duration, enables EDV/ESV/SV/EF of the last cycle
    #[arg(long)]
    t_cycl: Option<f64>,

    /// Initial conditions of the run, anchors the volumes at t = 0
    #[arg(long)]
    initial_file: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let initial_volumes: Vec<(Chamber, f64)> = [
        (Chamber::Lv, args.v0_lv),
        (Chamber::Rv, args.v0_rv),
        (Chamber::La, args.v0_la),
        (Chamber::Ra, args.v0_ra),
    ]
    .into_iter()
    .filter_map(|(chamber, v0)| v0.map(|v0| (chamber, v0)))
    .collect();
    if initial_volumes.is_empty() {
        bail!("no initial chamber volume given, nothing to do");
    }

    let settings = PostprocessSettings {
        path: args.path,
        prefix: args.prefix,
        initial_volumes,
        period: args.t_cycl,
        initial_state: args.initial_file.map(|path| read_initial_conditions(path)).transpose()?,
    };
    let results = postprocess_volumes(&settings)?;
    for (chamber, function) in results {
        match function {
            Some(f) => println!(
                "{}: EDV {:.6} ESV {:.6} SV {:.6} EF {:.4}",
                chamber.short_name(),
                f.edv,
                f.esv,
                f.stroke_volume,
                f.ejection_fraction
            ),
            None => println!("{}: volume written", chamber.short_name()),
        }
    }
    Ok(())
}
