//! Plain-text result, checkpoint and initial data files.
//!
//! Time series are stored as one file per quantity, `results_<simname>_<name>.txt`, with one
//! `t value` line per output step. Checkpoints store one value per line.
use eyre::{eyre, Context};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn results_path(dir: impl AsRef<Path>, simname: &str, name: &str) -> PathBuf {
    dir.as_ref().join(format!("results_{}_{}.txt", simname, name))
}

pub fn checkpoint_path(dir: impl AsRef<Path>, simname: &str, tag: &str, step: usize) -> PathBuf {
    dir.as_ref()
        .join(format!("checkpoint_{}_{}_{}.txt", simname, tag, step))
}

pub fn initial_data_path(dir: impl AsRef<Path>, simname: &str, cycle: usize) -> PathBuf {
    dir.as_ref()
        .join(format!("initial_data_{}_cycle{}.txt", simname, cycle))
}

/// Writes a set of named time series, one file per name.
#[derive(Debug)]
pub struct SeriesWriter {
    names: Vec<String>,
    files: Vec<BufWriter<File>>,
}

impl SeriesWriter {
    /// Opens (or, with `append`, continues) the result files of the given quantities.
    pub fn create(dir: impl AsRef<Path>, simname: &str, names: &[String], append: bool) -> eyre::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create output directory {}", dir.display()))?;
        let mut files = Vec::with_capacity(names.len());
        for name in names {
            let path = results_path(dir, simname, name);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&path)
                .wrap_err_with(|| format!("failed to open {}", path.display()))?;
            files.push(BufWriter::new(file));
        }
        Ok(Self {
            names: names.to_vec(),
            files,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn write(&mut self, t: f64, values: &[f64]) -> eyre::Result<()> {
        if values.len() != self.files.len() {
            return Err(eyre!(
                "expected {} output values, got {}",
                self.files.len(),
                values.len()
            ));
        }
        for ((file, name), value) in self.files.iter_mut().zip(&self.names).zip(values) {
            writeln!(file, "{:.16E} {:.16E}", t, value).wrap_err_with(|| format!("failed to write result {}", name))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> eyre::Result<()> {
        for file in &mut self.files {
            file.flush().wrap_err("failed to flush result file")?;
        }
        Ok(())
    }
}

/// Reads a `t value` time series.
pub fn read_series(path: impl AsRef<Path>) -> eyre::Result<Vec<(f64, f64)>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let mut columns = line.split_whitespace().map(str::parse::<f64>);
            match (columns.next(), columns.next()) {
                (Some(Ok(t)), Some(Ok(value))) => Ok((t, value)),
                _ => Err(eyre!("malformed line {} in {}: {:?}", i + 1, path.display(), line)),
            }
        })
        .collect()
}

/// Writes one value per line.
pub fn write_vector(path: impl AsRef<Path>, values: &DVector<f64>) -> eyre::Result<()> {
    let path = path.as_ref();
    let mut file =
        BufWriter::new(File::create(path).wrap_err_with(|| format!("failed to create {}", path.display()))?);
    for value in values.iter() {
        writeln!(file, "{:.16E}", value)?;
    }
    file.flush()
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

pub fn read_vector(path: impl AsRef<Path>) -> eyre::Result<DVector<f64>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let values = content
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .wrap_err_with(|| format!("invalid number {:?} in {}", token, path.display()))
        })
        .collect::<eyre::Result<Vec<_>>>()?;
    Ok(DVector::from_vec(values))
}

/// Writes `name value` lines.
pub fn write_named_values<'a>(
    path: impl AsRef<Path>,
    values: impl IntoIterator<Item = (&'a str, f64)>,
) -> eyre::Result<()> {
    let path = path.as_ref();
    let mut file =
        BufWriter::new(File::create(path).wrap_err_with(|| format!("failed to create {}", path.display()))?);
    for (name, value) in values {
        writeln!(file, "{} {:.16E}", name, value)?;
    }
    file.flush()
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

pub fn read_named_values(path: impl AsRef<Path>) -> eyre::Result<BTreeMap<String, f64>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let mut values = BTreeMap::new();
    for (i, line) in content.lines().enumerate() {
        let mut columns = line.split_whitespace();
        match (columns.next(), columns.next()) {
            (None, _) => continue,
            (Some(name), Some(value)) => {
                let value = value
                    .parse::<f64>()
                    .wrap_err_with(|| format!("invalid value on line {} of {}", i + 1, path.display()))?;
                values.insert(name.to_string(), value);
            }
            (Some(_), None) => return Err(eyre!("missing value on line {} of {}", i + 1, path.display())),
        }
    }
    Ok(values)
}
