//! Per-beam velocity CSV reading.
//!
//! Each beam of the profiler head exports one CSV whose file name carries
//! the beam digit. Rows are ensembles, the first column is the ensemble
//! number, remaining columns are per-bin along-beam velocities in mm/s with
//! a configured fill value marking missing samples.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::debug;

use crate::constants::{BEAM_COUNT, MM_PER_M};
use crate::error::{MooringError, Result};

/// Beam index (1-4) encoded in a file name: the last digit of the stem.
pub fn detect_beam_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let digit = stem.chars().rev().find(|c| c.is_ascii_digit())?;
    let index = digit.to_digit(10)? as usize;
    (1..=BEAM_COUNT).contains(&index).then_some(index)
}

/// Read the four beam files matching `<prefix>*`.
///
/// Missing samples (the fill value) become NaN and velocities convert to
/// m/s. Fails when any beam is absent or a file has ragged rows.
pub fn read_beam_set(prefix: &str, fill_value: f64) -> Result<[Array2<f64>; 4]> {
    let mut paths: [Option<PathBuf>; 4] = Default::default();
    for entry in glob::glob(&format!("{prefix}*"))
        .map_err(|err| MooringError::configuration(format!("invalid beam pattern: {err}")))?
    {
        let path = entry.map_err(|err| {
            MooringError::configuration(format!("unreadable beam path: {err}"))
        })?;
        if let Some(index) = detect_beam_index(&path) {
            paths[index - 1] = Some(path);
        }
    }

    let mut beams: Vec<Array2<f64>> = Vec::with_capacity(BEAM_COUNT);
    for (i, slot) in paths.into_iter().enumerate() {
        let path = slot.ok_or_else(|| {
            MooringError::configuration(format!("beam {} file not found under {prefix}", i + 1))
        })?;
        beams.push(read_beam_file(&path, fill_value)?);
    }
    Ok(beams.try_into().expect("exactly four beams collected"))
}

fn read_beam_file(path: &Path, fill_value: f64) -> Result<Array2<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)?;

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        // First column is the ensemble number, not a velocity.
        let row: Vec<f64> = record
            .iter()
            .skip(1)
            .map(|cell| {
                let value: f64 = cell.trim().parse().unwrap_or(f64::NAN);
                if value == fill_value {
                    f64::NAN
                } else {
                    value / MM_PER_M
                }
            })
            .collect();
        rows.push(row);
    }

    let nrows = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if rows.iter().any(|row| row.len() != ncols) {
        return Err(MooringError::invalid_export(path, "ragged beam rows"));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let beam = Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|err| MooringError::invalid_export(path, err.to_string()))?;
    debug!(path = %path.display(), shape = ?beam.dim(), "beam file read");
    Ok(beam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn beam_index_is_last_stem_digit() {
        assert_eq!(detect_beam_index(Path::new("/x/STA1_beam3.csv")), Some(3));
        assert_eq!(detect_beam_index(Path::new("mooring_b2.txt")), Some(2));
        assert_eq!(detect_beam_index(Path::new("beam9.csv")), None);
        assert_eq!(detect_beam_index(Path::new("beam.csv")), None);
    }

    #[test]
    fn fill_values_become_nan_and_units_convert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sta_beam1.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Ens,Bin1,Bin2").unwrap();
        writeln!(f, "1,1000,-32768").unwrap();
        writeln!(f, "2,-500,250").unwrap();
        drop(f);

        let beam = read_beam_file(&path, -32768.0).unwrap();
        assert_eq!(beam.dim(), (2, 2));
        assert_eq!(beam[[0, 0]], 1.0);
        assert!(beam[[0, 1]].is_nan());
        assert_eq!(beam[[1, 0]], -0.5);
        assert_eq!(beam[[1, 1]], 0.25);
    }

    #[test]
    fn missing_beam_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("sta_beam").to_string_lossy().into_owned();
        let err = read_beam_set(&prefix, -32768.0).unwrap_err();
        assert!(err.is_recoverable());
    }
}
