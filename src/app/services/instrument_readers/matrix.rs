//! Profiler matrix export (MAT-5) reading.
//!
//! The vendor software exports one MAT file per deployment: `Ser*` arrays
//! hold per-ensemble series and per-bin planes, `RDI*` scalars hold setup
//! metadata. Values arrive column-major and are transposed here; character
//! arrays the container cannot represent are simply absent.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;

use ndarray::Array2;
use tracing::debug;

use crate::app::models::{MetaValue, VariableAttrs};
use crate::error::{MooringError, Result};

/// Built-in mapping from export array names to output variable names,
/// descriptive attributes, and unit scale divisors.
pub const MATRIX_VARIABLES: &[(&str, &str, &str, &str, f64)] = &[
    // (export name, variable, long_name, units, scale divisor)
    ("SerEnsembles", "ens", "Ensemble number", "1", 1.0),
    ("SerBins", "bins", "Bin number", "1", 1.0),
    ("AnDepthmm", "dep", "Transducer depth", "m", 1000.0),
    ("AnT100thDeg", "temp", "Water temperature", "degrees_C", 100.0),
    ("AnH100thDeg", "heading", "Instrument heading", "degrees", 100.0),
    ("AnP100thDeg", "pitch", "Instrument pitch", "degrees", 100.0),
    ("AnR100thDeg", "roll", "Instrument roll", "degrees", 100.0),
    ("AnOrienUP", "orient_up", "Upward orientation flag", "1", 1.0),
    ("AnBatt", "batt", "Battery level", "counts", 1.0),
    ("SerEmmpersec", "u", "Eastward sea water velocity", "m/s", 1000.0),
    ("SerNmmpersec", "v", "Northward sea water velocity", "m/s", 1000.0),
    ("SerVmmpersec", "w", "Upward sea water velocity", "m/s", 1000.0),
    ("SerErmmpersec", "err_vel", "Error velocity", "m/s", 1000.0),
    ("SerMagmmpersec", "mag", "Current speed", "m/s", 1000.0),
    ("SerDir10thDeg", "dir", "Current direction", "degrees", 10.0),
    ("SerEA1cnt", "ea_bm1", "Echo amplitude of beam 1", "counts", 1.0),
    ("SerEA2cnt", "ea_bm2", "Echo amplitude of beam 2", "counts", 1.0),
    ("SerEA3cnt", "ea_bm3", "Echo amplitude of beam 3", "counts", 1.0),
    ("SerEA4cnt", "ea_bm4", "Echo amplitude of beam 4", "counts", 1.0),
    ("SerEAAcnt", "ea_ave", "Average echo amplitude", "counts", 1.0),
    ("SerC1cnt", "cor_bm1", "Correlation magnitude of beam 1", "counts", 1.0),
    ("SerC2cnt", "cor_bm2", "Correlation magnitude of beam 2", "counts", 1.0),
    ("SerC3cnt", "cor_bm3", "Correlation magnitude of beam 3", "counts", 1.0),
    ("SerC4cnt", "cor_bm4", "Correlation magnitude of beam 4", "counts", 1.0),
    ("SerCAcnt", "cor_ave", "Average correlation magnitude", "counts", 1.0),
    ("SerPG1", "pg_bm1", "Percent good of beam 1", "percent", 1.0),
    ("SerPG2", "pg_bm2", "Percent good of beam 2", "percent", 1.0),
    ("SerPG3", "pg_bm3", "Percent good of beam 3", "percent", 1.0),
    ("SerPG4", "pg_bm4", "Percent good of beam 4", "percent", 1.0),
    ("AnWRLat", "wr_lat", "Water reference latitude flag", "1", 1.0),
];

/// Attributes for one mapped export variable.
pub fn variable_attrs(variable: &str) -> VariableAttrs {
    MATRIX_VARIABLES
        .iter()
        .find(|(_, name, ..)| *name == variable)
        .map(|(_, _, long_name, units, _)| VariableAttrs::new(*long_name, *units))
        .unwrap_or_default()
}

/// One numeric array from the export, row-major.
#[derive(Debug, Clone)]
pub struct MatrixArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl MatrixArray {
    /// Squeeze a row- or column-shaped array into a 1-D series.
    pub fn vector(&self) -> Option<Vec<f64>> {
        match self.shape.len() {
            1 => Some(self.data.clone()),
            2 if self.shape[0] == 1 || self.shape[1] == 1 => Some(self.data.clone()),
            _ => None,
        }
    }

    /// First column of a wide series (`[:, 0]` access).
    pub fn first_column(&self) -> Vec<f64> {
        match self.shape.len() {
            2 if self.shape[1] > 1 && self.shape[0] > 1 => {
                let cols = self.shape[1];
                self.data.iter().step_by(cols).copied().collect()
            }
            _ => self.data.clone(),
        }
    }

    /// Squeeze into a 2-D plane; 1-D arrays are errors here.
    pub fn plane(&self) -> Option<Array2<f64>> {
        if self.shape.len() == 2 && self.shape[0] > 1 && self.shape[1] > 1 {
            Array2::from_shape_vec((self.shape[0], self.shape[1]), self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Scalar content of a 1x1 array.
    pub fn scalar(&self) -> Option<f64> {
        if self.data.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }
}

/// Parsed profiler matrix export.
#[derive(Debug, Clone, Default)]
pub struct MatrixExport {
    arrays: HashMap<String, MatrixArray>,
    /// Numeric `RDI*` setup metadata, in export order.
    pub metadata: Vec<(String, MetaValue)>,
}

impl MatrixExport {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mat = matfile::MatFile::parse(std::io::BufReader::new(file)).map_err(|err| {
            MooringError::MatrixParsing {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;

        let mut export = Self::default();
        for array in mat.arrays() {
            let shape: Vec<usize> = array.size().to_vec();
            let data = column_major_to_row_major(&numeric_to_f64(array.data()), &shape);
            let name = array.name().to_owned();
            if name.starts_with("RDI") {
                if let Some(scalar) = data.first().filter(|_| data.len() == 1) {
                    let value = if scalar.fract() == 0.0 {
                        MetaValue::Integer(*scalar as i64)
                    } else {
                        MetaValue::Number(*scalar)
                    };
                    export.metadata.push((name.clone(), value));
                }
            }
            export.arrays.insert(name, MatrixArray { shape, data });
        }
        debug!(path = %path.display(), arrays = export.arrays.len(), "matrix export read");
        Ok(export)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    pub fn array(&self, name: &str) -> Option<&MatrixArray> {
        self.arrays.get(name)
    }

    /// Numeric setup attribute (`RDIBin1Mid`, `RDIBinSize`, ...).
    pub fn meta_number(&self, name: &str) -> Option<f64> {
        self.arrays.get(name).and_then(MatrixArray::scalar)
    }
}

fn numeric_to_f64(data: &matfile::NumericData) -> Vec<f64> {
    use matfile::NumericData as Nd;
    match data {
        Nd::Double { real, .. } => real.clone(),
        Nd::Single { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::Int8 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::UInt8 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::Int16 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::UInt16 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::Int32 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::UInt32 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::Int64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        Nd::UInt64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
    }
}

fn column_major_to_row_major(data: &[f64], shape: &[usize]) -> Vec<f64> {
    if shape.len() != 2 || shape[0] <= 1 || shape[1] <= 1 {
        return data.to_vec();
    }
    let (rows, cols) = (shape[0], shape[1]);
    let mut out = vec![0.0; data.len()];
    for col in 0..cols {
        for row in 0..rows {
            out[row * cols + col] = data[col * rows + row];
        }
    }
    out
}

/// Scan a companion text file for a `yy/mm/dd`-style first-ensemble date.
///
/// Used when the matrix export carries no per-record calendar fields and its
/// character-typed ensemble date is unavailable.
pub fn first_ensemble_date(detail_path: &Path) -> Result<Option<chrono::NaiveDate>> {
    let pattern = regex::Regex::new(r"(\d{2})/(\d{2})/(\d{2})").expect("static regex");
    let file = File::open(detail_path)?;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if let Some(caps) = pattern.captures(&line) {
            let year = 2000 + caps[1].parse::<i32>().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            let day: u32 = caps[3].parse().unwrap_or(0);
            if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, day) {
                return Ok(Some(date));
            }
        }
    }
    Ok(None)
}
