//! RBR logger export reading.
//!
//! RBR instruments export a deployment as text sidecars sharing one path
//! prefix: `<prefix>_data.txt` (CSV with a `Time` column), `<prefix>_metadata.txt`
//! (a JSON document), and for CTD casts `<prefix>_annotations_profile.txt`
//! (cast intervals). Variable naming follows the logger channel names.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

use crate::error::{MooringError, Result};

/// Logger channels handled by the thermistor-depth converter:
/// (column name, variable name, units).
pub const TD_VARIABLES: &[(&str, &str, &str)] = &[
    ("Depth", "dep", "m"),
    ("Temperature", "temp", "degrees_C"),
    ("Pressure", "pres", "dbar"),
];

/// Logger channels handled by the CTD converter.
pub const CTD_VARIABLES: &[(&str, &str, &str)] = &[
    ("Depth", "dep", "m"),
    ("Temperature", "temp", "degrees_C"),
    ("Pressure", "pres", "dbar"),
    ("Conductivity", "cond", "mS/cm"),
    ("Salinity", "sal", "PSU"),
];

/// One parsed data export: timestamp strings plus named numeric columns.
#[derive(Debug, Clone, Default)]
pub struct RbrData {
    pub time: Vec<String>,
    pub columns: HashMap<String, Vec<f64>>,
}

impl RbrData {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// One cast interval from the profile annotations.
#[derive(Debug, Clone)]
pub struct ProfileInterval {
    pub start: String,
    pub end: String,
    pub kind: String,
}

fn data_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}_data.txt"))
}

fn metadata_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}_metadata.txt"))
}

fn annotations_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}_annotations_profile.txt"))
}

/// Read the data sidecar of one export prefix.
pub fn read_data(prefix: &str) -> Result<RbrData> {
    let path = data_path(prefix);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();
    let time_index = headers.iter().position(|h| h == "Time").ok_or_else(|| {
        MooringError::invalid_export(&path, "data export lacks a Time column")
    })?;

    let mut data = RbrData::default();
    for header in &headers {
        if header != "Time" {
            data.columns.insert(header.clone(), Vec::new());
        }
    }
    for record in reader.records() {
        let record = record?;
        data.time.push(
            record
                .get(time_index)
                .unwrap_or_default()
                .trim()
                .to_owned(),
        );
        for (index, header) in headers.iter().enumerate() {
            if index == time_index {
                continue;
            }
            let value = record
                .get(index)
                .and_then(|cell| cell.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            data.columns
                .get_mut(header)
                .expect("column allocated from header")
                .push(value);
        }
    }
    debug!(prefix, records = data.len(), "logger data export read");
    Ok(data)
}

/// Read the JSON metadata sidecar.
pub fn read_metadata(prefix: &str) -> Result<Value> {
    let path = metadata_path(prefix);
    let text = std::fs::read_to_string(&path)?;
    serde_json::from_str(&text)
        .map_err(|err| MooringError::invalid_export(&path, format!("metadata is not JSON: {err}")))
}

/// Read the cast annotations sidecar.
pub fn read_profile_annotations(prefix: &str) -> Result<Vec<ProfileInterval>> {
    let path = annotations_path(prefix);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
    let kind_index = headers.iter().position(|h| h == "Type").ok_or_else(|| {
        MooringError::invalid_export(&path, "annotations lack a Type column")
    })?;

    let mut intervals = Vec::new();
    for record in reader.records() {
        let record = record?;
        intervals.push(ProfileInterval {
            start: record.get(0).unwrap_or_default().trim().to_owned(),
            end: record.get(1).unwrap_or_default().trim().to_owned(),
            kind: record.get(kind_index).unwrap_or_default().trim().to_owned(),
        });
    }
    Ok(intervals)
}

/// Search the metadata tree for a declared UTC offset, at any nesting level
/// the logger software is known to place it.
pub fn offset_from_utc(meta: &Value) -> Option<f64> {
    let map = meta.as_object()?;
    for value in map.values() {
        match value {
            Value::Object(inner) => {
                if let Some(offset) = inner.get("offsetfromutc").and_then(Value::as_f64) {
                    return Some(offset);
                }
            }
            Value::Array(items) => {
                for item in items {
                    if let Some(offset) = item.get("offsetfromutc").and_then(Value::as_f64) {
                        return Some(offset);
                    }
                }
            }
            _ => {}
        }
    }
    None
}
