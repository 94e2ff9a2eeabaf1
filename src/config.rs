//! Configuration document access and typed deployment settings.
//!
//! The configuration *loader* is an external collaborator: a host
//! application parses its deployment file and hands this crate the resulting
//! nested key-value document. [`ConfigDocument`] wraps that document with
//! path-based accessors; the typed settings structs are extracted only after
//! the schema validator has accepted the section they belong to.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{MooringError, Result};

/// Read-only nested configuration document for one processing campaign.
///
/// Never mutated; validation happens up front through
/// [`crate::app::services::schema_validator`].
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Walk a `->`-style key path through nested mappings.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut node = &self.root;
        for key in path {
            node = node.as_object()?.get(*key)?;
        }
        Some(node)
    }

    fn typed<T: for<'de> Deserialize<'de>>(&self, path: &[&str]) -> Result<T> {
        let node = self.get(path).ok_or_else(|| {
            MooringError::configuration(format!(
                "The {} node is missing in the configuration file",
                path.join("->")
            ))
        })?;
        serde_json::from_value(node.clone()).map_err(|err| {
            MooringError::configuration(format!("{} is invalid: {err}", path.join("->")))
        })
    }

    /// Filesystem prefix every relative path in the document is joined onto.
    pub fn prefix(&self) -> Result<&str> {
        self.get(&["prefix"])
            .and_then(Value::as_str)
            .ok_or_else(|| {
                MooringError::configuration(
                    "The prefix node is missing in the configuration file",
                )
            })
    }

    /// Join a document-relative path onto the campaign prefix.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(format!("{}{relative}", self.prefix()?)))
    }

    /// Instrument sections selected for conversion.
    pub fn section_run(&self) -> Vec<String> {
        self.get(&["SectionRun"])
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Instrument sections selected for valid-time-window extraction.
    pub fn intercept_section_run(&self) -> Vec<String> {
        self.get(&["Preprocess", "intercept", "sectionRun"])
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn time_options(&self) -> Result<TimeOptions> {
        Ok(TimeOptions {
            window_minutes: self
                .get(&["time_window"])
                .and_then(Value::as_f64)
                .ok_or_else(|| MooringError::configuration("time_window is invalid"))?,
            units: self.typed(&["time_units"])?,
            calendar: self.typed(&["calendar"])?,
        })
    }

    pub fn output_options(&self) -> Result<OutputOptions> {
        Ok(OutputOptions {
            zlib: self.typed(&["zlib"])?,
            complevel: self.typed(&["complevel"])?,
            author: self.typed(&["author"])?,
            email: self.typed(&["email"])?,
        })
    }

    pub fn station_info(&self, station: &str) -> Result<StationInfo> {
        self.typed(&["StationInfo", station])
    }

    pub fn adcp_settings(&self) -> Result<AdcpSettings> {
        self.typed(&["Preprocess", "adcpInfo"])
    }

    pub fn ctd_settings(&self) -> Result<CtdSettings> {
        self.typed(&["Preprocess", "ctdInfo"])
    }

    pub fn td_settings(&self) -> Result<TdSettings> {
        self.typed(&["Preprocess", "tdInfo"])
    }

    /// Per-station raw-export entries for the profiler section.
    pub fn adcp_inputs(&self) -> Result<HashMap<String, AdcpPathEntry>> {
        self.typed(&["OriginalData", "adcp"])
    }

    /// Per-station path maps (`OriginalData`/`PreprocessData` style nodes).
    pub fn path_map(&self, path: &[&str]) -> Result<HashMap<String, String>> {
        self.typed(path)
    }

    /// Converted datasets the sea-surface-line pass reads.
    pub fn ssl_detect_paths(&self) -> Result<HashMap<String, String>> {
        self.typed(&["Preprocess", "adcpSslDetect"])
    }

    /// Destinations the sea-surface-line pass writes.
    pub fn ssl_save_paths(&self) -> Result<HashMap<String, String>> {
        self.typed(&["Preprocess", "adcpSavePath"])
    }

    /// Debug mode suppresses the rewrite step of the sea-surface-line pass.
    pub fn debug_flag(&self) -> bool {
        self.get(&["Preprocess", "debug"])
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Averaging window and time-axis encoding shared by every converter.
#[derive(Debug, Clone)]
pub struct TimeOptions {
    /// Averaging window in minutes.
    pub window_minutes: f64,
    /// CF-style units string, e.g. `"milliseconds since 2018-07-01 00:00:00"`.
    pub units: String,
    /// Calendar label recorded on every time variable.
    pub calendar: String,
}

/// Output compression and provenance attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputOptions {
    pub zlib: bool,
    pub complevel: u32,
    pub author: String,
    pub email: String,
}

/// Station coordinates and the instrument tags deployed there
/// (`"ADCP-RDI"`, `"TD-RBR"`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct StationInfo {
    pub lon: f64,
    pub lat: f64,
    pub observe_instrument: Vec<String>,
}

/// Raw-export file set of one profiler deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct AdcpPathEntry {
    pub mat: String,
    pub beam: String,
    pub file_details: String,
    pub deployment: String,
}

/// Profiler section settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AdcpSettings {
    /// Height of the instrument head above the sea bed (m).
    pub adcp_hgt: f64,
    /// Instrument clock offset from UTC in hours; `None` defers to the
    /// instrument metadata.
    #[serde(default)]
    pub time_offset: Option<f64>,
    /// Minimum acceptable four-beam percent-good average.
    pub pg_std: f64,
    /// Whether the zero-drift correction runs during conversion.
    pub correct0drift: bool,
    /// Sentinel value marking missing samples in beam exports.
    pub beam_fill_value: f64,
    /// Per-station depth-rate threshold separating deployment transients
    /// from valid data (m per sample).
    pub valid_dep_dif: HashMap<String, f64>,
    /// Per-station despiking thresholds; only required by the
    /// sea-surface-line pass.
    #[serde(default)]
    pub filter: HashMap<String, VelocityFilter>,
}

/// Per-component sample-to-sample jump thresholds and the minimum valid run
/// duration for one station.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VelocityFilter {
    pub u: f64,
    pub v: f64,
    pub w: f64,
    /// Minimum span, in averaged samples, a valid run must cover.
    pub scatter: usize,
}

/// CTD section settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CtdSettings {
    /// Downcast depth-bin size (m).
    pub bin_size: f64,
    /// Per-station reference elevation dataset (converted profiler output).
    pub ref_data: HashMap<String, String>,
    #[serde(default)]
    pub time_offset: Option<f64>,
}

/// Thermistor-depth section settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TdSettings {
    pub valid_dep_dif: HashMap<String, f64>,
    pub correct0drift: bool,
    #[serde(default)]
    pub time_offset: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> ConfigDocument {
        ConfigDocument::new(json!({
            "prefix": "/data/campaign/",
            "time_window": 10.0,
            "time_units": "milliseconds since 2018-07-01 00:00:00",
            "calendar": "standard",
            "SectionRun": ["adcp", "td"],
            "author": "Survey Team",
            "email": "survey@example.com",
            "zlib": true,
            "complevel": 4,
            "StationInfo": {
                "S1": {"lon": 121.5, "lat": 31.2, "observe_instrument": ["ADCP-RDI", "TD-RBR"]}
            },
            "Preprocess": {
                "adcpInfo": {
                    "adcp_hgt": 0.5,
                    "time_offset": 0,
                    "pg_std": 80,
                    "correct0drift": true,
                    "beam_fill_value": -32768,
                    "valid_dep_dif": {"S1": 0.2}
                }
            }
        }))
    }

    #[test]
    fn path_walk_reaches_nested_values() {
        let doc = sample_document();
        assert_eq!(
            doc.get(&["Preprocess", "adcpInfo", "pg_std"])
                .and_then(Value::as_f64),
            Some(80.0)
        );
        assert!(doc.get(&["Preprocess", "ctdInfo"]).is_none());
    }

    #[test]
    fn adcp_settings_deserialize() {
        let doc = sample_document();
        let settings = doc.adcp_settings().unwrap();
        assert_eq!(settings.time_offset, Some(0.0));
        assert_eq!(settings.valid_dep_dif["S1"], 0.2);
        assert!(settings.filter.is_empty());
    }

    #[test]
    fn missing_section_is_configuration_error() {
        let doc = sample_document();
        let err = doc.ctd_settings().unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("Preprocess->ctdInfo"));
    }

    #[test]
    fn resolve_joins_prefix() {
        let doc = sample_document();
        assert_eq!(
            doc.resolve("raw/S1.mat").unwrap(),
            PathBuf::from("/data/campaign/raw/S1.mat")
        );
    }
}
