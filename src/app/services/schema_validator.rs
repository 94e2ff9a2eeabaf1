//! Configuration schema validation.
//!
//! Gates every converter run: a nested configuration document is checked
//! against per-instrument required-key tables and filesystem preconditions
//! before any I/O happens. Validation order is top-level keys, then nested
//! required keys, then per-entry types, then path existence/extension
//! checks. The first failure short-circuits with a path-qualified message;
//! no partial validation state is retained and every failure is recoverable
//! (the caller skips that instrument section and continues).

use std::fmt;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::config::ConfigDocument;
use crate::error::{MooringError, Result};

/// Supported instrument sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Adcp,
    Ctd,
    Td,
}

impl InstrumentKind {
    pub fn section(&self) -> &'static str {
        match self {
            Self::Adcp => "adcp",
            Self::Ctd => "ctd",
            Self::Td => "td",
        }
    }

    pub fn info_node(&self) -> &'static str {
        match self {
            Self::Adcp => "adcpInfo",
            Self::Ctd => "ctdInfo",
            Self::Td => "tdInfo",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

const BASE_KEYS: &[&str] = &[
    "prefix",
    "OriginalData",
    "PreprocessData",
    "time_window",
    "time_units",
    "calendar",
    "StationInfo",
    "Preprocess",
    "SectionRun",
    "author",
    "email",
];

fn config_error(message: String) -> MooringError {
    MooringError::Configuration { message }
}

fn miss_child_node(child: &str, node: &str) -> MooringError {
    config_error(format!(
        "The child node {child} is missing in the node {node}"
    ))
}

fn miss_key(key: &str, node: &str) -> MooringError {
    config_error(format!("The key {key} is missing in the node {node}"))
}

fn invalid_struct(node: &str) -> MooringError {
    config_error(format!("Invalid structure occurs in the node {node}"))
}

fn invalid_value(key: &str, node: &str) -> MooringError {
    config_error(format!("{node}->{key} is invalid"))
}

fn file_detect(path: &Path, ext: Option<&str>, context: &str) -> Result<()> {
    if !path.exists() {
        return Err(config_error(format!(
            "Please input the valid path. {context}"
        )));
    }
    if !path.is_file() {
        return Err(config_error(format!("The path is a directory. {context}")));
    }
    if let Some(ext) = ext {
        if path.extension().and_then(|e| e.to_str()) != Some(ext.trim_start_matches('.')) {
            return Err(config_error(format!("Invalid file. {context}")));
        }
    }
    Ok(())
}

/// Destination check: the directory must exist and the filename must carry
/// the dataset extension.
fn nc_destination_check(prefix: &str, relative: &str, key: &str, node: &str) -> Result<()> {
    let full = format!("{prefix}{relative}");
    let path = Path::new(&full);
    let dir_ok = path.parent().is_some_and(Path::exists);
    if !dir_ok {
        return Err(config_error(format!(
            "The NC file directory corresponding to the key {key} in the node {node} does not \
             exist. Please select a existing directory."
        )));
    }
    if path.extension().and_then(|e| e.to_str()) != Some("nc") {
        return Err(config_error(format!(
            "The NC file extension corresponding to the key {key} in the node {node} is incorrect."
        )));
    }
    Ok(())
}

fn glob_nonempty(pattern: &str) -> bool {
    glob::glob(pattern)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn glob_count(pattern: &str) -> usize {
    glob::glob(pattern)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

/// Validate the document's top-level structure.
pub fn validate_base(doc: &ConfigDocument) -> Result<()> {
    for key in BASE_KEYS {
        if doc.get(&[key]).is_none() {
            return Err(config_error(format!(
                "The {key} node is missing in the configuration file."
            )));
        }
    }
    Ok(())
}

/// Validate one instrument section end to end: info keys, raw-export paths,
/// and output destinations.
pub fn validate_section(doc: &ConfigDocument, kind: InstrumentKind) -> Result<()> {
    validate_base(doc)?;
    match kind {
        InstrumentKind::Adcp => validate_adcp_info(doc)?,
        InstrumentKind::Ctd => validate_ctd_info(doc)?,
        InstrumentKind::Td => validate_td_info(doc)?,
    }
    validate_original_data(doc, kind)?;
    validate_preprocess_paths(doc, kind)?;
    debug!(section = %kind, "configuration section validated");
    Ok(())
}

fn info_node<'a>(doc: &'a ConfigDocument, kind: InstrumentKind) -> Result<&'a Value> {
    doc.get(&["Preprocess", kind.info_node()])
        .ok_or_else(|| miss_child_node(kind.info_node(), "Preprocess"))
}

fn require_numeric_map(value: &Value, key: &str, node: &str) -> Result<()> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid_value(key, node))?;
    let child_node = format!("{node}->{key}");
    for (station, entry) in map {
        if !entry.is_number() {
            return Err(invalid_value(station, &child_node));
        }
    }
    Ok(())
}

fn validate_adcp_info(doc: &ConfigDocument) -> Result<()> {
    let node = "Preprocess->adcpInfo";
    let info = info_node(doc, InstrumentKind::Adcp)?;
    let table: &[(&str, fn(&Value) -> bool)] = &[
        ("adcp_hgt", Value::is_number),
        ("time_offset", Value::is_i64),
        ("pg_std", Value::is_number),
        ("correct0drift", Value::is_boolean),
        ("beam_fill_value", Value::is_number),
        ("valid_dep_dif", Value::is_object),
    ];
    for (key, type_check) in table {
        let value = info
            .get(*key)
            .ok_or_else(|| miss_key(key, node))?;
        if !type_check(value) {
            return Err(invalid_value(key, node));
        }
        if *key == "valid_dep_dif" {
            require_numeric_map(value, key, node)?;
        }
    }
    Ok(())
}

fn validate_ctd_info(doc: &ConfigDocument) -> Result<()> {
    let node = "Preprocess->ctdInfo";
    let info = info_node(doc, InstrumentKind::Ctd)?;
    let prefix = doc.prefix()?;

    let bin_size = info.get("bin_size").ok_or_else(|| miss_key("bin_size", node))?;
    if !bin_size.is_number() {
        return Err(invalid_struct(&format!("{node}->bin_size")));
    }

    let ref_data = info.get("ref_data").ok_or_else(|| miss_key("ref_data", node))?;
    let map = ref_data
        .as_object()
        .ok_or_else(|| invalid_struct(&format!("{node}->ref_data")))?;
    let ref_node = format!("{node}->ref_data");
    for (station, entry) in map {
        let relative = entry
            .as_str()
            .ok_or_else(|| invalid_value(station, &ref_node))?;
        let full = format!("{prefix}{relative}");
        file_detect(
            Path::new(&full),
            Some(".nc"),
            &format!("{ref_node}->{station} is invalid"),
        )?;
    }
    Ok(())
}

fn validate_td_info(doc: &ConfigDocument) -> Result<()> {
    let node = "Preprocess->tdInfo";
    let info = info_node(doc, InstrumentKind::Td)?;
    let table: &[(&str, fn(&Value) -> bool)] = &[
        ("valid_dep_dif", Value::is_object),
        ("correct0drift", Value::is_boolean),
    ];
    for (key, type_check) in table {
        let value = info.get(*key).ok_or_else(|| miss_key(key, node))?;
        if !type_check(value) {
            return Err(invalid_struct(&format!("{node}->{key}")));
        }
        if *key == "valid_dep_dif" {
            require_numeric_map(value, key, node)?;
        }
    }
    Ok(())
}

fn validate_original_data(doc: &ConfigDocument, kind: InstrumentKind) -> Result<()> {
    let section = kind.section();
    let node = format!("OriginalData->{section}");
    let prefix = doc.prefix()?;
    let data = doc
        .get(&["OriginalData", section])
        .ok_or_else(|| miss_child_node(section, "OriginalData"))?;
    let map = data.as_object().ok_or_else(|| invalid_struct(&node))?;

    match kind {
        InstrumentKind::Adcp => {
            for (station, entry) in map {
                let station_node = format!("{node}->{station}");
                let files = entry
                    .as_object()
                    .ok_or_else(|| invalid_struct(&station_node))?;
                for key in ["mat", "beam", "file_details", "deployment"] {
                    let value = files
                        .get(key)
                        .ok_or_else(|| miss_key(key, &station_node))?;
                    let relative = value
                        .as_str()
                        .ok_or_else(|| invalid_value(key, &station_node))?;
                    let full = format!("{prefix}{relative}");
                    match key {
                        "beam" => validate_beam_files(&full, &station_node)?,
                        "mat" => file_detect(
                            Path::new(&full),
                            Some(".mat"),
                            &format!("in the node {station_node}"),
                        )?,
                        "deployment" => file_detect(
                            Path::new(&full),
                            Some(".whp"),
                            &format!("in the node {station_node}"),
                        )?,
                        _ => file_detect(
                            Path::new(&full),
                            None,
                            &format!("in the node {station_node}"),
                        )?,
                    }
                }
            }
        }
        InstrumentKind::Ctd | InstrumentKind::Td => {
            for (station, entry) in map {
                let relative = entry
                    .as_str()
                    .ok_or_else(|| invalid_value(station, &node))?;
                if !glob_nonempty(&format!("{prefix}{relative}*")) {
                    return Err(config_error(format!(
                        "Invalid {section} data file path."
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_beam_files(prefix: &str, node: &str) -> Result<()> {
    for beam in 1..=4 {
        match glob_count(&format!("{prefix}{beam}*")) {
            1 => {}
            0 => {
                return Err(config_error(format!(
                    "Invalid beam file path. in the node {node}"
                )));
            }
            _ => {
                return Err(config_error(format!(
                    "Beam {beam} file with name conflict in the node {node}"
                )));
            }
        }
    }
    Ok(())
}

fn validate_preprocess_paths(doc: &ConfigDocument, kind: InstrumentKind) -> Result<()> {
    let section = kind.section();
    let node = format!("PreprocessData->{section}");
    let prefix = doc.prefix()?;
    let data = doc
        .get(&["PreprocessData", section])
        .ok_or_else(|| miss_child_node(section, "PreprocessData"))?;
    let map = data.as_object().ok_or_else(|| invalid_struct(&node))?;
    for (station, entry) in map {
        let relative = entry
            .as_str()
            .ok_or_else(|| invalid_value(station, &node))?;
        nc_destination_check(prefix, relative, station, &node)?;
    }
    Ok(())
}

/// Validate the configuration of the sea-surface-line pass.
pub fn validate_ssl(doc: &ConfigDocument) -> Result<()> {
    for key in ["prefix", "Preprocess"] {
        if doc.get(&[key]).is_none() {
            return Err(config_error(format!(
                "The {key} node is missing in the configuration file."
            )));
        }
    }
    let prefix = doc.prefix()?;

    let detect_node = "Preprocess->adcpSslDetect";
    let detect = doc
        .get(&["Preprocess", "adcpSslDetect"])
        .ok_or_else(|| miss_child_node("adcpSslDetect", "Preprocess"))?;
    let detect_map = detect
        .as_object()
        .ok_or_else(|| invalid_struct(detect_node))?;
    for (station, entry) in detect_map {
        let relative = entry
            .as_str()
            .ok_or_else(|| invalid_value(station, detect_node))?;
        let full = format!("{prefix}{relative}");
        file_detect(
            Path::new(&full),
            Some(".nc"),
            &format!("{detect_node}->{station} is invalid"),
        )?;
    }

    let info_node = "Preprocess->adcpInfo";
    let info = doc
        .get(&["Preprocess", "adcpInfo"])
        .ok_or_else(|| miss_child_node("adcpInfo", "Preprocess"))?;
    let table: &[(&str, fn(&Value) -> bool)] = &[
        ("correct0drift", Value::is_boolean),
        ("valid_dep_dif", Value::is_object),
        ("filter", Value::is_object),
    ];
    for (key, type_check) in table {
        let value = info.get(*key).ok_or_else(|| miss_key(key, info_node))?;
        if !type_check(value) {
            return Err(invalid_value(key, info_node));
        }
    }
    require_numeric_map(
        info.get("valid_dep_dif").expect("checked above"),
        "valid_dep_dif",
        info_node,
    )?;

    let filter_node = format!("{info_node}->filter");
    let filter_map = info
        .get("filter")
        .and_then(Value::as_object)
        .expect("checked above");
    for (station, thresholds) in filter_map {
        let station_node = format!("{filter_node}->{station}");
        let thresholds = thresholds
            .as_object()
            .ok_or_else(|| invalid_struct(&station_node))?;
        for (key, value) in thresholds {
            if !value.is_number() {
                return Err(invalid_value(key, &station_node));
            }
            if key == "scatter" && !value.is_i64() {
                return Err(invalid_value(key, &station_node));
            }
        }
    }

    let save_node = "Preprocess->adcpSavePath";
    let save = doc
        .get(&["Preprocess", "adcpSavePath"])
        .ok_or_else(|| miss_child_node("adcpSavePath", "Preprocess"))?;
    let save_map = save.as_object().ok_or_else(|| invalid_struct(save_node))?;
    for (station, entry) in save_map {
        let relative = entry
            .as_str()
            .ok_or_else(|| invalid_value(station, save_node))?;
        nc_destination_check(prefix, relative, station, save_node)?;
    }
    Ok(())
}

/// Validate the valid-time-window extraction configuration for one section.
pub fn validate_intercept(doc: &ConfigDocument, kind: InstrumentKind) -> Result<()> {
    let node = "Preprocess->intercept";
    let intercept = doc
        .get(&["Preprocess", "intercept"])
        .ok_or_else(|| miss_child_node("intercept", "Preprocess"))?;
    if !intercept.is_object() {
        return Err(invalid_struct(node));
    }
    let prefix = doc.prefix()?;
    let save_node = format!("{node}->save_path->{}", kind.section());
    let save = intercept
        .get("save_path")
        .and_then(|v| v.get(kind.section()))
        .ok_or_else(|| miss_child_node(kind.section(), &format!("{node}->save_path")))?;
    let map = save.as_object().ok_or_else(|| invalid_struct(&save_node))?;
    for (station, entry) in map {
        let relative = entry
            .as_str()
            .ok_or_else(|| invalid_value(station, &save_node))?;
        nc_destination_check(prefix, relative, station, &save_node)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn document_with_files() -> (tempfile::TempDir, ConfigDocument) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("raw")).unwrap();
        fs::create_dir_all(root.join("out")).unwrap();
        fs::write(root.join("raw/S1.mat"), b"stub").unwrap();
        fs::write(root.join("raw/S1_details.txt"), b"stub").unwrap();
        fs::write(root.join("raw/S1.whp"), b"stub").unwrap();
        for beam in 1..=4 {
            fs::write(root.join(format!("raw/S1_beam{beam}.csv")), b"stub").unwrap();
        }
        fs::write(root.join("raw/S1_td_data.txt"), b"stub").unwrap();

        let prefix = format!("{}/", root.display());
        let doc = ConfigDocument::new(json!({
            "prefix": prefix,
            "OriginalData": {
                "adcp": {"S1": {
                    "mat": "raw/S1.mat",
                    "beam": "raw/S1_beam",
                    "file_details": "raw/S1_details.txt",
                    "deployment": "raw/S1.whp"
                }},
                "td": {"S1": "raw/S1_td"}
            },
            "PreprocessData": {
                "adcp": {"S1": "out/S1_adcp.nc"},
                "td": {"S1": "out/S1_td.nc"}
            },
            "time_window": 10,
            "time_units": "milliseconds since 2018-07-01 00:00:00",
            "calendar": "standard",
            "StationInfo": {"S1": {"lon": 121.0, "lat": 31.0, "observe_instrument": ["ADCP-RDI"]}},
            "Preprocess": {
                "adcpInfo": {
                    "adcp_hgt": 0.5,
                    "time_offset": 0,
                    "pg_std": 80,
                    "correct0drift": true,
                    "beam_fill_value": -32768,
                    "valid_dep_dif": {"S1": 0.2}
                },
                "tdInfo": {
                    "valid_dep_dif": {"S1": 0.2},
                    "correct0drift": true
                }
            },
            "SectionRun": ["adcp", "td"],
            "author": "Survey Team",
            "email": "survey@example.com",
            "zlib": false,
            "complevel": 1
        }));
        (dir, doc)
    }

    #[test]
    fn complete_adcp_section_validates() {
        let (_dir, doc) = document_with_files();
        validate_section(&doc, InstrumentKind::Adcp).unwrap();
        validate_section(&doc, InstrumentKind::Td).unwrap();
    }

    #[test]
    fn missing_base_key_short_circuits() {
        let doc = ConfigDocument::new(json!({"prefix": "/tmp/"}));
        let err = validate_base(&doc).unwrap_err();
        assert!(
            err.to_string()
                .contains("OriginalData node is missing")
        );
    }

    #[test]
    fn missing_nested_key_names_the_path() {
        let (_dir, doc) = document_with_files();
        let mut root = doc.root().clone();
        root["Preprocess"]["adcpInfo"]
            .as_object_mut()
            .unwrap()
            .remove("pg_std");
        let err = validate_section(&ConfigDocument::new(root), InstrumentKind::Adcp).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: The key pg_std is missing in the node Preprocess->adcpInfo"
        );
    }

    #[test]
    fn wrong_type_is_path_qualified() {
        let (_dir, doc) = document_with_files();
        let mut root = doc.root().clone();
        root["Preprocess"]["adcpInfo"]["pg_std"] = json!("high");
        let err = validate_section(&ConfigDocument::new(root), InstrumentKind::Adcp).unwrap_err();
        assert!(err.to_string().contains("Preprocess->adcpInfo->pg_std is invalid"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn non_numeric_threshold_entry_fails() {
        let (_dir, doc) = document_with_files();
        let mut root = doc.root().clone();
        root["Preprocess"]["adcpInfo"]["valid_dep_dif"]["S1"] = json!("deep");
        let err = validate_section(&ConfigDocument::new(root), InstrumentKind::Adcp).unwrap_err();
        assert!(
            err.to_string()
                .contains("Preprocess->adcpInfo->valid_dep_dif->S1 is invalid")
        );
    }

    #[test]
    fn missing_beam_file_fails_path_stage() {
        let (dir, doc) = document_with_files();
        fs::remove_file(dir.path().join("raw/S1_beam3.csv")).unwrap();
        let err = validate_section(&doc, InstrumentKind::Adcp).unwrap_err();
        assert!(err.to_string().contains("Invalid beam file path"));
    }

    #[test]
    fn output_extension_is_enforced() {
        let (_dir, doc) = document_with_files();
        let mut root = doc.root().clone();
        root["PreprocessData"]["adcp"]["S1"] = json!("out/S1_adcp.parquet");
        let err = validate_section(&ConfigDocument::new(root), InstrumentKind::Adcp).unwrap_err();
        assert!(err.to_string().contains("extension"));
    }

    #[test]
    fn missing_output_directory_is_reported() {
        let (_dir, doc) = document_with_files();
        let mut root = doc.root().clone();
        root["PreprocessData"]["adcp"]["S1"] = json!("nowhere/S1_adcp.nc");
        let err = validate_section(&ConfigDocument::new(root), InstrumentKind::Adcp).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn ssl_scatter_must_be_an_integer() {
        let dir = tempfile::tempdir().unwrap();
        let root_path = dir.path();
        fs::create_dir_all(root_path.join("out")).unwrap();
        fs::write(root_path.join("out/S1.nc"), b"stub").unwrap();
        let prefix = format!("{}/", root_path.display());
        let doc = ConfigDocument::new(json!({
            "prefix": prefix,
            "Preprocess": {
                "adcpSslDetect": {"S1": "out/S1.nc"},
                "adcpSavePath": {"S1": "out/S1_ssl.nc"},
                "adcpInfo": {
                    "correct0drift": true,
                    "valid_dep_dif": {"S1": 0.2},
                    "filter": {"S1": {"u": 0.5, "v": 0.5, "w": 0.5, "scatter": 2.5}}
                }
            }
        }));
        let err = validate_ssl(&doc).unwrap_err();
        assert!(
            err.to_string()
                .contains("Preprocess->adcpInfo->filter->S1->scatter is invalid")
        );
    }
}
