//! Profiler detail-file parsing.
//!
//! The vendor's deployment report is a fixed-layout text dump mixing free
//! prose with numeric fields. Values are pulled by line position and regex
//! extraction, matching the layout the export software has used across
//! firmware revisions.

use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::app::models::{MetaRecordSet, MetaValue};
use crate::app::services::instrument_readers::command_record_attrs;
use crate::constants::CENTI_SCALE;
use crate::error::{MooringError, Result};

/// Parsed detail metadata with the beam geometry the stress estimator needs.
#[derive(Debug, Clone)]
pub struct DetailRecords {
    pub set: MetaRecordSet,
}

impl DetailRecords {
    /// Beam half-angle in degrees, when the report carries one.
    pub fn beam_angle(&self) -> Option<f64> {
        self.set.number("Beam angle")
    }
}

fn datetime_pattern() -> Regex {
    Regex::new(r"\d*/?\d*/?\d* ?\d+:\d+:?\d*:?\d*\.?\d*").expect("static regex")
}

fn number_pattern() -> Regex {
    Regex::new(r"[-+]?\d*\.\d+|[-+]?\d+").expect("static regex")
}

/// First timestamp-like or numeric token of a line.
fn value_from_line(line: &str) -> Option<MetaValue> {
    if let Some(m) = datetime_pattern().find(line) {
        return Some(MetaValue::Text(m.as_str().trim().to_owned()));
    }
    number_from_line(line)
}

fn number_from_line(line: &str) -> Option<MetaValue> {
    let m = number_pattern().find(line)?;
    Some(MetaValue::parse(m.as_str()))
}

/// Every numeric token of a line, for multi-valued commands.
fn numbers_from_line(line: &str) -> MetaValue {
    let values: Vec<i64> = number_pattern()
        .find_iter(line)
        .filter_map(|m| {
            m.as_str()
                .parse::<f64>()
                .ok()
                .map(|v| v as i64)
        })
        .collect();
    MetaValue::Numbers(values)
}

fn scaled(value: Option<MetaValue>, factor: f64, as_integer: bool) -> Option<MetaValue> {
    let number = match value? {
        MetaValue::Number(f) => f,
        MetaValue::Integer(i) => i as f64,
        other => return Some(other),
    };
    let scaled = number * factor;
    Some(if as_integer {
        MetaValue::Integer(scaled as i64)
    } else if scaled.fract() == 0.0 {
        MetaValue::Integer(scaled as i64)
    } else {
        MetaValue::Number(scaled)
    })
}

/// Parse the fixed-layout detail report.
pub fn read_details(path: &Path) -> Result<DetailRecords> {
    let text = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 61 {
        return Err(MooringError::invalid_export(
            path,
            format!("detail report has {} lines, expected at least 61", lines.len()),
        ));
    }
    let line = |index: usize| lines[index];

    let mut set = MetaRecordSet::new();
    let mut push_plain = |name: &str, value: Option<MetaValue>| {
        if let Some(value) = value {
            set.push_attribute(name, value);
        }
    };

    push_plain("Firmware Version", value_from_line(line(9)));
    push_plain("System Frequency", value_from_line(line(11)));
    push_plain(
        "Beam Pattern",
        Some(MetaValue::Text(line(12).trim().to_owned())),
    );
    push_plain("System Configuration", value_from_line(line(13)));
    push_plain("Beam angle", value_from_line(line(16)));
    push_plain(
        "CPU Serial Number",
        line(21)
            .rsplit(':')
            .next()
            .map(|v| MetaValue::Text(v.trim().to_owned())),
    );
    push_plain(
        "Sensor Avail",
        Some(MetaValue::Text(
            line(42).trim_end().chars().rev().take(15).collect::<String>()
                .chars().rev().collect::<String>(),
        )),
    );
    push_plain(
        "Hardware",
        number_from_line(line(46)).map(|v| match v {
            MetaValue::Integer(i) => MetaValue::Text(format!("{i} Beams")),
            MetaValue::Number(f) => MetaValue::Text(format!("{f} Beams")),
            other => other,
        }),
    );
    push_plain("Lag", value_from_line(line(47)));
    push_plain("Code Reps", value_from_line(line(48)));
    push_plain("Lag Length", value_from_line(line(49)));

    // Two-letter commands echoed in the report, with unit rescaling where
    // the export prints engineering units.
    let commands: &[(&str, usize, f64, bool)] = &[
        ("CQ", 23, 1.0, false),
        ("CX", 24, 1.0, false),
        ("WA", 26, 1.0, false),
        ("WB", 27, 1.0, false),
        ("WC", 28, 1.0, false),
        ("WE", 29, 1.0, false),
        ("WF", 30, CENTI_SCALE, false),
        ("WG", 31, 1.0, false),
        ("WM", 33, 1.0, false),
        ("WN", 34, 1.0, false),
        ("WP", 35, 1.0, false),
        ("WS", 36, CENTI_SCALE, true),
        ("EA", 38, CENTI_SCALE, true),
        ("EB", 39, CENTI_SCALE, true),
        ("EX", 40, 1.0, false),
        ("EZ", 41, 1.0, false),
        ("TP", 44, 1.0, false),
        ("WT", 50, CENTI_SCALE, true),
        ("BP", 53, 1.0, false),
        ("BD", 54, 1.0, false),
        ("BC", 55, 1.0, false),
        ("BA", 56, 1.0, false),
        ("BG", 57, 1.0, false),
        ("BM", 58, 1.0, false),
        ("BE", 59, 1.0, false),
        ("BX", 60, 1.0, false),
    ];
    for &(code, index, factor, as_integer) in commands {
        if let Some(value) = scaled(value_from_line(line(index)), factor, as_integer) {
            set.push_record(code, value, command_record_attrs(code));
        }
    }
    // The reference-layer command lists its bin bounds.
    set.push_record("WL", numbers_from_line(line(32)), command_record_attrs("WL"));

    debug!(path = %path.display(), entries = set.entries.len(), "detail report read");
    Ok(DetailRecords { set })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> String {
        let mut lines = vec![String::new(); 61];
        lines[9] = "  Firmware Version:  51.41".to_owned();
        lines[11] = "  System Frequency:  307200 HZ".to_owned();
        lines[12] = "  CONVEX BEAM PATTERN".to_owned();
        lines[13] = "  System Configuration:  4".to_owned();
        lines[16] = "  Beam angle:  20 degrees".to_owned();
        lines[21] = "  CPU Serial Number:  29 00 00 01".to_owned();
        lines[23] = "  CQ = 255".to_owned();
        lines[24] = "  CX = 0".to_owned();
        lines[26] = "  WA = 50".to_owned();
        lines[27] = "  WB = 1".to_owned();
        lines[28] = "  WC = 64".to_owned();
        lines[29] = "  WE = 2000".to_owned();
        lines[30] = "  WF = 1.76 m".to_owned();
        lines[31] = "  WG = 0".to_owned();
        lines[32] = "  WL = 1,5".to_owned();
        lines[33] = "  WM = 1".to_owned();
        lines[34] = "  WN = 30".to_owned();
        lines[35] = "  WP = 45".to_owned();
        lines[36] = "  WS = 1.00 m".to_owned();
        lines[38] = "  EA = 0.00 degrees".to_owned();
        lines[39] = "  EB = 0.00 degrees".to_owned();
        lines[40] = "  EX = 11111".to_owned();
        lines[41] = "  EZ = 1111101".to_owned();
        lines[42] = "  Sensor Avail:  001111101111111".to_owned();
        lines[44] = "  TP = 1.00 seconds".to_owned();
        lines[46] = "  Hardware:  4".to_owned();
        lines[47] = "  Lag:  12".to_owned();
        lines[48] = "  Code Reps:  9".to_owned();
        lines[49] = "  Lag Length:  6".to_owned();
        lines[50] = "  WT = 0.00".to_owned();
        lines[53] = "  BP = 0".to_owned();
        lines[54] = "  BD = 0".to_owned();
        lines[55] = "  BC = 220".to_owned();
        lines[56] = "  BA = 30".to_owned();
        lines[57] = "  BG = 0".to_owned();
        lines[58] = "  BM = 5".to_owned();
        lines[59] = "  BE = 1000".to_owned();
        lines[60] = "  BX = 120".to_owned();
        lines.join("\n")
    }

    #[test]
    fn beam_angle_and_scaled_commands_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.txt");
        std::fs::write(&path, sample_report()).unwrap();

        let details = read_details(&path).unwrap();
        assert_eq!(details.beam_angle(), Some(20.0));
        // WS = 1.00 m echoed in metres, recorded in cm.
        assert_eq!(details.set.number("WS"), Some(100.0));
        assert!((details.set.number("WF").unwrap() - 176.0).abs() < 1e-9);
        assert_eq!(details.set.number("WN"), Some(30.0));
        match details.set.get("WL").unwrap() {
            crate::app::models::MetaEntry::Record { value, .. } => {
                assert_eq!(*value, MetaValue::Numbers(vec![1, 5]));
            }
            _ => panic!("WL should be a record"),
        }
    }

    #[test]
    fn truncated_report_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.txt");
        std::fs::write(&path, "just\na\nfew\nlines\n").unwrap();
        assert!(matches!(
            read_details(&path),
            Err(MooringError::InvalidExport { .. })
        ));
    }
}
