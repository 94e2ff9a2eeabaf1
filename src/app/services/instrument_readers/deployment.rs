//! Profiler deployment command-file parsing.
//!
//! A `.whp` deployment file holds the command list sent to the instrument
//! followed by a commented setup summary, the two sections separated by a
//! `;` line. Two-letter command codes become dimensioned records; the
//! summary lines become plain attributes.

use std::path::Path;

use tracing::debug;

use crate::app::models::{MetaRecordSet, MetaValue};
use crate::app::services::instrument_readers::{command_attrs, command_record_attrs};
use crate::error::{MooringError, Result};

/// Parse a deployment command file into a metadata record set.
pub fn read_deployment(path: &Path) -> Result<MetaRecordSet> {
    let text = std::fs::read_to_string(path)?;
    let (commands, summary) = text.split_once(";\n").ok_or_else(|| {
        MooringError::invalid_export(path, "missing command/summary separator")
    })?;

    let mut set = MetaRecordSet::new();

    for line in commands.lines() {
        if line.len() < 2 {
            continue;
        }
        let (code, raw_value) = line.split_at(2);
        if command_attrs(code).is_none() {
            continue;
        }
        let value = parse_command_value(raw_value);
        set.push_record(code, value, command_record_attrs(code));
    }

    for line in summary.lines() {
        // Summary lines are commented out with a leading marker character.
        let Some((key, raw_value)) = line.get(1..).and_then(|l| l.split_once('=')) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let raw_value = raw_value.trim();
        let value = match raw_value.parse::<f64>() {
            Ok(number) => MetaValue::Number(number),
            Err(_) => MetaValue::Text(raw_value.to_owned()),
        };
        set.push_attribute(key, value);
    }

    debug!(path = %path.display(), entries = set.entries.len(), "deployment file read");
    Ok(set)
}

/// A command value is either one scalar or a comma-separated integer list;
/// any non-numeric element demotes the whole list to text.
fn parse_command_value(raw: &str) -> MetaValue {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() > 1 {
        let mut numbers = Vec::with_capacity(parts.len());
        for part in &parts {
            match part.trim().parse::<i64>() {
                Ok(n) => numbers.push(n),
                Err(_) => return MetaValue::Text(raw.trim().to_owned()),
            }
        }
        MetaValue::Numbers(numbers)
    } else {
        MetaValue::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::MetaEntry;

    const SAMPLE: &str = "\
WN30\n\
WS100\n\
TE00,00,30,00\n\
WM1\n\
XY99\n\
;\n\
;Deployment Length = 30\n\
;Instrument = Workhorse\n\
;First Bin = 1.76\n";

    #[test]
    fn commands_and_summary_are_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.whp");
        std::fs::write(&path, SAMPLE).unwrap();

        let set = read_deployment(&path).unwrap();
        assert_eq!(set.number("WN"), Some(30.0));
        match set.get("TE").unwrap() {
            MetaEntry::Record { value, .. } => {
                assert_eq!(*value, MetaValue::Numbers(vec![0, 0, 30, 0]));
            }
            _ => panic!("TE should be a record"),
        }
        // Unknown command codes are skipped.
        assert!(set.get("XY").is_none());
        // Summary lines land as attributes.
        assert_eq!(set.number("Deployment Length"), Some(30.0));
        match set.get("Instrument").unwrap() {
            MetaEntry::Attribute(MetaValue::Text(text)) => assert_eq!(text, "Workhorse"),
            _ => panic!("Instrument should be a text attribute"),
        }
    }

    #[test]
    fn missing_separator_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.whp");
        std::fs::write(&path, "WN30\nWS100\n").unwrap();
        assert!(matches!(
            read_deployment(&path),
            Err(MooringError::InvalidExport { .. })
        ));
    }
}
