//! Raw instrument export parsing.
//!
//! One submodule per export family: the profiler matrix export (MAT-5),
//! per-beam velocity CSVs, the deployment command file, the detail text
//! dump, and the RBR data/metadata/annotation sidecars.

pub mod beam;
pub mod deployment;
pub mod details;
pub mod matrix;
pub mod rbr;

/// Descriptive attributes for the two-letter profiler command codes found in
/// deployment and detail files.
pub fn command_attrs(code: &str) -> Option<(&'static str, Option<&'static str>)> {
    let entry = match code {
        "CQ" => ("Transmit power", None),
        "CX" => ("Low latency trigger", None),
        "EA" => ("Heading alignment", Some("hundredths of a degree")),
        "EB" => ("Heading bias", Some("hundredths of a degree")),
        "ED" => ("Transducer depth", Some("decimeters")),
        "ES" => ("Salinity", Some("ppt")),
        "EX" => ("Coordinate transformation", None),
        "EZ" => ("Sensor source", None),
        "TE" => ("Time per ensemble", None),
        "TP" => ("Time between pings", None),
        "TF" => ("Time of first ping", None),
        "WA" => ("False target threshold", Some("counts")),
        "WB" => ("Bandwidth mode", None),
        "WC" => ("Correlation threshold", Some("counts")),
        "WD" => ("Data out", None),
        "WE" => ("Error velocity threshold", Some("mm/s")),
        "WF" => ("Blank after transmit", Some("cm")),
        "WG" => ("Percent good minimum", Some("percent")),
        "WL" => ("Water reference layer", Some("bins")),
        "WM" => ("Water profiling mode", None),
        "WN" => ("Number of depth cells", None),
        "WP" => ("Pings per ensemble", None),
        "WS" => ("Depth cell size", Some("cm")),
        "WT" => ("Transmit length", Some("cm")),
        "BA" => ("Bottom track amplitude threshold", Some("counts")),
        "BC" => ("Bottom track correlation threshold", Some("counts")),
        "BD" => ("Bottom track delay", Some("ensembles")),
        "BE" => ("Bottom track error velocity threshold", Some("mm/s")),
        "BG" => ("Bottom track percent good minimum", Some("percent")),
        "BM" => ("Bottom track mode", None),
        "BP" => ("Bottom track pings per ensemble", None),
        "BX" => ("Bottom track maximum depth", Some("decimeters")),
        _ => return None,
    };
    Some(entry)
}

/// Attribute list for one command code, ready for a metadata record.
pub fn command_record_attrs(code: &str) -> Vec<(String, String)> {
    let Some((long_name, units)) = command_attrs(code) else {
        return Vec::new();
    };
    let mut attrs = vec![("long_name".to_owned(), long_name.to_owned())];
    if let Some(units) = units {
        attrs.push(("units".to_owned(), units.to_owned()));
    }
    attrs
}
