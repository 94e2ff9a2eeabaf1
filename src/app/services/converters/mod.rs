//! Brand-specific instrument converters.
//!
//! Each converter walks the same state sequence — Validate, Read,
//! Normalize-Time, Average/Correct, Derive, Write — with brand-specific
//! Read and Derive steps. Brand dispatch is a closed enum per instrument
//! family; an unsupported brand fails that instrument entry without
//! touching the others.

pub mod adcp;
pub mod ctd;
pub mod td;

use std::fmt;

use crate::app::models::InstrumentFrame;
use crate::app::services::dataset_writer::{AttrValue, SnapshotVariable};
use crate::app::services::time_normalizer::TimeEncoding;
use crate::constants::dims;
use crate::error::{MooringError, Result};

/// Current-profiler brands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfilerBrand {
    Rdi,
    Unsupported(String),
}

impl ProfilerBrand {
    pub fn from_tag(brand: &str) -> Self {
        match brand.to_uppercase().as_str() {
            "RDI" => Self::Rdi,
            other => Self::Unsupported(other.to_owned()),
        }
    }
}

/// Logger/sonde brands (CTD and thermistor-depth instruments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SondeBrand {
    Rbr,
    Unsupported(String),
}

impl SondeBrand {
    pub fn from_tag(brand: &str) -> Self {
        match brand.to_uppercase().as_str() {
            "RBR" => Self::Rbr,
            other => Self::Unsupported(other.to_owned()),
        }
    }
}

/// Brand suffixes of the station tags matching one instrument family
/// (`"ADCP-RDI"` yields `"RDI"` for the `"ADCP"` family).
pub fn brands_for(tags: &[String], instrument: &str) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| {
            let family = tag.split('-').next()?;
            if family != instrument {
                return None;
            }
            tag.rsplit('-').next().map(str::to_owned)
        })
        .collect()
}

/// Converter pipeline stages, reported alongside failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Read,
    NormalizeTime,
    Average,
    Derive,
    Write,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validate => "validate",
            Self::Read => "read",
            Self::NormalizeTime => "normalize-time",
            Self::Average => "average",
            Self::Derive => "derive",
            Self::Write => "write",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Attach stage context to a converter failure.
pub fn at_stage<T>(stage: Stage, result: Result<T>) -> Result<T> {
    result.map_err(|err| match err {
        MooringError::Configuration { message } => MooringError::Configuration {
            message: format!("[{stage}] {message}"),
        },
        MooringError::DataIntegrity { message } => MooringError::DataIntegrity {
            message: format!("[{stage}] {message}"),
        },
        other => other,
    })
}

/// Scalar longitude/latitude coordinate variables.
pub fn coordinate_variables(lon: f64, lat: f64) -> Vec<SnapshotVariable> {
    vec![
        SnapshotVariable::series(
            dims::LON,
            dims::LON,
            vec![lon],
            vec![
                ("units".to_owned(), AttrValue::Text("degrees_east".to_owned())),
                ("long_name".to_owned(), AttrValue::Text("longitude".to_owned())),
            ],
        )
        .single(),
        SnapshotVariable::series(
            dims::LAT,
            dims::LAT,
            vec![lat],
            vec![
                ("units".to_owned(), AttrValue::Text("degrees_north".to_owned())),
                ("long_name".to_owned(), AttrValue::Text("latitude".to_owned())),
            ],
        )
        .single(),
    ]
}

/// A time variable carrying its encoding attributes.
pub fn time_variable(values: Vec<f64>, encoding: &TimeEncoding) -> SnapshotVariable {
    SnapshotVariable::series(
        dims::TIME,
        dims::TIME,
        values,
        vec![
            ("units".to_owned(), AttrValue::Text(encoding.units.clone())),
            (
                "calendar".to_owned(),
                AttrValue::Text(encoding.calendar.clone()),
            ),
        ],
    )
}

/// The height-above-sea-bed axis.
pub fn height_variable(values: Vec<f64>) -> SnapshotVariable {
    SnapshotVariable::series(
        dims::HEIGHT,
        dims::HEIGHT,
        values,
        vec![
            ("units".to_owned(), AttrValue::Text("m".to_owned())),
            (
                "long_name".to_owned(),
                AttrValue::Text("Height above sea bed".to_owned()),
            ),
        ],
    )
    .single()
}

/// Map every frame variable onto snapshot variables: profiles span
/// `(time, height)`, series span `(time,)`, and the bin-index axis rides on
/// the height dimension.
pub fn frame_variables(frame: &InstrumentFrame) -> Vec<SnapshotVariable> {
    let mut out = Vec::with_capacity(frame.len());
    for (name, entry) in frame.iter() {
        let attrs = vec![
            (
                "long_name".to_owned(),
                AttrValue::Text(entry.attrs.long_name.clone()),
            ),
            ("units".to_owned(), AttrValue::Text(entry.attrs.units.clone())),
        ];
        let var = match &entry.data {
            crate::app::models::FrameVariable::Series(values) => {
                let dim = if name == "bins" { dims::HEIGHT } else { dims::TIME };
                SnapshotVariable::series(name.clone(), dim, values.to_vec(), attrs)
            }
            crate::app::models::FrameVariable::Profile(values) => SnapshotVariable::profile(
                name.clone(),
                [dims::TIME, dims::HEIGHT],
                [values.nrows(), values.ncols()],
                values.iter().copied().collect(),
                attrs,
            ),
        };
        out.push(var);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brand_tags_filter_by_family() {
        let tags = vec![
            "ADCP-RDI".to_owned(),
            "TD-RBR".to_owned(),
            "CTD-RBR".to_owned(),
        ];
        assert_eq!(brands_for(&tags, "ADCP"), vec!["RDI".to_owned()]);
        assert_eq!(brands_for(&tags, "TD"), vec!["RBR".to_owned()]);
        assert!(brands_for(&tags, "XBT").is_empty());
    }

    #[test]
    fn unsupported_brands_are_closed_variants() {
        assert_eq!(ProfilerBrand::from_tag("rdi"), ProfilerBrand::Rdi);
        assert_eq!(
            ProfilerBrand::from_tag("Nortek"),
            ProfilerBrand::Unsupported("NORTEK".to_owned())
        );
        assert_eq!(SondeBrand::from_tag("RBR"), SondeBrand::Rbr);
    }

    #[test]
    fn stage_context_wraps_messages() {
        let err: Result<()> = Err(MooringError::data_integrity("broken axis"));
        let wrapped = at_stage::<()>(Stage::Average, err).unwrap_err();
        assert!(wrapped.to_string().contains("[average] broken axis"));
    }
}
