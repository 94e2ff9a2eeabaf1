//! CTD (RBR) conversion.
//!
//! A cast-survey CTD export is split into downcasts using the profile
//! annotations, and every downcast is reduced onto fixed-size depth bins
//! referenced to the companion profiler's elevation channel. The output
//! carries the raw series at the root and the binned profiles in a
//! downcast group.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::app::models::{InstrumentFrame, VariableAttrs};
use crate::app::services::converters::{
    Stage, at_stage, coordinate_variables, frame_variables, height_variable, time_variable,
};
use crate::app::services::dataset_writer::{
    AttrValue, DatasetSnapshot, SnapshotGroup, SnapshotVariable, read_snapshot, write_snapshot,
};
use crate::app::services::instrument_readers::matrix::MatrixExport;
use crate::app::services::instrument_readers::rbr::{self, CTD_VARIABLES};
use crate::app::services::stats::nan_mean;
use crate::app::services::time_normalizer::{
    self, ClockFields, TimeEncoding, TimeSeries, parse_timestamp_column,
};
use crate::config::{AdcpSettings, CtdSettings, OutputOptions, StationInfo, TimeOptions};
use crate::constants::{
    DOWNCAST_GROUP, DOWNCAST_SURFACE_SKIP_M, META_GROUP, MM_PER_M, RBR_TIMESTAMP_FORMAT, dims,
};
use crate::error::{MooringError, Result};

/// Resolved file set of one CTD survey.
#[derive(Debug, Clone)]
pub struct CtdInputs {
    pub export_prefix: String,
    pub save_path: PathBuf,
    /// Converted profiler dataset (or its raw matrix export) providing the
    /// reference elevation channel.
    pub ref_path: PathBuf,
}

/// Reference elevation channel: per-sample depth and absolute instants.
struct ReferenceElevation {
    depth: Vec<f64>,
    instants: Vec<NaiveDateTime>,
}

/// Convert one CTD survey to its output dataset.
pub fn convert_station(
    inputs: &CtdInputs,
    station: &StationInfo,
    settings: &CtdSettings,
    profiler_settings: &AdcpSettings,
    time: &TimeOptions,
    output: &OutputOptions,
) -> Result<()> {
    // Read
    let data = at_stage(Stage::Read, rbr::read_data(&inputs.export_prefix))?;
    let meta = at_stage(Stage::Read, rbr::read_metadata(&inputs.export_prefix))?;
    let intervals = at_stage(
        Stage::Read,
        rbr::read_profile_annotations(&inputs.export_prefix),
    )?;
    let reference = at_stage(
        Stage::Read,
        reference_elevation(&inputs.ref_path, profiler_settings),
    )?;

    // Normalize-Time
    let offset = at_stage(
        Stage::NormalizeTime,
        time_normalizer::resolve_offset_hours(
            settings.time_offset,
            rbr::offset_from_utc(&meta),
            "ctdInfo",
        ),
    )?;
    let encoding = at_stage(
        Stage::NormalizeTime,
        TimeEncoding::parse(&time.units, &time.calendar),
    )?;
    let instants = at_stage(
        Stage::NormalizeTime,
        parse_timestamp_column(&data.time, RBR_TIMESTAMP_FORMAT, offset),
    )?;
    let time_series = at_stage(
        Stage::NormalizeTime,
        TimeSeries::from_instants(encoding.clone(), &instants),
    )?;

    let mut raw = InstrumentFrame::new();
    for &(column, variable, units) in CTD_VARIABLES {
        if let Some(values) = data.columns.get(column) {
            raw.insert_series(
                variable,
                Array1::from(values.clone()),
                VariableAttrs::new(
                    format!("The {} measured from the RBR CTD", column.to_lowercase()),
                    units,
                ),
            );
        }
    }
    let depth = raw
        .series("dep")
        .ok_or_else(|| {
            MooringError::data_integrity("CTD export lacks the depth channel")
        })?
        .to_vec();

    // Average: depth-bin every downcast against the reference elevation.
    let downs: Vec<_> = intervals
        .iter()
        .filter(|interval| interval.kind == "DOWN")
        .collect();
    if downs.is_empty() {
        return Err(MooringError::data_integrity(
            "profile annotations contain no downcasts",
        ));
    }
    let max_ref = reference
        .depth
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NAN, f64::max);
    if !max_ref.is_finite() {
        return Err(MooringError::data_integrity(
            "reference elevation channel is fully masked",
        ));
    }
    let max_bins = (max_ref / settings.bin_size).floor() as usize;
    let height: Vec<f64> = (0..max_bins).map(|j| j as f64 * settings.bin_size).collect();

    let mut time_ave = vec![0.0; downs.len()];
    let mut binned: Vec<(String, VariableAttrs, Array2<f64>)> = raw
        .iter()
        .map(|(name, entry)| {
            (
                name.clone(),
                entry.attrs.clone(),
                Array2::from_elem((downs.len(), max_bins), f64::NAN),
            )
        })
        .collect();

    for (cast, interval) in downs.iter().enumerate() {
        let bounds = at_stage(
            Stage::Average,
            parse_timestamp_column(
                &[interval.start.clone(), interval.end.clone()],
                RBR_TIMESTAMP_FORMAT,
                offset,
            ),
        )?;
        let (cast_start, cast_end) = (bounds[0], bounds[1]);
        time_ave[cast] = (encoding.encode(cast_start) + encoding.encode(cast_end)) / 2.0;

        let cast_idx: Vec<usize> = instants
            .iter()
            .enumerate()
            .filter(|(_, t)| (cast_start..=cast_end).contains(*t))
            .map(|(i, _)| i)
            .collect();
        let ref_idx: Vec<usize> = reference
            .instants
            .iter()
            .enumerate()
            .filter(|(_, t)| (cast_start..=cast_end).contains(*t))
            .map(|(i, _)| i)
            .collect();
        let ref_depths: Vec<f64> = ref_idx.iter().map(|&i| reference.depth[i]).collect();
        let crit_dep = nan_mean(&ref_depths);
        if !crit_dep.is_finite() {
            debug!(cast, "no reference samples in the cast window, skipped");
            continue;
        }

        // Samples shallower than the surface skip depth stay out.
        let usable_bins = ((crit_dep / settings.bin_size).floor()
            - (DOWNCAST_SURFACE_SKIP_M / settings.bin_size).round())
            as isize;
        for bin in 0..usable_bins.max(0) as usize {
            let upper = crit_dep - settings.bin_size * (bin + 1) as f64;
            let up_bound = upper.max(0.0);
            let low_bound = upper + settings.bin_size;
            let in_bin: Vec<usize> = cast_idx
                .iter()
                .copied()
                .filter(|&i| depth[i] > up_bound && depth[i] <= low_bound)
                .collect();
            if in_bin.is_empty() {
                continue;
            }
            for (name, _, plane) in binned.iter_mut() {
                let values: Vec<f64> = {
                    let series = raw.series(name).expect("binned from raw frame");
                    in_bin.iter().map(|&i| series[i]).collect()
                };
                plane[[cast, bin]] = nan_mean(&values);
            }
        }
    }

    // Write
    let mut snapshot = DatasetSnapshot {
        attrs: vec![
            ("Author".to_owned(), AttrValue::Text(output.author.clone())),
            ("Email".to_owned(), AttrValue::Text(output.email.clone())),
        ],
        dims: vec![
            (dims::TIME.to_owned(), time_series.len()),
            (dims::LON.to_owned(), 1),
            (dims::LAT.to_owned(), 1),
        ],
        ..DatasetSnapshot::default()
    };
    snapshot.vars = coordinate_variables(station.lon, station.lat);
    snapshot
        .vars
        .push(time_variable(time_series.values.clone(), &encoding));
    snapshot.vars.extend(frame_variables(&raw));
    snapshot
        .groups
        .push(SnapshotGroup::from_json(META_GROUP, &meta));

    let mut downcast = SnapshotGroup::new(DOWNCAST_GROUP);
    downcast.dims.push((dims::TIME.to_owned(), downs.len()));
    downcast.dims.push((dims::HEIGHT.to_owned(), max_bins));
    downcast.vars.push(time_variable(time_ave, &encoding));
    downcast.vars.push(height_variable(height));
    for (name, attrs, plane) in binned {
        downcast.vars.push(SnapshotVariable::profile(
            name,
            [dims::TIME, dims::HEIGHT],
            [plane.nrows(), plane.ncols()],
            plane.iter().copied().collect(),
            vec![
                ("long_name".to_owned(), AttrValue::Text(attrs.long_name)),
                ("units".to_owned(), AttrValue::Text(attrs.units)),
                (
                    "description".to_owned(),
                    AttrValue::Text(format!(
                        "Downcast samples divided into depth bins of {} meters",
                        settings.bin_size
                    )),
                ),
            ],
        ));
    }
    snapshot.groups.push(downcast);

    write_snapshot(&inputs.save_path, &snapshot, output)?;
    info!(
        path = %inputs.save_path.display(),
        casts = downs.len(),
        bins = max_bins,
        "CTD conversion complete"
    );
    Ok(())
}

/// Load the reference elevation channel from a converted profiler dataset,
/// or directly from its raw matrix export.
fn reference_elevation(path: &Path, profiler: &AdcpSettings) -> Result<ReferenceElevation> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_uppercase)
        .as_deref()
    {
        Some("NC") => {
            let snapshot = read_snapshot(path)?;
            let depth_var = snapshot.variable("dep").ok_or_else(|| {
                MooringError::data_integrity("reference dataset lacks a depth variable")
            })?;
            let time_var = snapshot.variable(dims::TIME).ok_or_else(|| {
                MooringError::data_integrity("reference dataset lacks a time variable")
            })?;
            let units = attr_text(&time_var.attrs, "units").ok_or_else(|| {
                MooringError::data_integrity("reference time variable lacks units")
            })?;
            let calendar =
                attr_text(&time_var.attrs, "calendar").unwrap_or_else(|| "standard".to_owned());
            let encoding = TimeEncoding::parse(&units, &calendar)?;
            Ok(ReferenceElevation {
                depth: depth_var
                    .data
                    .iter()
                    .map(|&v| v + profiler.adcp_hgt)
                    .collect(),
                instants: time_var.data.iter().map(|&v| encoding.decode(v)).collect(),
            })
        }
        Some("MAT") => {
            let export = MatrixExport::read(path)?;
            let depth = export
                .array("AnDepthmm")
                .and_then(|a| a.vector())
                .map(|v| v.iter().map(|&d| d / MM_PER_M).collect())
                .ok_or_else(|| {
                    MooringError::data_integrity("reference export lacks a depth series")
                })?;
            let hour = clock_vector(&export, "SerHour")?;
            let hundredth = export
                .array("SerHund")
                .and_then(|a| a.vector())
                .map(|v| v.iter().map(|&x| x as u32).collect())
                .unwrap_or_else(|| vec![0; hour.len()]);
            let clock = ClockFields {
                hour,
                minute: clock_vector(&export, "SerMin")?,
                second: clock_vector(&export, "SerSec")?,
                hundredth,
            };
            let calendar = match (
                export.array("SerYear").and_then(|a| a.vector()),
                export.array("SerMon").and_then(|a| a.vector()),
                export.array("SerDay").and_then(|a| a.vector()),
            ) {
                (Some(year), Some(month), Some(day)) => {
                    Some(time_normalizer::CalendarFields {
                        year: year.iter().map(|&v| v as i32).collect(),
                        month: month.iter().map(|&v| v as u32).collect(),
                        day: day.iter().map(|&v| v as u32).collect(),
                    })
                }
                _ => None,
            };
            let offset = time_normalizer::resolve_offset_hours(
                profiler.time_offset,
                None,
                "adcpInfo",
            )?;
            let instants =
                time_normalizer::build_timestamps(calendar.as_ref(), &clock, None, offset)?;
            Ok(ReferenceElevation { depth, instants })
        }
        _ => Err(MooringError::configuration(format!(
            "unsupported reference elevation format: {}",
            path.display()
        ))),
    }
}

fn clock_vector(export: &MatrixExport, name: &str) -> Result<Vec<u32>> {
    export
        .array(name)
        .and_then(|a| a.vector())
        .map(|v| v.iter().map(|&x| x as u32).collect())
        .ok_or_else(|| {
            MooringError::data_integrity(format!("reference export lacks the {name} clock field"))
        })
}

fn attr_text(attrs: &[(String, AttrValue)], name: &str) -> Option<String> {
    attrs.iter().find(|(n, _)| n == name).and_then(|(_, v)| match v {
        AttrValue::Text(t) => Some(t.clone()),
        _ => None,
    })
}
