//! Current-profiler (RDI) conversion.
//!
//! Orchestrates the full pipeline for one profiler deployment: matrix,
//! beam, detail, and deployment exports are read; the time axis is
//! reconstructed and shifted; every physical variable is percent-good
//! screened and segment averaged; the averaged depth is drift corrected;
//! per-beam block variances yield the two Reynolds-stress estimates; and
//! the result lands in one dataset with parallel raw and averaged views.

use std::path::PathBuf;

use ndarray::{Array1, Array2};
use tracing::{info, warn};

use crate::app::models::{FrameVariable, InstrumentFrame, VariableAttrs};
use crate::app::services::beam_stress::stress_profile;
use crate::app::services::converters::{
    Stage, at_stage, coordinate_variables, frame_variables, height_variable, time_variable,
};
use crate::app::services::dataset_writer::{
    AttrValue, DatasetSnapshot, SnapshotGroup, SnapshotVariable, write_snapshot,
};
use crate::app::services::instrument_readers::matrix::{MATRIX_VARIABLES, MatrixExport};
use crate::app::services::instrument_readers::{beam, deployment, details, matrix};
use crate::app::services::segment_reducer::{self, ExecutionContext};
use crate::app::services::stats::{nan_mean, nan_var};
use crate::app::services::time_normalizer::{
    self, CalendarFields, ClockFields, TimeEncoding, TimeSeries,
};
use crate::app::services::zero_drift;
use crate::config::{AdcpSettings, OutputOptions, StationInfo, TimeOptions};
use crate::constants::{
    ATTR_BIN1_MID, ATTR_BIN_SIZE, AVERAGE_GROUP, BEAM_COUNT, DEPLOYMENT_GROUP, DETAILS_GROUP,
    UNAVERAGED_VARIABLES, dims,
};
use crate::error::{MooringError, Result};

/// Resolved file set of one profiler deployment.
#[derive(Debug, Clone)]
pub struct AdcpInputs {
    pub mat_path: PathBuf,
    pub beam_prefix: String,
    pub detail_path: PathBuf,
    pub deploy_path: PathBuf,
    pub save_path: PathBuf,
}

/// Convert one profiler deployment to its output dataset.
pub fn convert_station(
    ctx: &ExecutionContext,
    inputs: &AdcpInputs,
    station: &StationInfo,
    settings: &AdcpSettings,
    jump_threshold: f64,
    time: &TimeOptions,
    output: &OutputOptions,
) -> Result<()> {
    // Read
    let deploy_meta = at_stage(Stage::Read, deployment::read_deployment(&inputs.deploy_path))?;
    let detail_meta = at_stage(Stage::Read, details::read_details(&inputs.detail_path))?;
    let export = at_stage(Stage::Read, MatrixExport::read(&inputs.mat_path))?;
    let beams = match beam::read_beam_set(&inputs.beam_prefix, settings.beam_fill_value) {
        Ok(beams) => Some(beams),
        Err(err) => {
            warn!(%err, "beam data unavailable, stress estimates skipped");
            None
        }
    };

    let raw = at_stage(Stage::Read, build_raw_frame(&export))?;
    let nt = raw
        .get("ens")
        .map(|e| e.data.time_len())
        .or_else(|| raw.get("dep").map(|e| e.data.time_len()))
        .ok_or_else(|| {
            MooringError::data_integrity("matrix export carries no ensemble axis")
        })?;

    // Normalize-Time
    let encoding = at_stage(
        Stage::NormalizeTime,
        TimeEncoding::parse(&time.units, &time.calendar),
    )?;
    let time_series = at_stage(
        Stage::NormalizeTime,
        normalize_time(&export, &inputs.detail_path, settings, encoding.clone()),
    )?;
    if time_series.len() != nt {
        return Err(MooringError::data_integrity(format!(
            "time axis has {} records but the ensemble axis has {nt}",
            time_series.len()
        )));
    }

    // Average/Correct
    let step = at_stage(Stage::Average, time_series.step())?;
    let window_units = encoding.from_milliseconds(time.window_minutes * 60_000.0);
    let block_len = ((window_units / step) as usize).max(1);
    let segments = segment_reducer::segment_count(nt, block_len);
    let time_ave = segment_reducer::reduce(ctx, &time_series.values, segments, nan_mean);

    let pg_gate = percent_good_gate(&raw, settings.pg_std);
    let mut ave = build_average_frame(ctx, &raw, pg_gate.as_ref(), segments, time.window_minutes);

    if settings.correct0drift {
        if let Some(entry) = ave.get_mut("dep") {
            let depth = entry.data.as_series_mut().expect("dep is a series");
            let bias = at_stage(
                Stage::Average,
                zero_drift::correct_zero_drift(
                    depth.as_slice().expect("contiguous series"),
                    jump_threshold,
                ),
            )?;
            depth.mapv_inplace(|v| v - bias);
        }
    }

    // Derive
    let mut beam_ave: Vec<Array2<f64>> = Vec::new();
    let mut stresses: Option<(Array2<f64>, Array2<f64>)> = None;
    if let Some(beams) = &beams {
        let mut block_vars: Vec<Array2<f64>> = Vec::with_capacity(BEAM_COUNT);
        for (index, beam_plane) in beams.iter().enumerate() {
            beam_ave.push(segment_reducer::reduce_axis0(
                ctx,
                beam_plane,
                segments,
                nan_mean,
            ));
            let mut gated = beam_plane.clone();
            if let Some(pg) = raw.profile(&format!("pg_bm{}", index + 1)) {
                if pg_gate.is_some() {
                    for (cell, &good) in gated.iter_mut().zip(pg.iter()) {
                        if good < settings.pg_std {
                            *cell = f64::NAN;
                        }
                    }
                }
            }
            block_vars.push(segment_reducer::reduce_axis0(ctx, &gated, segments, nan_var));
        }
        match detail_meta.beam_angle() {
            Some(theta) => {
                stresses = Some((
                    stress_profile(&block_vars[0], &block_vars[1], theta),
                    stress_profile(&block_vars[2], &block_vars[3], theta),
                ));
            }
            None => warn!("detail report lacks a beam angle, stress estimates skipped"),
        }
    }

    // Write
    let snapshot = at_stage(
        Stage::Write,
        assemble_snapshot(
            &export,
            &raw,
            &ave,
            &time_series,
            &time_ave,
            beams.as_ref(),
            &beam_ave,
            stresses.as_ref(),
            &detail_meta.set,
            &deploy_meta,
            station,
            settings,
            time,
            output,
            &encoding,
        ),
    )?;
    write_snapshot(&inputs.save_path, &snapshot, output)?;
    info!(
        path = %inputs.save_path.display(),
        ensembles = nt,
        averaged = time_ave.len(),
        "profiler conversion complete"
    );
    Ok(())
}

/// Map export arrays into the working frame, applying unit scales.
fn build_raw_frame(export: &MatrixExport) -> Result<InstrumentFrame> {
    let mut frame = InstrumentFrame::new();
    for &(export_name, variable, long_name, units, scale) in MATRIX_VARIABLES {
        let Some(array) = export.array(export_name) else {
            continue;
        };
        let attrs = VariableAttrs::new(long_name, units);
        if let Some(plane) = array.plane() {
            frame.insert_profile(variable, plane.mapv(|v| v / scale), attrs);
        } else if let Some(vector) = array.vector() {
            frame.insert_series(
                variable,
                Array1::from(vector).mapv(|v| v / scale),
                attrs,
            );
        }
    }
    if frame.is_empty() {
        return Err(MooringError::data_integrity(
            "matrix export carries no recognized variables",
        ));
    }
    Ok(frame)
}

fn clock_component(export: &MatrixExport, name: &str) -> Result<Vec<u32>> {
    export
        .array(name)
        .and_then(|array| array.vector())
        .map(|values| values.iter().map(|&v| v as u32).collect())
        .ok_or_else(|| {
            MooringError::data_integrity(format!("matrix export lacks the {name} clock field"))
        })
}

fn calendar_component(export: &MatrixExport, name: &str) -> Option<Vec<f64>> {
    export.array(name).and_then(|array| array.vector())
}

/// Rebuild the absolute time axis from the export clock, falling back to
/// the detail report's first-ensemble date when calendar fields are absent.
fn normalize_time(
    export: &MatrixExport,
    detail_path: &std::path::Path,
    settings: &AdcpSettings,
    encoding: TimeEncoding,
) -> Result<TimeSeries> {
    let clock = ClockFields {
        hour: clock_component(export, "SerHour")?,
        minute: clock_component(export, "SerMin")?,
        second: clock_component(export, "SerSec")?,
        hundredth: export
            .array("SerHund")
            .and_then(|array| array.vector())
            .map(|values| values.iter().map(|&v| v as u32).collect())
            .unwrap_or_else(|| vec![0; export.array("SerHour").map_or(0, |a| a.data.len())]),
    };

    let calendar = match (
        calendar_component(export, "SerYear"),
        calendar_component(export, "SerMon"),
        calendar_component(export, "SerDay"),
    ) {
        (Some(year), Some(month), Some(day)) => Some(CalendarFields {
            year: year.iter().map(|&v| v as i32).collect(),
            month: month.iter().map(|&v| v as u32).collect(),
            day: day.iter().map(|&v| v as u32).collect(),
        }),
        _ => None,
    };

    let start_date = if calendar.is_none() {
        matrix::first_ensemble_date(detail_path)?
    } else {
        None
    };

    let offset =
        time_normalizer::resolve_offset_hours(settings.time_offset, None, "adcpInfo")?;
    let instants =
        time_normalizer::build_timestamps(calendar.as_ref(), &clock, start_date, offset)?;
    TimeSeries::from_instants(encoding, &instants)
}

/// Four-beam percent-good acceptance gate; `None` when the export carries an
/// incomplete percent-good set.
fn percent_good_gate(raw: &InstrumentFrame, pg_std: f64) -> Option<Array2<f64>> {
    let planes: Vec<&Array2<f64>> = (1..=BEAM_COUNT)
        .filter_map(|i| raw.profile(&format!("pg_bm{i}")))
        .collect();
    if planes.len() != BEAM_COUNT {
        if !planes.is_empty() {
            warn!("incomplete percent-good set, acceptance gate skipped");
        }
        return None;
    }
    let mut gate = Array2::zeros(planes[0].dim());
    for plane in &planes {
        gate = gate + *plane;
    }
    gate.mapv_inplace(|sum| {
        let mean = sum / BEAM_COUNT as f64;
        if mean < pg_std { f64::NAN } else { 1.0 }
    });
    Some(gate)
}

/// Segment-average every eligible variable, masking profile cells the
/// percent-good gate rejected.
fn build_average_frame(
    ctx: &ExecutionContext,
    raw: &InstrumentFrame,
    pg_gate: Option<&Array2<f64>>,
    segments: usize,
    window_minutes: f64,
) -> InstrumentFrame {
    let mut ave = InstrumentFrame::new();
    for (name, entry) in raw.iter() {
        if UNAVERAGED_VARIABLES.contains(&name.as_str()) {
            continue;
        }
        let attrs = VariableAttrs::new(
            format!(
                "{} was averaged every {window_minutes} minutes",
                entry.attrs.long_name
            ),
            entry.attrs.units.clone(),
        );
        match &entry.data {
            FrameVariable::Series(values) => {
                let reduced = segment_reducer::reduce(
                    ctx,
                    values.as_slice().expect("contiguous series"),
                    segments,
                    nan_mean,
                );
                ave.insert_series(name.clone(), Array1::from(reduced), attrs);
            }
            FrameVariable::Profile(values) => {
                let mut screened = values.clone();
                if let Some(gate) = pg_gate {
                    for (cell, flag) in screened.iter_mut().zip(gate.iter()) {
                        if !flag.is_finite() {
                            *cell = f64::NAN;
                        }
                    }
                }
                ave.insert_profile(
                    name.clone(),
                    segment_reducer::reduce_axis0(ctx, &screened, segments, nan_mean),
                    attrs,
                );
            }
        }
    }
    ave
}

fn beam_attrs(index: usize, window_minutes: Option<f64>) -> Vec<(String, AttrValue)> {
    let long_name = match window_minutes {
        Some(win) => format!("The velocity of beam{index} was averaged every {win} minutes"),
        None => format!("The velocity of beam{index}"),
    };
    vec![
        ("long_name".to_owned(), AttrValue::Text(long_name)),
        ("units".to_owned(), AttrValue::Text("m/s".to_owned())),
    ]
}

fn plane_variable(
    name: String,
    plane: &Array2<f64>,
    attrs: Vec<(String, AttrValue)>,
) -> SnapshotVariable {
    SnapshotVariable::profile(
        name,
        [dims::TIME, dims::HEIGHT],
        [plane.nrows(), plane.ncols()],
        plane.iter().copied().collect(),
        attrs,
    )
    .single()
}

#[allow(clippy::too_many_arguments)]
fn assemble_snapshot(
    export: &MatrixExport,
    raw: &InstrumentFrame,
    ave: &InstrumentFrame,
    time_series: &TimeSeries,
    time_ave: &[f64],
    beams: Option<&[Array2<f64>; 4]>,
    beam_ave: &[Array2<f64>],
    stresses: Option<&(Array2<f64>, Array2<f64>)>,
    detail_set: &crate::app::models::MetaRecordSet,
    deploy_set: &crate::app::models::MetaRecordSet,
    station: &StationInfo,
    settings: &AdcpSettings,
    time: &TimeOptions,
    output: &OutputOptions,
    encoding: &TimeEncoding,
) -> Result<DatasetSnapshot> {
    let bin1_mid = export.meta_number(ATTR_BIN1_MID).ok_or_else(|| {
        MooringError::data_integrity(format!("matrix export lacks {ATTR_BIN1_MID}"))
    })?;
    let bin_size = export.meta_number(ATTR_BIN_SIZE).ok_or_else(|| {
        MooringError::data_integrity(format!("matrix export lacks {ATTR_BIN_SIZE}"))
    })?;
    let nbins = raw
        .series("bins")
        .map(|bins| bins.len())
        .ok_or_else(|| MooringError::data_integrity("matrix export lacks the bin axis"))?;

    let bin1_hgt = settings.adcp_hgt + bin1_mid;
    let height: Vec<f64> = (0..nbins)
        .map(|i| ((bin1_hgt + i as f64 * bin_size) * 100.0).round() / 100.0)
        .collect();

    let mut snapshot = DatasetSnapshot {
        attrs: vec![
            ("Author".to_owned(), AttrValue::Text(output.author.clone())),
            ("Email".to_owned(), AttrValue::Text(output.email.clone())),
        ],
        dims: vec![
            (dims::TIME.to_owned(), time_series.len()),
            (dims::HEIGHT.to_owned(), nbins),
            (dims::LON.to_owned(), 1),
            (dims::LAT.to_owned(), 1),
        ],
        ..DatasetSnapshot::default()
    };
    for (name, value) in &export.metadata {
        snapshot.attrs.push((name.clone(), AttrValue::from(value)));
    }

    snapshot.vars = coordinate_variables(station.lon, station.lat);
    snapshot
        .vars
        .push(time_variable(time_series.values.clone(), encoding));
    snapshot.vars.push(height_variable(height));
    snapshot.vars.extend(frame_variables(raw));
    if let Some(beams) = beams {
        for (index, plane) in beams.iter().enumerate() {
            snapshot.vars.push(plane_variable(
                format!("beam{}", index + 1),
                plane,
                beam_attrs(index + 1, None),
            ));
        }
    }

    if !detail_set.is_empty() {
        snapshot
            .groups
            .push(SnapshotGroup::from_records(DETAILS_GROUP, detail_set));
    }
    if !deploy_set.is_empty() {
        snapshot
            .groups
            .push(SnapshotGroup::from_records(DEPLOYMENT_GROUP, deploy_set));
    }

    let mut average = SnapshotGroup::new(AVERAGE_GROUP);
    average.dims.push((dims::TIME.to_owned(), time_ave.len()));
    average.vars.push(time_variable(time_ave.to_vec(), encoding));
    average.vars.extend(frame_variables(ave));
    for (index, plane) in beam_ave.iter().enumerate() {
        average.vars.push(plane_variable(
            format!("beam{}", index + 1),
            plane,
            beam_attrs(index + 1, Some(time.window_minutes)),
        ));
    }
    if let Some((rey12, rey34)) = stresses {
        for (name, plane, pair) in [("rey12", rey12, "beam1 and beam2"), ("rey34", rey34, "beam3 and beam4")] {
            average.vars.push(plane_variable(
                name.to_owned(),
                plane,
                vec![
                    (
                        "long_name".to_owned(),
                        AttrValue::Text(format!(
                            "Reynolds stress calculated by variance method using {pair}"
                        )),
                    ),
                    ("units".to_owned(), AttrValue::Text("m^2/s^2".to_owned())),
                ],
            ));
        }
    }
    snapshot.groups.push(average);
    Ok(snapshot)
}
