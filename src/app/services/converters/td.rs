//! Thermistor-depth logger (RBR) conversion.
//!
//! Text exports are block averaged onto the reporting window with a
//! minute-rounded averaged time axis, and the averaged depth channel is
//! drift corrected before writing.

use std::path::PathBuf;

use ndarray::Array1;
use tracing::info;

use crate::app::models::{InstrumentFrame, VariableAttrs};
use crate::app::services::converters::{
    Stage, at_stage, coordinate_variables, frame_variables, time_variable,
};
use crate::app::services::dataset_writer::{
    AttrValue, DatasetSnapshot, SnapshotGroup, write_snapshot,
};
use crate::app::services::instrument_readers::rbr::{self, TD_VARIABLES};
use crate::app::services::segment_reducer::{self, ExecutionContext};
use crate::app::services::stats::nan_mean;
use crate::app::services::time_normalizer::{
    self, TimeEncoding, TimeSeries, parse_timestamp_column, time_round,
};
use crate::app::services::zero_drift;
use crate::config::{OutputOptions, StationInfo, TdSettings, TimeOptions};
use crate::constants::{AVERAGE_GROUP, META_GROUP, RBR_TIMESTAMP_FORMAT, dims};
use crate::error::{MooringError, Result};

/// Resolved file set of one thermistor-depth deployment.
#[derive(Debug, Clone)]
pub struct TdInputs {
    pub export_prefix: String,
    pub save_path: PathBuf,
}

/// Convert one thermistor-depth deployment to its output dataset.
pub fn convert_station(
    ctx: &ExecutionContext,
    inputs: &TdInputs,
    station: &StationInfo,
    settings: &TdSettings,
    jump_threshold: f64,
    time: &TimeOptions,
    output: &OutputOptions,
) -> Result<()> {
    // Read
    let data = at_stage(Stage::Read, rbr::read_data(&inputs.export_prefix))?;
    let meta = at_stage(Stage::Read, rbr::read_metadata(&inputs.export_prefix))?;

    // Normalize-Time
    let offset = at_stage(
        Stage::NormalizeTime,
        time_normalizer::resolve_offset_hours(
            settings.time_offset,
            rbr::offset_from_utc(&meta),
            "tdInfo",
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
    for &(column, variable, units) in TD_VARIABLES {
        if let Some(values) = data.columns.get(column) {
            raw.insert_series(
                variable,
                Array1::from(values.clone()),
                VariableAttrs::new(
                    format!("The {} measured from the RBR TD", column.to_lowercase()),
                    units,
                ),
            );
        }
    }
    if raw.is_empty() {
        return Err(MooringError::data_integrity(
            "logger export carries no recognized channels",
        ));
    }

    // Average
    let step = at_stage(Stage::Average, time_series.step())?;
    let window_units = encoding.from_milliseconds(time.window_minutes * 60_000.0);
    let block_len = ((window_units / step) as usize).max(1);
    let segments = segment_reducer::segment_count(time_series.len(), block_len);
    let time_ave = time_round(
        &segment_reducer::reduce(ctx, &time_series.values, segments, nan_mean),
        &encoding,
    );

    let mut ave = InstrumentFrame::new();
    for (name, entry) in raw.iter() {
        let values = entry.data.as_series().expect("logger channels are series");
        let reduced = segment_reducer::reduce(
            ctx,
            values.as_slice().expect("contiguous series"),
            segments,
            nan_mean,
        );
        ave.insert_series(
            name.clone(),
            Array1::from(reduced),
            VariableAttrs::new(
                format!(
                    "{} was averaged every {} minutes",
                    entry.attrs.long_name, time.window_minutes
                ),
                entry.attrs.units.clone(),
            ),
        );
    }

    // Correct
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

    let mut average = SnapshotGroup::new(AVERAGE_GROUP);
    average.dims.push((dims::TIME.to_owned(), time_ave.len()));
    average.vars.push(time_variable(time_ave, &encoding));
    average.vars.extend(frame_variables(&ave));
    snapshot.groups.push(average);

    write_snapshot(&inputs.save_path, &snapshot, output)?;
    info!(
        path = %inputs.save_path.display(),
        records = time_series.len(),
        "thermistor-depth conversion complete"
    );
    Ok(())
}
