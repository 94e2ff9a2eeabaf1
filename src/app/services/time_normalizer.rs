//! Time-axis reconstruction and normalization.
//!
//! Instrument exports carry either per-record calendar/clock fields, a clock
//! plus a single start date, or a timestamp string column. This module
//! rebuilds an absolute local-time sequence from any of the three, applies
//! the timezone/clock offset exactly once, and encodes the result against a
//! caller-specified reference-epoch/unit pair.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use tracing::debug;

use crate::constants::{MINUTE_ROUND_UP_SECONDS, TARGET_TIMEZONE_HOURS};
use crate::error::{MooringError, Result};

/// Time-axis unit relative to the reference epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn factor_ms(self) -> f64 {
        match self {
            Self::Milliseconds => 1.0,
            Self::Seconds => 1_000.0,
            Self::Minutes => 60_000.0,
            Self::Hours => 3_600_000.0,
            Self::Days => 86_400_000.0,
        }
    }
}

/// Reference-epoch/unit pair every encoded time value is expressed in,
/// e.g. `"milliseconds since 2018-07-01 00:00:00"`.
#[derive(Debug, Clone)]
pub struct TimeEncoding {
    unit: TimeUnit,
    epoch: NaiveDateTime,
    /// Verbatim units string recorded on the dataset time variables.
    pub units: String,
    /// Calendar label recorded alongside the units.
    pub calendar: String,
}

impl TimeEncoding {
    pub fn parse(units: &str, calendar: &str) -> Result<Self> {
        let (unit_word, epoch_text) = units.split_once(" since ").ok_or_else(|| {
            MooringError::configuration(format!("time_units '{units}' lacks a 'since' clause"))
        })?;
        let unit = match unit_word.trim() {
            "seconds" => TimeUnit::Seconds,
            "milliseconds" => TimeUnit::Milliseconds,
            "minutes" => TimeUnit::Minutes,
            "hours" => TimeUnit::Hours,
            "days" => TimeUnit::Days,
            other => {
                return Err(MooringError::configuration(format!(
                    "unsupported time unit '{other}' in '{units}'"
                )));
            }
        };
        let epoch = parse_epoch(epoch_text.trim()).ok_or_else(|| {
            MooringError::configuration(format!("invalid reference epoch in '{units}'"))
        })?;
        Ok(Self {
            unit,
            epoch,
            units: units.to_owned(),
            calendar: calendar.to_owned(),
        })
    }

    pub fn encode(&self, instant: NaiveDateTime) -> f64 {
        (instant - self.epoch).num_milliseconds() as f64 / self.unit.factor_ms()
    }

    pub fn decode(&self, value: f64) -> NaiveDateTime {
        self.epoch + Duration::milliseconds((value * self.unit.factor_ms()).round() as i64)
    }

    /// Express a wall-clock duration in encoded-axis units.
    pub fn from_milliseconds(&self, ms: f64) -> f64 {
        ms / self.unit.factor_ms()
    }
}

fn parse_epoch(text: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Per-record wall-clock fields from a profiler matrix export.
#[derive(Debug, Clone)]
pub struct ClockFields {
    pub hour: Vec<u32>,
    pub minute: Vec<u32>,
    pub second: Vec<u32>,
    /// Hundredths of a second.
    pub hundredth: Vec<u32>,
}

impl ClockFields {
    pub fn len(&self) -> usize {
        self.hour.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hour.is_empty()
    }
}

/// Per-record calendar fields (two-digit years, 2000-based).
#[derive(Debug, Clone)]
pub struct CalendarFields {
    pub year: Vec<i32>,
    pub month: Vec<u32>,
    pub day: Vec<u32>,
}

/// Normalized time axis: encoded values plus the encoding that produced
/// them. Timestamps are strictly increasing once constructed.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    pub values: Vec<f64>,
    pub encoding: TimeEncoding,
}

impl TimeSeries {
    pub fn from_instants(encoding: TimeEncoding, instants: &[NaiveDateTime]) -> Result<Self> {
        let values: Vec<f64> = instants.iter().map(|dt| encoding.encode(*dt)).collect();
        for pair in values.windows(2) {
            if pair[1] <= pair[0] {
                return Err(MooringError::data_integrity(
                    "time axis is not strictly increasing after normalization",
                ));
            }
        }
        Ok(Self { values, encoding })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample spacing, from the first pair of records.
    pub fn step(&self) -> Result<f64> {
        if self.values.len() < 2 {
            return Err(MooringError::data_integrity(
                "cannot derive a sample interval from fewer than two records",
            ));
        }
        Ok(self.values[1] - self.values[0])
    }
}

/// Determine the effective shift, in hours, applied to every timestamp.
///
/// `effective = target_timezone - declared_instrument_offset`, where the
/// declared offset comes from the configuration when present and from the
/// instrument metadata otherwise. Neither source being available is a fatal
/// configuration error for that instrument run.
pub fn resolve_offset_hours(
    configured: Option<f64>,
    from_metadata: Option<f64>,
    section: &str,
) -> Result<f64> {
    let declared = configured.or(from_metadata).ok_or_else(|| {
        MooringError::configuration(format!(
            "no time_offset in the {section} node and none found in the instrument metadata"
        ))
    })?;
    Ok(TARGET_TIMEZONE_HOURS - declared)
}

fn offset_duration(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

fn record_instant(
    year: i32,
    month: u32,
    day: u32,
    clock: &ClockFields,
    index: usize,
    shift: Duration,
) -> Result<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        MooringError::data_integrity(format!("invalid calendar fields {year}-{month}-{day}"))
    })?;
    let instant = date
        .and_hms_micro_opt(
            clock.hour[index],
            clock.minute[index],
            clock.second[index],
            clock.hundredth[index] * 10_000,
        )
        .ok_or_else(|| {
            MooringError::data_integrity(format!("invalid clock fields at record {index}"))
        })?;
    Ok(instant + shift)
}

/// Reconstruct absolute local timestamps from export clock fields.
///
/// With calendar fields present, every record carries its own date
/// (two-digit years are 2000-based). Without them, the sequence starts at
/// `start_date` and a day rollover is detected whenever the hour value
/// decreases relative to the previous record.
///
/// The timezone shift is applied here, exactly once.
pub fn build_timestamps(
    calendar: Option<&CalendarFields>,
    clock: &ClockFields,
    start_date: Option<NaiveDate>,
    effective_offset_hours: f64,
) -> Result<Vec<NaiveDateTime>> {
    let shift = offset_duration(effective_offset_hours);
    let mut out = Vec::with_capacity(clock.len());

    match calendar {
        Some(fields) => {
            for i in 0..clock.len() {
                out.push(record_instant(
                    fields.year[i] + 2000,
                    fields.month[i],
                    fields.day[i],
                    clock,
                    i,
                    shift,
                )?);
            }
        }
        None => {
            let mut date = start_date.ok_or_else(|| {
                MooringError::data_integrity(
                    "clock-only export requires an ensemble start date",
                )
            })?;
            for i in 0..clock.len() {
                if i > 0 && clock.hour[i] < clock.hour[i - 1] {
                    date = date.succ_opt().ok_or_else(|| {
                        MooringError::data_integrity("day rollover past calendar range")
                    })?;
                }
                out.push(record_instant(
                    date.year(),
                    date.month(),
                    date.day(),
                    clock,
                    i,
                    shift,
                )?);
            }
        }
    }
    debug!(records = out.len(), "time axis reconstructed");
    Ok(out)
}

/// Parse an RBR timestamp column and apply the timezone shift.
pub fn parse_timestamp_column(
    raw: &[String],
    format: &str,
    effective_offset_hours: f64,
) -> Result<Vec<NaiveDateTime>> {
    let shift = offset_duration(effective_offset_hours);
    raw.iter()
        .map(|text| {
            NaiveDateTime::parse_from_str(text.trim(), format)
                .map(|dt| dt + shift)
                .map_err(MooringError::from)
        })
        .collect()
}

/// Round encoded time values to the nearest minute (seconds above the
/// half-minute boundary round up). Used on averaged time axes so block
/// midpoints land on reporting-interval marks.
pub fn time_round(values: &[f64], encoding: &TimeEncoding) -> Vec<f64> {
    values
        .iter()
        .map(|&value| {
            let instant = encoding.decode(value);
            let truncated = instant
                .date()
                .and_hms_opt(instant.hour(), instant.minute(), 0)
                .expect("truncated clock fields are always valid");
            let rounded = if instant.second() > MINUTE_ROUND_UP_SECONDS {
                truncated + Duration::minutes(1)
            } else {
                truncated
            };
            encoding.encode(rounded)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis_encoding() -> TimeEncoding {
        TimeEncoding::parse("milliseconds since 2018-07-01 00:00:00", "standard").unwrap()
    }

    fn clock(hours: &[u32]) -> ClockFields {
        ClockFields {
            hour: hours.to_vec(),
            minute: vec![0; hours.len()],
            second: vec![0; hours.len()],
            hundredth: vec![0; hours.len()],
        }
    }

    #[test]
    fn parses_unit_and_epoch() {
        let enc = millis_encoding();
        let instant = NaiveDate::from_ymd_opt(2018, 7, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        assert_eq!(enc.encode(instant), 1000.0);
        assert_eq!(enc.decode(1000.0), instant);
    }

    #[test]
    fn rejects_malformed_units() {
        assert!(TimeEncoding::parse("fortnights since 2018-07-01", "standard").is_err());
        assert!(TimeEncoding::parse("milliseconds 2018-07-01", "standard").is_err());
    }

    #[test]
    fn day_rollover_advances_date_once() {
        let instants = build_timestamps(
            None,
            &clock(&[23, 0, 1]),
            NaiveDate::from_ymd_opt(2018, 7, 1),
            0.0,
        )
        .unwrap();
        assert_eq!(instants[0].date(), NaiveDate::from_ymd_opt(2018, 7, 1).unwrap());
        assert_eq!(instants[1].date(), NaiveDate::from_ymd_opt(2018, 7, 2).unwrap());
        assert_eq!(instants[2].date(), NaiveDate::from_ymd_opt(2018, 7, 2).unwrap());
    }

    #[test]
    fn calendar_fields_use_two_digit_years() {
        let fields = CalendarFields {
            year: vec![18],
            month: vec![7],
            day: vec![15],
        };
        let instants = build_timestamps(Some(&fields), &clock(&[6]), None, 0.0).unwrap();
        assert_eq!(
            instants[0].date(),
            NaiveDate::from_ymd_opt(2018, 7, 15).unwrap()
        );
    }

    #[test]
    fn offset_is_applied_once_at_construction() {
        // Instrument clock at UTC (declared 0), target UTC+8 -> +8 h shift.
        let shift = resolve_offset_hours(Some(0.0), None, "adcpInfo").unwrap();
        assert_eq!(shift, 8.0);
        let instants = build_timestamps(
            None,
            &clock(&[1]),
            NaiveDate::from_ymd_opt(2018, 7, 1),
            shift,
        )
        .unwrap();
        assert_eq!(instants[0].hour(), 9);
    }

    #[test]
    fn offset_prefers_configuration_over_metadata() {
        assert_eq!(
            resolve_offset_hours(Some(8.0), Some(0.0), "tdInfo").unwrap(),
            0.0
        );
        assert_eq!(
            resolve_offset_hours(None, Some(8.0), "tdInfo").unwrap(),
            0.0
        );
        assert!(resolve_offset_hours(None, None, "tdInfo").is_err());
    }

    #[test]
    fn strictly_increasing_axis_is_enforced() {
        let enc = millis_encoding();
        let base = NaiveDate::from_ymd_opt(2018, 7, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let good = TimeSeries::from_instants(enc.clone(), &[base, base + Duration::seconds(1)]);
        assert!(good.is_ok());
        let bad = TimeSeries::from_instants(enc, &[base, base]);
        assert!(bad.is_err());
    }

    #[test]
    fn minute_rounding_honors_half_minute_boundary() {
        let enc = millis_encoding();
        let up = enc.encode(
            NaiveDate::from_ymd_opt(2018, 7, 1)
                .unwrap()
                .and_hms_opt(10, 4, 31)
                .unwrap(),
        );
        let down = enc.encode(
            NaiveDate::from_ymd_opt(2018, 7, 1)
                .unwrap()
                .and_hms_opt(10, 4, 29)
                .unwrap(),
        );
        let rounded = time_round(&[up, down], &enc);
        assert_eq!(enc.decode(rounded[0]).minute(), 5);
        assert_eq!(enc.decode(rounded[1]).minute(), 4);
        assert_eq!(enc.decode(rounded[0]).second(), 0);
    }
}
