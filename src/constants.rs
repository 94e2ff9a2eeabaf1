//! Application constants for the mooring processor
//!
//! This module contains tuned quality-control thresholds, dataset naming
//! conventions, and reduction-dispatch defaults used throughout the crate.
//! The despiking constants are empirically tuned values carried over from
//! operational deployments; they are exposed here (and as overridable fields
//! of `SslTuning`) rather than inlined at their use sites.

// =============================================================================
// Time Axis Conventions
// =============================================================================

/// Timezone every output time axis is normalized to (UTC+8).
pub const TARGET_TIMEZONE_HOURS: f64 = 8.0;

/// Timestamp layout of RBR text exports.
pub const RBR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Date layout of the profiler first-ensemble date (two-digit year,
/// `20` century prefix applied before parsing).
pub const ENSEMBLE_DATE_FORMAT: &str = "%Y/%m/%d";

/// Seconds-of-minute boundary above which averaged timestamps round up.
pub const MINUTE_ROUND_UP_SECONDS: u32 = 30;

// =============================================================================
// Quality Control Thresholds
// =============================================================================

/// Acceptable correlation-magnitude window for profiler bins; counts outside
/// `[min, max]` are treated as instrument noise.
pub const CORRELATION_VALID_MIN: f64 = 100.0;
pub const CORRELATION_VALID_MAX: f64 = 150.0;

/// Valid runs shorter than this fraction of the series length are isolated
/// good samples amid noise and are discarded.
pub const SHORT_RUN_FRACTION: f64 = 0.008;

/// Half-width of the tolerance band around the mean correlation, as a
/// fraction of that mean, used when trimming deployment/recovery transients.
pub const MEAN_TOLERANCE_FRACTION: f64 = 0.05;

/// Number of near-bottom bins examined by the edge-trimming passes when the
/// profile has ten bins or fewer.
pub const DEFAULT_EDGE_BINS: usize = 5;

/// Profiles wider than this many bins examine `bins / 2` near-bottom bins
/// instead of [`DEFAULT_EDGE_BINS`].
pub const EDGE_BIN_HALVING_MIN: usize = 10;

/// Depth of the surface layer discarded from every CTD downcast (m).
pub const DOWNCAST_SURFACE_SKIP_M: f64 = 1.0;

// =============================================================================
// Segment Reducer Dispatch Defaults
// =============================================================================

/// Minimum per-slice element count before parallel dispatch is considered.
pub const PAR_MIN_SLICE_ELEMENTS: usize = 100;

/// Minimum segment count before parallel dispatch is considered.
pub const PAR_MIN_SEGMENTS: usize = 10;

/// Segment count above which dispatch is always parallel, regardless of
/// slice width.
pub const PAR_FORCE_SEGMENTS: usize = 500;

// =============================================================================
// Dataset Layout
// =============================================================================

/// Group holding the segment-reduced view of a converted dataset.
pub const AVERAGE_GROUP: &str = "Average Data Group";

/// Group holding depth-binned CTD downcast profiles.
pub const DOWNCAST_GROUP: &str = "Downcast Data Group";

/// Group holding the RBR metadata tree.
pub const META_GROUP: &str = "Meta Group";

/// Group holding profiler detail-file metadata.
pub const DETAILS_GROUP: &str = "File Details";

/// Group holding profiler deployment-command metadata.
pub const DEPLOYMENT_GROUP: &str = "Deployment Information";

/// Global attributes carrying the profiler bin geometry.
pub const ATTR_BIN1_MID: &str = "RDIBin1Mid";
pub const ATTR_BIN_SIZE: &str = "RDIBinSize";

/// Dimension names shared by every converted dataset.
pub mod dims {
    pub const TIME: &str = "time";
    pub const HEIGHT: &str = "height";
    pub const LON: &str = "lon";
    pub const LAT: &str = "lat";
}

// =============================================================================
// Instrument Export Conventions
// =============================================================================

/// Millimetres per metre: RDI exports depth and velocity in mm / mm s⁻¹.
pub const MM_PER_M: f64 = 1000.0;

/// RDI exports temperature, heading, pitch and roll in hundredths.
pub const CENTI_SCALE: f64 = 100.0;

/// RDI exports direction in tenths of a degree.
pub const DECI_SCALE: f64 = 10.0;

/// Number of acoustic beams on a supported profiler head.
pub const BEAM_COUNT: usize = 4;

/// Variables excluded from segment averaging (index axes and per-beam
/// percent-good planes are not physical time series).
pub const UNAVERAGED_VARIABLES: &[&str] = &[
    "bins", "ens", "pg_bm1", "pg_bm2", "pg_bm3", "pg_bm4", "wr_lat",
];
