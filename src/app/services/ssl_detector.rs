//! Sea-surface-line detection and multi-pass despiking.
//!
//! Builds a monotonic quality mask over the averaged (time × depth-bin)
//! profile variables of a converted dataset: correlation screening, edge-run
//! trimming, sea-surface cutoff from bin geometry, velocity-jump fault
//! masking, and short-island removal. Once a cell goes invalid it stays
//! invalid; the final mask is applied identically to every companion
//! variable sharing the time/bin axes.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::app::models::{FrameVariable, QualityMask};
use crate::app::services::dataset_writer::{read_snapshot, rewrite_with};
use crate::app::services::stats::{finite_runs, nan_mean};
use crate::app::services::zero_drift::correct_zero_drift;
use crate::config::{OutputOptions, VelocityFilter};
use crate::constants::{
    ATTR_BIN1_MID, ATTR_BIN_SIZE, AVERAGE_GROUP, CORRELATION_VALID_MAX, CORRELATION_VALID_MIN,
    DEFAULT_EDGE_BINS, EDGE_BIN_HALVING_MIN, MEAN_TOLERANCE_FRACTION, SHORT_RUN_FRACTION,
};
use crate::error::{MooringError, Result};

/// Empirically tuned despiking constants.
///
/// The values are operational tunings, not derived quantities; they are kept
/// as named, overridable fields rather than inlined literals.
#[derive(Debug, Clone, Copy)]
pub struct SslTuning {
    pub correlation_min: f64,
    pub correlation_max: f64,
    /// Valid runs shorter than this fraction of the series are discarded.
    pub short_run_fraction: f64,
    /// Half-width of the mean-tolerance band, as a fraction of the mean.
    pub mean_tolerance_fraction: f64,
    /// Bins examined by the edge passes for narrow profiles.
    pub default_edge_bins: usize,
    /// Profiles wider than this examine half their bins instead.
    pub edge_bin_halving_min: usize,
}

impl Default for SslTuning {
    fn default() -> Self {
        Self {
            correlation_min: CORRELATION_VALID_MIN,
            correlation_max: CORRELATION_VALID_MAX,
            short_run_fraction: SHORT_RUN_FRACTION,
            mean_tolerance_fraction: MEAN_TOLERANCE_FRACTION,
            default_edge_bins: DEFAULT_EDGE_BINS,
            edge_bin_halving_min: EDGE_BIN_HALVING_MIN,
        }
    }
}

/// Profiler bin geometry relating a depth sample to a bin index.
#[derive(Debug, Clone, Copy)]
pub struct BinGeometry {
    /// Mid-point of the first bin above the transducer (m).
    pub bin1_mid: f64,
    /// Vertical bin extent (m).
    pub bin_size: f64,
}

impl BinGeometry {
    /// Index of the first bin at or above the sea surface for one depth
    /// sample; bins from this index upward sample above the water.
    fn surface_cutoff(&self, depth: f64, nbins: usize) -> usize {
        let raw = ((depth - self.bin1_mid) / self.bin_size - 1.0).floor();
        if raw < 0.0 { 0 } else { (raw as usize).min(nbins) }
    }
}

/// Result of the mask-building passes.
pub struct SslOutcome {
    pub mask: QualityMask,
    /// Inclusive time window surviving the correlation screen.
    pub window: (usize, usize),
}

fn edge_bins(nbins: usize, tuning: &SslTuning) -> usize {
    if nbins > tuning.edge_bin_halving_min {
        nbins / 2
    } else {
        tuning.default_edge_bins.min(nbins)
    }
}

/// Pass 1: clip correlation magnitude outside the acceptance window.
fn screen_correlation(correlation: &Array2<f64>, tuning: &SslTuning) -> Array2<f64> {
    correlation.mapv(|v| {
        if v < tuning.correlation_min || v > tuning.correlation_max {
            f64::NAN
        } else {
            v
        }
    })
}

/// Pass 2: per near-bottom bin, drop isolated valid runs and record the
/// invalid runs touching either end of the record.
fn trim_edge_runs(work: &mut Array2<f64>, tuning: &SslTuning) {
    let (nt, nbins) = work.dim();
    let examined = edge_bins(nbins, tuning);
    let floor = nt as f64 * tuning.short_run_fraction;

    let mut head: Option<usize> = None;
    let mut tail: Option<usize> = None;
    for col in 0..examined {
        let validity: Vec<bool> = work.column(col).iter().map(|v| v.is_finite()).collect();
        for (start, end) in finite_runs(&validity) {
            if ((end - start + 1) as f64) < floor {
                for row in start..=end {
                    work[[row, col]] = f64::NAN;
                }
            }
        }
        let invalidity: Vec<bool> = work.column(col).iter().map(|v| !v.is_finite()).collect();
        // A fully dead bin carries no edge information, only edge-touching
        // runs of bins that still hold valid data mark transients.
        if invalidity.iter().all(|&flag| flag) {
            continue;
        }
        for (start, end) in finite_runs(&invalidity) {
            if start == 0 {
                head = Some(head.map_or(end, |h| h.max(end)));
            }
            if end == nt - 1 {
                tail = Some(tail.map_or(start, |t| t.min(start)));
            }
        }
    }

    if let Some(head) = head {
        for row in 0..=head {
            work.row_mut(row).fill(f64::NAN);
        }
    }
    if let Some(tail) = tail {
        for row in tail..nt {
            work.row_mut(row).fill(f64::NAN);
        }
    }
}

/// Pass 3: trim leading/trailing samples whose bin-averaged correlation
/// falls outside the tolerance band around the global mean, then return the
/// surviving inclusive window.
fn surviving_window(work: &Array2<f64>, tuning: &SslTuning) -> Result<(usize, usize)> {
    let (nt, nbins) = work.dim();
    let examined = edge_bins(nbins, tuning);

    let mut row_ave: Vec<f64> = (0..nt)
        .map(|row| {
            let head: Vec<f64> = (0..examined).map(|col| work[[row, col]]).collect();
            nan_mean(&head)
        })
        .collect();
    let global = nan_mean(&row_ave);
    if !global.is_finite() {
        return Err(MooringError::data_integrity(
            "correlation screen removed every sample",
        ));
    }
    let lo = global * (1.0 - tuning.mean_tolerance_fraction);
    let hi = global * (1.0 + tuning.mean_tolerance_fraction);
    let in_band = |v: f64| v.is_finite() && v >= lo && v <= hi;

    for row in 0..nt {
        if in_band(row_ave[row]) {
            break;
        }
        row_ave[row] = f64::NAN;
    }
    for row in (0..nt).rev() {
        if in_band(row_ave[row]) {
            break;
        }
        row_ave[row] = f64::NAN;
    }

    let finite: Vec<usize> = (0..nt).filter(|&row| row_ave[row].is_finite()).collect();
    match (finite.first(), finite.last()) {
        (Some(&first), Some(&last)) => Ok((first, last)),
        _ => Err(MooringError::data_integrity(
            "no samples survive the correlation tolerance band",
        )),
    }
}

/// Pass 5: walk each time row of a velocity component and invalidate
/// everything downstream of the first sample-to-sample jump over the
/// threshold. A beam-tracking fault contaminates all subsequent bins of
/// that profile.
fn mask_velocity_jumps(mask: &mut QualityMask, velocity: &Array2<f64>, threshold: f64) {
    let (nt, nbins) = velocity.dim();
    for row in 0..nt {
        for col in 0..nbins.saturating_sub(1) {
            if (velocity[[row, col + 1]] - velocity[[row, col]]).abs() > threshold {
                mask.invalidate_row_tail(row, col + 1);
                break;
            }
        }
    }
}

/// Pass 6: remove remaining valid runs spanning fewer samples than the
/// configured minimum duration — statistically insignificant islands.
fn mask_short_islands(mask: &mut QualityMask, min_span: usize) {
    for col in 0..mask.ncols() {
        let validity = mask.column_validity(col);
        for (start, end) in finite_runs(&validity) {
            if end - start < min_span {
                for row in start..=end {
                    mask.invalidate(row, col);
                }
            }
        }
    }
}

/// Build the quality mask for one averaged profile record.
///
/// `correlation` drives the time-window passes when available; without it
/// the whole record is screened only by geometry, velocity jumps, and
/// island removal.
pub fn build_mask(
    correlation: Option<&Array2<f64>>,
    depth: &Array1<f64>,
    geometry: BinGeometry,
    velocities: &BTreeMap<String, &Array2<f64>>,
    filter: &VelocityFilter,
    tuning: &SslTuning,
) -> Result<SslOutcome> {
    let nt = depth.len();
    let nbins = velocities
        .values()
        .next()
        .map(|v| v.ncols())
        .or_else(|| correlation.map(|c| c.ncols()))
        .ok_or_else(|| {
            MooringError::data_integrity("no profile variables available for mask construction")
        })?;

    let window = match correlation {
        Some(correlation) => {
            let mut work = screen_correlation(correlation, tuning);
            trim_edge_runs(&mut work, tuning);
            surviving_window(&work, tuning)?
        }
        None => {
            warn!("no correlation channel; surface mask built from geometry alone");
            (0, nt.saturating_sub(1))
        }
    };
    debug!(start = window.0, end = window.1, "correlation screen window");

    let mut mask = QualityMask::all_valid(nt, nbins);
    mask.invalidate_rows(0..window.0);
    mask.invalidate_rows((window.1 + 1)..nt);

    // Pass 4: clear data above the sea surface, per time step.
    for row in window.0..=window.1 {
        let d = depth[row];
        if d.is_finite() {
            mask.invalidate_row_tail(row, geometry.surface_cutoff(d, nbins));
        } else {
            mask.invalidate_row_tail(row, 0);
        }
    }

    for (name, threshold) in [
        ("u", filter.u),
        ("v", filter.v),
        ("w", filter.w),
    ] {
        if let Some(&velocity) = velocities.get(name) {
            mask_velocity_jumps(&mut mask, velocity, threshold);
        }
    }

    mask_short_islands(&mut mask, filter.scatter);

    info!(
        invalid = mask.invalid_count(),
        cells = nt * nbins,
        "surface-line mask assembled"
    );
    Ok(SslOutcome { mask, window })
}

/// Run the sea-surface-line pass over one converted dataset.
///
/// Reads the averaged group, optionally applies the zero-drift correction
/// the conversion skipped, masks every 2-D variable, and rewrites the
/// dataset to `dst`. With `debug` set the rewrite is suppressed and only the
/// mask statistics are reported.
pub fn detect_surface_line(
    src: &Path,
    dst: &Path,
    jump_threshold: f64,
    filter: &VelocityFilter,
    apply_drift_correction: bool,
    debug_only: bool,
    tuning: &SslTuning,
    opts: &OutputOptions,
) -> Result<()> {
    let snapshot = read_snapshot(src)?;
    let group = snapshot
        .group(AVERAGE_GROUP)
        .ok_or_else(|| MooringError::MissingAverageGroup {
            path: src.to_path_buf(),
        })?;

    let depth_var = group.variable("dep").ok_or_else(|| {
        MooringError::data_integrity("SSL cannot be detected without depth data")
    })?;
    let mut depth = Array1::from_vec(depth_var.data.clone());
    if apply_drift_correction {
        let bias = correct_zero_drift(depth.as_slice().expect("1-D array"), jump_threshold)?;
        depth.mapv_inplace(|v| v - bias);
    }

    let geometry = BinGeometry {
        bin1_mid: snapshot.attr_number(ATTR_BIN1_MID).ok_or_else(|| {
            MooringError::data_integrity(format!("dataset lacks the {ATTR_BIN1_MID} attribute"))
        })?,
        bin_size: snapshot.attr_number(ATTR_BIN_SIZE).ok_or_else(|| {
            MooringError::data_integrity(format!("dataset lacks the {ATTR_BIN_SIZE} attribute"))
        })?,
    };

    let mut profiles: BTreeMap<String, Array2<f64>> = BTreeMap::new();
    for var in &group.vars {
        if var.shape.len() == 2 {
            let arr = Array2::from_shape_vec((var.shape[0], var.shape[1]), var.data.clone())
                .map_err(|err| {
                    MooringError::data_integrity(format!(
                        "variable '{}' has inconsistent shape: {err}",
                        var.name
                    ))
                })?;
            profiles.insert(var.name.clone(), arr);
        }
    }

    let correlation = profiles.get("cor_ave").cloned();
    let velocities: BTreeMap<String, &Array2<f64>> = profiles
        .iter()
        .filter(|(name, _)| matches!(name.as_str(), "u" | "v" | "w"))
        .map(|(name, arr)| (name.clone(), arr))
        .collect();

    let outcome = build_mask(
        correlation.as_ref(),
        &depth,
        geometry,
        &velocities,
        filter,
        tuning,
    )?;

    if debug_only {
        info!("debug mode: dataset left unmodified");
        return Ok(());
    }

    let mut replacements: BTreeMap<String, FrameVariable> = BTreeMap::new();
    for (name, mut profile) in profiles {
        outcome.mask.apply_to(&mut profile);
        replacements.insert(name, FrameVariable::Profile(profile));
    }
    replacements.insert("dep".to_owned(), FrameVariable::Series(depth));

    rewrite_with(src, dst, AVERAGE_GROUP, &replacements, opts)
}
