//! Valid-time-window extraction.
//!
//! Deployment and recovery leave large depth-rate transients at both ends of
//! a record. The valid window is bounded by the first and last places where
//! the depth rate settles back under the jump threshold; everything sharing
//! the time axis is trimmed to that window and rewritten to a new dataset.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array1, Array2, s};
use tracing::info;

use crate::app::models::FrameVariable;
use crate::app::services::dataset_writer::{read_snapshot, rewrite_with};
use crate::config::OutputOptions;
use crate::constants::dims;
use crate::error::{MooringError, Result};

/// Locate the valid window of a depth series.
///
/// Scanning forward, a consecutive-pair difference above `jump_threshold`
/// arms the detector; the first subsequent pair back under the threshold
/// marks the valid start. The backward scan is symmetric. Both bounds are
/// inclusive, so a series already trimmed to its valid window returns
/// `(0, len - 1)` and extraction is idempotent.
pub fn find_window(depth: &[f64], jump_threshold: f64) -> (usize, usize) {
    let last = depth.len().saturating_sub(1);
    let mut start = 0usize;
    let mut end = last;

    let mut armed = false;
    for i in 0..last {
        let step = (depth[i + 1] - depth[i]).abs();
        if armed && step < jump_threshold {
            start = i;
            break;
        }
        if step > jump_threshold {
            armed = true;
        }
    }

    armed = false;
    for i in (1..=last).rev() {
        let step = (depth[i - 1] - depth[i]).abs();
        if armed && step < jump_threshold {
            end = i;
            break;
        }
        if step > jump_threshold {
            armed = true;
        }
    }

    (start, end)
}

/// Trim every time-dimensioned variable of `group_name` to the valid window
/// and rewrite the dataset to `dst`. Variables not sharing the time axis
/// (and every other group) are copied unchanged.
///
/// Returns the inclusive window located on the depth channel. Fails with
/// [`MooringError::MissingAverageGroup`] when the expected pre-averaged
/// group is absent.
pub fn extract_valid_window(
    src: &Path,
    dst: &Path,
    group_name: &str,
    jump_threshold: f64,
    opts: &OutputOptions,
) -> Result<(usize, usize)> {
    let snapshot = read_snapshot(src)?;
    let group = snapshot.group(group_name).ok_or_else(|| {
        MooringError::MissingAverageGroup {
            path: src.to_path_buf(),
        }
    })?;
    let depth = group.variable("dep").ok_or_else(|| {
        MooringError::data_integrity(format!(
            "cannot locate a valid time window without depth data in '{group_name}'"
        ))
    })?;

    let (start, end) = find_window(&depth.data, jump_threshold);
    info!(start, end, "valid time window located");

    let mut replacements: BTreeMap<String, FrameVariable> = BTreeMap::new();
    for var in &group.vars {
        let Some(axis) = var.dims.iter().position(|d| d == dims::TIME) else {
            continue;
        };
        let replacement = match var.shape.len() {
            1 => FrameVariable::Series(Array1::from_vec(var.data[start..=end].to_vec())),
            2 => {
                let full = Array2::from_shape_vec((var.shape[0], var.shape[1]), var.data.clone())
                    .map_err(|err| {
                        MooringError::data_integrity(format!(
                            "variable '{}' has inconsistent shape: {err}",
                            var.name
                        ))
                    })?;
                let window = if axis == 0 {
                    full.slice(s![start..=end, ..]).to_owned()
                } else {
                    full.slice(s![.., start..=end]).to_owned()
                };
                FrameVariable::Profile(window)
            }
            _ => continue,
        };
        replacements.insert(var.name.clone(), replacement);
    }

    rewrite_with(src, dst, group_name, &replacements, opts)?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::zero_drift::{apply_bias, correct_zero_drift};

    #[test]
    fn window_bounds_settle_after_transients() {
        // Pre-deployment churn, stable middle, recovery churn.
        let depth = [0.0, 5.0, 10.0, 10.1, 10.2, 10.1, 10.0, 5.0, 0.5];
        let (start, end) = find_window(&depth, 0.5);
        assert_eq!(start, 2);
        assert_eq!(end, 6);
    }

    #[test]
    fn already_trimmed_series_round_trips() {
        let depth = [10.1, 10.2, 10.1, 10.0, 10.1];
        let (start, end) = find_window(&depth, 0.5);
        assert_eq!((start, end), (0, depth.len() - 1));
        // Idempotence: extracting again yields the same bounds.
        let again = find_window(&depth[start..=end], 0.5);
        assert_eq!(again, (0, depth.len() - 1));
    }

    #[test]
    fn forward_and_backward_conventions_are_both_exercised() {
        // Jump only at the front: the backward scan never arms.
        let front = [0.0, 9.0, 9.1, 9.0, 9.1];
        assert_eq!(find_window(&front, 0.5), (1, 4));
        // Jump only at the back: the forward scan never arms.
        let back = [9.1, 9.0, 9.1, 9.0, 0.0];
        assert_eq!(find_window(&back, 0.5), (0, 3));
    }

    #[test]
    fn corrected_deployment_scenario_finds_deployment_index() {
        // 1000 samples: plateau at 0.05 m for indices 0-49, jump to 12.3 m at
        // index 50, stable afterward.
        let mut depth = vec![0.05; 50];
        depth.extend(std::iter::repeat_n(12.3, 950));

        let bias = correct_zero_drift(&depth, 0.2).unwrap();
        assert!((bias - 0.05).abs() < 1e-12);
        apply_bias(&mut depth, bias);

        let (start, _end) = find_window(&depth, 0.2);
        assert_eq!(start, 50);
    }
}
