//! Reynolds-stress estimation from beam-velocity variance.
//!
//! Turbulent momentum flux is estimated with the variance method: the
//! difference between opposing along-beam velocity variances, divided by the
//! beam-geometry factor `2 sin θ cos θ`, gives one horizontal stress
//! component per beam pair. Wave-orbital motion is removed beforehand by
//! fitting a low-order trend over a banded window of the companion beam and
//! keeping only the residual fluctuations.

use ndarray::Array2;

use crate::app::services::segment_reducer::{self, ExecutionContext};
use crate::app::services::stats::{nan_mean, nan_std};

/// Standard deviation of the turbulent residual of `u1` after removing its
/// mean and the wave component predicted from `u2`.
///
/// The wave fit is a least-squares solve on a banded design matrix whose
/// row `i` holds `u2` over the lags `±(n-1)/2` around `i` (zero outside the
/// series). A singular system (constant or fully masked input) falls back
/// to the plain detrended deviation.
pub fn turbulent_std(u1: &[f64], u2: &[f64], n: usize) -> f64 {
    let m = u1.len();
    if m == 0 || n == 0 {
        return f64::NAN;
    }
    let u1_mean = nan_mean(u1);
    if !u1_mean.is_finite() {
        return f64::NAN;
    }
    let demeaned: Vec<f64> = u1.iter().map(|&v| v - u1_mean).collect();

    let half = (n as isize - 1) / 2;
    let band = |row: usize, col: usize| -> f64 {
        let idx = row as isize + col as isize - half;
        if idx < 0 || idx >= m as isize {
            return 0.0;
        }
        let v = u2[idx as usize];
        if v.is_finite() { v } else { 0.0 }
    };

    // Normal equations over rows with a finite target sample.
    let mut gram = vec![vec![0.0; n]; n];
    let mut rhs = vec![0.0; n];
    for row in 0..m {
        if !demeaned[row].is_finite() {
            continue;
        }
        for col in 0..n {
            let a = band(row, col);
            rhs[col] += a * demeaned[row];
            for other in col..n {
                gram[col][other] += a * band(row, other);
            }
        }
    }
    for col in 0..n {
        for other in 0..col {
            gram[col][other] = gram[other][col];
        }
    }

    let residual: Vec<f64> = match solve(gram, rhs) {
        Some(coeffs) => (0..m)
            .map(|row| {
                if !demeaned[row].is_finite() {
                    return f64::NAN;
                }
                let wave: f64 = coeffs
                    .iter()
                    .enumerate()
                    .map(|(col, &c)| c * band(row, col))
                    .sum();
                demeaned[row] - wave
            })
            .collect(),
        None => demeaned,
    };

    nan_std(&residual)
}

/// Gaussian elimination with partial pivoting; `None` on a singular system.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| {
            a[x][col]
                .abs()
                .partial_cmp(&a[y][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for col in (0..n).rev() {
        let mut sum = b[col];
        for k in (col + 1)..n {
            sum -= a[col][k] * x[k];
        }
        x[col] = sum / a[col][col];
    }
    Some(x)
}

/// Per-block turbulent variance of a beam pair, expressed as a statistic
/// handed to the segment reducer over the zipped series.
pub fn block_turbulent_variance(
    ctx: &ExecutionContext,
    u1: &[f64],
    u2: &[f64],
    block_len: usize,
    half_window: usize,
) -> Vec<f64> {
    let pairs: Vec<(f64, f64)> = u1.iter().copied().zip(u2.iter().copied()).collect();
    let segments = segment_reducer::segment_count(pairs.len(), block_len);
    segment_reducer::reduce(ctx, &pairs, segments, |block| {
        let (first, second): (Vec<f64>, Vec<f64>) = block.iter().copied().unzip();
        let sd = turbulent_std(&first, &second, half_window);
        sd * sd
    })
}

fn geometry_factor(beam_half_angle_deg: f64) -> f64 {
    let theta = beam_half_angle_deg.to_radians();
    2.0 * theta.sin() * theta.cos()
}

/// Combine opposing per-beam variances into one stress component:
/// `(var_b - var_a) / (2 sin θ cos θ)`.
pub fn stress_series(var_a: &[f64], var_b: &[f64], beam_half_angle_deg: f64) -> Vec<f64> {
    let factor = geometry_factor(beam_half_angle_deg);
    var_a
        .iter()
        .zip(var_b.iter())
        .map(|(&a, &b)| (b - a) / factor)
        .collect()
}

/// One stress component per averaging block from two opposing beam pairs,
/// wave-filtered: each pair's block variances come from the detrended
/// residuals, then the variance difference collapses through the beam
/// geometry.
pub fn wave_filtered_stress(
    ctx: &ExecutionContext,
    pair_a: (&[f64], &[f64]),
    pair_b: (&[f64], &[f64]),
    block_len: usize,
    half_window: usize,
    beam_half_angle_deg: f64,
) -> Vec<f64> {
    let var_a = block_turbulent_variance(ctx, pair_a.0, pair_a.1, block_len, half_window);
    let var_b = block_turbulent_variance(ctx, pair_b.0, pair_b.1, block_len, half_window);
    stress_series(&var_a, &var_b, beam_half_angle_deg)
}

/// Element-wise stress over averaged (time × bin) variance planes.
pub fn stress_profile(
    var_a: &Array2<f64>,
    var_b: &Array2<f64>,
    beam_half_angle_deg: f64,
) -> Array2<f64> {
    let factor = geometry_factor(beam_half_angle_deg);
    let mut out = var_b - var_a;
    out.mapv_inplace(|v| v / factor);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::segment_reducer::ExecutionContext;
    use ndarray::array;

    #[test]
    fn equal_variances_cancel() {
        let var_a = vec![1.0; 8];
        let var_b = vec![1.0; 8];
        let stress = stress_series(&var_a, &var_b, 20.0);
        assert!(stress.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn stress_scales_with_variance_difference() {
        // theta = 20 deg: 2 sin(20) cos(20) = sin(40) ~ 0.642788
        let stress = stress_series(&[1.0], &[2.0], 20.0);
        assert!((stress[0] - 1.0 / 0.642_787_609_686_539_3).abs() < 1e-9);
        // Swapping the pair flips the sign.
        let flipped = stress_series(&[2.0], &[1.0], 20.0);
        assert!((stress[0] + flipped[0]).abs() < 1e-12);
    }

    #[test]
    fn stress_profile_matches_series() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let b = array![[2.0, 2.0], [3.0, 5.0]];
        let out = stress_profile(&a, &b, 20.0);
        assert!((out[[0, 0]] - stress_series(&[1.0], &[2.0], 20.0)[0]).abs() < 1e-12);
        assert_eq!(out[[0, 1]], 0.0);
        assert_eq!(out[[1, 0]], 0.0);
    }

    #[test]
    fn constant_series_has_zero_turbulent_std() {
        let u1 = vec![0.4; 32];
        let u2 = vec![0.4; 32];
        let sd = turbulent_std(&u1, &u2, 5);
        assert!(sd.abs() < 1e-12);
    }

    #[test]
    fn wave_component_is_removed() {
        // u1 is a pure scaled copy of the wave signal carried by u2: after
        // the banded fit the residual should be far smaller than the raw
        // fluctuation.
        let wave: Vec<f64> = (0..256).map(|i| (i as f64 * 0.2).sin()).collect();
        let u1: Vec<f64> = wave.iter().map(|&w| 0.8 * w).collect();
        let raw_sd = nan_std(&u1);
        let residual_sd = turbulent_std(&u1, &wave, 5);
        assert!(residual_sd < raw_sd * 0.1);
    }

    #[test]
    fn masked_samples_do_not_poison_the_fit() {
        let mut u1: Vec<f64> = (0..64).map(|i| (i as f64 * 0.3).sin()).collect();
        let u2 = u1.clone();
        u1[10] = f64::NAN;
        let sd = turbulent_std(&u1, &u2, 3);
        assert!(sd.is_finite());
    }

    #[test]
    fn identical_beam_pairs_yield_zero_wave_filtered_stress() {
        let ctx = ExecutionContext::with_workers(1).unwrap();
        let u: Vec<f64> = (0..120).map(|i| (i as f64 * 0.4).sin()).collect();
        let stress = wave_filtered_stress(&ctx, (&u, &u), (&u, &u), 40, 5, 20.0);
        assert_eq!(stress.len(), 3);
        assert!(stress.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn block_variance_count_is_ceiling_divided() {
        let ctx = ExecutionContext::with_workers(1).unwrap();
        let u1: Vec<f64> = (0..100).map(|i| (i as f64 * 0.7).sin()).collect();
        let u2 = u1.clone();
        let variances = block_turbulent_variance(&ctx, &u1, &u2, 30, 5);
        assert_eq!(variances.len(), 4);
        assert!(variances.iter().all(|v| v.is_finite()));
    }
}
