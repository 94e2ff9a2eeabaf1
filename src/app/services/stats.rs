//! NaN-aware statistical helpers.
//!
//! Quality masks mark invalid cells with NaN, so every reduction in the
//! pipeline skips non-finite samples. Variance and standard deviation use
//! the population (N) denominator to match the block-variance estimator fed
//! into the Reynolds-stress calculation.

/// Mean of the finite samples. Returns NaN if none are finite.
pub fn nan_mean(data: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &x in data {
        if x.is_finite() {
            sum += x;
            count += 1;
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Population variance of the finite samples. Returns NaN if none are finite.
pub fn nan_var(data: &[f64]) -> f64 {
    let mean = nan_mean(data);
    if !mean.is_finite() {
        return f64::NAN;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for &x in data {
        if x.is_finite() {
            let d = x - mean;
            sum += d * d;
            count += 1;
        }
    }
    sum / count as f64
}

/// Population standard deviation of the finite samples.
pub fn nan_std(data: &[f64]) -> f64 {
    nan_var(data).sqrt()
}

/// Plain mean. Returns NaN if empty.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Contiguous index runs where `flags` is true (consecutive groups).
pub fn finite_runs(flags: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &flag) in flags.iter().enumerate() {
        match (flag, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, flags.len() - 1));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_mean_skips_invalid_samples() {
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean(&[f64::NAN, f64::NAN]).is_nan());
        assert!(nan_mean(&[]).is_nan());
    }

    #[test]
    fn nan_var_uses_population_denominator() {
        // var([1, 3]) with N denominator is 1.0
        assert_eq!(nan_var(&[1.0, 3.0]), 1.0);
        assert_eq!(nan_var(&[2.0, f64::NAN, 2.0]), 0.0);
        assert_eq!(nan_std(&[1.0, 3.0]), 1.0);
    }

    #[test]
    fn finite_runs_finds_groups() {
        let flags = [false, true, true, false, true];
        assert_eq!(finite_runs(&flags), vec![(1, 2), (4, 4)]);
        assert_eq!(finite_runs(&[true, true]), vec![(0, 1)]);
        assert!(finite_runs(&[false, false]).is_empty());
    }
}
