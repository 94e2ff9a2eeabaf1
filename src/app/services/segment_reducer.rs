//! Generic chunked-reduction engine.
//!
//! Every averaging operation in the pipeline — profiler bin averaging, CTD
//! downcast binning, thermistor block averaging, beam-variance estimation —
//! is one call into this module with a different statistic. A sequence (or
//! the leading axis of a 2-D array) is split into `segment_count` contiguous
//! near-equal slices and each slice is reduced to a scalar.
//!
//! Dispatch is heuristic: wide inputs with enough segments fan out across a
//! fixed-size worker pool, everything else reduces sequentially. Output
//! order matches input slice order on both paths, so results are
//! deterministic regardless of scheduling.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::constants::{PAR_FORCE_SEGMENTS, PAR_MIN_SEGMENTS, PAR_MIN_SLICE_ELEMENTS};
use crate::error::{MooringError, Result};

/// Thresholds steering the parallel/serial dispatch decision.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTuning {
    /// Minimum elements per slice (array width) for parallel dispatch.
    pub min_slice_elements: usize,
    /// Minimum segment count for parallel dispatch.
    pub min_segments: usize,
    /// Segment count that forces parallel dispatch regardless of width.
    pub force_segments: usize,
}

impl Default for DispatchTuning {
    fn default() -> Self {
        Self {
            min_slice_elements: PAR_MIN_SLICE_ELEMENTS,
            min_segments: PAR_MIN_SEGMENTS,
            force_segments: PAR_FORCE_SEGMENTS,
        }
    }
}

/// Worker pool and dispatch thresholds, passed explicitly into every
/// reduction instead of being constructed ad hoc per call.
///
/// This is the only concurrency boundary in the crate: workers receive
/// independent slices and return independent results, concatenated in
/// original order by the coordinating thread.
pub struct ExecutionContext {
    pool: rayon::ThreadPool,
    workers: usize,
    pub tuning: DispatchTuning,
}

impl ExecutionContext {
    /// Pool sized to the host's logical core count.
    pub fn new() -> Result<Self> {
        Self::with_workers(num_cpus::get())
    }

    pub fn with_workers(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|err| {
                MooringError::data_integrity(format!("failed to build worker pool: {err}"))
            })?;
        Ok(Self {
            pool,
            workers,
            tuning: DispatchTuning::default(),
        })
    }

    pub fn with_tuning(mut self, tuning: DispatchTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn should_parallelize(&self, slice_elements: usize, segments: usize) -> bool {
        (slice_elements > self.tuning.min_slice_elements && segments > self.tuning.min_segments)
            || segments > self.tuning.force_segments
    }
}

/// Number of segments produced when reducing `len` samples in blocks of
/// `block_len` (ceiling division; the last block may be shorter).
pub fn segment_count(len: usize, block_len: usize) -> usize {
    len.div_ceil(block_len.max(1))
}

/// Contiguous slice bounds for `segments` near-equal parts of `len`.
fn slice_bounds(len: usize, segments: usize) -> Vec<(usize, usize)> {
    if len == 0 || segments == 0 {
        return Vec::new();
    }
    let block = len.div_ceil(segments);
    (0..segments)
        .map(|i| (i * block, ((i + 1) * block).min(len)))
        .filter(|(start, end)| start < end)
        .collect()
}

/// Reduce `data` into `segments` scalars with `statistic`.
///
/// The element type is generic so that paired series (e.g. zipped beam
/// velocities) can flow through the same engine.
pub fn reduce<T, F>(ctx: &ExecutionContext, data: &[T], segments: usize, statistic: F) -> Vec<f64>
where
    T: Sync,
    F: Fn(&[T]) -> f64 + Sync,
{
    let bounds = slice_bounds(data.len(), segments);
    // One element per slice for a plain sequence.
    if ctx.should_parallelize(1, bounds.len()) {
        debug!(segments = bounds.len(), "dispatching reduction to worker pool");
        ctx.pool.install(|| {
            bounds
                .par_iter()
                .map(|&(start, end)| statistic(&data[start..end]))
                .collect()
        })
    } else {
        bounds
            .iter()
            .map(|&(start, end)| statistic(&data[start..end]))
            .collect()
    }
}

/// Reduce the leading axis of a 2-D array into `segments` rows.
///
/// Each column is segmented independently; on the parallel path columns fan
/// out across the pool and are reassembled in index order.
pub fn reduce_axis0<F>(
    ctx: &ExecutionContext,
    data: &Array2<f64>,
    segments: usize,
    statistic: F,
) -> Array2<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let (nrows, ncols) = data.dim();
    let bounds = slice_bounds(nrows, segments);
    let out_rows = bounds.len();

    let reduce_column = |col: usize| -> Vec<f64> {
        let column: Vec<f64> = data.column(col).to_vec();
        bounds
            .iter()
            .map(|&(start, end)| statistic(&column[start..end]))
            .collect()
    };

    let columns: Vec<Vec<f64>> = if ctx.should_parallelize(ncols, out_rows) {
        debug!(
            segments = out_rows,
            columns = ncols,
            "dispatching axis-0 reduction to worker pool"
        );
        ctx.pool
            .install(|| (0..ncols).into_par_iter().map(reduce_column).collect())
    } else {
        (0..ncols).map(reduce_column).collect()
    };

    let mut out = Array2::from_elem((out_rows, ncols), f64::NAN);
    for (col, values) in columns.iter().enumerate() {
        for (row, &value) in values.iter().enumerate() {
            out[[row, col]] = value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::stats::nan_mean;
    use ndarray::Array2;

    fn forced_parallel() -> DispatchTuning {
        DispatchTuning {
            min_slice_elements: 0,
            min_segments: 0,
            force_segments: 0,
        }
    }

    fn forced_serial() -> DispatchTuning {
        DispatchTuning {
            min_slice_elements: usize::MAX,
            min_segments: usize::MAX,
            force_segments: usize::MAX,
        }
    }

    #[test]
    fn segment_count_is_ceiling_division() {
        assert_eq!(segment_count(100, 10), 10);
        assert_eq!(segment_count(101, 10), 11);
        assert_eq!(segment_count(9, 10), 1);
        assert_eq!(segment_count(0, 10), 0);
    }

    #[test]
    fn slices_are_contiguous_and_last_may_be_short() {
        let bounds = slice_bounds(10, 3);
        assert_eq!(bounds, vec![(0, 4), (4, 8), (8, 10)]);
        let total: usize = bounds.iter().map(|(s, e)| e - s).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn reduce_means_each_block() {
        let ctx = ExecutionContext::with_workers(2).unwrap();
        let data: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let out = reduce(&ctx, &data, 3, nan_mean);
        assert_eq!(out, vec![0.5, 2.5, 4.5]);
    }

    #[test]
    fn serial_and_parallel_paths_are_bit_identical() {
        let data: Vec<f64> = (0..1000).map(|i| (i as f64).sin() * 7.3).collect();

        let serial_ctx = ExecutionContext::with_workers(1)
            .unwrap()
            .with_tuning(forced_serial());
        let parallel_ctx = ExecutionContext::with_workers(4)
            .unwrap()
            .with_tuning(forced_parallel());

        let serial = reduce(&serial_ctx, &data, 37, nan_mean);
        let parallel = reduce(&parallel_ctx, &data, 37, nan_mean);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn axis0_reduction_preserves_column_order() {
        let ctx = ExecutionContext::with_workers(2).unwrap();
        let data =
            Array2::from_shape_fn((6, 3), |(row, col)| (row * 10 + col) as f64);
        let out = reduce_axis0(&ctx, &data, 2, nan_mean);
        assert_eq!(out.dim(), (2, 3));
        // Column j, first block rows 0..3 -> mean of {j, 10+j, 20+j}.
        assert_eq!(out[[0, 0]], 10.0);
        assert_eq!(out[[0, 2]], 12.0);
        assert_eq!(out[[1, 1]], 41.0);
    }

    #[test]
    fn axis0_paths_are_bit_identical() {
        let data = Array2::from_shape_fn((200, 12), |(row, col)| {
            ((row * 31 + col * 7) as f64).cos() * 3.1
        });
        let serial_ctx = ExecutionContext::with_workers(1)
            .unwrap()
            .with_tuning(forced_serial());
        let parallel_ctx = ExecutionContext::with_workers(4)
            .unwrap()
            .with_tuning(forced_parallel());
        let serial = reduce_axis0(&serial_ctx, &data, 23, nan_mean);
        let parallel = reduce_axis0(&parallel_ctx, &data, 23, nan_mean);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn generic_element_types_reduce() {
        let ctx = ExecutionContext::with_workers(1).unwrap();
        let pairs: Vec<(f64, f64)> = (0..4).map(|i| (i as f64, (i * 2) as f64)).collect();
        let out = reduce(&ctx, &pairs, 2, |block| {
            block.iter().map(|(a, b)| b - a).sum::<f64>()
        });
        assert_eq!(out, vec![1.0, 5.0]);
    }
}
