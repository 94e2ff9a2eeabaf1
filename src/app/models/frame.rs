//! Variable frames and quality masks.
//!
//! An [`InstrumentFrame`] maps variable names to 1-D (time) or 2-D
//! (time × depth-bin) arrays sharing one time axis. It is owned exclusively
//! by a single converter invocation and mutated in place by the correction
//! and masking stages before being handed to the dataset writer.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

/// Descriptive attributes written alongside a variable.
#[derive(Debug, Clone, Default)]
pub struct VariableAttrs {
    pub long_name: String,
    pub units: String,
}

impl VariableAttrs {
    pub fn new(long_name: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            long_name: long_name.into(),
            units: units.into(),
        }
    }
}

/// A frame variable: a time series or a time × depth-bin profile.
#[derive(Debug, Clone)]
pub enum FrameVariable {
    Series(Array1<f64>),
    Profile(Array2<f64>),
}

impl FrameVariable {
    /// Length along the time axis (axis 0).
    pub fn time_len(&self) -> usize {
        match self {
            Self::Series(v) => v.len(),
            Self::Profile(v) => v.nrows(),
        }
    }

    pub fn is_profile(&self) -> bool {
        matches!(self, Self::Profile(_))
    }

    pub fn as_series(&self) -> Option<&Array1<f64>> {
        match self {
            Self::Series(v) => Some(v),
            Self::Profile(_) => None,
        }
    }

    pub fn as_profile(&self) -> Option<&Array2<f64>> {
        match self {
            Self::Profile(v) => Some(v),
            Self::Series(_) => None,
        }
    }

    pub fn as_series_mut(&mut self) -> Option<&mut Array1<f64>> {
        match self {
            Self::Series(v) => Some(v),
            Self::Profile(_) => None,
        }
    }

    pub fn as_profile_mut(&mut self) -> Option<&mut Array2<f64>> {
        match self {
            Self::Profile(v) => Some(v),
            Self::Series(_) => None,
        }
    }
}

/// One named variable with its attributes.
#[derive(Debug, Clone)]
pub struct FrameEntry {
    pub data: FrameVariable,
    pub attrs: VariableAttrs,
}

/// Ordered variable-name → array mapping for one converter run.
#[derive(Debug, Clone, Default)]
pub struct InstrumentFrame {
    entries: BTreeMap<String, FrameEntry>,
}

impl InstrumentFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: FrameVariable, attrs: VariableAttrs) {
        self.entries.insert(name.into(), FrameEntry { data, attrs });
    }

    pub fn insert_series(
        &mut self,
        name: impl Into<String>,
        values: Array1<f64>,
        attrs: VariableAttrs,
    ) {
        self.insert(name, FrameVariable::Series(values), attrs);
    }

    pub fn insert_profile(
        &mut self,
        name: impl Into<String>,
        values: Array2<f64>,
        attrs: VariableAttrs,
    ) {
        self.insert(name, FrameVariable::Profile(values), attrs);
    }

    pub fn get(&self, name: &str) -> Option<&FrameEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FrameEntry> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn series(&self, name: &str) -> Option<&Array1<f64>> {
        self.entries.get(name).and_then(|e| e.data.as_series())
    }

    pub fn profile(&self, name: &str) -> Option<&Array2<f64>> {
        self.entries.get(name).and_then(|e| e.data.as_profile())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FrameEntry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut FrameEntry)> {
        self.entries.iter_mut()
    }

    /// Names of every 2-D variable, in frame order.
    pub fn profile_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.data.is_profile())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn remove(&mut self, name: &str) -> Option<FrameEntry> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Monotonic validity mask over a time × depth-bin array.
///
/// Cells hold `1.0` (valid) or NaN (invalid) and only ever transition valid
/// → invalid; there is no revalidation operation. The final mask is applied
/// identically to every companion variable sharing the time/bin axes.
#[derive(Debug, Clone)]
pub struct QualityMask {
    cells: Array2<f64>,
}

impl QualityMask {
    /// All-valid mask for a `(time, bins)` shape.
    pub fn all_valid(rows: usize, cols: usize) -> Self {
        Self {
            cells: Array2::ones((rows, cols)),
        }
    }

    pub fn nrows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.cells[[row, col]].is_finite()
    }

    pub fn invalidate(&mut self, row: usize, col: usize) {
        self.cells[[row, col]] = f64::NAN;
    }

    /// Invalidate `[from_col, ncols)` of one time step.
    pub fn invalidate_row_tail(&mut self, row: usize, from_col: usize) {
        for col in from_col..self.cells.ncols() {
            self.cells[[row, col]] = f64::NAN;
        }
    }

    /// Invalidate every bin of the given time steps.
    pub fn invalidate_rows(&mut self, rows: impl Iterator<Item = usize>) {
        let ncols = self.cells.ncols();
        for row in rows {
            for col in 0..ncols {
                self.cells[[row, col]] = f64::NAN;
            }
        }
    }

    /// Column view of validity, as finite/non-finite flags.
    pub fn column_validity(&self, col: usize) -> Vec<bool> {
        self.cells
            .column(col)
            .iter()
            .map(|v| v.is_finite())
            .collect()
    }

    pub fn invalid_count(&self) -> usize {
        self.cells.iter().filter(|v| !v.is_finite()).count()
    }

    /// NaN-out every cell of `target` the mask marks invalid.
    pub fn apply_to(&self, target: &mut Array2<f64>) {
        debug_assert_eq!(target.dim(), self.cells.dim());
        for (cell, flag) in target.iter_mut().zip(self.cells.iter()) {
            if !flag.is_finite() {
                *cell = f64::NAN;
            }
        }
    }
}
