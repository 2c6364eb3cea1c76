//! Sparse interpolation weights
//!
//! Assembly collects [`Triplet`]s into a [`WeightMatrixBuilder`], which is consumed exactly once
//! by [`WeightMatrixBuilder::freeze`] to produce an immutable [`WeightMatrix`] in compressed-row
//! form. Column indices within a row are strictly increasing, so two matrices with the same
//! entries always have the same representation.
//!
//! ```rust
//! use regrid_core::matrix::WeightMatrixBuilder;
//! use ndarray::array;
//!
//! let mut builder = WeightMatrixBuilder::new(1, 3);
//! builder.push(0, 2, 0.25).unwrap();
//! builder.push(0, 0, 0.5).unwrap();
//! builder.push(0, 2, 0.25).unwrap();
//! let w = builder.freeze();
//!
//! assert_eq!(w.row(0).columns, &[0, 2]);
//! assert_eq!(w.multiply(&array![2.0, 100.0, 4.0].view()).unwrap()[0], 3.0);
//! ```

use crate::errors::{RegridError, RegridResult};
use log::debug;
use ndarray::{Array1, ArrayView1};

/// Absolute tolerance used when comparing weights and row sums
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Maximum number of violating rows written to the log by [`WeightMatrix::validate`]
const MAX_LOGGED_VIOLATIONS: usize = 50;

pub(crate) fn approximately_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= WEIGHT_TOLERANCE
}

/// One `(row, column, value)` contribution to a weight matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }
}

/// Collects triplets for a matrix of fixed shape
#[derive(Debug, Clone)]
pub struct WeightMatrixBuilder {
    rows: usize,
    cols: usize,
    triplets: Vec<Triplet>,
}

impl WeightMatrixBuilder {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            triplets: Vec::new(),
        }
    }

    pub fn with_capacity(rows: usize, cols: usize, capacity: usize) -> Self {
        Self {
            rows,
            cols,
            triplets: Vec::with_capacity(capacity),
        }
    }

    /// Add a contribution; entries at the same position are summed on freeze
    pub fn push(&mut self, row: usize, col: usize, value: f64) -> RegridResult<()> {
        if row >= self.rows {
            return Err(RegridError::DimensionMismatch {
                what: "triplet row".to_string(),
                expected: self.rows,
                got: row,
            });
        }
        if col >= self.cols {
            return Err(RegridError::DimensionMismatch {
                what: "triplet column".to_string(),
                expected: self.cols,
                got: col,
            });
        }
        self.triplets.push(Triplet::new(row, col, value));
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = Triplet>>(&mut self, triplets: I) -> RegridResult<()> {
        for t in triplets {
            self.push(t.row, t.col, t.value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Compact the triplets into compressed-row form
    pub fn freeze(mut self) -> WeightMatrix {
        self.triplets
            .sort_unstable_by(|a, b| a.row.cmp(&b.row).then(a.col.cmp(&b.col)));

        let mut offsets = vec![0usize; self.rows + 1];
        let mut columns: Vec<usize> = Vec::with_capacity(self.triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(self.triplets.len());
        let mut last: Option<(usize, usize)> = None;

        for t in &self.triplets {
            if last == Some((t.row, t.col)) {
                if let Some(v) = values.last_mut() {
                    *v += t.value;
                }
                continue;
            }
            columns.push(t.col);
            values.push(t.value);
            offsets[t.row + 1] += 1;
            last = Some((t.row, t.col));
        }
        for r in 0..self.rows {
            offsets[r + 1] += offsets[r];
        }

        WeightMatrix {
            rows: self.rows,
            cols: self.cols,
            offsets,
            columns,
            values,
        }
    }
}

/// Borrowed view of one matrix row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowView<'a> {
    pub columns: &'a [usize],
    pub values: &'a [f64],
}

impl<'a> RowView<'a> {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        let (columns, values) = (self.columns, self.values);
        columns.iter().copied().zip(values.iter().copied())
    }
}

/// What [`WeightMatrix::validate`] checks on every row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationChecks {
    /// Entries lie in `[0, 1]` and rows sum to 1
    pub bounded: bool,
    /// Rows without entries are acceptable
    pub allow_empty_rows: bool,
    /// Bounded rows may also sum to 0 (rows zeroed by a missing-value treatment)
    pub allow_zero_sum_rows: bool,
}

impl ValidationChecks {
    /// Checks applied to freshly assembled matrices
    pub fn assembly(bounded: bool) -> Self {
        Self {
            bounded,
            allow_empty_rows: false,
            allow_zero_sum_rows: false,
        }
    }

    /// Checks applied after non-linear treatments
    pub fn evaluation(bounded: bool) -> Self {
        Self {
            bounded,
            allow_empty_rows: true,
            allow_zero_sum_rows: true,
        }
    }
}

/// A row that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct RowViolation {
    pub row: usize,
    pub reason: String,
}

/// Immutable sparse matrix of interpolation weights
///
/// `rows` is the number of target points and `cols` the number of source points, so that
/// `output = W * input`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMatrix {
    rows: usize,
    cols: usize,
    offsets: Vec<usize>,
    columns: Vec<usize>,
    values: Vec<f64>,
}

impl WeightMatrix {
    /// The `n × n` identity
    pub fn identity(n: usize) -> Self {
        Self {
            rows: n,
            cols: n,
            offsets: (0..=n).collect(),
            columns: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    /// Assemble from compressed-row arrays, checking that they describe a canonical matrix
    pub fn from_parts(
        rows: usize,
        cols: usize,
        offsets: Vec<usize>,
        columns: Vec<usize>,
        values: Vec<f64>,
    ) -> RegridResult<Self> {
        let matrix = Self {
            rows,
            cols,
            offsets,
            columns,
            values,
        };
        matrix.check_structure().map_err(RegridError::InvalidConfiguration)?;
        Ok(matrix)
    }

    /// Describe the first structural defect, if any
    pub(crate) fn check_structure(&self) -> Result<(), String> {
        if self.offsets.len() != self.rows + 1 {
            return Err(format!(
                "expected {} row offsets, found {}",
                self.rows + 1,
                self.offsets.len()
            ));
        }
        if self.columns.len() != self.values.len() {
            return Err("column and value arrays differ in length".to_string());
        }
        if self.offsets[0] != 0 || self.offsets[self.rows] != self.columns.len() {
            return Err("row offsets do not span the entries".to_string());
        }
        for r in 0..self.rows {
            let (start, end) = (self.offsets[r], self.offsets[r + 1]);
            if start > end || end > self.columns.len() {
                return Err(format!("row offsets out of order at row {r}"));
            }
            let columns = &self.columns[start..end];
            if columns.iter().any(|&c| c >= self.cols) {
                return Err(format!("column index out of range in row {r}"));
            }
            if columns.windows(2).any(|w| w[0] >= w[1]) {
                return Err(format!("columns not strictly increasing in row {r}"));
            }
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of stored entries
    pub fn nonzeros(&self) -> usize {
        self.values.len()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, r: usize) -> RowView<'_> {
        let range = self.offsets[r]..self.offsets[r + 1];
        RowView {
            columns: &self.columns[range.clone()],
            values: &self.values[range],
        }
    }

    /// Columns and mutable values of one row
    ///
    /// Only reachable through an owned matrix, so a shared instance is never modified.
    pub fn row_mut(&mut self, r: usize) -> (&[usize], &mut [f64]) {
        let range = self.offsets[r]..self.offsets[r + 1];
        (&self.columns[range.clone()], &mut self.values[range])
    }

    /// Approximate memory use in bytes
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + std::mem::size_of::<usize>() * (self.offsets.len() + self.columns.len())
            + std::mem::size_of::<f64>() * self.values.len()
    }

    /// Compute `W * input`
    pub fn multiply(&self, input: &ArrayView1<f64>) -> RegridResult<Array1<f64>> {
        if input.len() != self.cols {
            return Err(RegridError::DimensionMismatch {
                what: "input values".to_string(),
                expected: self.cols,
                got: input.len(),
            });
        }
        Ok(Array1::from_shape_fn(self.rows, |r| {
            self.row(r).iter().map(|(c, w)| w * input[c]).sum()
        }))
    }

    /// Remove entries smaller than `prune_epsilon` in magnitude
    ///
    /// The removed mass of each row is shared equally among the entries that remain, so row
    /// sums are preserved. Exact zeros are always dropped.
    pub fn cleanup(self, prune_epsilon: f64) -> WeightMatrix {
        let mut fixed = 0usize;
        let mut builder = WeightMatrixBuilder::with_capacity(self.rows, self.cols, self.nonzeros());

        for r in 0..self.rows {
            let row = self.row(r);
            let mut removed = 0.0;
            let mut kept = 0usize;
            for (_, a) in row.iter() {
                if a.abs() < prune_epsilon {
                    if a != 0.0 {
                        removed += a;
                        fixed += 1;
                    }
                } else if a != 0.0 {
                    kept += 1;
                }
            }
            let share = if removed != 0.0 && kept > 0 {
                removed / kept as f64
            } else {
                0.0
            };
            for (c, a) in row.iter() {
                if a != 0.0 && a.abs() >= prune_epsilon {
                    builder.triplets.push(Triplet::new(r, c, a + share));
                }
            }
        }

        if fixed > 0 {
            debug!(
                "WeightMatrix::cleanup fixed {} out of {} entries (matrix is {}x{})",
                fixed,
                self.nonzeros(),
                self.rows,
                self.cols
            );
        }
        builder.freeze()
    }

    /// Check every row, returning the rows that fail
    ///
    /// At most 50 violations are written to the debug log; all are returned.
    pub fn validate(&self, when: &str, checks: ValidationChecks) -> Vec<RowViolation> {
        let mut violations = Vec::new();
        for r in 0..self.rows {
            if let Some(reason) = self.check_row(r, checks) {
                if violations.len() < MAX_LOGGED_VIOLATIONS {
                    if violations.is_empty() {
                        debug!("WeightMatrix::validate({}) failed", when);
                    }
                    let preview: Vec<f64> = self.row(r).values.iter().take(10).copied().collect();
                    debug!("Row: {} {:?}: {}", r, preview, reason);
                }
                violations.push(RowViolation { row: r, reason });
            }
        }
        if violations.len() > MAX_LOGGED_VIOLATIONS {
            debug!(
                "WeightMatrix::validate({}) {} further rows failed",
                when,
                violations.len() - MAX_LOGGED_VIOLATIONS
            );
        }
        violations
    }

    fn check_row(&self, r: usize, checks: ValidationChecks) -> Option<String> {
        let row = self.row(r);
        if row.is_empty() {
            return (!checks.allow_empty_rows).then(|| "row has no entries".to_string());
        }
        if !checks.bounded {
            return None;
        }
        if let Some(a) = row
            .values
            .iter()
            .find(|&&a| a < -WEIGHT_TOLERANCE || a > 1.0 + WEIGHT_TOLERANCE || a.is_nan())
        {
            return Some(format!("weight {a} outside [0, 1]"));
        }
        let sum = row.sum();
        let zero_sum = checks.allow_zero_sum_rows && approximately_equal(sum, 0.0);
        if !(approximately_equal(sum, 1.0) || zero_sum) {
            return Some(format!("weights sum to {sum}"));
        }
        None
    }
}
