//! Missing-value treatments applied per field at evaluation time
//!
//! A treatment inspects, row by row, which of the input values referenced by a weight matrix
//! are missing and redistributes that row's weights. Treatments work on an owned copy of the
//! matrix; shared (cached) matrices are never modified.
//!
//! For a row with at least one missing input, the row either collapses onto a missing column
//! (the output is then missing too) or has its missing entries zeroed and the remaining
//! weights renormalised:
//!
//! | policy | collapses when |
//! |---|---|
//! | `missing-if-any-missing` | always |
//! | `missing-if-heaviest-missing` | all inputs missing, the heaviest weight is on a missing input, or the present weights sum to ≈ 0 |
//! | `simulated-missing-value` | as above, testing against a configured sentinel |

use crate::errors::{RegridError, RegridResult};
use crate::matrix::{approximately_equal, WeightMatrix};
use serde::{Deserialize, Serialize};

/// Missing-value treatment policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NonLinearPolicy {
    MissingIfAnyMissing,
    MissingIfHeaviestMissing,
    /// Treat values within `epsilon` of `missing-value` as missing, whatever the field's own flag
    #[serde(rename_all = "kebab-case")]
    SimulatedMissingValue {
        #[serde(default = "default_simulated_missing_value")]
        missing_value: f64,
        #[serde(default)]
        epsilon: f64,
    },
}

fn default_simulated_missing_value() -> f64 {
    9999.0
}

/// Whether `value` equals the `missing` sentinel (NaN sentinels match NaN values)
pub fn is_missing_value(value: f64, missing: f64) -> bool {
    value == missing || (missing.is_nan() && value.is_nan())
}

/// How a row's weights are redistributed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowTreatment {
    Unchanged,
    /// All weight onto the entry at this position within the row
    Collapse(usize),
    Renormalise,
}

impl NonLinearPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            NonLinearPolicy::MissingIfAnyMissing => "missing-if-any-missing",
            NonLinearPolicy::MissingIfHeaviestMissing => "missing-if-heaviest-missing",
            NonLinearPolicy::SimulatedMissingValue { .. } => "simulated-missing-value",
        }
    }

    /// The test for missing inputs, or `None` if nothing can be missing
    fn missing_test(&self, field_missing: Option<f64>) -> Option<Box<dyn Fn(f64) -> bool>> {
        match *self {
            NonLinearPolicy::SimulatedMissingValue {
                missing_value,
                epsilon,
            } => Some(Box::new(move |v: f64| (v - missing_value).abs() <= epsilon)),
            _ => field_missing
                .map(|m| Box::new(move |v: f64| is_missing_value(v, m)) as Box<dyn Fn(f64) -> bool>),
        }
    }

    fn decide(
        &self,
        columns: &[usize],
        weights: &[f64],
        missing: &dyn Fn(usize) -> bool,
    ) -> RowTreatment {
        let mut first_missing = None;
        let mut n_missing = 0usize;
        let mut present_sum = 0.0;
        let mut heaviest = f64::NEG_INFINITY;
        let mut heaviest_is_missing = false;

        for (k, (&c, &w)) in columns.iter().zip(weights).enumerate() {
            let miss = missing(c);
            if miss {
                n_missing += 1;
                first_missing.get_or_insert(k);
            } else {
                present_sum += w;
            }
            if heaviest < w {
                heaviest = w;
                heaviest_is_missing = miss;
            }
        }

        let Some(first_missing) = first_missing else {
            return RowTreatment::Unchanged;
        };
        let collapse = match self {
            NonLinearPolicy::MissingIfAnyMissing => true,
            NonLinearPolicy::MissingIfHeaviestMissing
            | NonLinearPolicy::SimulatedMissingValue { .. } => {
                n_missing == columns.len()
                    || heaviest_is_missing
                    || approximately_equal(present_sum, 0.0)
            }
        };
        if collapse {
            RowTreatment::Collapse(first_missing)
        } else {
            RowTreatment::Renormalise
        }
    }

    /// Redistribute the weights of `matrix` for the given input `values`
    ///
    /// Returns whether any row was modified.
    pub fn treat(
        &self,
        matrix: &mut WeightMatrix,
        values: &[f64],
        field_missing: Option<f64>,
    ) -> RegridResult<bool> {
        if values.len() != matrix.cols() {
            return Err(RegridError::DimensionMismatch {
                what: "field values".to_string(),
                expected: matrix.cols(),
                got: values.len(),
            });
        }
        let Some(is_missing) = self.missing_test(field_missing) else {
            return Ok(false);
        };
        let missing = |c: usize| is_missing(values[c]);

        let mut modified = false;
        for r in 0..matrix.rows() {
            let (columns, weights) = matrix.row_mut(r);
            match self.decide(columns, weights, &missing) {
                RowTreatment::Unchanged => continue,
                RowTreatment::Collapse(at) => {
                    for (k, w) in weights.iter_mut().enumerate() {
                        *w = if k == at { 1.0 } else { 0.0 };
                    }
                }
                RowTreatment::Renormalise => {
                    let present: f64 = columns
                        .iter()
                        .zip(weights.iter())
                        .filter(|(&c, _)| !missing(c))
                        .map(|(_, &w)| w)
                        .sum();
                    let factor = 1.0 / present;
                    for (&c, w) in columns.iter().zip(weights.iter_mut()) {
                        *w = if missing(c) { 0.0 } else { *w * factor };
                    }
                }
            }
            modified = true;
        }
        Ok(modified)
    }
}
