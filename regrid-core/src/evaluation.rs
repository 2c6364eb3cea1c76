//! Applying weights to field values
//!
//! Cached matrices are shared and never modified. When a non-linear treatment has to
//! redistribute weights for a particular field, it does so on a private copy that is
//! discarded once the field has been interpolated.

use crate::errors::{RegridError, RegridResult};
use crate::matrix::{ValidationChecks, WeightMatrix, WEIGHT_TOLERANCE};
use crate::nonlinear::{is_missing_value, NonLinearPolicy};
use log::debug;
use std::borrow::Cow;

/// Values on a point set, with an optional missing-value sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub values: Vec<f64>,
    pub missing_value: Option<f64>,
}

impl Field {
    /// A field without missing values
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            missing_value: None,
        }
    }

    pub fn with_missing_value(values: Vec<f64>, missing_value: f64) -> Self {
        Self {
            values,
            missing_value: Some(missing_value),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_missing(&self, index: usize) -> bool {
        self.missing_value
            .map_or(false, |m| is_missing_value(self.values[index], m))
    }

    /// Number of missing values
    pub fn count_missing(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_missing(i)).count()
    }
}

/// Interpolate `field` with `matrix`, applying `policies` in order
///
/// An output value is missing when its row has no entries, or when any non-zero weight of
/// the (treated) row refers to a missing input. The output carries the input's sentinel, or
/// NaN if the input had none and some output is missing.
pub fn apply_weights(
    matrix: &WeightMatrix,
    policies: &[NonLinearPolicy],
    field: &Field,
) -> RegridResult<Field> {
    if field.len() != matrix.cols() {
        return Err(RegridError::DimensionMismatch {
            what: "field values".to_string(),
            expected: matrix.cols(),
            got: field.len(),
        });
    }

    let mut weights = Cow::Borrowed(matrix);
    if !policies.is_empty() {
        let mut copy = matrix.clone();
        let mut modified = false;
        for policy in policies {
            if policy.treat(&mut copy, &field.values, field.missing_value)? {
                debug!("apply_weights: {} modified the weights", policy.name());
                modified = true;
            }
        }
        if modified {
            weights = Cow::Owned(copy);
        }
    }

    if let Cow::Owned(treated) = &weights {
        let bounded = matrix
            .values()
            .iter()
            .all(|&w| (-WEIGHT_TOLERANCE..=1.0 + WEIGHT_TOLERANCE).contains(&w));
        let checks = ValidationChecks::evaluation(bounded);
        if let Some(violation) = treated.validate("non-linear", checks).into_iter().next() {
            return Err(RegridError::AssemblyInvariantViolation {
                method: "non-linear".to_string(),
                row: violation.row,
                reason: violation.reason,
            });
        }
    }

    let sentinel = field.missing_value.unwrap_or(f64::NAN);
    let mut any_missing = false;
    let values = (0..weights.rows())
        .map(|r| {
            let row = weights.row(r);
            let mut value = 0.0;
            let mut missing = row.is_empty();
            for (c, w) in row.iter().filter(|&(_, w)| w != 0.0) {
                if field.is_missing(c) {
                    missing = true;
                    break;
                }
                value += w * field.values[c];
            }
            if missing {
                any_missing = true;
                sentinel
            } else {
                value
            }
        })
        .collect();

    let missing_value = if any_missing {
        Some(sentinel)
    } else {
        field.missing_value
    };
    Ok(Field {
        values,
        missing_value,
    })
}
