//! Land-sea weight adjustment
//!
//! When source and target points carry a land/sea classification, contributions from
//! source points of the other class are scaled down and the row is renormalised, so that
//! e.g. a coastal land point is mostly interpolated from land values.

use crate::errors::{RegridError, RegridResult};
use crate::matrix::WeightMatrix;
use log::debug;

/// Land (`true`) / sea (`false`) classification of source and target points
#[derive(Debug, Clone, PartialEq)]
pub struct LandSeaClasses {
    identity: String,
    source: Vec<bool>,
    target: Vec<bool>,
    cacheable: bool,
}

impl LandSeaClasses {
    /// Classes for a pair of point sets
    ///
    /// `identity` must change whenever the classification does. Masks that are not
    /// `cacheable` (for example ones supplied by a user for a single run) never reach the
    /// persistent cache.
    pub fn new(
        identity: impl Into<String>,
        source: Vec<bool>,
        target: Vec<bool>,
        cacheable: bool,
    ) -> Self {
        Self {
            identity: identity.into(),
            source,
            target,
            cacheable,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn source(&self) -> &[bool] {
        &self.source
    }

    pub fn target(&self) -> &[bool] {
        &self.target
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    fn check_shape(&self, matrix: &WeightMatrix) -> RegridResult<()> {
        if self.source.len() != matrix.cols() {
            return Err(RegridError::DimensionMismatch {
                what: "source land-sea mask".to_string(),
                expected: matrix.cols(),
                got: self.source.len(),
            });
        }
        if self.target.len() != matrix.rows() {
            return Err(RegridError::DimensionMismatch {
                what: "target land-sea mask".to_string(),
                expected: matrix.rows(),
                got: self.target.len(),
            });
        }
        Ok(())
    }

    /// Scale mismatching entries by `adjustment` and renormalise the rows that changed
    ///
    /// Rows whose adjusted sum is zero are left unnormalised.
    pub fn apply(&self, mut matrix: WeightMatrix, adjustment: f64) -> RegridResult<WeightMatrix> {
        self.check_shape(&matrix)?;

        let mut fixed = 0usize;
        for r in 0..matrix.rows() {
            let target_class = self.target[r];
            let (columns, values) = matrix.row_mut(r);
            let mut sum = 0.0;
            let mut changed = false;
            for (c, w) in columns.iter().zip(values.iter_mut()) {
                if self.source[*c] != target_class {
                    *w *= adjustment;
                    changed = true;
                }
                sum += *w;
            }
            if changed && sum > 0.0 {
                fixed += 1;
                values.iter_mut().for_each(|w| *w /= sum);
            }
        }

        debug!(
            "LandSeaClasses::apply({}) corrected {} out of {} output points",
            self.identity,
            fixed,
            matrix.rows()
        );
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Triplet, WeightMatrixBuilder};
    use is_close::is_close;

    fn matrix() -> WeightMatrix {
        let mut builder = WeightMatrixBuilder::new(2, 4);
        builder
            .extend([
                Triplet::new(0, 0, 0.25),
                Triplet::new(0, 1, 0.25),
                Triplet::new(0, 2, 0.25),
                Triplet::new(0, 3, 0.25),
                Triplet::new(1, 2, 0.5),
                Triplet::new(1, 3, 0.5),
            ])
            .unwrap();
        builder.freeze()
    }

    #[test]
    fn mismatching_classes_are_down_weighted() {
        let classes = LandSeaClasses::new(
            "lsm",
            vec![true, true, false, false],
            vec![true, false],
            true,
        );
        let adjusted = classes.apply(matrix(), 0.2).unwrap();

        // Row 0 is land: the two sea neighbours count for 0.2 each
        let row = adjusted.row(0);
        assert!(is_close!(row.values[0], 0.25 / 0.6));
        assert!(is_close!(row.values[2], 0.05 / 0.6));
        assert!(is_close!(row.sum(), 1.0));

        // Row 1 is sea and only uses sea points
        assert_eq!(adjusted.row(1).values, &[0.5, 0.5]);
    }

    #[test]
    fn all_mismatching_keeps_relative_weights() {
        let classes = LandSeaClasses::new("lsm", vec![false; 4], vec![true, true], true);
        let adjusted = classes.apply(matrix(), 0.2).unwrap();
        assert!(adjusted.row(0).values.iter().all(|&w| is_close!(w, 0.25)));
    }

    #[test]
    fn tiny_adjustment_is_renormalised() {
        let classes = LandSeaClasses::new("lsm", vec![false; 4], vec![true, true], true);
        let adjusted = classes.apply(matrix(), 1e-10).unwrap();
        assert!(is_close!(adjusted.row(0).sum(), 1.0));
        assert!(is_close!(adjusted.row(1).values[0], 0.5));
    }

    #[test]
    fn zero_adjustment_leaves_zero_rows() {
        let classes = LandSeaClasses::new("lsm", vec![true; 4], vec![false, false], false);
        let adjusted = classes.apply(matrix(), 0.0).unwrap();
        assert_eq!(adjusted.row(1).sum(), 0.0);
        assert!(!classes.is_cacheable());
    }

    #[test]
    fn shape_mismatch() {
        let classes = LandSeaClasses::new("lsm", vec![true; 3], vec![true, true], true);
        assert!(matches!(
            classes.apply(matrix(), 0.2),
            Err(RegridError::DimensionMismatch { .. })
        ));
    }
}
