//! Nearest-neighbour search over source points
//!
//! [`SpatialIndex`] is a static kd-tree over the 3-D embedding of a point set.
//! [`NeighbourSelector`] turns index queries into the neighbour sets consumed by the
//! distance-weighting methods.

mod kdtree;

pub use kdtree::SpatialIndex;

use crate::errors::{RegridError, RegridResult};
use crate::spatial::Point3;

/// A source point found by a search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub point: Point3,
    /// Position of the point in the source point set
    pub payload: usize,
    /// Chord distance to the query point
    pub distance: f64,
}

/// Strategy for choosing the neighbours of a target point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NeighbourSelector {
    /// Exactly `k` neighbours
    FixedCount(usize),
    /// The single closest neighbour, lowest payload on exact ties
    SingleNearestLowestIndex,
    /// Every neighbour within `radius`, or the `k_max` closest if fewer than `k_min` qualify
    RadiusOrCount {
        radius: f64,
        k_min: usize,
        k_max: usize,
    },
}

impl NeighbourSelector {
    /// Neighbours of `query`, ordered by increasing distance
    ///
    /// `FixedCount(k)` fails with [`RegridError::InsufficientNeighbours`] when the index holds
    /// fewer than `k` points; callers decide how to degrade.
    pub fn select(&self, index: &SpatialIndex, query: &Point3) -> RegridResult<Vec<Neighbour>> {
        match *self {
            NeighbourSelector::FixedCount(k) => {
                if k == 0 {
                    return Err(RegridError::InvalidConfiguration(
                        "number of neighbours must be positive".to_string(),
                    ));
                }
                if index.len() < k {
                    return Err(RegridError::InsufficientNeighbours {
                        requested: k,
                        available: index.len(),
                    });
                }
                Ok(index.k_nearest(query, k))
            }
            NeighbourSelector::SingleNearestLowestIndex => Ok(vec![index.nearest(query)]),
            NeighbourSelector::RadiusOrCount {
                radius,
                k_min,
                k_max,
            } => Ok(index.closest_within_radius_or_k(query, radius, k_min, k_max)),
        }
    }

    /// Largest number of neighbours this selector can return
    pub fn capacity(&self) -> usize {
        match *self {
            NeighbourSelector::FixedCount(k) => k,
            NeighbourSelector::SingleNearestLowestIndex => 1,
            NeighbourSelector::RadiusOrCount { k_max, .. } => k_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SpatialIndex {
        SpatialIndex::from_points(vec![
            Point3::from_lat_lon(0.0, 0.0),
            Point3::from_lat_lon(0.0, 1.0),
            Point3::from_lat_lon(1.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn fixed_count() {
        let found = NeighbourSelector::FixedCount(2)
            .select(&index(), &Point3::from_lat_lon(0.1, 0.0))
            .unwrap();
        assert_eq!(found.iter().map(|n| n.payload).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn fixed_count_insufficient() {
        let err = NeighbourSelector::FixedCount(4)
            .select(&index(), &Point3::from_lat_lon(0.0, 0.0))
            .unwrap_err();
        assert!(matches!(
            err,
            RegridError::InsufficientNeighbours {
                requested: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn fixed_count_zero_is_invalid() {
        let result = NeighbourSelector::FixedCount(0).select(&index(), &Point3::from_lat_lon(0.0, 0.0));
        assert!(matches!(result, Err(RegridError::InvalidConfiguration(_))));
    }

    #[test]
    fn single_nearest() {
        let found = NeighbourSelector::SingleNearestLowestIndex
            .select(&index(), &Point3::from_lat_lon(0.0, 0.9))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, 1);
    }
}
