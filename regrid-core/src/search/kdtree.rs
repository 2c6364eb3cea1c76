use super::Neighbour;
use crate::errors::{RegridError, RegridResult};
use crate::spatial::{Point3, PointSet};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
struct KdNode {
    entry: usize,
    left: Option<usize>,
    right: Option<usize>,
    axis: usize,
}

/// A candidate in the bounded k-nearest heap, ordered by `(distance², payload)`
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance2: f64,
    payload: usize,
    entry: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance2
            .total_cmp(&other.distance2)
            .then(self.payload.cmp(&other.payload))
    }
}

/// Static nearest-neighbour index over points in 3-D
///
/// A balanced kd-tree built by median splits, cycling through the three axes. Distances are
/// Euclidean in the 3-D embedding so that there are no branch cuts at the anti-meridian or
/// the poles.
///
/// Every query that returns several neighbours orders them by increasing distance, with
/// exact ties broken by ascending payload. The ordering does not depend on the order in
/// which points were inserted.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    points: Vec<Point3>,
    payloads: Vec<usize>,
    nodes: Vec<KdNode>,
    root: usize,
}

impl SpatialIndex {
    /// Build an index over a point set; payloads are the point positions
    pub fn build(points: &dyn PointSet) -> RegridResult<Self> {
        Self::from_points(points.points())
    }

    /// Build an index over points whose payloads are their positions in `points`
    pub fn from_points(points: Vec<Point3>) -> RegridResult<Self> {
        let entries = points.into_iter().enumerate().map(|(i, p)| (p, i)).collect();
        Self::from_entries(entries)
    }

    /// Build an index over explicit `(point, payload)` pairs
    pub fn from_entries(entries: Vec<(Point3, usize)>) -> RegridResult<Self> {
        if entries.is_empty() {
            return Err(RegridError::EmptyIndex);
        }
        let (points, payloads): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let mut index = SpatialIndex {
            nodes: Vec::with_capacity(points.len()),
            points,
            payloads,
            root: 0,
        };
        let mut order: Vec<usize> = (0..index.points.len()).collect();
        // A non-empty slice always yields a root
        index.root = index.build_recursive(&mut order, 0).unwrap_or(0);
        Ok(index)
    }

    fn build_recursive(&mut self, entries: &mut [usize], axis: usize) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }
        // Sort by coordinate then payload so the tree shape is reproducible
        entries.sort_unstable_by(|&a, &b| {
            self.points[a]
                .axis(axis)
                .total_cmp(&self.points[b].axis(axis))
                .then(self.payloads[a].cmp(&self.payloads[b]))
        });
        let mid = entries.len() / 2;
        let node = self.nodes.len();
        self.nodes.push(KdNode {
            entry: entries[mid],
            left: None,
            right: None,
            axis,
        });

        let (left, right) = entries.split_at_mut(mid);
        let next = (axis + 1) % 3;
        let left = self.build_recursive(left, next);
        let right = self.build_recursive(&mut right[1..], next);
        self.nodes[node].left = left;
        self.nodes[node].right = right;
        Some(node)
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn neighbour(&self, candidate: Candidate) -> Neighbour {
        Neighbour {
            point: self.points[candidate.entry],
            payload: candidate.payload,
            distance: candidate.distance2.sqrt(),
        }
    }

    fn candidate(&self, entry: usize, query: &Point3) -> Candidate {
        Candidate {
            distance2: self.points[entry].distance2(query),
            payload: self.payloads[entry],
            entry,
        }
    }

    /// The closest point; exact ties go to the lowest payload
    pub fn nearest(&self, query: &Point3) -> Neighbour {
        // An index is never empty, so there is always one result
        let mut found = self.k_nearest(query, 1);
        found.swap_remove(0)
    }

    /// The `k` closest points in increasing distance, ties by ascending payload
    ///
    /// Returns fewer than `k` neighbours only when the index holds fewer than `k` points.
    pub fn k_nearest(&self, query: &Point3, k: usize) -> Vec<Neighbour> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.k_nearest_recursive(self.root, query, k, &mut heap);
        heap.into_sorted_vec()
            .into_iter()
            .map(|c| self.neighbour(c))
            .collect()
    }

    fn k_nearest_recursive(
        &self,
        node: usize,
        query: &Point3,
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        let KdNode {
            entry,
            left,
            right,
            axis,
        } = self.nodes[node];

        let candidate = self.candidate(entry, query);
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }

        let diff = query.axis(axis) - self.points[entry].axis(axis);
        let (near, far) = if diff < 0.0 {
            (left, right)
        } else {
            (right, left)
        };
        if let Some(near) = near {
            self.k_nearest_recursive(near, query, k, heap);
        }
        if let Some(far) = far {
            // Equal distances must still be visited so that lower payloads can win ties
            let visit = heap.len() < k || heap.peek().is_some_and(|w| diff * diff <= w.distance2);
            if visit {
                self.k_nearest_recursive(far, query, k, heap);
            }
        }
    }

    /// All points within `radius` (inclusive), in increasing distance, ties by ascending payload
    pub fn within_radius(&self, query: &Point3, radius: f64) -> Vec<Neighbour> {
        let mut found = Vec::new();
        if radius >= 0.0 {
            self.radius_recursive(self.root, query, radius * radius, &mut found);
        }
        found.sort_unstable();
        found.into_iter().map(|c| self.neighbour(c)).collect()
    }

    fn radius_recursive(
        &self,
        node: usize,
        query: &Point3,
        radius2: f64,
        found: &mut Vec<Candidate>,
    ) {
        let KdNode {
            entry,
            left,
            right,
            axis,
        } = self.nodes[node];

        let candidate = self.candidate(entry, query);
        if candidate.distance2 <= radius2 {
            found.push(candidate);
        }

        let diff = query.axis(axis) - self.points[entry].axis(axis);
        let (near, far) = if diff < 0.0 {
            (left, right)
        } else {
            (right, left)
        };
        if let Some(near) = near {
            self.radius_recursive(near, query, radius2, found);
        }
        if let Some(far) = far {
            if diff * diff <= radius2 {
                self.radius_recursive(far, query, radius2, found);
            }
        }
    }

    /// Points within `radius`, or the `k_max` closest when fewer than `k_min` are that close
    ///
    /// The result is ordered by increasing distance and never holds more than `k_max` points.
    pub fn closest_within_radius_or_k(
        &self,
        query: &Point3,
        radius: f64,
        k_min: usize,
        k_max: usize,
    ) -> Vec<Neighbour> {
        let mut found = self.within_radius(query, radius);
        if found.len() < k_min {
            return self.k_nearest(query, k_max);
        }
        found.truncate(k_max);
        found
    }
}
