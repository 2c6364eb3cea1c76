//! Pseudo-Laplace weights
//!
//! The weights `w_j = 1 + L·Δ_j` are chosen so that the weighted neighbour offsets `Δ_j`
//! cancel: `Σ w_j Δ_j = 0`, giving `L = −I⁻¹R` with the moment matrix `I = Σ Δ_j Δ_jᵀ` and
//! `R = Σ Δ_j`. Offsets are taken in the plane tangent to the sphere at the target point.
//! The weights are normalised to sum to 1 but may be negative or exceed 1.

use crate::search::Neighbour;
use crate::spatial::Point3;
use nalgebra::{Matrix2, Vector2};

/// Orthonormal east/north basis of the plane tangent to the unit sphere at `p`
fn tangent_basis(p: &Point3) -> (Point3, Point3) {
    let mut east = Point3::new(0.0, 0.0, 1.0).cross(p);
    if east.norm() < 1e-12 {
        // At the poles any horizontal direction will do
        east = Point3::new(0.0, 1.0, 0.0);
    }
    let east = east.scale(1.0 / east.norm());
    let north = p.cross(&east);
    let north = north.scale(1.0 / north.norm());
    (east, north)
}

/// Weights aligned with `neighbours`, or `None` if the moment matrix is singular
///
/// Singular configurations include fewer than three neighbours and neighbours lying on a
/// single great circle through the target point.
pub fn pseudo_laplace_weights(query: &Point3, neighbours: &[Neighbour]) -> Option<Vec<f64>> {
    let (east, north) = tangent_basis(query);
    let (east, north) = (east.as_vector(), north.as_vector());
    let offsets: Vec<Vector2<f64>> = neighbours
        .iter()
        .map(|n| {
            let d = n.point.as_vector() - query.as_vector();
            Vector2::new(d.dot(east), d.dot(north))
        })
        .collect();

    let mut moments = Matrix2::zeros();
    let mut resultant = Vector2::zeros();
    for d in &offsets {
        moments += d * d.transpose();
        resultant += d;
    }

    let trace = moments.trace();
    if moments.determinant().abs() <= f64::EPSILON * trace * trace {
        return None;
    }
    let gradient = -moments.try_inverse()? * resultant;

    let weights: Vec<f64> = offsets.iter().map(|d| 1.0 + gradient.dot(d)).collect();
    let sum: f64 = weights.iter().sum();
    if !sum.is_finite() || sum.abs() <= f64::EPSILON {
        return None;
    }
    Some(weights.into_iter().map(|w| w / sum).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbours(points: &[(f64, f64)]) -> Vec<Neighbour> {
        points
            .iter()
            .enumerate()
            .map(|(payload, &(lat, lon))| Neighbour {
                point: Point3::from_lat_lon(lat, lon),
                payload,
                distance: 0.0,
            })
            .collect()
    }

    #[test]
    fn symmetric_neighbours_weigh_equally() {
        let query = Point3::from_lat_lon(0.0, 0.0);
        let found = neighbours(&[(0.0, 1.0), (0.0, -1.0), (1.0, 0.0), (-1.0, 0.0)]);
        let weights = pseudo_laplace_weights(&query, &found).unwrap();
        for w in weights {
            assert!((w - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn reproduces_linear_functions() {
        let query = Point3::from_lat_lon(10.3, 20.7);
        let found = neighbours(&[(10.0, 20.0), (10.0, 21.0), (11.0, 20.0), (11.0, 21.5), (9.5, 20.5)]);
        let weights = pseudo_laplace_weights(&query, &found).unwrap();
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        // The weighted tangent offsets cancel
        let (east, north) = tangent_basis(&query);
        let (mut e, mut n) = (0.0, 0.0);
        for (w, nb) in weights.iter().zip(&found) {
            let d = nb.point - query;
            e += w * d.dot(&east);
            n += w * d.dot(&north);
        }
        assert!(e.abs() < 1e-12 && n.abs() < 1e-12);
    }

    #[test]
    fn collinear_neighbours_are_singular() {
        let query = Point3::from_lat_lon(0.0, 0.5);
        let found = neighbours(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        assert!(pseudo_laplace_weights(&query, &found).is_none());
    }

    #[test]
    fn too_few_neighbours_are_singular() {
        let query = Point3::from_lat_lon(45.0, 45.0);
        let found = neighbours(&[(45.5, 45.0)]);
        assert!(pseudo_laplace_weights(&query, &found).is_none());
        assert!(pseudo_laplace_weights(&query, &[]).is_none());
    }

    #[test]
    fn tangent_basis_at_pole() {
        let (east, north) = tangent_basis(&Point3::new(0.0, 0.0, 1.0));
        assert!((east.norm() - 1.0).abs() < 1e-15);
        assert!(east.dot(&north).abs() < 1e-15);
    }
}
