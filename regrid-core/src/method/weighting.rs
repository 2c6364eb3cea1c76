//! Distance weighting kernels
//!
//! A [`Kernel`] turns the neighbours of a target point into one weight per neighbour. The
//! neighbours are expected in increasing distance, as returned by
//! [`NeighbourSelector`](crate::search::NeighbourSelector).

use crate::search::Neighbour;
use crate::spatial::Point3;
use std::f64::consts::FRAC_PI_2;

/// Squared distances at or below this are treated as coincident points
pub const COINCIDENT_DISTANCE2: f64 = f64::EPSILON;

/// Largest weight a single climate filter neighbour can receive before normalisation
const CLIMATE_FILTER_MAX_WEIGHT: f64 = 0.99;

/// Weighting of a neighbour set, with all lengths on the unit sphere
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// Weight ∝ 1/d^power
    InverseDistance { power: f64 },
    /// Equal weights
    Mean,
    /// Weight ∝ exp(−d²/(2σ²))
    Gaussian { stddev: f64 },
    /// Weight ∝ exp(−d²/τ²), or 1/d² when τ is zero
    ExponentialSum { tolerance: f64 },
    /// Cosine-tapered low-pass filter around `half_distance`
    ClimateFilter {
        half_distance: f64,
        delta: f64,
        k_min: usize,
        weight_min: f64,
    },
    /// All weight on the first neighbour
    NearestLowestIndex,
}

fn one_hot(n: usize, at: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n];
    weights[at] = 1.0;
    weights
}

/// Climate filter response at chord distance `r`
pub fn climate_filter_response(r: f64, half_distance: f64, delta: f64) -> f64 {
    let h = if r < half_distance - delta {
        1.0
    } else if half_distance + delta < r {
        0.0
    } else {
        0.5 + 0.5 * (FRAC_PI_2 * (r - half_distance + delta) / delta).cos()
    };
    h.clamp(0.0, CLIMATE_FILTER_MAX_WEIGHT)
}

impl Kernel {
    /// Normalised weights for `neighbours` of `query`, aligned with the neighbour order
    ///
    /// Returns `None` when the kernel gives no weight to any neighbour (or there are no
    /// neighbours); the caller decides on a fallback.
    pub fn weights(&self, query: &Point3, neighbours: &[Neighbour]) -> Option<Vec<f64>> {
        let n = neighbours.len();
        if n == 0 {
            return None;
        }
        let distance2 = |j: usize| neighbours[j].point.distance2(query);

        let raw: Vec<f64> = match *self {
            Kernel::InverseDistance { power } => {
                let half_power = 0.5 * power;
                let mut raw = Vec::with_capacity(n);
                for j in 0..n {
                    let d2 = distance2(j);
                    if d2 <= COINCIDENT_DISTANCE2 {
                        return Some(one_hot(n, j));
                    }
                    raw.push(1.0 / d2.powf(half_power));
                }
                raw
            }
            Kernel::Mean => vec![1.0; n],
            Kernel::Gaussian { stddev } => {
                let two_variance = 2.0 * stddev * stddev;
                (0..n).map(|j| (-distance2(j) / two_variance).exp()).collect()
            }
            Kernel::ExponentialSum { tolerance } => {
                let tolerance2 = tolerance * tolerance;
                let nearest = distance2(0);
                if nearest <= COINCIDENT_DISTANCE2 || nearest < tolerance2 {
                    return Some(one_hot(n, 0));
                }
                if tolerance > 0.0 {
                    (0..n).map(|j| (-distance2(j) / tolerance2).exp()).collect()
                } else {
                    (0..n).map(|j| 1.0 / distance2(j)).collect()
                }
            }
            Kernel::ClimateFilter {
                half_distance,
                delta,
                k_min,
                weight_min,
            } => {
                let mut raw = vec![0.0; n];
                let mut sum = 0.0;
                for (j, w) in raw.iter_mut().enumerate() {
                    let h = climate_filter_response(distance2(j).sqrt(), half_distance, delta);
                    if k_min <= j && h < weight_min * (sum + h) {
                        break;
                    }
                    *w = h;
                    sum += h;
                }
                raw
            }
            Kernel::NearestLowestIndex => one_hot(n, 0),
        };

        let sum: f64 = raw.iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return None;
        }
        Some(raw.into_iter().map(|w| w / sum).collect())
    }
}
