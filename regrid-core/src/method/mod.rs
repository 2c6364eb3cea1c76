//! Interpolation methods
//!
//! [`Method`] is the closed set of supported methods, each carrying its own parameters.
//! Physical lengths are given in metres and are converted to unit-sphere chord lengths
//! when the method is prepared for assembly.
//!
//! Methods are selected in configuration by their `type`:
//!
//! ```rust
//! use regrid_core::method::{DistanceWeighting, Method};
//!
//! let method: Method = toml::from_str(
//!     r#"
//!     type = "nearest-neighbour"
//!     nclosest = 8
//!     distance-weighting = { type = "mean" }
//!     "#,
//! )
//! .unwrap();
//!
//! match method {
//!     Method::NearestNeighbour(p) => {
//!         assert_eq!(p.nclosest, 8);
//!         assert_eq!(p.distance_weighting, DistanceWeighting::Mean);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

pub mod pseudo_laplace;
pub mod weighting;

use crate::errors::{RegridError, RegridResult};
use crate::search::NeighbourSelector;
use crate::spatial::chord_from_metres;
use serde::{Deserialize, Serialize};
use weighting::Kernel;

/// Distance weighting applied to the neighbours of the `nearest-neighbour` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DistanceWeighting {
    /// Weight ∝ 1/distance^power
    ///
    /// A power of 1 is the classic inverse distance, 2 the reciprocal-square (Shepard) form.
    InverseDistance {
        #[serde(default = "default_power")]
        power: f64,
    },
    /// Equal weights, no dependence on distance
    Mean,
}

fn default_power() -> f64 {
    2.0
}

impl Default for DistanceWeighting {
    fn default() -> Self {
        DistanceWeighting::InverseDistance {
            power: default_power(),
        }
    }
}

/// Parameters of the `nearest-neighbour` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NearestNeighbourParameters {
    /// Number of neighbours per target point
    pub nclosest: usize,
    pub distance_weighting: DistanceWeighting,
}

impl Default for NearestNeighbourParameters {
    fn default() -> Self {
        Self {
            nclosest: 4,
            distance_weighting: DistanceWeighting::default(),
        }
    }
}

/// Parameters of the `gaussian` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GaussianParameters {
    pub nclosest: usize,
    /// Kernel standard deviation (m)
    pub stddev: f64,
}

impl Default for GaussianParameters {
    fn default() -> Self {
        Self {
            nclosest: 4,
            stddev: 10_000.0,
        }
    }
}

/// Parameters of the `exponential-sum` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExponentialSumParameters {
    pub nclosest: usize,
    /// Kernel length (m); a nearest neighbour closer than this takes the whole weight
    ///
    /// With a tolerance of zero the kernel is the inverse square of the distance.
    pub tolerance: f64,
}

impl Default for ExponentialSumParameters {
    fn default() -> Self {
        Self {
            nclosest: 4,
            tolerance: 0.0,
        }
    }
}

/// Parameters of the `climate-filter` method
///
/// The filter weight falls from 1 to 0 with a cosine shape over
/// `[distance/2 − delta, distance/2 + delta]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClimateFilterParameters {
    /// Filter cutoff distance (m)
    pub distance: f64,
    /// Half-width of the transition band (m), must be smaller than `distance`
    pub delta: f64,
    /// Neighbours always included
    pub k_min: usize,
    /// Upper bound on neighbours
    pub k_max: usize,
    /// Relative weight below which further neighbours are dropped
    pub weight_min: f64,
}

impl Default for ClimateFilterParameters {
    fn default() -> Self {
        Self {
            distance: 50_000.0,
            delta: 1_000.0,
            k_min: 4,
            k_max: 64,
            weight_min: 0.001,
        }
    }
}

/// Parameters of the `pseudo-laplace` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PseudoLaplaceParameters {
    pub nclosest: usize,
}

impl Default for PseudoLaplaceParameters {
    fn default() -> Self {
        Self { nclosest: 4 }
    }
}

/// Parameters of the `finite-element-bilinear` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FiniteElementParameters {
    /// Candidate elements tested per target point, closest centroid first
    pub max_seed_elements: usize,
}

impl Default for FiniteElementParameters {
    fn default() -> Self {
        Self {
            max_seed_elements: 16,
        }
    }
}

/// Supported interpolation methods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Method {
    NearestNeighbour(NearestNeighbourParameters),
    Gaussian(GaussianParameters),
    ExponentialSum(ExponentialSumParameters),
    ClimateFilter(ClimateFilterParameters),
    PseudoLaplace(PseudoLaplaceParameters),
    NearestLowestIndex,
    FiniteElementBilinear(FiniteElementParameters),
}

impl Default for Method {
    fn default() -> Self {
        Method::NearestNeighbour(NearestNeighbourParameters::default())
    }
}

/// Names of all methods, as used in configuration
pub const METHOD_NAMES: [&str; 7] = [
    "nearest-neighbour",
    "gaussian",
    "exponential-sum",
    "climate-filter",
    "pseudo-laplace",
    "nearest-lowest-index",
    "finite-element-bilinear",
];

/// How a method finds its weights
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Search the neighbours of each target point, then weight them
    Neighbours {
        selector: NeighbourSelector,
        kernel: Kernel,
    },
    /// Least-squares gradient fit through the closest neighbours
    PseudoLaplace { nclosest: usize },
    /// Locate each target point in a mesh over the source points
    Mesh { max_seed_elements: usize },
}

impl Method {
    /// Configuration name of the method
    pub fn name(&self) -> &'static str {
        match self {
            Method::NearestNeighbour(_) => METHOD_NAMES[0],
            Method::Gaussian(_) => METHOD_NAMES[1],
            Method::ExponentialSum(_) => METHOD_NAMES[2],
            Method::ClimateFilter(_) => METHOD_NAMES[3],
            Method::PseudoLaplace(_) => METHOD_NAMES[4],
            Method::NearestLowestIndex => METHOD_NAMES[5],
            Method::FiniteElementBilinear(_) => METHOD_NAMES[6],
        }
    }

    /// Whether the weights are guaranteed to lie in `[0, 1]` and sum to 1
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Method::PseudoLaplace(_))
    }

    /// Check parameter constraints
    pub fn validate(&self) -> RegridResult<()> {
        let positive = |name: &str, n: usize| {
            if n == 0 {
                Err(RegridError::InvalidConfiguration(format!(
                    "{}: {} must be positive",
                    self.name(),
                    name
                )))
            } else {
                Ok(())
            }
        };
        let non_negative = |name: &str, x: f64| {
            if x.is_nan() || x < 0.0 {
                Err(RegridError::InvalidConfiguration(format!(
                    "{}: {} must not be negative, got {}",
                    self.name(),
                    name,
                    x
                )))
            } else {
                Ok(())
            }
        };

        match self {
            Method::NearestNeighbour(p) => {
                positive("nclosest", p.nclosest)?;
                if let DistanceWeighting::InverseDistance { power } = p.distance_weighting {
                    non_negative("power", power)?;
                }
                Ok(())
            }
            Method::Gaussian(p) => {
                positive("nclosest", p.nclosest)?;
                if p.stddev.is_nan() || p.stddev <= 0.0 {
                    return Err(RegridError::InvalidConfiguration(format!(
                        "gaussian: stddev must be positive, got {}",
                        p.stddev
                    )));
                }
                Ok(())
            }
            Method::ExponentialSum(p) => {
                positive("nclosest", p.nclosest)?;
                non_negative("tolerance", p.tolerance)
            }
            Method::ClimateFilter(p) => {
                non_negative("distance", p.distance)?;
                non_negative("delta", p.delta)?;
                non_negative("weight-min", p.weight_min)?;
                if p.delta >= p.distance {
                    return Err(RegridError::InvalidConfiguration(format!(
                        "climate-filter: delta ({}) must be smaller than distance ({})",
                        p.delta, p.distance
                    )));
                }
                positive("k-max", p.k_max)?;
                if p.k_min > p.k_max {
                    return Err(RegridError::InvalidConfiguration(format!(
                        "climate-filter: k-min ({}) exceeds k-max ({})",
                        p.k_min, p.k_max
                    )));
                }
                Ok(())
            }
            Method::PseudoLaplace(p) => positive("nclosest", p.nclosest),
            Method::NearestLowestIndex => Ok(()),
            Method::FiniteElementBilinear(p) => positive("max-seed-elements", p.max_seed_elements),
        }
    }

    /// Validate and convert into the unit-sphere form used by assembly
    pub fn strategy(&self) -> RegridResult<Strategy> {
        self.validate()?;
        let strategy = match self {
            Method::NearestNeighbour(p) => Strategy::Neighbours {
                selector: NeighbourSelector::FixedCount(p.nclosest),
                kernel: match p.distance_weighting {
                    DistanceWeighting::InverseDistance { power } => Kernel::InverseDistance { power },
                    DistanceWeighting::Mean => Kernel::Mean,
                },
            },
            Method::Gaussian(p) => Strategy::Neighbours {
                selector: NeighbourSelector::FixedCount(p.nclosest),
                kernel: Kernel::Gaussian {
                    stddev: chord_from_metres(p.stddev),
                },
            },
            Method::ExponentialSum(p) => Strategy::Neighbours {
                selector: NeighbourSelector::FixedCount(p.nclosest),
                kernel: Kernel::ExponentialSum {
                    tolerance: chord_from_metres(p.tolerance),
                },
            },
            Method::ClimateFilter(p) => Strategy::Neighbours {
                selector: NeighbourSelector::RadiusOrCount {
                    radius: chord_from_metres(0.5 * p.distance + p.delta),
                    k_min: p.k_min,
                    k_max: p.k_max,
                },
                kernel: Kernel::ClimateFilter {
                    half_distance: chord_from_metres(0.5 * p.distance),
                    delta: chord_from_metres(p.delta),
                    k_min: p.k_min,
                    weight_min: p.weight_min,
                },
            },
            Method::PseudoLaplace(p) => Strategy::PseudoLaplace {
                nclosest: p.nclosest,
            },
            Method::NearestLowestIndex => Strategy::Neighbours {
                selector: NeighbourSelector::SingleNearestLowestIndex,
                kernel: Kernel::NearestLowestIndex,
            },
            Method::FiniteElementBilinear(p) => Strategy::Mesh {
                max_seed_elements: p.max_seed_elements,
            },
        };
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_type_only() {
        let method: Method = toml::from_str(r#"type = "climate-filter""#).unwrap();
        assert_eq!(method, Method::ClimateFilter(ClimateFilterParameters::default()));
        assert_eq!(method.name(), "climate-filter");

        let method: Method = toml::from_str(r#"type = "nearest-lowest-index""#).unwrap();
        assert_eq!(method, Method::NearestLowestIndex);
    }

    #[test]
    fn kebab_case_parameters() {
        let method: Method = toml::from_str(
            r#"
            type = "climate-filter"
            k-min = 2
            k-max = 10
            weight-min = 0.01
            "#,
        )
        .unwrap();
        match method {
            Method::ClimateFilter(p) => {
                assert_eq!(p.k_min, 2);
                assert_eq!(p.k_max, 10);
                assert_eq!(p.weight_min, 0.01);
                assert_eq!(p.distance, 50_000.0);
            }
            other => panic!("unexpected method {other:?}"),
        }
    }

    #[test]
    fn inverse_distance_power_default() {
        let method: Method = toml::from_str(
            r#"
            type = "nearest-neighbour"
            distance-weighting = { type = "inverse-distance" }
            "#,
        )
        .unwrap();
        assert_eq!(method, Method::default());
    }

    #[test]
    fn unknown_method() {
        assert!(toml::from_str::<Method>(r#"type = "bicubic""#).is_err());
    }

    #[test]
    fn json_round_trip() {
        let method = Method::Gaussian(GaussianParameters {
            nclosest: 6,
            stddev: 2500.0,
        });
        let json = serde_json::to_string(&method).unwrap();
        assert_eq!(json, r#"{"type":"gaussian","nclosest":6,"stddev":2500.0}"#);
        assert_eq!(serde_json::from_str::<Method>(&json).unwrap(), method);
    }

    #[test]
    fn climate_filter_delta_must_be_below_cutoff() {
        let method = Method::ClimateFilter(ClimateFilterParameters {
            distance: 1000.0,
            delta: 1000.0,
            ..Default::default()
        });
        assert!(matches!(
            method.validate(),
            Err(RegridError::InvalidConfiguration(_))
        ));
        assert!(method.strategy().is_err());
    }

    #[test]
    fn invalid_parameters() {
        let zero = Method::PseudoLaplace(PseudoLaplaceParameters { nclosest: 0 });
        assert!(zero.validate().is_err());

        let negative = Method::ExponentialSum(ExponentialSumParameters {
            tolerance: -1.0,
            ..Default::default()
        });
        assert!(negative.validate().is_err());

        let flat = Method::Gaussian(GaussianParameters {
            stddev: 0.0,
            ..Default::default()
        });
        assert!(flat.validate().is_err());
    }

    #[test]
    fn only_pseudo_laplace_is_unbounded() {
        assert!(!Method::PseudoLaplace(Default::default()).is_bounded());
        assert!(Method::NearestLowestIndex.is_bounded());
        assert!(Method::FiniteElementBilinear(Default::default()).is_bounded());
    }

    #[test]
    fn names_are_unique() {
        let mut names = METHOD_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), METHOD_NAMES.len());
    }

    #[test]
    fn nearest_lowest_index_strategy() {
        assert_eq!(
            Method::NearestLowestIndex.strategy().unwrap(),
            Strategy::Neighbours {
                selector: NeighbourSelector::SingleNearestLowestIndex,
                kernel: Kernel::NearestLowestIndex,
            }
        );
    }
}
