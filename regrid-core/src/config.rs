//! Configuration
//!
//! Everything the assembly and caching code needs is passed in explicitly through these
//! structures; nothing is read from the environment. All of them can be loaded from TOML.
//!
//! ```rust
//! use regrid_core::config::{Isolation, RegridConfig};
//! use regrid_core::method::Method;
//!
//! let config = RegridConfig::from_toml_str(
//!     r#"
//!     [method]
//!     type = "gaussian"
//!     stddev = 5000.0
//!     non-linear = [{ type = "missing-if-heaviest-missing" }]
//!
//!     [cache]
//!     root = "/tmp/regrid-weights"
//!     isolation = "worker-thread"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.method.method.name(), "gaussian");
//! assert_eq!(config.method.lsm_weight_adjustment, 0.2);
//! assert_eq!(config.cache.isolation, Isolation::WorkerThread);
//! ```

use crate::errors::{RegridError, RegridResult};
use crate::method::Method;
use crate::nonlinear::NonLinearPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do when a method asks for more neighbours than the source has points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NeighbourFallback {
    /// Fail with `InsufficientNeighbours`
    Fail,
    /// Use every available point with the method's own weighting
    #[default]
    ReduceToAvailable,
    /// Use every available point with equal weights
    EqualWeights,
}

/// A method and the corrections applied around it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MethodConfig {
    #[serde(flatten)]
    pub method: Method,
    /// Treatments applied, in order, to each field at evaluation time
    #[serde(default)]
    pub non_linear: Vec<NonLinearPolicy>,
    /// Factor applied to weights whose source and target land-sea classes differ
    #[serde(default = "default_lsm_weight_adjustment")]
    pub lsm_weight_adjustment: f64,
    /// Weights smaller than this are removed, their mass shared within the row
    #[serde(default)]
    pub prune_epsilon: f64,
    #[serde(default)]
    pub insufficient_neighbours: NeighbourFallback,
}

fn default_lsm_weight_adjustment() -> f64 {
    0.2
}

impl Default for MethodConfig {
    fn default() -> Self {
        Self::new(Method::default())
    }
}

impl MethodConfig {
    /// A method with default corrections
    pub fn new(method: Method) -> Self {
        Self {
            method,
            non_linear: Vec::new(),
            lsm_weight_adjustment: default_lsm_weight_adjustment(),
            prune_epsilon: 0.0,
            insufficient_neighbours: NeighbourFallback::default(),
        }
    }

    pub fn with_non_linear(mut self, policies: Vec<NonLinearPolicy>) -> Self {
        self.non_linear = policies;
        self
    }

    /// Check the method's parameters and the corrections around it
    pub fn validate(&self) -> RegridResult<()> {
        self.method.validate()?;
        let adjustment = self.lsm_weight_adjustment;
        if !(adjustment > 0.0 && adjustment <= 1.0) {
            return Err(RegridError::InvalidConfiguration(format!(
                "lsm-weight-adjustment must be in (0, 1], got {}",
                adjustment
            )));
        }
        if !(self.prune_epsilon >= 0.0 && self.prune_epsilon.is_finite()) {
            return Err(RegridError::InvalidConfiguration(format!(
                "prune-epsilon must not be negative, got {}",
                self.prune_epsilon
            )));
        }
        Ok(())
    }
}

/// How weight computations on a cache miss are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    #[default]
    InProcess,
    /// On a dedicated thread, so that a crash is reported instead of unwinding the caller
    WorkerThread,
}

/// Weight cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Directory of the persistent cache; without one only the in-memory tier is used
    pub root: Option<PathBuf>,
    /// Upper bound on the in-memory tier (bytes)
    pub memory_footprint: usize,
    /// Whether the persistent tier is used at all
    pub disk: bool,
    pub isolation: Isolation,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            memory_footprint: 512 * 1024 * 1024,
            disk: true,
            isolation: Isolation::default(),
        }
    }
}

impl CacheConfig {
    /// Cache rooted at `root`
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    /// Directory of the persistent tier, if it is in use
    pub fn disk_root(&self) -> Option<&Path> {
        if self.disk {
            self.root.as_deref()
        } else {
            None
        }
    }
}

/// Complete configuration of a regridding
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegridConfig {
    pub method: MethodConfig,
    pub cache: CacheConfig,
}

impl RegridConfig {
    pub fn from_toml_str(content: &str) -> RegridResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RegridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RegridError;
    use crate::method::{ExponentialSumParameters, NearestNeighbourParameters};

    #[test]
    fn empty_config_uses_defaults() {
        let config = RegridConfig::from_toml_str("").unwrap();
        assert_eq!(config, RegridConfig::default());
        assert_eq!(
            config.method.method,
            Method::NearestNeighbour(NearestNeighbourParameters::default())
        );
        assert_eq!(config.cache.memory_footprint, 512 * 1024 * 1024);
        assert!(config.cache.disk_root().is_none());
    }

    #[test]
    fn method_parameters_sit_beside_corrections() {
        let config = RegridConfig::from_toml_str(
            r#"
            [method]
            type = "exponential-sum"
            nclosest = 3
            tolerance = 100
            prune-epsilon = 1e-4
            insufficient-neighbours = "equal-weights"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.method.method,
            Method::ExponentialSum(ExponentialSumParameters {
                nclosest: 3,
                tolerance: 100.0
            })
        );
        assert_eq!(config.method.prune_epsilon, 1e-4);
        assert_eq!(
            config.method.insufficient_neighbours,
            NeighbourFallback::EqualWeights
        );
    }

    #[test]
    fn disabled_disk_tier() {
        let config = RegridConfig::from_toml_str(
            r#"
            [cache]
            root = "/var/cache/weights"
            disk = false
            "#,
        )
        .unwrap();
        assert!(config.cache.disk_root().is_none());
        assert_eq!(
            CacheConfig::at("/var/cache/weights").disk_root(),
            Some(Path::new("/var/cache/weights"))
        );
    }

    #[test]
    fn toml_round_trip() {
        let mut config = RegridConfig::default();
        config.method = MethodConfig::new(Method::NearestLowestIndex)
            .with_non_linear(vec![NonLinearPolicy::MissingIfAnyMissing]);
        config.cache = CacheConfig::at("/tmp/weights");

        let text = toml::to_string(&config).unwrap();
        assert_eq!(RegridConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn corrections_are_validated() {
        assert!(MethodConfig::default().validate().is_ok());

        for adjustment in [0.0, -0.2, 1.5, f64::NAN] {
            let mut config = MethodConfig::default();
            config.lsm_weight_adjustment = adjustment;
            assert!(matches!(
                config.validate(),
                Err(RegridError::InvalidConfiguration(_))
            ));
        }

        let mut config = MethodConfig::default();
        config.prune_epsilon = -1e-6;
        assert!(matches!(
            config.validate(),
            Err(RegridError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn parse_error() {
        let err = RegridConfig::from_toml_str("[method]\ntype = 4").unwrap_err();
        assert!(matches!(err, RegridError::ConfigParse(_)));
    }

    #[test]
    fn missing_file() {
        let err = RegridConfig::from_file("/nonexistent/regrid.toml").unwrap_err();
        assert!(matches!(err, RegridError::Io(_)));
    }
}
