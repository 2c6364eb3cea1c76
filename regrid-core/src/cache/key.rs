use crate::cache::disk::FORMAT_VERSION;
use crate::config::{MethodConfig, NeighbourFallback};
use crate::errors::RegridResult;
use crate::lsm::LandSeaClasses;
use crate::method::Method;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Everything that influences the content of an assembled matrix
///
/// Non-linear treatments act at evaluation time and are deliberately absent.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    version: u32,
    source: &'a str,
    target: &'a str,
    method: &'a Method,
    prune_epsilon: f64,
    insufficient_neighbours: NeighbourFallback,
    /// Identity and weight adjustment of a persisted land-sea mask
    lsm: Option<(&'a str, f64)>,
}

/// Address of an assembled weight matrix in the [`WeightCache`](super::WeightCache)
///
/// The disk key is a relative path such as
/// `gaussian/v1/regular-ll-36x19-n90-w0-s-90-e350/list-4-1f0c…`; the memory key extends it
/// with the identity of any land-sea mask that must not be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    disk: String,
    memory: String,
    digest: String,
    persistent: bool,
}

/// Replace characters that are unsafe in a path component
fn sanitise(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}

impl CacheKey {
    /// Key for weights from `source` to `target` (point set identities)
    pub fn new(
        source: &str,
        target: &str,
        config: &MethodConfig,
        lsm: Option<&LandSeaClasses>,
    ) -> RegridResult<Self> {
        let cacheable_lsm = lsm.filter(|l| l.is_cacheable());
        let material = KeyMaterial {
            version: FORMAT_VERSION,
            source,
            target,
            method: &config.method,
            prune_epsilon: config.prune_epsilon,
            insufficient_neighbours: config.insufficient_neighbours,
            lsm: cacheable_lsm.map(|l| (l.identity(), config.lsm_weight_adjustment)),
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&material)?);
        let digest = format!("{:x}", hasher.finalize());

        let mut disk = format!(
            "{}/v{}/{}/{}-{}",
            config.method.name(),
            FORMAT_VERSION,
            sanitise(source),
            sanitise(target),
            &digest[..16]
        );
        if let Some(l) = cacheable_lsm {
            disk.push_str(&format!("-lsm-{}", sanitise(l.identity())));
        }

        let mut memory = disk.clone();
        let transient_lsm = lsm.filter(|l| !l.is_cacheable());
        if let Some(l) = transient_lsm {
            memory.push_str(&format!(
                "+lsm:{}:{}",
                l.identity(),
                config.lsm_weight_adjustment
            ));
        }

        Ok(Self {
            disk,
            memory,
            digest,
            persistent: transient_lsm.is_none(),
        })
    }

    /// Relative path of the persisted matrix, without extension
    pub fn disk(&self) -> &str {
        &self.disk
    }

    pub fn memory(&self) -> &str {
        &self.memory
    }

    /// Hex-encoded SHA-256 of the key material
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether the matrix may be written to the persistent cache
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{GaussianParameters, Method};
    use crate::nonlinear::NonLinearPolicy;

    fn config() -> MethodConfig {
        MethodConfig::new(Method::Gaussian(GaussianParameters::default()))
    }

    #[test]
    fn deterministic() {
        let a = CacheKey::new("src", "tgt", &config(), None).unwrap();
        let b = CacheKey::new("src", "tgt", &config(), None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest().len(), 64);
        assert!(a.disk().starts_with("gaussian/v1/src/tgt-"));
        assert!(a.is_persistent());
    }

    #[test]
    fn parameters_change_the_key() {
        let a = CacheKey::new("src", "tgt", &config(), None).unwrap();
        let b = CacheKey::new(
            "src",
            "tgt",
            &MethodConfig::new(Method::Gaussian(GaussianParameters {
                nclosest: 4,
                stddev: 20_000.0,
            })),
            None,
        )
        .unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.disk(), b.disk());

        let swapped = CacheKey::new("tgt", "src", &config(), None).unwrap();
        assert_ne!(a.digest(), swapped.digest());
    }

    #[test]
    fn non_linear_treatments_share_weights() {
        let a = CacheKey::new("src", "tgt", &config(), None).unwrap();
        let treated = config().with_non_linear(vec![NonLinearPolicy::MissingIfAnyMissing]);
        let b = CacheKey::new("src", "tgt", &treated, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn land_sea_masks() {
        let plain = CacheKey::new("src", "tgt", &config(), None).unwrap();

        let lsm = LandSeaClasses::new("lsm/1", vec![], vec![], true);
        let cacheable = CacheKey::new("src", "tgt", &config(), Some(&lsm)).unwrap();
        assert!(cacheable.is_persistent());
        assert!(cacheable.disk().ends_with("-lsm-lsm_1"));
        assert_ne!(cacheable.digest(), plain.digest());

        let user = LandSeaClasses::new("user-mask", vec![], vec![], false);
        let transient = CacheKey::new("src", "tgt", &config(), Some(&user)).unwrap();
        assert!(!transient.is_persistent());
        assert_eq!(transient.disk(), plain.disk());
        assert_ne!(transient.memory(), plain.memory());
    }

    #[test]
    fn sanitised_components() {
        assert_eq!(sanitise("a/b c"), "a_b_c");
        assert_eq!(sanitise(".."), "_..");
        assert_eq!(sanitise(""), "_");
        let key = CacheKey::new("../../etc", "x", &config(), None).unwrap();
        assert!(!key.disk().contains("/../"));
    }
}
