//! Entry point tying assembly, caching and evaluation together
//!
//! A [`Registry`] is constructed once and passed to whatever needs weights. It owns one
//! [`WeightCache`] per cache root and the meshes built over source point sets, so that
//! independent registries (for example in tests) never share state.
//!
//! ```rust
//! use regrid_core::config::{CacheConfig, MethodConfig};
//! use regrid_core::registry::Registry;
//! use regrid_core::spatial::RegularLatLon;
//!
//! let registry = Registry::new();
//! let source = RegularLatLon::global(10.0, 10.0).unwrap();
//! let target = RegularLatLon::global(5.0, 5.0).unwrap();
//!
//! let weights = registry
//!     .weights(&source, &target, &MethodConfig::default(), None, &CacheConfig::default())
//!     .unwrap();
//! assert_eq!(weights.shape(), (72 * 37, 36 * 19));
//! ```

use crate::assembly::{adjust_land_sea, assemble};
use crate::cache::{CacheKey, WeightCache, WeightsInfo};
use crate::config::{CacheConfig, MethodConfig, RegridConfig};
use crate::errors::RegridResult;
use crate::evaluation::{apply_weights, Field};
use crate::lsm::LandSeaClasses;
use crate::matrix::WeightMatrix;
use crate::mesh::Mesh;
use crate::method::Method;
use crate::spatial::PointSet;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Weight caches and meshes shared by all regriddings of a process
#[derive(Debug, Default)]
pub struct Registry {
    caches: RwLock<HashMap<Option<PathBuf>, Arc<WeightCache>>>,
    /// Keyed by source identity. Unbounded and never evicted; only [`Registry::clear`] drops them.
    meshes: RwLock<HashMap<String, Arc<Mesh>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `config`'s root, created on first use
    ///
    /// Caches are keyed by their persistent root only; the footprint and isolation of the
    /// first configuration seen for a root are kept.
    pub fn cache(&self, config: &CacheConfig) -> Arc<WeightCache> {
        let root = config.disk_root().map(Path::to_path_buf);
        if let Some(cache) = self.caches.read().expect("Registry lock poisoned").get(&root) {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write().expect("Registry lock poisoned");
        Arc::clone(
            caches
                .entry(root)
                .or_insert_with(|| Arc::new(WeightCache::new(config))),
        )
    }

    /// The mesh over `source`, built on first use
    pub fn mesh(&self, source: &dyn PointSet) -> RegridResult<Arc<Mesh>> {
        let identity = source.identity();
        if let Some(mesh) = self.meshes.read().expect("Registry lock poisoned").get(&identity) {
            return Ok(Arc::clone(mesh));
        }
        // Built without holding the lock; a concurrent build of the same mesh is discarded
        let mesh = Arc::new(Mesh::build(source)?);
        let mut meshes = self.meshes.write().expect("Registry lock poisoned");
        Ok(Arc::clone(meshes.entry(identity).or_insert(mesh)))
    }

    fn key(
        source: &dyn PointSet,
        target: &dyn PointSet,
        config: &MethodConfig,
        lsm: Option<&LandSeaClasses>,
    ) -> RegridResult<CacheKey> {
        CacheKey::new(&source.identity(), &target.identity(), config, lsm)
    }

    /// Weights from `source` to `target`, from the cache or freshly assembled
    pub fn weights(
        &self,
        source: &dyn PointSet,
        target: &dyn PointSet,
        config: &MethodConfig,
        lsm: Option<&LandSeaClasses>,
        cache_config: &CacheConfig,
    ) -> RegridResult<Arc<WeightMatrix>> {
        config.validate()?;
        let cache = self.cache(cache_config);
        let shape = (target.number_of_points(), source.number_of_points());
        let uses_mesh = matches!(config.method, Method::FiniteElementBilinear(_))
            && source.identity() != target.identity();

        let compute = |lsm: Option<&LandSeaClasses>| -> RegridResult<WeightMatrix> {
            let mesh = if uses_mesh {
                Some(self.mesh(source)?)
            } else {
                None
            };
            let (matrix, statistics) = assemble(source, target, config, lsm, mesh.as_deref())?;
            debug!("Registry::weights assembled {:?}", statistics);
            Ok(matrix)
        };

        match lsm {
            Some(mask) if !mask.is_cacheable() => {
                let raw_key = Self::key(source, target, config, None)?;
                let raw = cache.compute_and_store(&raw_key, shape, || compute(None))?;
                let key = Self::key(source, target, config, Some(mask))?;
                cache.compute_and_store(&key, shape, || adjust_land_sea(&raw, mask, config))
            }
            _ => {
                let key = Self::key(source, target, config, lsm)?;
                cache.compute_and_store(&key, shape, || compute(lsm))
            }
        }
    }

    /// Diagnostic description of the weights from `source` to `target`
    pub fn weights_info(
        &self,
        source: &dyn PointSet,
        target: &dyn PointSet,
        config: &MethodConfig,
        lsm: Option<&LandSeaClasses>,
        cache_config: &CacheConfig,
    ) -> RegridResult<WeightsInfo> {
        let matrix = self.weights(source, target, config, lsm, cache_config)?;
        let key = Self::key(source, target, config, lsm)?;
        Ok(self.cache(cache_config).info(
            &key,
            &matrix,
            &source.identity(),
            &target.identity(),
            config.method.name(),
        ))
    }

    /// Interpolate `field` from `source` to `target`
    pub fn regrid(
        &self,
        source: &dyn PointSet,
        target: &dyn PointSet,
        config: &RegridConfig,
        lsm: Option<&LandSeaClasses>,
        field: &Field,
    ) -> RegridResult<Field> {
        let weights = self.weights(source, target, &config.method, lsm, &config.cache)?;
        apply_weights(&weights, &config.method.non_linear, field)
    }

    /// Forget all caches and meshes; persisted weights stay on disk
    pub fn clear(&self) {
        self.caches.write().expect("Registry lock poisoned").clear();
        self.meshes.write().expect("Registry lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{DistanceWeighting, FiniteElementParameters, NearestNeighbourParameters};
    use crate::nonlinear::NonLinearPolicy;
    use crate::spatial::{ListOfPoints, RegularLatLon};

    fn finite_element() -> MethodConfig {
        MethodConfig::new(Method::FiniteElementBilinear(
            FiniteElementParameters::default(),
        ))
    }

    #[test]
    fn meshes_are_shared() {
        let registry = Registry::new();
        let grid = RegularLatLon::global(30.0, 30.0).unwrap();
        let a = registry.mesh(&grid).unwrap();
        let b = registry.mesh(&grid).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn one_cache_per_root() {
        let registry = Registry::new();
        let a = registry.cache(&CacheConfig::at("/tmp/a"));
        let b = registry.cache(&CacheConfig::at("/tmp/a"));
        let c = registry.cache(&CacheConfig::at("/tmp/c"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn second_request_is_a_hit() {
        let registry = Registry::new();
        let source = RegularLatLon::global(20.0, 20.0).unwrap();
        let target = RegularLatLon::global(15.0, 15.0).unwrap();
        let cache = CacheConfig::default();

        let a = registry
            .weights(&source, &target, &finite_element(), None, &cache)
            .unwrap();
        let b = registry
            .weights(&source, &target, &finite_element(), None, &cache)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = registry.cache(&cache).statistics();
        assert_eq!(stats.computed, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[test]
    fn transient_land_sea_mask() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let cache = CacheConfig::at(dir.path());
        let source = ListOfPoints::new(
            "square",
            vec![0.0, 0.0, 1.0, 1.0],
            vec![0.0, 1.0, 0.0, 1.0],
        )
        .unwrap();
        let target = ListOfPoints::new("centre", vec![0.5], vec![0.5]).unwrap();
        let config = MethodConfig::default();
        let lsm = LandSeaClasses::new("user", vec![true, true, false, false], vec![true], false);

        let adjusted = registry
            .weights(&source, &target, &config, Some(&lsm), &cache)
            .unwrap();
        let raw = registry
            .weights(&source, &target, &config, None, &cache)
            .unwrap();
        assert_ne!(adjusted, raw);

        // Only the unadjusted weights were written
        let info = registry
            .weights_info(&source, &target, &config, None, &cache)
            .unwrap();
        assert!(info.cache_file.unwrap().exists());
        let info = registry
            .weights_info(&source, &target, &config, Some(&lsm), &cache)
            .unwrap();
        assert!(info.cache_file.is_none());
        assert_eq!(registry.cache(&cache).statistics().computed, 2);
    }

    #[test]
    fn regrid_with_missing_values() {
        let registry = Registry::new();
        let source = ListOfPoints::new(
            "square",
            vec![0.0, 0.0, 1.0, 1.0],
            vec![0.0, 1.0, 0.0, 1.0],
        )
        .unwrap();
        let target = ListOfPoints::new("centre", vec![0.5], vec![0.5]).unwrap();
        let mut config = RegridConfig::default();
        config.method = MethodConfig::new(Method::NearestNeighbour(NearestNeighbourParameters {
            nclosest: 4,
            distance_weighting: DistanceWeighting::Mean,
        }))
        .with_non_linear(vec![NonLinearPolicy::MissingIfHeaviestMissing]);

        let field = Field::with_missing_value(vec![1.0, 2.0, 3.0, -1.0], -1.0);
        let out = registry
            .regrid(&source, &target, &config, None, &field)
            .unwrap();
        // The missing input is dropped and the others share its weight
        assert!((out.values[0] - 2.0).abs() < 1e-9);
    }
}
