//! Two-tier cache of assembled weight matrices
//!
//! Lookups go to a process-wide in-memory tier first and then to a directory of weight files
//! shared by every process using the same root. On a miss the matrix is computed (through
//! the configured [`ComputeIsolation`]), written to disk and kept in memory.
//!
//! No lock is held while a matrix is computed. Two threads or processes missing on the same
//! key may both compute it; the results are identical and only the first file written is
//! kept. Corrupt or mismatching files are treated as misses and left in place.

pub mod disk;
mod isolation;
mod key;
mod memory;

pub use isolation::{Computation, ComputeIsolation, InProcess, WorkerThread};
pub use key::CacheKey;
pub use memory::CacheStatistics;

use crate::config::CacheConfig;
use crate::errors::{RegridError, RegridResult};
use crate::matrix::WeightMatrix;
use log::{debug, info, warn};
use memory::MemoryCache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File extension of persisted matrices
pub const WEIGHTS_EXTENSION: &str = "rgwm";

/// Description of a cached matrix, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WeightsInfo {
    pub input: String,
    pub output: String,
    pub method: String,
    pub rows: usize,
    pub cols: usize,
    pub nonzeros: usize,
    pub footprint: usize,
    pub digest: String,
    pub cache_file: Option<PathBuf>,
}

impl WeightsInfo {
    pub fn to_json(&self) -> RegridResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Weight cache over an optional persistent root
pub struct WeightCache {
    root: Option<PathBuf>,
    memory: Mutex<MemoryCache>,
    isolation: Arc<dyn ComputeIsolation>,
}

impl std::fmt::Debug for WeightCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightCache")
            .field("root", &self.root)
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl WeightCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_isolation(config, config.isolation.strategy())
    }

    /// Cache running computations through a custom isolation strategy
    pub fn with_isolation(config: &CacheConfig, isolation: Arc<dyn ComputeIsolation>) -> Self {
        Self {
            root: config.disk_root().map(Path::to_path_buf),
            memory: Mutex::new(MemoryCache::new(config.memory_footprint)),
            isolation,
        }
    }

    /// Root of the persistent tier, if any
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Location of the weight file for `key`, if it may be persisted
    pub fn path_of(&self, key: &CacheKey) -> Option<PathBuf> {
        if !key.is_persistent() {
            return None;
        }
        let root = self.root.as_ref()?;
        Some(root.join(format!("{}.{}", key.disk(), WEIGHTS_EXTENSION)))
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, MemoryCache> {
        self.memory.lock().expect("Weight cache lock poisoned")
    }

    /// Find the matrix for `key`, whose shape must be `shape` (target × source points)
    pub fn lookup(&self, key: &CacheKey, shape: (usize, usize)) -> Option<Arc<WeightMatrix>> {
        {
            let mut memory = self.memory();
            if let Some(matrix) = memory.get(key.memory()) {
                debug!("Weight cache hit (memory) for {}", key);
                memory.statistics.memory_hits += 1;
                return Some(matrix);
            }
        }

        let found = self.path_of(key).and_then(|path| {
            if !path.exists() {
                return None;
            }
            match disk::load(&path, Some(shape)) {
                Ok(matrix) => {
                    debug!("Weight cache hit (disk) for {}", path.display());
                    Some(Arc::new(matrix))
                }
                Err(e) => {
                    warn!("Ignoring cached weights: {}", e);
                    if matches!(e, RegridError::CacheCorrupt { .. }) {
                        self.memory().statistics.corrupt += 1;
                    }
                    None
                }
            }
        });

        let mut memory = self.memory();
        match found {
            Some(matrix) => {
                memory.statistics.disk_hits += 1;
                memory.insert(key.memory(), Arc::clone(&matrix));
                Some(matrix)
            }
            None => {
                memory.statistics.misses += 1;
                None
            }
        }
    }

    /// Persist (where allowed) and remember `matrix` under `key`
    pub fn store(&self, key: &CacheKey, matrix: WeightMatrix) -> RegridResult<Arc<WeightMatrix>> {
        if let Some(path) = self.path_of(key) {
            if disk::save(&path, &matrix)? {
                info!(
                    "Cached weights {} ({}x{}, {} entries) to {}",
                    key.digest(),
                    matrix.rows(),
                    matrix.cols(),
                    matrix.nonzeros(),
                    path.display()
                );
            }
        }
        let matrix = Arc::new(matrix);
        self.memory().insert(key.memory(), Arc::clone(&matrix));
        Ok(matrix)
    }

    /// Return the matrix for `key`, computing and storing it on a miss
    pub fn compute_and_store<F>(
        &self,
        key: &CacheKey,
        shape: (usize, usize),
        compute: F,
    ) -> RegridResult<Arc<WeightMatrix>>
    where
        F: FnOnce() -> RegridResult<WeightMatrix> + Send,
    {
        if let Some(matrix) = self.lookup(key, shape) {
            return Ok(matrix);
        }

        let matrix = self.isolation.run(key.memory(), Box::new(compute))?;
        if matrix.shape() != shape {
            return Err(RegridError::DimensionMismatch {
                what: format!("weights for {}", key),
                expected: shape.0 * shape.1,
                got: matrix.rows() * matrix.cols(),
            });
        }
        self.memory().statistics.computed += 1;
        self.store(key, matrix)
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.memory().statistics
    }

    /// Drop every matrix held in memory; the persistent tier is untouched
    pub fn clear_memory(&self) {
        self.memory().clear();
    }

    /// Diagnostic description of `matrix` as cached under `key`
    pub fn info(
        &self,
        key: &CacheKey,
        matrix: &WeightMatrix,
        input: &str,
        output: &str,
        method: &str,
    ) -> WeightsInfo {
        WeightsInfo {
            input: input.to_string(),
            output: output.to_string(),
            method: method.to_string(),
            rows: matrix.rows(),
            cols: matrix.cols(),
            nonzeros: matrix.nonzeros(),
            footprint: matrix.footprint(),
            digest: key.digest().to_string(),
            cache_file: self.path_of(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MethodConfig;
    use crate::lsm::LandSeaClasses;
    use crate::method::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> CacheKey {
        CacheKey::new("a", "b", &MethodConfig::new(Method::NearestLowestIndex), None).unwrap()
    }

    fn matrix() -> WeightMatrix {
        WeightMatrix::identity(3)
    }

    #[test]
    fn memory_only_without_root() {
        let cache = WeightCache::new(&CacheConfig::default());
        assert!(cache.path_of(&key()).is_none());
        assert!(cache.lookup(&key(), (3, 3)).is_none());

        cache.store(&key(), matrix()).unwrap();
        assert_eq!(*cache.lookup(&key(), (3, 3)).unwrap(), matrix());

        let stats = cache.statistics();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn computes_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(&CacheConfig::at(dir.path()));
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(matrix())
        };

        let first = cache.compute_and_store(&key(), (3, 3), compute).unwrap();
        let second = cache.compute_and_store(&key(), (3, 3), compute).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.path_of(&key()).unwrap().exists());
    }

    #[test]
    fn disk_tier_survives_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(&CacheConfig::at(dir.path()));
        cache.store(&key(), matrix()).unwrap();
        cache.clear_memory();

        assert_eq!(*cache.lookup(&key(), (3, 3)).unwrap(), matrix());
        assert_eq!(cache.statistics().disk_hits, 1);

        // Another cache over the same root sees the file
        let other = WeightCache::new(&CacheConfig::at(dir.path()));
        assert!(other.lookup(&key(), (3, 3)).is_some());
    }

    #[test]
    fn shape_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(&CacheConfig::at(dir.path()));
        cache.store(&key(), matrix()).unwrap();
        cache.clear_memory();

        assert!(cache.lookup(&key(), (4, 3)).is_none());
        assert_eq!(cache.statistics().corrupt, 1);
        // The file is not removed
        assert!(cache.path_of(&key()).unwrap().exists());
    }

    #[test]
    fn computed_shape_is_checked() {
        let cache = WeightCache::new(&CacheConfig::default());
        let result = cache.compute_and_store(&key(), (2, 2), || Ok(matrix()));
        assert!(matches!(result, Err(RegridError::DimensionMismatch { .. })));
        assert!(cache.lookup(&key(), (2, 2)).is_none());
    }

    #[test]
    fn transient_keys_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(&CacheConfig::at(dir.path()));
        let lsm = LandSeaClasses::new("user", vec![true; 3], vec![true; 3], false);
        let key = CacheKey::new("a", "b", &MethodConfig::default(), Some(&lsm)).unwrap();

        cache.store(&key, matrix()).unwrap();
        assert!(cache.path_of(&key).is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn weights_info_json() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(&CacheConfig::at(dir.path()));
        let info = cache.info(&key(), &matrix(), "a", "b", "nearest-lowest-index");
        let json: serde_json::Value = serde_json::from_str(&info.to_json().unwrap()).unwrap();
        assert_eq!(json["method"], "nearest-lowest-index");
        assert_eq!(json["nonzeros"], 3);
        assert!(json["cache-file"].as_str().unwrap().ends_with(".rgwm"));
    }
}
