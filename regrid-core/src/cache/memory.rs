use crate::matrix::WeightMatrix;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Counters of a weight cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Lookups answered from memory
    pub memory_hits: usize,
    /// Lookups answered from the persistent cache
    pub disk_hits: usize,
    pub misses: usize,
    /// Matrices computed on a miss
    pub computed: usize,
    pub insertions: usize,
    pub evictions: usize,
    /// Persistent entries that failed validation
    pub corrupt: usize,
    /// Current number of matrices held in memory
    pub entries: usize,
    /// Current size of the matrices held in memory (bytes)
    pub footprint: usize,
}

struct Entry {
    matrix: Arc<WeightMatrix>,
    footprint: usize,
    last_used: u64,
}

/// Least-recently-used map of matrices, bounded by total footprint
pub(crate) struct MemoryCache {
    capacity: usize,
    entries: HashMap<String, Entry>,
    clock: u64,
    pub(crate) statistics: CacheStatistics,
}

impl MemoryCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            clock: 0,
            statistics: CacheStatistics::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<Arc<WeightMatrix>> {
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(Arc::clone(&entry.matrix))
    }

    /// Insert `matrix`, then evict the least recently used entries until within capacity
    ///
    /// The entry just inserted is never evicted, even if it alone exceeds the capacity.
    pub(crate) fn insert(&mut self, key: &str, matrix: Arc<WeightMatrix>) {
        let now = self.tick();
        let footprint = matrix.footprint();
        let entry = Entry {
            matrix,
            footprint,
            last_used: now,
        };
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            self.statistics.footprint -= previous.footprint;
        }
        self.statistics.footprint += footprint;
        self.statistics.insertions += 1;

        while self.statistics.footprint > self.capacity && self.entries.len() > 1 {
            let oldest = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else { break };
            if let Some(evicted) = self.entries.remove(&oldest) {
                debug!(
                    "Evicting {} ({} bytes) from the weight cache",
                    oldest, evicted.footprint
                );
                self.statistics.footprint -= evicted.footprint;
                self.statistics.evictions += 1;
            }
        }
        self.statistics.entries = self.entries.len();
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.statistics.entries = 0;
        self.statistics.footprint = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(n: usize) -> Arc<WeightMatrix> {
        Arc::new(WeightMatrix::identity(n))
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let size = matrix(10).footprint();
        let mut cache = MemoryCache::new(2 * size);
        cache.insert("a", matrix(10));
        cache.insert("b", matrix(10));
        assert!(cache.get("a").is_some());

        cache.insert("c", matrix(10));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.statistics.evictions, 1);
        assert_eq!(cache.statistics.entries, 2);
        assert_eq!(cache.statistics.footprint, 2 * size);
    }

    #[test]
    fn oversized_entry_is_kept_alone() {
        let mut cache = MemoryCache::new(1);
        cache.insert("a", matrix(5));
        cache.insert("b", matrix(5));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.statistics.entries, 1);
    }

    #[test]
    fn replacing_an_entry_updates_footprint() {
        let mut cache = MemoryCache::new(usize::MAX);
        cache.insert("a", matrix(5));
        cache.insert("a", matrix(50));
        assert_eq!(cache.statistics.footprint, matrix(50).footprint());
        cache.clear();
        assert_eq!(cache.statistics.footprint, 0);
        assert!(cache.get("a").is_none());
    }
}
