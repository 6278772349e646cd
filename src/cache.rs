//! Bounded least-recently-used caches of hydrated feature rows.

use crate::gpkg::GpkgFeature;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Default number of rows kept per table.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

fn capacity(max_size: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN)
}

/// LRU cache of feature rows for a single table, keyed by id.
///
/// A maximum size of zero is treated as one.
#[derive(Debug)]
pub struct FeatureCache {
    rows: LruCache<i64, GpkgFeature>,
}

impl Default for FeatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_CACHE_MAX_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            rows: LruCache::new(capacity(max_size)),
        }
    }

    pub fn max_size(&self) -> usize {
        self.rows.cap().get()
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Look up a row and mark it most recently used.
    pub fn get(&mut self, id: i64) -> Option<&GpkgFeature> {
        self.rows.get(&id)
    }

    /// Cache a row, returning the row it replaced under the same id.
    ///
    /// Inserting a new id into a full cache evicts the least recently used row.
    pub fn put(&mut self, row: GpkgFeature) -> Option<GpkgFeature> {
        let id = row.id();
        match self.rows.push(id, row) {
            Some((previous_id, previous)) if previous_id == id => Some(previous),
            Some((evicted, _)) => {
                log::trace!("evicted feature {evicted} from cache");
                None
            }
            None => None,
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<GpkgFeature> {
        self.rows.pop(&id)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Change the maximum size, evicting least recently used rows that no
    /// longer fit.
    pub fn resize(&mut self, max_size: usize) {
        let before = self.rows.len();
        self.rows.resize(capacity(max_size));
        let evicted = before - self.rows.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} cached features on resize to {max_size}");
        }
    }

    pub fn clear_and_resize(&mut self, max_size: usize) {
        self.clear();
        self.resize(max_size);
    }
}

/// One [`FeatureCache`] per table, created on first use.
#[derive(Debug)]
pub struct FeatureCacheTables {
    max_cache_size: usize,
    tables: HashMap<String, FeatureCache>,
}

impl Default for FeatureCacheTables {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureCacheTables {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_CACHE_MAX_SIZE)
    }

    pub fn with_max_size(max_cache_size: usize) -> Self {
        Self {
            max_cache_size,
            tables: HashMap::new(),
        }
    }

    /// Size used for caches created from now on.
    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// The cache of a table, created if needed.
    pub fn get_cache(&mut self, table_name: &str) -> &mut FeatureCache {
        let max_cache_size = self.max_cache_size;
        self.tables
            .entry(table_name.to_string())
            .or_insert_with(|| FeatureCache::with_max_size(max_cache_size))
    }

    pub fn get(&mut self, table_name: &str, id: i64) -> Option<&GpkgFeature> {
        self.tables.get_mut(table_name)?.get(id)
    }

    pub fn put(&mut self, table_name: &str, row: GpkgFeature) -> Option<GpkgFeature> {
        self.get_cache(table_name).put(row)
    }

    pub fn remove(&mut self, table_name: &str, id: i64) -> Option<GpkgFeature> {
        self.tables.get_mut(table_name)?.remove(id)
    }

    /// Resize every existing cache and the ones created later.
    pub fn resize_all(&mut self, max_cache_size: usize) {
        self.max_cache_size = max_cache_size;
        for cache in self.tables.values_mut() {
            cache.resize(max_cache_size);
        }
    }

    /// Clear and resize every existing cache and the ones created later.
    pub fn clear_and_resize_all(&mut self, max_cache_size: usize) {
        self.max_cache_size = max_cache_size;
        for cache in self.tables.values_mut() {
            cache.clear_and_resize(max_cache_size);
        }
    }

    /// Clear one table's cache, keeping it around.
    pub fn clear(&mut self, table_name: &str) {
        if let Some(cache) = self.tables.get_mut(table_name) {
            cache.clear();
        }
    }

    /// Drop every table's cache.
    pub fn clear_all(&mut self) {
        self.tables.clear();
    }
}
