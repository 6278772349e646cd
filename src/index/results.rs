use crate::cache::FeatureCache;
use crate::error::Result;
use crate::gpkg::{GpkgFeature, GpkgLayer};

/// Matching feature ids of an index query, read from the layer one at a time
/// while iterating.
///
/// Rows deleted between the query and the iteration are skipped.
pub struct FeatureIndexResults<'l> {
    layer: &'l GpkgLayer<'l>,
    ids: Vec<i64>,
    cursor: usize,
}

impl<'l> FeatureIndexResults<'l> {
    pub(crate) fn new(layer: &'l GpkgLayer<'l>, ids: Vec<i64>) -> Self {
        Self {
            layer,
            ids,
            cursor: 0,
        }
    }

    /// All matching ids, including the ones already iterated.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Number of matching ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Hydrate the remaining rows through `cache`, reading only the ones it
    /// does not hold and caching those.
    pub fn with_cache(self, cache: &mut FeatureCache) -> CachedFeatureIndexResults<'l, '_> {
        CachedFeatureIndexResults {
            results: self,
            cache,
        }
    }

    fn next_id(&mut self) -> Option<i64> {
        let id = self.ids.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(id)
    }
}

impl Iterator for FeatureIndexResults<'_> {
    type Item = Result<GpkgFeature>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.next_id() {
            match self.layer.get_feature(id) {
                Ok(Some(feature)) => return Some(Ok(feature)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len() - self.cursor))
    }
}

/// [`FeatureIndexResults`] hydrated through a [`FeatureCache`].
pub struct CachedFeatureIndexResults<'l, 'c> {
    results: FeatureIndexResults<'l>,
    cache: &'c mut FeatureCache,
}

impl Iterator for CachedFeatureIndexResults<'_, '_> {
    type Item = Result<GpkgFeature>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.results.next_id() {
            if let Some(feature) = self.cache.get(id) {
                return Some(Ok(feature.clone()));
            }
            match self.results.layer.get_feature(id) {
                Ok(Some(feature)) => {
                    self.cache.put(feature.clone());
                    return Some(Ok(feature));
                }
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}
