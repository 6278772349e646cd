use crate::Result;
use crate::gpkg::GpkgFeature;

use super::GpkgLayer;

/// Iterator that yields batches of features from a layer.
///
/// Each call to `next()` returns a `Result<Vec<GpkgFeature>>` containing up to
/// `batch_size` features. This is the chunked alternative to `features()`,
/// which always allocates a single vector for the whole layer.
///
/// Every batch re-runs the query with a new offset, so no cursor is held open
/// between batches and the layer may be written to while iterating.
pub struct GpkgFeatureBatchIterator<'l> {
    layer: &'l GpkgLayer<'l>,
    stmt: rusqlite::Statement<'l>,
    batch_size: u32,
    offset: u64,
    end_or_invalid_state: bool,
}

impl<'l> GpkgFeatureBatchIterator<'l> {
    pub(super) fn new(
        layer: &'l GpkgLayer<'l>,
        stmt: rusqlite::Statement<'l>,
        batch_size: u32,
    ) -> Self {
        Self {
            layer,
            stmt,
            batch_size,
            offset: 0,
            end_or_invalid_state: false,
        }
    }

    /// Number of rows consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn fetch(&mut self) -> rusqlite::Result<Vec<GpkgFeature>> {
        let layer = self.layer;
        self.stmt
            .query_map([self.offset as i64], |row| layer.row_to_feature(row))?
            .collect()
    }
}

impl Iterator for GpkgFeatureBatchIterator<'_> {
    type Item = Result<Vec<GpkgFeature>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end_or_invalid_state {
            return None;
        }

        let features = match self.fetch() {
            Ok(features) => features,
            Err(e) => {
                // A failed statement is not retried.
                self.end_or_invalid_state = true;
                return Some(Err(e.into()));
            }
        };

        // A short batch means the end was reached.
        if features.len() < self.batch_size as usize {
            self.end_or_invalid_state = true;
            if features.is_empty() {
                return None;
            }
        }

        self.offset += features.len() as u64;
        Some(Ok(features))
    }
}
