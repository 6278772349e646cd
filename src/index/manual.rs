use crate::envelope::Envelope;
use crate::error::Result;
use crate::gpkg::{GpkgFeature, GpkgLayer};
use crate::types::Value;
use rusqlite::params_from_iter;

use super::{DEFAULT_CHUNK_LIMIT, DEFAULT_TOLERANCE, FeatureIndexResults};

/// Bounding-box queries answered by scanning the layer.
///
/// Rows are read `chunk_limit` at a time in primary key order and their
/// envelopes are tested against the query, so memory stays bounded by the
/// chunk size. Results do not depend on the chunk size.
#[derive(Debug, Clone, Copy)]
pub struct ManualFeatureQuery<'l> {
    layer: &'l GpkgLayer<'l>,
    chunk_limit: u32,
    tolerance: f64,
}

impl<'l> ManualFeatureQuery<'l> {
    pub fn new(layer: &'l GpkgLayer<'l>) -> Self {
        Self {
            layer,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Zero is treated as one.
    pub fn with_chunk_limit(mut self, chunk_limit: u32) -> Self {
        self.chunk_limit = chunk_limit.max(1);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn chunk_limit(&self) -> u32 {
        self.chunk_limit
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Features whose envelope overlaps `envelope`.
    pub fn query(&self, envelope: &Envelope) -> Result<FeatureIndexResults<'l>> {
        let ids = self.matching_ids(envelope, "1", &[])?;
        Ok(FeatureIndexResults::new(self.layer, ids))
    }

    /// Like [`Self::query`], restricted to rows matching an SQL condition.
    pub fn query_where(
        &self,
        envelope: &Envelope,
        where_clause: &str,
        params: &[Value],
    ) -> Result<FeatureIndexResults<'l>> {
        let ids = self.matching_ids(envelope, where_clause, params)?;
        Ok(FeatureIndexResults::new(self.layer, ids))
    }

    /// Number of features [`Self::query`] returns.
    pub fn count(&self, envelope: &Envelope) -> Result<u64> {
        Ok(self.matching_ids(envelope, "1", &[])?.len() as u64)
    }

    /// Number of features with a non-empty geometry.
    pub fn count_all(&self) -> Result<u64> {
        let mut count = 0;
        self.scan("1", &[], |feature| {
            if feature.envelope()?.is_some() {
                count += 1;
            }
            Ok(())
        })?;
        Ok(count)
    }

    /// At most `limit` matches, skipping the first `offset`.
    ///
    /// There is no stored position to resume from, so every page scans the
    /// layer from its first row.
    pub fn query_chunk(
        &self,
        envelope: &Envelope,
        limit: u32,
        offset: u64,
    ) -> Result<FeatureIndexResults<'l>> {
        let ids = self
            .matching_ids(envelope, "1", &[])?
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(FeatureIndexResults::new(self.layer, ids))
    }

    /// Union of the envelopes of all features, or `None` when every geometry
    /// is `NULL` or empty.
    pub fn envelope(&self) -> Result<Option<Envelope>> {
        let mut union: Option<Envelope> = None;
        self.scan("1", &[], |feature| {
            if let Some(envelope) = feature.envelope()? {
                match union.as_mut() {
                    Some(union) => union.expand_to_include(&envelope),
                    None => union = Some(envelope),
                }
            }
            Ok(())
        })?;
        Ok(union)
    }

    fn matching_ids(
        &self,
        envelope: &Envelope,
        where_clause: &str,
        params: &[Value],
    ) -> Result<Vec<i64>> {
        let query = envelope.expand_by(self.tolerance);
        let mut ids = Vec::new();
        self.scan(where_clause, params, |feature| {
            if let Some(feature_envelope) = feature.envelope()? {
                if feature_envelope.intersects(&query) {
                    ids.push(feature.id());
                }
            }
            Ok(())
        })?;
        Ok(ids)
    }

    fn scan(
        &self,
        where_clause: &str,
        params: &[Value],
        mut visit: impl FnMut(&GpkgFeature) -> Result<()>,
    ) -> Result<()> {
        let mut offset = 0;
        let mut chunks = 0;
        loop {
            let chunk = self.layer.features_where_paged(
                where_clause,
                None,
                Some((self.chunk_limit, offset)),
                params_from_iter(params),
            )?;
            chunks += 1;
            for feature in &chunk {
                visit(feature)?;
            }
            if chunk.len() < self.chunk_limit as usize {
                break;
            }
            offset += chunk.len() as u64;
        }
        log::debug!(
            "scanned {} in {chunks} chunks of up to {}",
            self.layer.layer_name,
            self.chunk_limit
        );
        Ok(())
    }
}
