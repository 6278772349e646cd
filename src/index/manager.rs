use crate::envelope::{BoundingBox, Envelope};
use crate::error::Result;
use crate::gpkg::{Gpkg, GpkgFeature, GpkgLayer};
use crate::projection::{Proj4Transform, Projection, ProjectionTransform};

use super::{
    DEFAULT_CHUNK_LIMIT, DEFAULT_TOLERANCE, FeatureIndexResults, FeatureIndexType, GeometryIndex,
    ManualFeatureQuery, RTreeIndex, with_savepoint,
};

/// Query priority of the persistent backends.
const INDEXED_TYPES: [FeatureIndexType; 2] =
    [FeatureIndexType::RTree, FeatureIndexType::GeometryIndex];

enum Backend<'l> {
    RTree(RTreeIndex<'l>),
    GeometryIndex(GeometryIndex<'l>),
    Manual(ManualFeatureQuery<'l>),
}

impl Backend<'_> {
    fn index_type(&self) -> FeatureIndexType {
        match self {
            Backend::RTree(_) => FeatureIndexType::RTree,
            Backend::GeometryIndex(_) => FeatureIndexType::GeometryIndex,
            Backend::Manual(_) => FeatureIndexType::Manual,
        }
    }

    fn is_indexed(&self) -> Result<bool> {
        match self {
            Backend::RTree(rtree) => rtree.has(),
            Backend::GeometryIndex(index) => index.has(),
            Backend::Manual(_) => Ok(false),
        }
    }

    fn query_ids(&self, envelope: &Envelope) -> Result<Vec<i64>> {
        match self {
            Backend::RTree(rtree) => rtree.query_ids(envelope),
            Backend::GeometryIndex(index) => index.query_ids(envelope),
            Backend::Manual(manual) => Ok(manual.query(envelope)?.ids().to_vec()),
        }
    }

    fn count(&self, envelope: &Envelope) -> Result<u64> {
        match self {
            Backend::RTree(rtree) => rtree.count(envelope),
            Backend::GeometryIndex(index) => index.count_envelope(envelope),
            Backend::Manual(manual) => manual.count(envelope),
        }
    }

    fn count_all(&self) -> Result<u64> {
        match self {
            Backend::RTree(rtree) => rtree.count_all(),
            Backend::GeometryIndex(index) => index.count(),
            Backend::Manual(manual) => manual.count_all(),
        }
    }

    fn query_chunk(&self, envelope: &Envelope, limit: u32, offset: u64) -> Result<Vec<GpkgFeature>> {
        match self {
            Backend::RTree(rtree) => rtree.query_chunk(envelope, limit, offset, None),
            Backend::GeometryIndex(index) => index.query_chunk(envelope, limit, offset),
            Backend::Manual(manual) => manual.query_chunk(envelope, limit, offset)?.collect(),
        }
    }

    fn index(&self, force: bool) -> Result<usize> {
        match self {
            Backend::RTree(rtree) if force => rtree.recreate(),
            Backend::RTree(rtree) => rtree.create(),
            Backend::GeometryIndex(index) => index.index(force),
            Backend::Manual(_) => Ok(0),
        }
    }

    fn delete(&self) -> Result<bool> {
        match self {
            Backend::RTree(rtree) => {
                let present = rtree.state()? != super::IndexState::NotIndexed;
                rtree.delete()?;
                Ok(present)
            }
            Backend::GeometryIndex(index) => index.delete_index(),
            Backend::Manual(_) => Ok(false),
        }
    }
}

/// Entry point for spatial queries on a layer.
///
/// Queries go to the RTree index when present, then to the Geometry Index,
/// and otherwise to a scan of the layer. Query boxes may be given in another
/// projection; they are transformed into the layer's projection before the
/// lookup, while the returned features keep their stored coordinates.
///
/// The manager holds no state besides its settings and is cheap to build per
/// request.
///
/// Example:
/// ```no_run
/// use rusqlite_gpkg_index::{BoundingBox, FeatureIndexManager, Gpkg, Projection};
///
/// let gpkg = Gpkg::open("data/example.gpkg")?;
/// let manager = FeatureIndexManager::new(&gpkg, "points")?;
/// manager.index(false)?;
///
/// let bbox = BoundingBox::new(-1_000_000.0, 1_000_000.0, -1_000_000.0, 1_000_000.0);
/// for feature in manager.query(&bbox, Some(&Projection::epsg(3857)))? {
///     let _id = feature?.id();
/// }
/// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
/// ```
pub struct FeatureIndexManager<'a> {
    layer: GpkgLayer<'a>,
    projection: Projection,
    transform: Box<dyn ProjectionTransform>,
    tolerance: f64,
    chunk_limit: u32,
    index_location: FeatureIndexType,
}

impl<'a> FeatureIndexManager<'a> {
    pub fn new(gpkg: &'a Gpkg, layer_name: &str) -> Result<Self> {
        Self::from_layer(gpkg.get_layer(layer_name)?)
    }

    pub fn from_layer(layer: GpkgLayer<'a>) -> Result<Self> {
        let projection = layer.gpkg().projection(layer.srs_id)?;
        Ok(Self {
            layer,
            projection,
            transform: Box::new(Proj4Transform::default()),
            tolerance: DEFAULT_TOLERANCE,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            index_location: FeatureIndexType::RTree,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Rows per chunk for scans and Geometry Index passes. Zero is treated as
    /// one.
    pub fn with_chunk_limit(mut self, chunk_limit: u32) -> Self {
        self.chunk_limit = chunk_limit.max(1);
        self
    }

    /// Backend that [`Self::index`] builds. Defaults to RTree.
    pub fn with_index_location(mut self, index_location: FeatureIndexType) -> Self {
        self.index_location = index_location;
        self
    }

    /// Replace the transform used for query boxes in other projections.
    pub fn with_transform<T: ProjectionTransform + 'static>(mut self, transform: T) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn layer(&self) -> &GpkgLayer<'a> {
        &self.layer
    }

    /// Projection of the layer, resolved from its `srs_id`.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn chunk_limit(&self) -> u32 {
        self.chunk_limit
    }

    pub fn index_location(&self) -> FeatureIndexType {
        self.index_location
    }

    pub fn rtree(&self) -> RTreeIndex<'_> {
        RTreeIndex::new(&self.layer).with_tolerance(self.tolerance)
    }

    pub fn geometry_index(&self) -> GeometryIndex<'_> {
        GeometryIndex::new(&self.layer)
            .with_tolerance(self.tolerance)
            .with_chunk_limit(self.chunk_limit)
    }

    pub fn manual(&self) -> ManualFeatureQuery<'_> {
        ManualFeatureQuery::new(&self.layer)
            .with_tolerance(self.tolerance)
            .with_chunk_limit(self.chunk_limit)
    }

    fn backend(&self, index_type: FeatureIndexType) -> Backend<'_> {
        match index_type {
            FeatureIndexType::RTree => Backend::RTree(self.rtree()),
            FeatureIndexType::GeometryIndex => Backend::GeometryIndex(self.geometry_index()),
            FeatureIndexType::Manual => Backend::Manual(self.manual()),
        }
    }

    fn selected_backend(&self) -> Result<Backend<'_>> {
        for index_type in INDEXED_TYPES {
            let backend = self.backend(index_type);
            if backend.is_indexed()? {
                return Ok(backend);
            }
        }
        Ok(self.backend(FeatureIndexType::Manual))
    }

    /// Whether an RTree or Geometry Index is present.
    pub fn is_indexed(&self) -> Result<bool> {
        Ok(!self.indexed_types()?.is_empty())
    }

    pub fn is_indexed_type(&self, index_type: FeatureIndexType) -> Result<bool> {
        self.backend(index_type).is_indexed()
    }

    /// Present persistent indexes, in query priority order.
    pub fn indexed_types(&self) -> Result<Vec<FeatureIndexType>> {
        let mut indexed = Vec::new();
        for index_type in INDEXED_TYPES {
            if self.backend(index_type).is_indexed()? {
                indexed.push(index_type);
            }
        }
        Ok(indexed)
    }

    /// The backend queries are currently served by.
    pub fn effective_index_type(&self) -> Result<FeatureIndexType> {
        Ok(self.selected_backend()?.index_type())
    }

    /// Build the index selected by [`Self::with_index_location`].
    pub fn index(&self, force: bool) -> Result<usize> {
        self.index_type(self.index_location, force)
    }

    /// Build one index. A present index is only rebuilt when `force` is set;
    /// otherwise 0 is returned.
    pub fn index_type(&self, index_type: FeatureIndexType, force: bool) -> Result<usize> {
        self.backend(index_type).index(force)
    }

    /// Refresh the Geometry Index entry of a feature after it was written.
    ///
    /// The RTree index needs no refresh. Returns whether the feature is in the
    /// index afterwards.
    pub fn index_feature_row(&self, feature: &GpkgFeature) -> Result<bool> {
        let geometry_index = self.geometry_index();
        if geometry_index.has()? {
            return geometry_index.index_feature_row(feature);
        }
        if self.rtree().has()? {
            return Ok(feature.envelope()?.is_some());
        }
        Ok(false)
    }

    /// Remove one index. Returns whether it existed.
    pub fn delete_index(&self, index_type: FeatureIndexType) -> Result<bool> {
        self.backend(index_type).delete()
    }

    /// Remove every index of the layer. Returns whether any existed.
    pub fn delete_all_indexes(&self) -> Result<bool> {
        let mut deleted = false;
        for index_type in INDEXED_TYPES {
            deleted |= self.delete_index(index_type)?;
        }
        Ok(deleted)
    }

    /// Delete a feature together with its Geometry Index entry, as one unit.
    /// The RTree triggers take care of their own entry. Returns whether the
    /// row existed.
    pub fn delete_feature(&self, id: i64) -> Result<bool> {
        with_savepoint(self.layer.gpkg().connection(), "gpkg_delete_feature", || {
            let deleted = self.layer.delete(id)?;
            self.geometry_index().delete_index_for_id(id)?;
            Ok(deleted)
        })
    }

    fn native_envelope(
        &self,
        bbox: &BoundingBox,
        projection: Option<&Projection>,
    ) -> Result<Envelope> {
        match projection {
            Some(projection) if *projection != self.projection => Ok(self
                .transform
                .transform_bounding_box(bbox, projection, &self.projection)?
                .to_envelope()),
            _ => Ok(bbox.to_envelope()),
        }
    }

    /// Features overlapping `bbox`, given in `projection` or in the layer's
    /// projection when `None`.
    pub fn query(
        &self,
        bbox: &BoundingBox,
        projection: Option<&Projection>,
    ) -> Result<FeatureIndexResults<'_>> {
        let envelope = self.native_envelope(bbox, projection)?;
        self.query_envelope(&envelope)
    }

    /// Features overlapping an envelope in the layer's projection. Z and M
    /// ranges only narrow Geometry Index and scan results.
    pub fn query_envelope(&self, envelope: &Envelope) -> Result<FeatureIndexResults<'_>> {
        let ids = self.selected_backend()?.query_ids(envelope)?;
        Ok(FeatureIndexResults::new(&self.layer, ids))
    }

    /// Number of features [`Self::query`] returns, without reading them.
    pub fn count(&self, bbox: &BoundingBox, projection: Option<&Projection>) -> Result<u64> {
        let envelope = self.native_envelope(bbox, projection)?;
        self.selected_backend()?.count(&envelope)
    }

    /// Number of features with an indexed, or for scans non-empty, geometry.
    pub fn count_all(&self) -> Result<u64> {
        self.selected_backend()?.count_all()
    }

    /// One page of [`Self::query`] in primary key order.
    pub fn query_chunk(
        &self,
        bbox: &BoundingBox,
        projection: Option<&Projection>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<GpkgFeature>> {
        let envelope = self.native_envelope(bbox, projection)?;
        self.selected_backend()?
            .query_chunk(&envelope, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureIndexManager;
    use crate::Result;
    use crate::cache::FeatureCacheTables;
    use crate::envelope::BoundingBox;
    use crate::error::GpkgError;
    use crate::gpkg::Gpkg;
    use crate::index::FeatureIndexType;
    use crate::index::test_utils::{insert_diagonal, insert_point, point_layer};
    use crate::projection::{Proj4Transform, Projection, ProjectionTransform};
    use crate::types::Value;
    use rstest::rstest;
    use wkb::reader::{Dimension, GeometryType};

    #[rstest]
    #[case::rtree(Some(FeatureIndexType::RTree))]
    #[case::geometry_index(Some(FeatureIndexType::GeometryIndex))]
    #[case::manual(None)]
    fn every_backend_returns_the_same_features(
        #[case] index_type: Option<FeatureIndexType>,
    ) -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let ids = insert_diagonal(&layer, 3)?;

        let manager = FeatureIndexManager::from_layer(layer)?;
        if let Some(index_type) = index_type {
            manager.index_type(index_type, false)?;
        }
        assert_eq!(
            manager.effective_index_type()?,
            index_type.unwrap_or(FeatureIndexType::Manual)
        );
        assert_eq!(manager.is_indexed()?, index_type.is_some());

        let bbox = BoundingBox::new(0.5, 1.5, 0.5, 1.5);
        let features = manager.query(&bbox, None)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id(), ids[1]);
        assert_eq!(manager.count(&bbox, None)?, 1);
        assert_eq!(manager.count_all()?, 3);
        Ok(())
    }

    #[test]
    fn rtree_takes_priority_over_geometry_index() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 3)?;

        let manager = FeatureIndexManager::from_layer(layer)?
            .with_index_location(FeatureIndexType::GeometryIndex);
        assert_eq!(manager.index(false)?, 3);
        assert_eq!(manager.effective_index_type()?, FeatureIndexType::GeometryIndex);

        assert_eq!(manager.index_type(FeatureIndexType::RTree, false)?, 3);
        assert_eq!(
            manager.indexed_types()?,
            vec![FeatureIndexType::RTree, FeatureIndexType::GeometryIndex]
        );
        assert_eq!(manager.effective_index_type()?, FeatureIndexType::RTree);

        assert!(manager.delete_index(FeatureIndexType::RTree)?);
        assert!(!manager.delete_index(FeatureIndexType::RTree)?);
        assert_eq!(manager.effective_index_type()?, FeatureIndexType::GeometryIndex);

        assert!(manager.delete_all_indexes()?);
        assert!(!manager.is_indexed()?);
        assert_eq!(manager.effective_index_type()?, FeatureIndexType::Manual);
        Ok(())
    }

    #[test]
    fn forced_rtree_index_is_rebuilt() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 4)?;

        let manager = FeatureIndexManager::from_layer(layer)?;
        assert_eq!(manager.index(false)?, 4);
        assert_eq!(manager.index(false)?, 0);
        assert_eq!(manager.index(true)?, 4);
        Ok(())
    }

    #[test]
    fn inconsistent_index_falls_back_to_next_backend() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 3)?;

        let manager = FeatureIndexManager::from_layer(layer)?;
        manager.index(false)?;
        gpkg.connection().execute(
            "DELETE FROM gpkg_extensions WHERE extension_name = 'gpkg_rtree_index'",
            [],
        )?;

        assert_eq!(manager.effective_index_type()?, FeatureIndexType::Manual);
        let bbox = BoundingBox::new(0.5, 1.5, 0.5, 1.5);
        assert_eq!(manager.count(&bbox, None)?, 1);
        assert!(matches!(
            manager.rtree().count_all(),
            Err(GpkgError::InconsistentIndex { .. })
        ));
        Ok(())
    }

    #[test]
    fn geometry_index_follows_feature_writes_on_request() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let ids = insert_diagonal(&layer, 3)?;

        let manager = FeatureIndexManager::from_layer(layer)?
            .with_index_location(FeatureIndexType::GeometryIndex);
        manager.index(false)?;

        let id = insert_point(manager.layer(), 1.0, 1.0)?;
        let bbox = BoundingBox::new(0.5, 1.5, 0.5, 1.5);
        assert_eq!(manager.count(&bbox, None)?, 1);

        let feature = manager.layer().get_feature(id)?.expect("feature");
        assert!(manager.index_feature_row(&feature)?);
        assert_eq!(manager.count(&bbox, None)?, 2);

        assert!(manager.delete_feature(ids[1])?);
        assert_eq!(manager.count(&bbox, None)?, 1);
        assert_eq!(manager.geometry_index().count()?, 3);
        assert!(!manager.delete_feature(ids[1])?);
        Ok(())
    }

    #[test]
    fn failed_feature_delete_keeps_its_index_entry() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let ids = insert_diagonal(&layer, 3)?;

        let manager = FeatureIndexManager::from_layer(layer)?
            .with_index_location(FeatureIndexType::GeometryIndex);
        manager.index(false)?;
        let stamp = manager.geometry_index().last_indexed()?;

        gpkg.connection().execute_batch(
            "CREATE TRIGGER points_keep BEFORE DELETE ON points \
             BEGIN SELECT RAISE(ABORT, 'rows are kept'); END",
        )?;
        assert!(manager.delete_feature(ids[1]).is_err());

        assert_eq!(manager.layer().count()?, 3);
        assert_eq!(manager.geometry_index().count()?, 3);
        assert_eq!(manager.geometry_index().last_indexed()?, stamp);
        assert!(gpkg.connection().is_autocommit());

        gpkg.connection().execute_batch("DROP TRIGGER points_keep")?;
        assert!(manager.delete_feature(ids[1])?);
        assert_eq!(manager.geometry_index().count()?, 2);
        Ok(())
    }

    #[test]
    fn rtree_needs_no_refresh() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let manager = FeatureIndexManager::from_layer(layer)?;
        manager.index(false)?;

        let id = insert_point(manager.layer(), 1.0, 1.0)?;
        let bbox = BoundingBox::new(0.5, 1.5, 0.5, 1.5);
        assert_eq!(manager.count(&bbox, None)?, 1);

        let feature = manager.layer().get_feature(id)?.expect("feature");
        assert!(manager.index_feature_row(&feature)?);
        assert!(manager.delete_feature(id)?);
        assert_eq!(manager.count(&bbox, None)?, 0);
        Ok(())
    }

    #[rstest]
    #[case::rtree(FeatureIndexType::RTree)]
    #[case::geometry_index(FeatureIndexType::GeometryIndex)]
    #[case::manual(FeatureIndexType::Manual)]
    fn reprojected_query_matches_native_query(#[case] index_type: FeatureIndexType) -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        for lon in -5..=5 {
            for lat in -5..=5 {
                insert_point(&layer, f64::from(lon) * 10.0, f64::from(lat) * 10.0)?;
            }
        }
        let manager = FeatureIndexManager::from_layer(layer)?;
        manager.index_type(index_type, false)?;

        let wgs84 = Projection::epsg(4326);
        let mercator = Projection::epsg(3857);
        let native = BoundingBox::new(-25.0, 35.0, -15.0, 22.0);
        let projected =
            Proj4Transform::default().transform_bounding_box(&native, &wgs84, &mercator)?;

        let native_ids = manager.query(&native, None)?.ids().to_vec();
        let projected_ids = manager.query(&projected, Some(&mercator))?.ids().to_vec();
        assert_eq!(native_ids.len(), 6 * 4);
        assert_eq!(projected_ids, native_ids);
        assert_eq!(manager.count(&projected, Some(&mercator))?, 24);

        // The layer's own projection needs no transform.
        assert_eq!(manager.query(&native, Some(&wgs84))?.ids(), native_ids.as_slice());
        Ok(())
    }

    #[test]
    fn unknown_query_projection_is_an_error() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let manager = FeatureIndexManager::from_layer(layer)?;

        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0);
        let result = manager.query(&bbox, Some(&Projection::epsg(32633)));
        assert!(matches!(result, Err(GpkgError::Projection(_))));
        Ok(())
    }

    #[rstest]
    #[case::rtree(FeatureIndexType::RTree)]
    #[case::geometry_index(FeatureIndexType::GeometryIndex)]
    #[case::manual(FeatureIndexType::Manual)]
    fn chunks_cover_the_whole_query(#[case] index_type: FeatureIndexType) -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let ids = insert_diagonal(&layer, 20)?;
        let manager = FeatureIndexManager::from_layer(layer)?.with_chunk_limit(4);
        manager.index_type(index_type, false)?;

        let bbox = BoundingBox::new(2.0, 16.0, 2.0, 16.0);
        let mut paged = Vec::new();
        let mut offset = 0;
        loop {
            let chunk = manager.query_chunk(&bbox, None, 5, offset)?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            paged.extend(chunk.iter().map(|f| f.id()));
        }
        assert_eq!(paged, ids[2..=16].to_vec());
        Ok(())
    }

    #[test]
    fn results_can_be_hydrated_through_a_cache() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 5)?;
        let manager = FeatureIndexManager::new(&gpkg, "points")?;
        manager.index(false)?;

        let mut caches = FeatureCacheTables::with_max_size(2);
        let bbox = BoundingBox::new(0.0, 4.0, 0.0, 4.0);
        let features = manager
            .query(&bbox, None)?
            .with_cache(caches.get_cache("points"))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(features.len(), 5);
        assert_eq!(caches.get_cache("points").size(), 2);
        Ok(())
    }

    #[test]
    fn projection_comes_from_the_layer_srs() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = gpkg.create_layer(
            "mercator",
            "geom",
            GeometryType::Point,
            Dimension::Xy,
            3857,
            &[],
        )?;
        layer.insert(geo_types::Point::new(0.0, 0.0), [] as [Value; 0])?;
        let manager = FeatureIndexManager::from_layer(layer)?;
        assert_eq!(manager.projection(), &Projection::epsg(3857));

        let around_origin = BoundingBox::new(-1.0, 1.0, -1.0, 1.0);
        assert_eq!(manager.count(&around_origin, Some(&Projection::epsg(4326)))?, 1);
        Ok(())
    }
}
