//! RTree spatial index extension.
//!
//! cf. https://www.geopackage.org/spec140/index.html#extension_rtree

use crate::envelope::Envelope;
use crate::error::Result;
use crate::extensions::{
    ExtensionDef, ExtensionScope, delete_extension, has_extension, register_extension,
    table_exists,
};
use crate::gpkg::{GpkgFeature, GpkgLayer};
use crate::ogc_sql::{
    SQL_DELETE_SCHEMA_TABLE, execute_rtree_sqls, gpkg_rtree_drop_sql,
    gpkg_rtree_drop_triggers_sql, gpkg_rtree_shadow_drop_sql, quote_identifier, rtree_table_name,
};
use crate::sql_functions::register_spatial_functions;
use rusqlite::{Connection, params};

use super::{DEFAULT_TOLERANCE, IndexState, with_savepoint};

pub(crate) const RTREE_EXTENSION: ExtensionDef = ExtensionDef {
    name: "gpkg_rtree_index",
    definition: "http://www.geopackage.org/spec120/#extension_rtree",
    scope: ExtensionScope::WriteOnly,
};

// Overlap of the stored box with the query box, bound as
// (query max_x, query min_x, query max_y, query min_y).
const RTREE_OVERLAP: &str = "minx <= ?1 AND maxx >= ?2 AND miny <= ?3 AND maxy >= ?4";

/// One row of the RTree virtual table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RTreeEntry {
    pub id: i64,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl RTreeEntry {
    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.min_x, self.max_x, self.min_y, self.max_y)
    }
}

/// RTree index of one layer's geometry column.
///
/// Once created, the index is maintained by triggers on the feature table and
/// never needs an explicit refresh. The virtual table stores 32-bit floats
/// rounded outwards, so entries may be slightly larger than the geometries.
///
/// Example:
/// ```no_run
/// use rusqlite_gpkg_index::{Envelope, Gpkg, RTreeIndex};
///
/// let gpkg = Gpkg::open("data/example.gpkg")?;
/// let layer = gpkg.get_layer("points")?;
/// let rtree = RTreeIndex::new(&layer);
/// rtree.create()?;
/// let ids = rtree.query_ids(&Envelope::new(0.0, 10.0, 0.0, 10.0))?;
/// # let _ = ids;
/// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RTreeIndex<'l> {
    layer: &'l GpkgLayer<'l>,
    tolerance: f64,
}

impl<'l> RTreeIndex<'l> {
    pub fn new(layer: &'l GpkgLayer<'l>) -> Self {
        Self {
            layer,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Name of the virtual table, `rtree_<table>_<column>`.
    pub fn table_name(&self) -> String {
        rtree_table_name(&self.layer.layer_name, &self.layer.geometry_column)
    }

    fn conn(&self) -> &'l Connection {
        self.layer.gpkg().connection()
    }

    pub fn state(&self) -> Result<IndexState> {
        let has_extension = has_extension(
            self.conn(),
            &RTREE_EXTENSION,
            &self.layer.layer_name,
            Some(&self.layer.geometry_column),
        )?;
        let has_structure = table_exists(self.conn(), &self.table_name())?;
        Ok(IndexState::from_parts(has_extension, has_structure))
    }

    /// Whether both the extension record and the virtual table exist.
    pub fn has(&self) -> Result<bool> {
        Ok(self.state()?.is_indexed())
    }

    /// Create the virtual table, load the existing rows and install the
    /// triggers. Returns the number of rows loaded, or 0 when the index
    /// already exists.
    ///
    /// Everything happens in one savepoint, so a failure leaves no partial
    /// index behind.
    pub fn create(&self) -> Result<usize> {
        self.layer.gpkg().ensure_writable()?;
        if self.has()? {
            return Ok(0);
        }

        let conn = self.conn();
        let table = &self.layer.layer_name;
        let column = &self.layer.geometry_column;
        register_spatial_functions(conn)?;

        let loaded = with_savepoint(conn, "gpkg_rtree_create", || {
            let loaded =
                execute_rtree_sqls(conn, table, column, &self.layer.primary_key_column)?;
            register_extension(conn, &RTREE_EXTENSION, table, Some(column))?;
            Ok(loaded)
        })?;
        log::info!("created {} with {loaded} entries", self.table_name());
        Ok(loaded)
    }

    /// Drop and create the index again. Also the way to repair an
    /// inconsistent index.
    pub fn recreate(&self) -> Result<usize> {
        self.delete()?;
        self.create()
    }

    /// Drop the triggers and the virtual table, then the extension record.
    ///
    /// When the virtual table cannot be dropped (e.g. the `rtree` module is
    /// unavailable) its shadow tables and schema row are removed by hand. If
    /// that fails too, the error is returned and the index is left exactly as
    /// it was, triggers included.
    pub fn delete(&self) -> Result<()> {
        self.layer.gpkg().ensure_writable()?;
        let conn = self.conn();
        let table = &self.layer.layer_name;
        let column = &self.layer.geometry_column;

        let (deleted, dropped_manually) = with_savepoint(conn, "gpkg_rtree_delete", || {
            conn.execute_batch(&gpkg_rtree_drop_triggers_sql(table, column))?;
            let dropped_manually = match conn.execute_batch(&gpkg_rtree_drop_sql(table, column)) {
                Ok(()) => false,
                Err(err) => {
                    log::warn!(
                        "failed to drop {}: {err}; removing its tables manually",
                        self.table_name()
                    );
                    self.drop_structure_manually()?;
                    true
                }
            };
            let deleted = delete_extension(conn, &RTREE_EXTENSION, table, Some(column))?;
            Ok((deleted, dropped_manually))
        })
        .inspect_err(|err| log::warn!("{} was not deleted: {err}", self.table_name()))?;

        // VACUUM is not allowed inside a transaction.
        if dropped_manually && conn.is_autocommit() {
            conn.execute_batch("VACUUM")?;
        }
        if deleted > 0 {
            log::info!("deleted {}", self.table_name());
        }
        Ok(())
    }

    fn drop_structure_manually(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(&gpkg_rtree_shadow_drop_sql(
            &self.layer.layer_name,
            &self.layer.geometry_column,
        ))?;

        // The connection keeps its parsed schema until the schema cookie
        // changes, so bump it along with the row removal.
        let schema_version: i64 =
            conn.pragma_query_value(None, "schema_version", |row| row.get(0))?;
        conn.pragma_update(None, "writable_schema", true)?;
        let removed = conn
            .execute(SQL_DELETE_SCHEMA_TABLE, [self.table_name()])
            .and_then(|_| conn.pragma_update(None, "schema_version", schema_version + 1));
        conn.pragma_update(None, "writable_schema", false)?;
        removed?;
        Ok(())
    }

    fn require_indexed(&self) -> Result<()> {
        self.state()?.require_indexed(
            RTREE_EXTENSION.name,
            &self.layer.layer_name,
            &self.layer.geometry_column,
        )
    }

    fn overlap_params(&self, envelope: &Envelope) -> [f64; 4] {
        let query = envelope.expand_by(self.tolerance);
        [query.max_x, query.min_x, query.max_y, query.min_y]
    }

    /// Number of entries in the index.
    pub fn count_all(&self) -> Result<u64> {
        self.require_indexed()?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(&self.table_name()));
        let count: i64 = self.conn().query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of entries overlapping `envelope`.
    pub fn count(&self, envelope: &Envelope) -> Result<u64> {
        self.require_indexed()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {RTREE_OVERLAP}",
            quote_identifier(&self.table_name())
        );
        let [a, b, c, d] = self.overlap_params(envelope);
        let count: i64 = self
            .conn()
            .query_row(&sql, params![a, b, c, d], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Entries overlapping `envelope`, ordered by id.
    pub fn query_entries(&self, envelope: &Envelope) -> Result<Vec<RTreeEntry>> {
        self.require_indexed()?;
        let sql = format!(
            "SELECT id, minx, maxx, miny, maxy FROM {} WHERE {RTREE_OVERLAP} ORDER BY id",
            quote_identifier(&self.table_name())
        );
        let [a, b, c, d] = self.overlap_params(envelope);
        let mut stmt = self.conn().prepare(&sql)?;
        let entries = stmt
            .query_map(params![a, b, c, d], |row| {
                Ok(RTreeEntry {
                    id: row.get(0)?,
                    min_x: row.get(1)?,
                    max_x: row.get(2)?,
                    min_y: row.get(3)?,
                    max_y: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Ids of the features overlapping `envelope`, ascending.
    pub fn query_ids(&self, envelope: &Envelope) -> Result<Vec<i64>> {
        Ok(self
            .query_entries(envelope)?
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }

    /// Features overlapping `envelope`, read by joining back to the layer.
    pub fn query_features(&self, envelope: &Envelope) -> Result<Vec<GpkgFeature>> {
        self.require_indexed()?;
        let [a, b, c, d] = self.overlap_params(envelope);
        self.layer
            .features_where(&self.join_clause(), params![a, b, c, d])
    }

    /// One page of [`Self::query_features`], ordered by `order_by` (the
    /// primary key when `None`).
    pub fn query_chunk(
        &self,
        envelope: &Envelope,
        limit: u32,
        offset: u64,
        order_by: Option<&str>,
    ) -> Result<Vec<GpkgFeature>> {
        self.require_indexed()?;
        let [a, b, c, d] = self.overlap_params(envelope);
        self.layer.features_where_paged(
            &self.join_clause(),
            order_by,
            Some((limit, offset)),
            params![a, b, c, d],
        )
    }

    fn join_clause(&self) -> String {
        format!(
            "{} IN (SELECT id FROM {} WHERE {RTREE_OVERLAP})",
            quote_identifier(&self.layer.primary_key_column),
            quote_identifier(&self.table_name())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{RTREE_EXTENSION, RTreeIndex};
    use crate::Result;
    use crate::envelope::Envelope;
    use crate::error::GpkgError;
    use crate::extensions::{has_extension, register_extension};
    use crate::gpkg::Gpkg;
    use crate::index::{DEFAULT_TOLERANCE, IndexState};
    use crate::index::test_utils::{insert_diagonal, insert_point, point_layer};
    use crate::types::Value;
    use geo_types::{LineString, Point};
    use rstest::rstest;
    use std::path::{Path, PathBuf};

    #[test]
    fn create_loads_existing_rows() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 3)?;
        layer.insert_without_geometry([Value::Null])?;

        let rtree = RTreeIndex::new(&layer);
        assert_eq!(rtree.state()?, IndexState::NotIndexed);
        assert_eq!(rtree.create()?, 3);
        assert_eq!(rtree.state()?, IndexState::Indexed);
        assert_eq!(rtree.count_all()?, 3);

        // Creating again is a no-op.
        assert_eq!(rtree.create()?, 0);
        assert_eq!(rtree.count_all()?, 3);

        let scope: String = gpkg.connection().query_row(
            "SELECT scope FROM gpkg_extensions WHERE extension_name = 'gpkg_rtree_index'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(scope, "write-only");
        Ok(())
    }

    #[test]
    fn triggers_keep_index_in_sync() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let rtree = RTreeIndex::new(&layer);
        rtree.create()?;

        let a = insert_point(&layer, 1.0, 1.0)?;
        let b = insert_point(&layer, 5.0, 5.0)?;
        assert_eq!(rtree.count_all()?, 2);

        let around_one = Envelope::new(0.5, 1.5, 0.5, 1.5);
        assert_eq!(rtree.query_ids(&around_one)?, vec![a]);

        // Moving a geometry moves its entry.
        layer.update(Point::new(1.2, 0.8), [Value::Null], b)?;
        assert_eq!(rtree.query_ids(&around_one)?, vec![a, b]);

        // A NULL geometry has no entry, and setting it again adds one back.
        layer.clear_geometry(a)?;
        assert_eq!(rtree.query_ids(&around_one)?, vec![b]);
        layer.update(Point::new(1.0, 1.0), [Value::Null], a)?;
        assert_eq!(rtree.query_ids(&around_one)?, vec![a, b]);

        layer.delete(b)?;
        assert_eq!(rtree.query_ids(&around_one)?, vec![a]);
        assert_eq!(rtree.count_all()?, 1);
        Ok(())
    }

    #[test]
    fn empty_geometries_are_not_indexed() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let rtree = RTreeIndex::new(&layer);
        rtree.create()?;

        layer.insert(LineString::<f64>::new(Vec::new()), [Value::Null])?;
        assert_eq!(rtree.count_all()?, 0);
        Ok(())
    }

    #[test]
    fn query_without_index_fails() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let rtree = RTreeIndex::new(&layer);

        let result = rtree.query_ids(&Envelope::new(0.0, 1.0, 0.0, 1.0));
        assert!(matches!(
            result,
            Err(GpkgError::ExtensionNotFound {
                extension_name: "gpkg_rtree_index",
                ..
            })
        ));
        assert!(matches!(
            rtree.count_all(),
            Err(GpkgError::ExtensionNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_extension_record_is_inconsistent() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 2)?;
        let rtree = RTreeIndex::new(&layer);
        rtree.create()?;
        gpkg.connection().execute(
            "DELETE FROM gpkg_extensions WHERE extension_name = 'gpkg_rtree_index'",
            [],
        )?;

        assert_eq!(
            rtree.state()?,
            IndexState::Inconsistent {
                has_extension: false,
                has_structure: true
            }
        );
        assert!(matches!(
            rtree.count_all(),
            Err(GpkgError::InconsistentIndex { .. })
        ));

        assert_eq!(rtree.recreate()?, 2);
        assert!(rtree.has()?);
        Ok(())
    }

    #[rstest]
    #[case::default_tolerance(DEFAULT_TOLERANCE)]
    #[case::no_tolerance(0.0)]
    fn features_touching_the_query_are_included(#[case] tolerance: f64) -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let id = insert_point(&layer, 1.0, 1.0)?;
        let rtree = RTreeIndex::new(&layer).with_tolerance(tolerance);
        rtree.create()?;

        let touching = Envelope::new(0.0, 1.0, 0.0, 1.0);
        assert_eq!(rtree.query_ids(&touching)?, vec![id]);
        assert_eq!(rtree.count(&touching)?, 1);
        Ok(())
    }

    #[test]
    fn query_features_and_chunks() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        let ids = insert_diagonal(&layer, 10)?;
        let rtree = RTreeIndex::new(&layer);
        rtree.create()?;

        let query = Envelope::new(2.0, 6.0, 2.0, 6.0);
        let features = rtree.query_features(&query)?;
        let feature_ids: Vec<i64> = features.iter().map(|f| f.id()).collect();
        assert_eq!(feature_ids, ids[2..=6].to_vec());
        assert_eq!(
            features[0].property("name"),
            Some(&Value::Text("2,2".to_string()))
        );

        let first = rtree.query_chunk(&query, 2, 0, None)?;
        let second = rtree.query_chunk(&query, 2, 2, None)?;
        let third = rtree.query_chunk(&query, 2, 4, None)?;
        let paged: Vec<i64> = first
            .iter()
            .chain(&second)
            .chain(&third)
            .map(|f| f.id())
            .collect();
        assert_eq!(paged, feature_ids);

        // Names sort like the coordinates here.
        let by_name = rtree.query_chunk(&query, 1, 0, Some("name"))?;
        assert_eq!(by_name[0].id(), ids[2]);

        assert!(matches!(
            rtree.query_chunk(&query, 1, 0, Some("missing")),
            Err(GpkgError::UnknownColumn { .. })
        ));
        Ok(())
    }

    #[test]
    fn delete_removes_table_triggers_and_extension() -> Result<()> {
        let gpkg = Gpkg::open_in_memory()?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 3)?;
        let rtree = RTreeIndex::new(&layer);
        rtree.create()?;

        rtree.delete()?;
        assert_eq!(rtree.state()?, IndexState::NotIndexed);
        let leftovers: i64 = gpkg.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'rtree_points_geom%'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(leftovers, 0);

        // Writes keep working without the triggers.
        insert_point(&layer, 7.0, 7.0)?;
        assert_eq!(layer.count()?, 4);

        // Deleting twice is fine.
        rtree.delete()?;
        Ok(())
    }

    #[test]
    fn index_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rtree.gpkg");
        {
            let gpkg = Gpkg::new(&path)?;
            let layer = point_layer(&gpkg)?;
            insert_diagonal(&layer, 2)?;
            RTreeIndex::new(&layer).create()?;
        }

        // The triggers call ST_* functions, which every open registers.
        let gpkg = Gpkg::open(&path)?;
        let layer = gpkg.get_layer("points")?;
        insert_point(&layer, 1.0, 1.0)?;
        let rtree = RTreeIndex::new(&layer);
        assert_eq!(rtree.count(&Envelope::from_point(1.0, 1.0))?, 2);
        Ok(())
    }

    /// A package whose RTree virtual table names a module SQLite does not
    /// have, so it can only be removed by hand. With `block_shadow_drop`, a
    /// view takes the name of a shadow table and that removal fails as well.
    fn package_with_unloadable_rtree(dir: &Path, block_shadow_drop: bool) -> Result<PathBuf> {
        let path = dir.join("unloadable.gpkg");
        let gpkg = Gpkg::new(&path)?;
        let layer = point_layer(&gpkg)?;
        insert_diagonal(&layer, 3)?;

        let conn = gpkg.connection();
        register_extension(conn, &RTREE_EXTENSION, "points", Some("geom"))?;
        conn.execute_batch(
            "CREATE TRIGGER rtree_points_geom_insert AFTER INSERT ON points \
             BEGIN SELECT 1; END",
        )?;
        if block_shadow_drop {
            conn.execute_batch("CREATE VIEW rtree_points_geom_node AS SELECT 1 AS nodeno")?;
        }
        conn.pragma_update(None, "writable_schema", true)?;
        conn.execute(
            "INSERT INTO sqlite_master (type, name, tbl_name, rootpage, sql) \
             VALUES ('table', 'rtree_points_geom', 'rtree_points_geom', 0, \
             'CREATE VIRTUAL TABLE \"rtree_points_geom\" \
             USING nosuchmodule(id, minx, maxx, miny, maxy)')",
            [],
        )?;
        conn.pragma_update(None, "writable_schema", false)?;
        Ok(path)
    }

    fn rtree_trigger_count(gpkg: &Gpkg) -> Result<i64> {
        Ok(gpkg.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'trigger' AND name LIKE 'rtree_points_geom%'",
            [],
            |row| row.get(0),
        )?)
    }

    #[rstest]
    #[case::autocommit(false)]
    #[case::in_transaction(true)]
    fn unloadable_table_is_removed_by_hand(#[case] in_transaction: bool) -> Result<()> {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = package_with_unloadable_rtree(dir.path(), false)?;

        let gpkg = Gpkg::open(&path)?;
        let layer = gpkg.get_layer("points")?;
        let rtree = RTreeIndex::new(&layer);
        assert!(rtree.has()?);

        if in_transaction {
            gpkg.connection().execute_batch("BEGIN")?;
        }
        rtree.delete()?;
        assert_eq!(rtree.state()?, IndexState::NotIndexed);
        assert!(!has_extension(gpkg.connection(), &RTREE_EXTENSION, "points", None)?);
        assert_eq!(rtree_trigger_count(&gpkg)?, 0);

        // The connection sees the new schema, so the index can be rebuilt
        // right away.
        assert_eq!(rtree.create()?, 3);
        assert_eq!(rtree.count_all()?, 3);
        if in_transaction {
            gpkg.connection().execute_batch("COMMIT")?;
        }
        assert!(rtree.has()?);
        Ok(())
    }

    #[test]
    fn failed_removal_leaves_the_index_untouched() -> Result<()> {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = package_with_unloadable_rtree(dir.path(), true)?;

        let gpkg = Gpkg::open(&path)?;
        let layer = gpkg.get_layer("points")?;
        let rtree = RTreeIndex::new(&layer);

        assert!(rtree.delete().is_err());
        assert!(gpkg.connection().is_autocommit());
        assert_eq!(rtree.state()?, IndexState::Indexed);
        assert!(has_extension(
            gpkg.connection(),
            &RTREE_EXTENSION,
            "points",
            Some("geom")
        )?);
        assert_eq!(rtree_trigger_count(&gpkg)?, 1);
        Ok(())
    }
}
