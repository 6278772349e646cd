//! The NGA Geometry Index extension: per-feature envelopes stored in
//! `nga_geometry_index`, refreshed by explicit index calls.
//!
//! cf. http://ngageoint.github.io/GeoPackage/docs/extensions/geometry-index.html

use crate::envelope::Envelope;
use crate::error::Result;
use crate::extensions::{
    ExtensionDef, ExtensionScope, delete_extension, has_extension, register_extension,
    table_exists,
};
use crate::gpkg::{GpkgFeature, GpkgLayer};
use crate::ogc_sql::{
    NGA_GEOMETRY_INDEX, NGA_TABLE_INDEX, SQL_NGA_BEGIN_TABLE_INDEX, SQL_NGA_COUNT_ENTRIES,
    SQL_NGA_DELETE_ENTRIES, SQL_NGA_DELETE_ENTRY, SQL_NGA_DELETE_TABLE_INDEX,
    SQL_NGA_GEOMETRY_INDEX, SQL_NGA_INSERT_ENTRY, SQL_NGA_LAST_INDEXED, SQL_NGA_TABLE_INDEX,
    SQL_NGA_TOUCH_TABLE_INDEX, quote_identifier,
};
use crate::progress::Progress;
use crate::types::Value;
use rusqlite::{CachedStatement, Connection, OptionalExtension, Row, params, params_from_iter};

use super::{DEFAULT_CHUNK_LIMIT, DEFAULT_TOLERANCE, IndexState, with_savepoint};

pub(crate) const GEOMETRY_INDEX_EXTENSION: ExtensionDef = ExtensionDef {
    name: "nga_geometry_index",
    definition: "http://ngageoint.github.io/GeoPackage/docs/extensions/geometry-index.html",
    scope: ExtensionScope::ReadWrite,
};

// Bound as (table, max_x, min_x, max_y, min_y, min_z, max_z, min_m, max_m).
// Z and M only filter when both the entry and the query carry them.
const ENTRY_OVERLAP: &str = "table_name = ?1
  AND min_x <= ?2 AND max_x >= ?3 AND min_y <= ?4 AND max_y >= ?5
  AND (?6 IS NULL OR min_z IS NULL OR (min_z <= ?7 AND max_z >= ?6))
  AND (?8 IS NULL OR min_m IS NULL OR (min_m <= ?9 AND max_m >= ?8))";

/// One row of `nga_geometry_index`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryIndexEntry {
    pub geom_id: i64,
    pub envelope: Envelope,
}

/// Geometry Index of one layer.
///
/// Unlike [`RTreeIndex`](super::RTreeIndex) nothing keeps this index in sync
/// with the layer: rows written after the last [`GeometryIndex::index`] are
/// missing until they are indexed, one by one with
/// [`GeometryIndex::index_feature_row`] or all at once with a forced
/// re-index. Comparing [`GeometryIndex::count`] with the layer's row count is
/// one way to notice.
#[derive(Debug, Clone, Copy)]
pub struct GeometryIndex<'l> {
    layer: &'l GpkgLayer<'l>,
    tolerance: f64,
    chunk_limit: u32,
}

impl<'l> GeometryIndex<'l> {
    pub fn new(layer: &'l GpkgLayer<'l>) -> Self {
        Self {
            layer,
            tolerance: DEFAULT_TOLERANCE,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Rows read and written per savepoint while indexing. Zero is treated as
    /// one.
    pub fn with_chunk_limit(mut self, chunk_limit: u32) -> Self {
        self.chunk_limit = chunk_limit.max(1);
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn chunk_limit(&self) -> u32 {
        self.chunk_limit
    }

    fn conn(&self) -> &'l Connection {
        self.layer.gpkg().connection()
    }

    fn table(&self) -> &'l str {
        &self.layer.layer_name
    }

    fn tables_exist(&self) -> Result<bool> {
        Ok(table_exists(self.conn(), NGA_TABLE_INDEX)?
            && table_exists(self.conn(), NGA_GEOMETRY_INDEX)?)
    }

    /// Time of the last completed index pass or single-row update, as an
    /// ISO-8601 UTC timestamp. `None` when never indexed or when a pass was
    /// started but not finished.
    pub fn last_indexed(&self) -> Result<Option<String>> {
        if !table_exists(self.conn(), NGA_TABLE_INDEX)? {
            return Ok(None);
        }
        let last_indexed: Option<Option<String>> = self
            .conn()
            .query_row(SQL_NGA_LAST_INDEXED, [self.table()], |row| row.get(0))
            .optional()?;
        Ok(last_indexed.flatten())
    }

    /// Indexed once the extension is recorded and a pass has completed.
    pub fn state(&self) -> Result<IndexState> {
        let has_extension = has_extension(
            self.conn(),
            &GEOMETRY_INDEX_EXTENSION,
            self.table(),
            Some(&self.layer.geometry_column),
        )?;
        let has_structure = self.tables_exist()? && self.last_indexed()?.is_some();
        Ok(IndexState::from_parts(has_extension, has_structure))
    }

    pub fn has(&self) -> Result<bool> {
        Ok(self.state()?.is_indexed())
    }

    /// Number of entries stored for the layer.
    pub fn count(&self) -> Result<u64> {
        if !table_exists(self.conn(), NGA_GEOMETRY_INDEX)? {
            return Ok(0);
        }
        let count: i64 = self
            .conn()
            .query_row(SQL_NGA_COUNT_ENTRIES, [self.table()], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Index every row of the layer. Returns the number of entries written,
    /// or 0 without doing anything when the layer is already indexed and
    /// `force` is false.
    pub fn index(&self, force: bool) -> Result<usize> {
        self.run_index(force, None)
    }

    /// Like [`Self::index`], reporting progress per chunk.
    ///
    /// When `progress` turns inactive the pass stops before the next chunk
    /// and the index stays incomplete: [`Self::last_indexed`] reads `None`.
    /// The entries written so far are kept unless
    /// [`Progress::cleanup_on_cancel`] asks for them to be deleted. Returns
    /// the number of entries left in the index.
    pub fn index_with_progress(&self, force: bool, progress: &mut dyn Progress) -> Result<usize> {
        self.run_index(force, Some(progress))
    }

    fn run_index(&self, force: bool, mut progress: Option<&mut dyn Progress>) -> Result<usize> {
        self.layer.gpkg().ensure_writable()?;
        if !force && self.has()? {
            return Ok(0);
        }

        let conn = self.conn();
        let table = self.table();
        let previous = self.last_indexed()?;
        with_savepoint(conn, "nga_geometry_index_begin", || {
            self.create_tables()?;
            conn.execute(SQL_NGA_BEGIN_TABLE_INDEX, [table])?;
            conn.execute(SQL_NGA_DELETE_ENTRIES, [table])?;
            Ok(())
        })?;

        if let Some(progress) = progress.as_deref_mut() {
            progress.set_max(self.layer.count()?);
        }

        let mut indexed = 0;
        let mut chunks = 0;
        for batch in self.layer.features_batch(self.chunk_limit)? {
            if let Some(progress) = progress.as_deref() {
                if !progress.is_active() {
                    return self.cancel(progress, indexed);
                }
            }

            let batch = batch?;
            indexed += with_savepoint(conn, "nga_geometry_index_chunk", || {
                let mut stmt = conn.prepare_cached(SQL_NGA_INSERT_ENTRY)?;
                let mut written = 0;
                for feature in &batch {
                    if let Some(envelope) = feature.envelope()? {
                        insert_entry(&mut stmt, table, feature.id(), &envelope)?;
                        written += 1;
                    }
                }
                Ok(written)
            })?;
            chunks += 1;

            if let Some(progress) = progress.as_deref_mut() {
                progress.add_progress(batch.len() as u64);
            }
        }

        conn.execute(SQL_NGA_TOUCH_TABLE_INDEX, params![table, previous])?;
        log::debug!("indexed {table} in {chunks} chunks of up to {}", self.chunk_limit);
        log::info!("geometry index of {table} has {indexed} entries");
        Ok(indexed)
    }

    fn cancel(&self, progress: &dyn Progress, indexed: usize) -> Result<usize> {
        let table = self.table();
        if progress.cleanup_on_cancel() {
            self.conn().execute(SQL_NGA_DELETE_ENTRIES, [table])?;
            log::warn!("geometry indexing of {table} cancelled, deleted {indexed} entries");
            return Ok(0);
        }
        log::warn!("geometry indexing of {table} cancelled, kept {indexed} entries");
        Ok(indexed)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SQL_NGA_TABLE_INDEX)?;
        conn.execute_batch(SQL_NGA_GEOMETRY_INDEX)?;
        register_extension(
            conn,
            &GEOMETRY_INDEX_EXTENSION,
            self.table(),
            Some(&self.layer.geometry_column),
        )?;
        register_extension(conn, &GEOMETRY_INDEX_EXTENSION, NGA_TABLE_INDEX, None)?;
        register_extension(conn, &GEOMETRY_INDEX_EXTENSION, NGA_GEOMETRY_INDEX, None)?;
        Ok(())
    }

    fn require_indexed(&self) -> Result<()> {
        self.state()?.require_indexed(
            GEOMETRY_INDEX_EXTENSION.name,
            self.table(),
            &self.layer.geometry_column,
        )
    }

    /// Refresh the entry of one feature and bump [`Self::last_indexed`].
    ///
    /// Returns true when an entry was written, false when the feature's
    /// geometry is `NULL` or empty and its entry was removed instead. The
    /// layer must have been indexed before.
    pub fn index_feature_row(&self, feature: &GpkgFeature) -> Result<bool> {
        Ok(self.index_feature_rows(std::slice::from_ref(feature))? == 1)
    }

    /// Refresh the entries of several features at once. Returns the number of
    /// entries written.
    pub fn index_feature_rows(&self, features: &[GpkgFeature]) -> Result<usize> {
        self.layer.gpkg().ensure_writable()?;
        self.require_indexed()?;

        let conn = self.conn();
        let table = self.table();
        with_savepoint(conn, "nga_geometry_index_rows", || {
            let mut delete = conn.prepare_cached(SQL_NGA_DELETE_ENTRY)?;
            let mut insert = conn.prepare_cached(SQL_NGA_INSERT_ENTRY)?;
            let mut written = 0;
            for feature in features {
                delete.execute(params![table, feature.id()])?;
                if let Some(envelope) = feature.envelope()? {
                    insert_entry(&mut insert, table, feature.id(), &envelope)?;
                    written += 1;
                }
            }
            touch(conn, table)?;
            Ok(written)
        })
    }

    /// Delete the entry of one feature id. Returns whether one existed.
    pub fn delete_index_for_id(&self, geom_id: i64) -> Result<bool> {
        self.layer.gpkg().ensure_writable()?;
        if !self.tables_exist()? {
            return Ok(false);
        }
        let deleted = self
            .conn()
            .execute(SQL_NGA_DELETE_ENTRY, params![self.table(), geom_id])?;
        if deleted > 0 && self.last_indexed()?.is_some() {
            touch(self.conn(), self.table())?;
        }
        Ok(deleted > 0)
    }

    pub fn delete_index_with_feature_row(&self, feature: &GpkgFeature) -> Result<bool> {
        self.delete_index_for_id(feature.id())
    }

    /// Remove the layer from the index: its entries, its `nga_table_index`
    /// row and its extension record. Returns whether anything was removed.
    pub fn delete_index(&self) -> Result<bool> {
        self.layer.gpkg().ensure_writable()?;
        let conn = self.conn();
        let table = self.table();

        let mut deleted = 0;
        if table_exists(conn, NGA_GEOMETRY_INDEX)? {
            deleted += conn.execute(SQL_NGA_DELETE_ENTRIES, [table])?;
        }
        if table_exists(conn, NGA_TABLE_INDEX)? {
            deleted += conn.execute(SQL_NGA_DELETE_TABLE_INDEX, [table])?;
        }
        deleted += delete_extension(
            conn,
            &GEOMETRY_INDEX_EXTENSION,
            table,
            Some(&self.layer.geometry_column),
        )?;
        if deleted > 0 {
            log::info!("deleted geometry index of {table}");
        }
        Ok(deleted > 0)
    }

    fn overlap_params(&self, envelope: &Envelope) -> [Value; 9] {
        let query = envelope.expand_by(self.tolerance);
        let optional = |value: Option<f64>| value.map_or(Value::Null, Value::Real);
        [
            Value::Text(self.table().to_string()),
            Value::Real(query.max_x),
            Value::Real(query.min_x),
            Value::Real(query.max_y),
            Value::Real(query.min_y),
            optional(query.z.map(|z| z.min)),
            optional(query.z.map(|z| z.max)),
            optional(query.m.map(|m| m.min)),
            optional(query.m.map(|m| m.max)),
        ]
    }

    /// Entries overlapping `envelope`, ordered by id.
    pub fn query_entries(&self, envelope: &Envelope) -> Result<Vec<GeometryIndexEntry>> {
        self.require_indexed()?;
        let sql = format!(
            "SELECT geom_id, min_x, max_x, min_y, max_y, min_z, max_z, min_m, max_m \
             FROM nga_geometry_index WHERE {ENTRY_OVERLAP} ORDER BY geom_id"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let entries = stmt
            .query_map(
                params_from_iter(self.overlap_params(envelope)),
                entry_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Ids of the features overlapping `envelope`, ascending.
    pub fn query_ids(&self, envelope: &Envelope) -> Result<Vec<i64>> {
        Ok(self
            .query_entries(envelope)?
            .into_iter()
            .map(|entry| entry.geom_id)
            .collect())
    }

    /// Number of entries overlapping `envelope`.
    pub fn count_envelope(&self, envelope: &Envelope) -> Result<u64> {
        self.require_indexed()?;
        let sql = format!("SELECT COUNT(*) FROM nga_geometry_index WHERE {ENTRY_OVERLAP}");
        let count: i64 = self.conn().query_row(
            &sql,
            params_from_iter(self.overlap_params(envelope)),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Features overlapping `envelope`, in primary key order.
    pub fn query_features(&self, envelope: &Envelope) -> Result<Vec<GpkgFeature>> {
        self.require_indexed()?;
        self.layer.features_where(
            &self.join_clause(),
            params_from_iter(self.overlap_params(envelope)),
        )
    }

    /// One page of [`Self::query_features`].
    pub fn query_chunk(
        &self,
        envelope: &Envelope,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<GpkgFeature>> {
        self.require_indexed()?;
        self.layer.features_where_paged(
            &self.join_clause(),
            None,
            Some((limit, offset)),
            params_from_iter(self.overlap_params(envelope)),
        )
    }

    fn join_clause(&self) -> String {
        format!(
            "{} IN (SELECT geom_id FROM nga_geometry_index WHERE {ENTRY_OVERLAP})",
            quote_identifier(&self.layer.primary_key_column)
        )
    }
}

fn touch(conn: &Connection, table: &str) -> rusqlite::Result<usize> {
    conn.execute(SQL_NGA_TOUCH_TABLE_INDEX, params![table, None::<String>])
}

fn insert_entry(
    stmt: &mut CachedStatement<'_>,
    table: &str,
    geom_id: i64,
    envelope: &Envelope,
) -> rusqlite::Result<usize> {
    stmt.execute(params![
        table,
        geom_id,
        envelope.min_x,
        envelope.max_x,
        envelope.min_y,
        envelope.max_y,
        envelope.z.map(|z| z.min),
        envelope.z.map(|z| z.max),
        envelope.m.map(|m| m.min),
        envelope.m.map(|m| m.max),
    ])
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<GeometryIndexEntry> {
    let mut envelope = Envelope::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?);
    if let (Some(min), Some(max)) = (row.get::<_, Option<f64>>(5)?, row.get(6)?) {
        envelope = envelope.with_z(min, max);
    }
    if let (Some(min), Some(max)) = (row.get::<_, Option<f64>>(7)?, row.get(8)?) {
        envelope = envelope.with_m(min, max);
    }
    Ok(GeometryIndexEntry {
        geom_id: row.get(0)?,
        envelope,
    })
}
