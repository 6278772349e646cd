use crate::error::{GpkgError, Result};
use crate::ogc_sql::{
    quote_identifier, sql_clear_geometry, sql_count, sql_delete_all, sql_delete_by_id,
    sql_feature_columns, sql_insert_feature,
};
use crate::types::{ColumnSpec, Value};
use geo_traits::GeometryTrait;
use rusqlite::types::ValueRef;
use rusqlite::{OptionalExtension, Params, params_from_iter};
use std::collections::HashMap;
use std::sync::Arc;
use wkb::reader::Wkb;

use super::geometry::wkb_to_gpkg_geometry;
use super::{Gpkg, GpkgFeature, GpkgFeatureIterator};

mod batch_iterator;

pub use batch_iterator::GpkgFeatureBatchIterator;

#[derive(Debug)]
/// A GeoPackage feature layer with geometry metadata and column specs.
pub struct GpkgLayer<'a> {
    pub(super) conn: &'a Gpkg,
    pub layer_name: String,
    pub geometry_column: String,
    pub primary_key_column: String,
    pub geometry_type: wkb::reader::GeometryType,
    pub geometry_dimension: wkb::reader::Dimension,
    pub srs_id: i32,
    pub property_columns: Vec<ColumnSpec>,
    property_index_by_name: Arc<HashMap<String, usize>>,
    select_columns: String,
    insert_sql: String,
    update_sql: String,
}

// When issuing the SELECT query, always place these columns first so that
// we don't need to find the positions every time.
const GEOMETRY_INDEX: usize = 0;
const PRIMARY_INDEX: usize = 1;

impl<'a> GpkgLayer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        conn: &'a Gpkg,
        layer_name: &str,
        geometry_column: String,
        primary_key_column: String,
        geometry_type: wkb::reader::GeometryType,
        geometry_dimension: wkb::reader::Dimension,
        srs_id: i32,
        property_columns: Vec<ColumnSpec>,
    ) -> Self {
        let property_index_by_name = property_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.name.clone(), idx))
            .collect();
        let select_columns = sql_feature_columns(
            &geometry_column,
            &primary_key_column,
            property_columns.iter().map(|spec| spec.name.as_str()),
        );
        let insert_sql = build_insert_sql(layer_name, &geometry_column, &property_columns);
        let update_sql = build_update_sql(
            layer_name,
            &geometry_column,
            &primary_key_column,
            &property_columns,
        );

        Self {
            conn,
            layer_name: layer_name.to_string(),
            geometry_column,
            primary_key_column,
            geometry_type,
            geometry_dimension,
            srs_id,
            property_columns,
            property_index_by_name: Arc::new(property_index_by_name),
            select_columns,
            insert_sql,
            update_sql,
        }
    }

    /// The GeoPackage this layer belongs to.
    pub fn gpkg(&self) -> &'a Gpkg {
        self.conn
    }

    /// Read every feature of the layer in primary key order.
    ///
    /// Example:
    /// ```no_run
    /// use rusqlite_gpkg_index::Gpkg;
    ///
    /// let gpkg = Gpkg::open_read_only("data/example.gpkg")?;
    /// let layer = gpkg.get_layer("points")?;
    /// for feature in layer.features()? {
    ///     let _id = feature.id();
    ///     let _geom = feature.geometry()?;
    /// }
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn features(&self) -> Result<GpkgFeatureIterator> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            self.select_columns,
            quote_identifier(&self.layer_name),
            quote_identifier(&self.primary_key_column)
        );
        let features = self.query_features(&sql, [])?;
        Ok(GpkgFeatureIterator {
            features: features.into_iter(),
        })
    }

    /// Read the layer in chunks of at most `batch_size` features, in primary
    /// key order.
    ///
    /// Only one chunk is held in memory at a time. A `batch_size` of zero is
    /// treated as one.
    pub fn features_batch(&self, batch_size: u32) -> Result<GpkgFeatureBatchIterator<'_>> {
        let batch_size = batch_size.max(1);
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT {batch_size} OFFSET ?1",
            self.select_columns,
            quote_identifier(&self.layer_name),
            quote_identifier(&self.primary_key_column)
        );
        let stmt = self.conn.connection().prepare(&sql)?;
        Ok(GpkgFeatureBatchIterator::new(self, stmt, batch_size))
    }

    /// Fetch a single feature by primary key.
    pub fn get_feature(&self, id: i64) -> Result<Option<GpkgFeature>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            self.select_columns,
            quote_identifier(&self.layer_name),
            quote_identifier(&self.primary_key_column)
        );
        let mut stmt = self.conn.connection().prepare_cached(&sql)?;
        let feature = stmt
            .query_row([id], |row| self.row_to_feature(row))
            .optional()?;
        Ok(feature)
    }

    /// Fetch the features matching an SQL condition, in primary key order.
    pub(crate) fn features_where<P: Params>(
        &self,
        where_clause: &str,
        params: P,
    ) -> Result<Vec<GpkgFeature>> {
        self.features_where_paged(where_clause, None, None, params)
    }

    /// Like [`Self::features_where`], ordered by `order_by` (primary key by
    /// default) and restricted to `(limit, offset)` when `page` is given.
    pub(crate) fn features_where_paged<P: Params>(
        &self,
        where_clause: &str,
        order_by: Option<&str>,
        page: Option<(u32, u64)>,
        params: P,
    ) -> Result<Vec<GpkgFeature>> {
        let order_by = match order_by {
            Some(column) => self.checked_column(column)?,
            None => &self.primary_key_column,
        };
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {where_clause} ORDER BY {}",
            self.select_columns,
            quote_identifier(&self.layer_name),
            quote_identifier(order_by)
        );
        if order_by != self.primary_key_column {
            // Ties keep a stable order across pages.
            sql.push_str(&format!(", {}", quote_identifier(&self.primary_key_column)));
        }
        if let Some((limit, offset)) = page {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        self.query_features(&sql, params)
    }

    fn checked_column<'c>(&self, column: &'c str) -> Result<&'c str> {
        let known = column == self.primary_key_column
            || column == self.geometry_column
            || self.property_index_by_name.contains_key(column);
        if !known {
            return Err(GpkgError::UnknownColumn {
                layer_name: self.layer_name.clone(),
                column: column.to_string(),
            });
        }
        Ok(column)
    }

    /// Number of rows in the layer.
    pub fn count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .connection()
                .query_row(&sql_count(&self.layer_name), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove all rows from the layer.
    pub fn truncate(&self) -> Result<usize> {
        self.conn.ensure_writable()?;
        let sql = sql_delete_all(&self.layer_name);
        Ok(self.conn.connection().execute(&sql, [])?)
    }

    /// Insert a feature with geometry and ordered property values, returning
    /// its primary key.
    ///
    /// Example:
    /// ```no_run
    /// use geo_types::Point;
    /// use rusqlite_gpkg_index::{Gpkg, Value};
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg")?;
    /// let layer = gpkg.get_layer("points")?;
    ///
    /// let properties = vec![Value::Text("alpha".to_string()), Value::Integer(1)];
    /// let _id = layer.insert(Point::new(1.0, 2.0), properties)?;
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn insert<G, P>(&self, geometry: G, properties: P) -> Result<i64>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        let geom = self.geom_from_geometry(geometry)?;
        self.insert_row(Value::Blob(geom), properties)
    }

    /// Insert a feature whose geometry is `NULL`, returning its primary key.
    pub fn insert_without_geometry<P>(&self, properties: P) -> Result<i64>
    where
        P: IntoIterator<Item = Value>,
    {
        self.conn.ensure_writable()?;
        self.insert_row(Value::Null, properties)
    }

    /// Update the feature with geometry and ordered property values.
    pub fn update<G, P>(&self, geometry: G, properties: P, id: i64) -> Result<()>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        let geom = self.geom_from_geometry(geometry)?;
        let properties = self.check_properties(properties)?;

        let params = std::iter::once(Value::Blob(geom))
            .chain(properties)
            .chain(std::iter::once(Value::Integer(id)));

        let mut stmt = self.conn.connection().prepare_cached(&self.update_sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(())
    }

    /// Set the geometry of a feature to `NULL`. Returns whether the row exists.
    pub fn clear_geometry(&self, id: i64) -> Result<bool> {
        self.conn.ensure_writable()?;
        let sql = sql_clear_geometry(
            &self.layer_name,
            &self.geometry_column,
            &self.primary_key_column,
        );
        let updated = self.conn.connection().execute(&sql, [id])?;
        Ok(updated > 0)
    }

    /// Delete a feature by primary key. Returns whether a row was deleted.
    pub fn delete(&self, id: i64) -> Result<bool> {
        self.conn.ensure_writable()?;
        let sql = sql_delete_by_id(&self.layer_name, &self.primary_key_column);
        let deleted = self.conn.connection().execute(&sql, [id])?;
        Ok(deleted > 0)
    }

    fn insert_row<P>(&self, geometry: Value, properties: P) -> Result<i64>
    where
        P: IntoIterator<Item = Value>,
    {
        let properties = self.check_properties(properties)?;
        let params = std::iter::once(geometry).chain(properties);

        let conn = self.conn.connection();
        let mut stmt = conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(conn.last_insert_rowid())
    }

    fn check_properties<P>(&self, properties: P) -> Result<Vec<Value>>
    where
        P: IntoIterator<Item = Value>,
    {
        let properties: Vec<Value> = properties.into_iter().collect();
        if properties.len() != self.property_columns.len() {
            return Err(GpkgError::InvalidPropertyCount {
                expected: self.property_columns.len(),
                got: properties.len(),
            });
        }
        Ok(properties)
    }

    fn query_features<P: Params>(&self, sql: &str, params: P) -> Result<Vec<GpkgFeature>> {
        let mut stmt = self.conn.connection().prepare(sql)?;
        let features = stmt
            .query_map(params, |row| self.row_to_feature(row))?
            .collect::<std::result::Result<Vec<GpkgFeature>, _>>()?;
        Ok(features)
    }

    /// Map a row selected with the layer's column list into a feature.
    pub(crate) fn row_to_feature(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<GpkgFeature> {
        let geometry = match row.get_ref(GEOMETRY_INDEX)? {
            ValueRef::Blob(bytes) => Some(bytes.to_vec()),
            ValueRef::Null => None,
            other => {
                return Err(rusqlite::Error::InvalidColumnType(
                    GEOMETRY_INDEX,
                    self.geometry_column.clone(),
                    other.data_type(),
                ));
            }
        };

        let id = match row.get_ref(PRIMARY_INDEX)? {
            ValueRef::Integer(id) => id,
            other => {
                return Err(rusqlite::Error::InvalidColumnType(
                    PRIMARY_INDEX,
                    self.primary_key_column.clone(),
                    other.data_type(),
                ));
            }
        };

        let mut properties = Vec::with_capacity(self.property_columns.len());
        for idx in 0..self.property_columns.len() {
            let value = row.get_ref(idx + 2)?;
            let value = Value::try_from(value).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(idx + 2, value.data_type(), Box::new(err))
            })?;
            properties.push(value);
        }

        Ok(GpkgFeature::new(
            id,
            geometry,
            properties,
            Arc::clone(&self.property_index_by_name),
        ))
    }

    fn geom_from_geometry<G>(&self, geometry: G) -> Result<Vec<u8>>
    where
        G: GeometryTrait<T = f64>,
    {
        self.conn.ensure_writable()?;

        let mut buf = Vec::new();
        wkb::writer::write_geometry(&mut buf, &geometry, &Default::default())?;
        let wkb = Wkb::try_new(&buf)?;
        wkb_to_gpkg_geometry(wkb, self.srs_id)
    }
}

fn build_insert_sql(
    layer_name: &str,
    geometry_column: &str,
    property_columns: &[ColumnSpec],
) -> String {
    let columns: Vec<String> = std::iter::once(geometry_column)
        .chain(property_columns.iter().map(|spec| spec.name.as_str()))
        .map(quote_identifier)
        .collect();

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<String>>()
        .join(",");

    sql_insert_feature(layer_name, &columns.join(","), &placeholders)
}

fn build_update_sql(
    layer_name: &str,
    geometry_column: &str,
    primary_key_column: &str,
    property_columns: &[ColumnSpec],
) -> String {
    let column_names: Vec<&str> = std::iter::once(geometry_column)
        .chain(property_columns.iter().map(|spec| spec.name.as_str()))
        .collect();

    let assignments = column_names
        .iter()
        .enumerate()
        .map(|(idx, name)| format!("{}=?{}", quote_identifier(name), idx + 1))
        .collect::<Vec<String>>()
        .join(",");
    let id_idx = column_names.len() + 1;

    format!(
        "UPDATE {} SET {} WHERE {}=?{}",
        quote_identifier(layer_name),
        assignments,
        quote_identifier(primary_key_column),
        id_idx
    )
}
