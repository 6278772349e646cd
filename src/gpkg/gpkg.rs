use crate::conversions::{
    column_type_from_declared, column_type_to_str, dimension_from_zm, dimension_to_zm,
    geometry_type_from_str, geometry_type_to_str,
};
use crate::error::{GpkgError, Result};
use crate::index::{GeometryIndex, RTreeIndex};
use crate::ogc_sql::{
    SQL_DELETE_GPKG_CONTENTS, SQL_DELETE_GPKG_GEOMETRY_COLUMNS, SQL_INSERT_GPKG_CONTENTS,
    SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_INSERT_GPKG_SPATIAL_REF_SYS, SQL_LIST_LAYERS,
    SQL_SELECT_GEOMETRY_COLUMN_META, SQL_SELECT_SRS_ORGANIZATION, SQL_SRS_EXISTS,
    SQL_TABLE_COLUMNS, initialize_gpkg, quote_identifier, sql_create_table, sql_drop_table,
};
use crate::projection::Projection;
use crate::sql_functions::register_spatial_functions;
use crate::types::{ColumnSpec, ColumnSpecs};
use rusqlite::{OpenFlags, OptionalExtension};
use std::path::Path;

use super::layer::GpkgLayer;

/// Geometry column metadata as recorded in `gpkg_geometry_columns`.
pub(crate) struct GeometryColumnMeta {
    pub column_name: String,
    pub geometry_type: wkb::reader::GeometryType,
    pub geometry_dimension: wkb::reader::Dimension,
    pub srs_id: i32,
}

#[derive(Debug)]
/// GeoPackage connection wrapper for reading and writing feature layers.
pub struct Gpkg {
    conn: rusqlite::Connection,
    read_only: bool,
}

impl Gpkg {
    /// Open a GeoPackage in read-only mode.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: true,
        })
    }

    /// Open an existing GeoPackage in read-write mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GpkgError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let conn = rusqlite::Connection::open(path)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a new GeoPackage file with the core tables.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(GpkgError::FileExists {
                path: path.to_path_buf(),
            });
        }

        let conn = rusqlite::Connection::open(path)?;

        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a transient GeoPackage in memory.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;

        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Expert-only: register a spatial reference system in gpkg_spatial_ref_sys.
    ///
    /// Layers must reference an `srs_id` that already exists. WGS 84 (4326),
    /// Web Mercator (3857) and the two undefined systems are registered when a
    /// package is created; anything else must be inserted here with its full
    /// WKT definition. No validation of the WKT or authority fields is done.
    pub fn register_srs(
        &self,
        srs_name: &str,
        srs_id: i32,
        organization: &str,
        organization_coordsys_id: i32,
        definition: &str,
        description: &str,
    ) -> Result<()> {
        self.ensure_writable()?;

        self.conn.execute(
            SQL_INSERT_GPKG_SPATIAL_REF_SYS,
            rusqlite::params![
                srs_name,
                srs_id,
                organization,
                organization_coordsys_id,
                definition,
                description
            ],
        )?;
        Ok(())
    }

    /// List the names of the feature layers.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_LAYERS)?;
        let layers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(layers)
    }

    /// Load a layer definition and metadata by name.
    pub fn get_layer<'a>(&'a self, layer_name: &str) -> Result<GpkgLayer<'a>> {
        let meta = self.get_geometry_column_meta(layer_name)?;
        let column_specs = self.get_column_specs(layer_name)?;
        let property_columns = column_specs
            .other_columns
            .into_iter()
            .filter(|spec| spec.name != meta.column_name)
            .collect();

        Ok(GpkgLayer::new(
            self,
            layer_name,
            meta.column_name,
            column_specs.primary_key,
            meta.geometry_type,
            meta.geometry_dimension,
            meta.srs_id,
            property_columns,
        ))
    }

    /// Create a new feature layer.
    ///
    /// The table gets an `fid INTEGER PRIMARY KEY AUTOINCREMENT` key, the
    /// geometry column, and the given property columns. No spatial index is
    /// created; use `FeatureIndexManager` for that.
    pub fn create_layer<'a>(
        &'a self,
        layer_name: &str,
        geometry_column: &str,
        geometry_type: wkb::reader::GeometryType,
        geometry_dimension: wkb::reader::Dimension,
        srs_id: i32,
        other_column_specs: &[ColumnSpec],
    ) -> Result<GpkgLayer<'a>> {
        self.ensure_writable()?;

        if self.list_layers()?.iter().any(|name| name == layer_name) {
            return Err(GpkgError::LayerAlreadyExists {
                layer_name: layer_name.to_string(),
            });
        }

        let srs_exists: bool = self
            .conn
            .query_row(SQL_SRS_EXISTS, rusqlite::params![srs_id], |row| row.get(0))?;
        if !srs_exists {
            return Err(GpkgError::MissingSpatialRefSysId { srs_id });
        }

        let geometry_type_name = geometry_type_to_str(geometry_type);
        let (z, m) = dimension_to_zm(geometry_dimension);

        let mut column_defs = Vec::with_capacity(other_column_specs.len() + 2);
        column_defs.push("fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        column_defs.push(format!(
            "{} {}",
            quote_identifier(geometry_column),
            geometry_type_name
        ));
        for spec in other_column_specs {
            let col_type = column_type_to_str(spec.column_type);
            column_defs.push(format!("{} {col_type}", quote_identifier(&spec.name)));
        }

        let create_sql = sql_create_table(layer_name, &column_defs.join(", "));
        self.conn.execute_batch(&create_sql)?;

        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![layer_name, layer_name, srs_id],
        )?;
        self.conn.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![
                layer_name,
                geometry_column,
                geometry_type_name,
                srs_id,
                z,
                m
            ],
        )?;

        Ok(GpkgLayer::new(
            self,
            layer_name,
            geometry_column.to_string(),
            "fid".to_string(),
            geometry_type,
            geometry_dimension,
            srs_id,
            other_column_specs.to_vec(),
        ))
    }

    /// Delete a layer together with its spatial indexes and metadata rows.
    pub fn delete_layer(&self, layer_name: &str) -> Result<()> {
        self.ensure_writable()?;

        let layer = self.get_layer(layer_name)?;
        RTreeIndex::new(&layer).delete()?;
        GeometryIndex::new(&layer).delete_index()?;
        drop(layer);

        self.conn.execute_batch(&sql_drop_table(layer_name))?;
        self.conn
            .execute(SQL_DELETE_GPKG_GEOMETRY_COLUMNS, [layer_name])?;
        self.conn.execute(SQL_DELETE_GPKG_CONTENTS, [layer_name])?;
        log::info!("deleted layer {layer_name}");
        Ok(())
    }

    /// Resolve the projection of an `srs_id` from `gpkg_spatial_ref_sys`.
    pub fn projection(&self, srs_id: i32) -> Result<Projection> {
        let (organization, code): (String, i64) = self
            .conn
            .query_row(SQL_SELECT_SRS_ORGANIZATION, [srs_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?
            .ok_or(GpkgError::MissingSpatialRefSysId { srs_id })?;
        Ok(Projection::new(organization, code))
    }

    /// The underlying SQLite connection.
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GpkgError::ReadOnly);
        }
        Ok(())
    }

    /// Resolve the table columns and map SQLite types.
    pub(crate) fn get_column_specs(&self, layer_name: &str) -> Result<ColumnSpecs> {
        let mut stmt = self.conn.prepare(SQL_TABLE_COLUMNS)?;

        let rows = stmt
            .query_map([layer_name], |row| {
                let name: String = row.get(0)?;
                let declared_type: String = row.get(1)?;
                let primary_key: i32 = row.get(2)?;
                Ok((name, declared_type, primary_key != 0))
            })?
            .collect::<std::result::Result<Vec<(String, String, bool)>, _>>()?;

        let mut primary_key: Option<String> = None;
        let mut other_columns = Vec::new();
        for (name, declared_type, is_primary_key) in rows {
            if is_primary_key {
                if primary_key.is_some() {
                    return Err(GpkgError::CompositePrimaryKeyUnsupported {
                        layer_name: layer_name.to_string(),
                    });
                }
                primary_key = Some(name);
                continue;
            }

            let column_type = column_type_from_declared(&name, &declared_type)?;
            other_columns.push(ColumnSpec { name, column_type });
        }

        let primary_key = primary_key.ok_or_else(|| GpkgError::MissingPrimaryKeyColumn {
            layer_name: layer_name.to_string(),
        })?;

        Ok(ColumnSpecs {
            primary_key,
            other_columns,
        })
    }

    /// Resolve the geometry column metadata and SRS information for a layer.
    pub(crate) fn get_geometry_column_meta(&self, layer_name: &str) -> Result<GeometryColumnMeta> {
        let mut stmt = self.conn.prepare(SQL_SELECT_GEOMETRY_COLUMN_META)?;

        let (column_name, geometry_type_str, z, m, srs_id) =
            stmt.query_one([layer_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, i32>(4)?,
                ))
            })?;

        Ok(GeometryColumnMeta {
            column_name,
            geometry_type: geometry_type_from_str(&geometry_type_str)?,
            geometry_dimension: dimension_from_zm(z, m)?,
            srs_id,
        })
    }
}
