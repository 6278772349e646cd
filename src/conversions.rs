//! Mapping between `wkb` / `ColumnType` values and the strings GeoPackage
//! stores in `gpkg_geometry_columns` and in table DDL.

use crate::error::{GpkgError, Result};
use crate::types::ColumnType;
use wkb::reader::{Dimension, GeometryType};

// `GEOMETRY` is accepted on read and stored as a collection, the closest
// concrete type `wkb` has.
const GEOMETRY_TYPE_NAMES: [(&str, GeometryType); 7] = [
    ("POINT", GeometryType::Point),
    ("LINESTRING", GeometryType::LineString),
    ("POLYGON", GeometryType::Polygon),
    ("MULTIPOINT", GeometryType::MultiPoint),
    ("MULTILINESTRING", GeometryType::MultiLineString),
    ("MULTIPOLYGON", GeometryType::MultiPolygon),
    ("GEOMETRYCOLLECTION", GeometryType::GeometryCollection),
];

pub(crate) fn geometry_type_to_str(geometry_type: GeometryType) -> &'static str {
    GEOMETRY_TYPE_NAMES
        .iter()
        .find(|(_, candidate)| *candidate == geometry_type)
        .map_or("GEOMETRY", |(name, _)| *name)
}

pub(crate) fn geometry_type_from_str(name: &str) -> Result<GeometryType> {
    if name.eq_ignore_ascii_case("GEOMETRY") {
        return Ok(GeometryType::GeometryCollection);
    }
    GEOMETRY_TYPE_NAMES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, geometry_type)| *geometry_type)
        .ok_or_else(|| GpkgError::UnsupportedGeometryType(name.to_string()))
}

pub(crate) fn dimension_to_zm(dimension: Dimension) -> (i8, i8) {
    match dimension {
        Dimension::Xy => (0, 0),
        Dimension::Xyz => (1, 0),
        Dimension::Xym => (0, 1),
        Dimension::Xyzm => (1, 1),
    }
}

/// The `z` / `m` flags are 0 (prohibited), 1 (mandatory) or 2 (optional).
/// An optional ordinate is reported as present: rows of such a layer may
/// carry it, and envelopes keep it when they do.
pub(crate) fn dimension_from_zm(z: i8, m: i8) -> Result<Dimension> {
    let allowed = |flag: i8| match flag {
        0 => Some(false),
        1 | 2 => Some(true),
        _ => None,
    };
    match (allowed(z), allowed(m)) {
        (Some(false), Some(false)) => Ok(Dimension::Xy),
        (Some(true), Some(false)) => Ok(Dimension::Xyz),
        (Some(false), Some(true)) => Ok(Dimension::Xym),
        (Some(true), Some(true)) => Ok(Dimension::Xyzm),
        _ => Err(GpkgError::InvalidDimension { z, m }),
    }
}

pub(crate) fn column_type_to_str(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Double => "DOUBLE",
        ColumnType::Varchar => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Blob => "BLOB",
        ColumnType::Geometry => "GEOMETRY",
    }
}

/// Map a declared column type to a [`ColumnType`].
///
/// Only the data types a GeoPackage may declare are accepted, with an
/// optional size suffix such as `TEXT(32)`. `DATE` and `DATETIME` are ISO-8601
/// text.
///
/// cf. https://www.geopackage.org/spec140/index.html#table_column_data_types
pub(crate) fn column_type_from_declared(column: &str, declared_type: &str) -> Result<ColumnType> {
    let base = declared_type
        .split_once('(')
        .map_or(declared_type, |(base, _)| base)
        .trim()
        .to_ascii_uppercase();
    let column_type = match base.as_str() {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" => ColumnType::Integer,
        "FLOAT" | "DOUBLE" | "REAL" => ColumnType::Double,
        "TEXT" | "DATE" | "DATETIME" => ColumnType::Varchar,
        "BOOLEAN" => ColumnType::Boolean,
        "BLOB" => ColumnType::Blob,
        other if geometry_type_from_str(other).is_ok() => ColumnType::Geometry,
        _ => {
            return Err(GpkgError::UnsupportedColumnType {
                column: column.to_string(),
                declared_type: declared_type.to_string(),
            });
        }
    };
    Ok(column_type)
}
