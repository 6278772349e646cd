use std::path::PathBuf;
use thiserror::Error;

/// Crate error type for GeoPackage and feature index operations.
#[derive(Debug, Error)]
pub enum GpkgError {
    /// Wraps errors returned by `rusqlite`.
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    #[error(transparent)]
    Wkb(#[from] wkb::error::WkbError),
    /// A geometry type in metadata could not be mapped to a supported WKB geometry type.
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometryType(String),
    /// A column type declared in SQLite metadata is not supported by this crate.
    #[error("unsupported column type for column '{column}': {declared_type}")]
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// Invalid or mixed `z` / `m` dimension flags in GeoPackage metadata.
    #[error("invalid or mixed geometry dimension (z={z}, m={m})")]
    InvalidDimension { z: i8, m: i8 },
    /// Property count did not match the layer schema.
    #[error("invalid property count: expected {expected}, got {got}")]
    InvalidPropertyCount { expected: usize, got: usize },
    /// GeoPackage geometry blob does not start with the `GP` magic bytes.
    #[error("invalid gpkg geometry magic: {0:#06x}")]
    InvalidGpkgGeometryMagic(u16),
    /// Invalid GeoPackage geometry flags byte.
    #[error("invalid gpkg geometry flags: {0:#04x}")]
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is too short for the fixed header.
    #[error("invalid gpkg geometry length: got {len} bytes, expected at least {minimum}")]
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// GeoPackage geometry blob is too short for the declared envelope payload.
    #[error("invalid gpkg geometry envelope length: got {len} bytes, required {required}")]
    InvalidGpkgGeometryEnvelope { len: usize, required: usize },
    /// A layer with the same name already exists.
    #[error("layer already exists: {layer_name}")]
    LayerAlreadyExists { layer_name: String },
    /// Referenced `srs_id` does not exist in `gpkg_spatial_ref_sys`.
    #[error("srs_id {srs_id} not found in gpkg_spatial_ref_sys")]
    MissingSpatialRefSysId { srs_id: i32 },
    /// Layer schema has multiple primary key columns, which is unsupported.
    #[error("composite primary keys are not supported yet for layer: {layer_name}")]
    CompositePrimaryKeyUnsupported { layer_name: String },
    /// Layer schema has no primary key column.
    #[error("no primary key column found for layer: {layer_name}")]
    MissingPrimaryKeyColumn { layer_name: String },
    /// A column name that the layer does not have.
    #[error("layer {layer_name} has no column named {column}")]
    UnknownColumn { layer_name: String, column: String },
    /// A feature row has a `NULL` geometry value.
    #[error("feature has null geometry value")]
    NullGeometryValue,
    /// `Gpkg::new` refuses to overwrite an existing file.
    #[error("GeoPackage file already exists: {}", .path.display())]
    FileExists { path: PathBuf },
    /// `Gpkg::open` refuses to create a file implicitly.
    #[error("GeoPackage file does not exist: {}", .path.display())]
    FileNotFound { path: PathBuf },
    /// A query was issued against an index backend that was never created for the table.
    #[error("{extension_name} extension not found for table {table_name} ({column_name})")]
    ExtensionNotFound {
        extension_name: &'static str,
        table_name: String,
        column_name: String,
    },
    /// Only one of the extension record and the backing index structure exists.
    #[error(
        "inconsistent {extension_name} index for table {table_name} (extension record: {has_extension}, index structure: {has_structure})"
    )]
    InconsistentIndex {
        extension_name: &'static str,
        table_name: String,
        has_extension: bool,
        has_structure: bool,
    },
    /// A projection could not be resolved or a coordinate transform failed.
    #[error("projection error: {0}")]
    Projection(String),
    #[error("operation not allowed on read-only connection")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, GpkgError>;
