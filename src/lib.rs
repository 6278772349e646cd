//! Spatial feature indexing for GeoPackage, built on top of rusqlite.
//!
//! ## Overview
//!
//! - `Gpkg` is an open GeoPackage; `GpkgLayer` one of its feature tables and
//!   `GpkgFeature` one row of it.
//! - `FeatureIndexManager` answers bounding-box queries on a layer. It uses
//!   the RTree index when present, then the Geometry Index, and scans the
//!   layer otherwise.
//! - `RTreeIndex`, `GeometryIndex` and `ManualFeatureQuery` are the three
//!   backends, usable on their own.
//! - `FeatureCache` and `FeatureCacheTables` keep recently read rows in
//!   per-table LRU caches.
//!
//! Both persistent indexes follow the GeoPackage extension mechanism: an
//! index counts as present only when its `gpkg_extensions` row and its
//! backing tables both exist.
//!
//! The RTree index is maintained by SQL triggers, so it never goes stale.
//! The Geometry Index is refreshed by `index` passes and by
//! `index_feature_row` after a write; between those it may lag behind the
//! table.
//!
//! ## Short usage
//!
//! ```no_run
//! use geo_types::Point;
//! use rusqlite_gpkg_index::{
//!     BoundingBox, ColumnSpec, ColumnType, FeatureIndexManager, Gpkg, Projection, Value,
//! };
//! use wkb::reader::{Dimension, GeometryType};
//!
//! let gpkg = Gpkg::open("data.gpkg")?;
//! let layer = gpkg.create_layer(
//!     "points",
//!     "geom",
//!     GeometryType::Point,
//!     Dimension::Xy,
//!     4326,
//!     &[ColumnSpec::new("name", ColumnType::Varchar)],
//! )?;
//! layer.insert(Point::new(139.7, 35.7), [Value::Text("tokyo".to_string())])?;
//!
//! let manager = FeatureIndexManager::from_layer(layer)?;
//! manager.index(false)?;
//!
//! // Query in Web Mercator; the box is transformed into the layer's EPSG:4326.
//! let bbox = BoundingBox::new(15_000_000.0, 16_000_000.0, 4_000_000.0, 5_000_000.0);
//! for feature in manager.query(&bbox, Some(&Projection::epsg(3857)))? {
//!     let feature = feature?;
//!     println!("{} {:?}", feature.id(), feature.property("name"));
//! }
//! # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
//! ```
//!
//! ## Geometry Index passes
//!
//! Long passes report progress and can be cancelled between chunks:
//!
//! ```no_run
//! use rusqlite_gpkg_index::{CountingProgress, GeometryIndex, Gpkg};
//!
//! let gpkg = Gpkg::open("data.gpkg")?;
//! let layer = gpkg.get_layer("points")?;
//! let index = GeometryIndex::new(&layer).with_chunk_limit(500);
//!
//! let mut progress = CountingProgress::new().cancel_after(10_000);
//! let indexed = index.index_with_progress(true, &mut progress)?;
//! println!("{indexed} of {} rows indexed", progress.max);
//! # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
//! ```
//!
//! `Value` is the crate's owned dynamic value used for feature properties. It
//! mirrors SQLite's dynamic typing (null, integer, real, text, blob).
mod cache;
mod conversions;
mod envelope;
mod error;
mod extensions;
mod gpkg;
mod index;
mod ogc_sql;
mod progress;
mod projection;
mod sql_functions;
mod types;

pub use cache::{DEFAULT_CACHE_MAX_SIZE, FeatureCache, FeatureCacheTables};
pub use envelope::{BoundingBox, Envelope, Interval, envelope_from_geometry};
pub use error::{GpkgError, Result};
pub use gpkg::{Gpkg, GpkgFeature, GpkgFeatureBatchIterator, GpkgFeatureIterator, GpkgLayer};
pub use index::{
    CachedFeatureIndexResults, DEFAULT_CHUNK_LIMIT, DEFAULT_TOLERANCE, FeatureIndexManager,
    FeatureIndexResults, FeatureIndexType, GeometryIndex, GeometryIndexEntry, IndexState,
    ManualFeatureQuery, RTreeEntry, RTreeIndex,
};
pub use progress::{CountingProgress, Progress};
pub use projection::{Proj4Transform, Projection, ProjectionTransform, WEB_MERCATOR_MAX_LATITUDE};
pub use sql_functions::register_spatial_functions;
pub use types::{ColumnSpec, ColumnType, Value};

// Re-export types used in public fields to keep the public API stable.
pub use wkb::reader::{Dimension, GeometryType};
