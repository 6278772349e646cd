//! GeoPackage data access backed by rusqlite.
//!
//! This is the row and table surface the feature index builds on: layers,
//! features, and the GeoPackage binary geometry encoding.

mod feature;
pub(crate) mod geometry;
mod gpkg;
mod layer;

pub use feature::{GpkgFeature, GpkgFeatureIterator};
pub use gpkg::Gpkg;
pub use layer::{GpkgFeatureBatchIterator, GpkgLayer};
