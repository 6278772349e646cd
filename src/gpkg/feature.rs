use crate::envelope::Envelope;
use crate::error::{GpkgError, Result};
use crate::types::Value;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use wkb::reader::Wkb;

use super::geometry::{gpkg_geometry_envelope, gpkg_geometry_to_wkb};

/// A single feature with geometry bytes and owned properties.
#[derive(Clone, Debug)]
pub struct GpkgFeature {
    pub(crate) id: i64,
    pub(crate) geometry: Option<Vec<u8>>,
    pub(crate) properties: Vec<Value>,
    pub(crate) property_index_by_name: Arc<HashMap<String, usize>>,
    pub(crate) envelope: OnceCell<Option<Envelope>>,
}

impl GpkgFeature {
    pub(crate) fn new(
        id: i64,
        geometry: Option<Vec<u8>>,
        properties: Vec<Value>,
        property_index_by_name: Arc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            id,
            geometry,
            properties,
            property_index_by_name,
            envelope: OnceCell::new(),
        }
    }

    /// Return the primary key value.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Decode the geometry column into WKB.
    pub fn geometry(&self) -> Result<Wkb<'_>> {
        let bytes = self
            .geometry
            .as_ref()
            .ok_or(GpkgError::NullGeometryValue)?;
        gpkg_geometry_to_wkb(bytes)
    }

    /// The raw GeoPackage geometry blob, header included.
    pub fn geometry_blob(&self) -> Option<&[u8]> {
        self.geometry.as_deref()
    }

    /// Read a property by column name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        let idx = self.property_index_by_name.get(name)?;
        self.properties.get(*idx)
    }

    /// Property values in the layer's column order.
    pub fn properties(&self) -> &[Value] {
        &self.properties
    }

    /// Envelope of the geometry, or `None` when it is `NULL` or empty.
    ///
    /// Computed on first use and cached on the feature.
    pub fn envelope(&self) -> Result<Option<Envelope>> {
        if let Some(envelope) = self.envelope.get() {
            return Ok(*envelope);
        }
        let envelope = match &self.geometry {
            Some(bytes) => gpkg_geometry_envelope(bytes)?,
            None => None,
        };
        let _ = self.envelope.set(envelope);
        Ok(envelope)
    }
}

/// Owned iterator over features.
pub struct GpkgFeatureIterator {
    pub(super) features: std::vec::IntoIter<GpkgFeature>,
}

impl Iterator for GpkgFeatureIterator {
    type Item = GpkgFeature;

    fn next(&mut self) -> Option<Self::Item> {
        self.features.next()
    }
}
