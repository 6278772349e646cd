//! Projections and the bounding box transform used for cross-projection queries.

use crate::envelope::BoundingBox;
use crate::error::{GpkgError, Result};
use std::collections::HashMap;
use std::fmt;

const EPSG: &str = "EPSG";

/// Latitude limit of the Web Mercator projection, in degrees.
pub const WEB_MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// A spatial reference system identified by authority and code, e.g. `EPSG:4326`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Projection {
    pub authority: String,
    pub code: i64,
}

impl Projection {
    /// The authority is stored upper-cased so `epsg:4326` equals `EPSG:4326`.
    pub fn new(authority: impl Into<String>, code: i64) -> Self {
        Self {
            authority: authority.into().to_ascii_uppercase(),
            code,
        }
    }

    pub fn epsg(code: i64) -> Self {
        Self::new(EPSG, code)
    }

    fn is_epsg(&self, code: i64) -> bool {
        self.authority == EPSG && self.code == code
    }

    fn is_geographic(&self) -> bool {
        self.is_epsg(4326) || self.is_epsg(4258)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

/// Coordinate transform between projections.
///
/// Only the query frame is ever transformed; stored geometries stay in the
/// table's projection.
pub trait ProjectionTransform {
    /// Transform `(x, y)` pairs in place from `from` to `to`. Geographic
    /// coordinates are longitude/latitude in degrees.
    fn transform_coords(
        &self,
        from: &Projection,
        to: &Projection,
        coords: &mut [(f64, f64)],
    ) -> Result<()>;

    /// Transform a bounding box by projecting its four corners and taking
    /// their extent.
    ///
    /// Geographic boxes headed for Web Mercator are clamped to the latitudes
    /// that projection can represent.
    fn transform_bounding_box(
        &self,
        bbox: &BoundingBox,
        from: &Projection,
        to: &Projection,
    ) -> Result<BoundingBox> {
        if from == to {
            return Ok(*bbox);
        }

        let mut bbox = *bbox;
        if to.is_epsg(3857) && from.is_geographic() {
            bbox.min_y = bbox.min_y.max(-WEB_MERCATOR_MAX_LATITUDE);
            bbox.max_y = bbox.max_y.min(WEB_MERCATOR_MAX_LATITUDE);
        }

        let mut corners = bbox.corners();
        self.transform_coords(from, to, &mut corners)?;
        if corners.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(GpkgError::Projection(format!(
                "bounding box could not be transformed from {from} to {to}"
            )));
        }
        BoundingBox::from_points(corners).ok_or_else(|| {
            GpkgError::Projection(format!("empty bounding box transformed from {from} to {to}"))
        })
    }
}

/// [`ProjectionTransform`] backed by `proj4rs`.
///
/// EPSG:4326, EPSG:3857 and EPSG:4258 are built in; others can be added with
/// their proj4 definition.
#[derive(Clone, Debug)]
pub struct Proj4Transform {
    definitions: HashMap<Projection, String>,
}

impl Default for Proj4Transform {
    fn default() -> Self {
        let definitions = [
            (4326, "+proj=longlat +datum=WGS84 +no_defs"),
            (
                3857,
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs",
            ),
            (4258, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
        ]
        .into_iter()
        .map(|(code, definition)| (Projection::epsg(code), definition.to_string()))
        .collect();
        Self { definitions }
    }
}

impl Proj4Transform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the proj4 definition of a projection.
    pub fn with_definition(mut self, projection: Projection, definition: impl Into<String>) -> Self {
        self.definitions.insert(projection, definition.into());
        self
    }

    fn definition(&self, projection: &Projection) -> Result<&str> {
        self.definitions
            .get(projection)
            .map(String::as_str)
            .ok_or_else(|| GpkgError::Projection(format!("unsupported projection {projection}")))
    }

    fn proj(definition: &str) -> Result<proj4rs::proj::Proj> {
        proj4rs::proj::Proj::from_proj_string(definition).map_err(|err| {
            GpkgError::Projection(format!("invalid projection '{definition}': {err}"))
        })
    }
}

fn is_longlat(definition: &str) -> bool {
    definition.contains("+proj=longlat") || definition.contains("+proj=latlong")
}

impl ProjectionTransform for Proj4Transform {
    fn transform_coords(
        &self,
        from: &Projection,
        to: &Projection,
        coords: &mut [(f64, f64)],
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }

        let from_definition = self.definition(from)?;
        let to_definition = self.definition(to)?;
        let from_proj = Self::proj(from_definition)?;
        let to_proj = Self::proj(to_definition)?;
        let from_degrees = is_longlat(from_definition);
        let to_degrees = is_longlat(to_definition);

        for coord in coords.iter_mut() {
            let (x, y) = if from_degrees {
                (coord.0.to_radians(), coord.1.to_radians())
            } else {
                *coord
            };
            let mut point = (x, y, 0.0);
            proj4rs::transform::transform(&from_proj, &to_proj, &mut point).map_err(|err| {
                GpkgError::Projection(format!("failed to transform {from} to {to}: {err}"))
            })?;
            *coord = if to_degrees {
                (point.0.to_degrees(), point.1.to_degrees())
            } else {
                (point.0, point.1)
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Proj4Transform, Projection, ProjectionTransform, WEB_MERCATOR_MAX_LATITUDE};
    use crate::Result;
    use crate::envelope::BoundingBox;
    use crate::error::GpkgError;

    // Half the equatorial circumference of the Web Mercator sphere.
    const MERCATOR_HALF_WORLD: f64 = 20_037_508.342_789_244;

    #[test]
    fn authority_is_case_insensitive() {
        assert_eq!(Projection::new("epsg", 4326), Projection::epsg(4326));
        assert_eq!(Projection::epsg(3857).to_string(), "EPSG:3857");
    }

    #[test]
    fn transforms_geographic_box_to_web_mercator() -> Result<()> {
        let transform = Proj4Transform::new();
        let bbox = BoundingBox::new(-90.0, 90.0, 0.0, 10.0);
        let mercator =
            transform.transform_bounding_box(&bbox, &Projection::epsg(4326), &Projection::epsg(3857))?;

        assert!((mercator.min_x + MERCATOR_HALF_WORLD / 2.0).abs() < 1e-3);
        assert!((mercator.max_x - MERCATOR_HALF_WORLD / 2.0).abs() < 1e-3);
        assert!(mercator.min_y.abs() < 1e-6);
        assert!((mercator.max_y - 1_118_889.974_857_959).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn web_mercator_roundtrip() -> Result<()> {
        let transform = Proj4Transform::new();
        let bbox = BoundingBox::new(10.0, 11.0, 45.0, 46.0);
        let mercator =
            transform.transform_bounding_box(&bbox, &Projection::epsg(4326), &Projection::epsg(3857))?;
        let back = transform.transform_bounding_box(
            &mercator,
            &Projection::epsg(3857),
            &Projection::epsg(4326),
        )?;

        assert!((back.min_x - bbox.min_x).abs() < 1e-9);
        assert!((back.max_x - bbox.max_x).abs() < 1e-9);
        assert!((back.min_y - bbox.min_y).abs() < 1e-9);
        assert!((back.max_y - bbox.max_y).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn polar_latitudes_are_clamped_for_web_mercator() -> Result<()> {
        let transform = Proj4Transform::new();
        let bbox = BoundingBox::new(-10.0, 10.0, -90.0, 90.0);
        let mercator =
            transform.transform_bounding_box(&bbox, &Projection::epsg(4326), &Projection::epsg(3857))?;
        assert!((mercator.max_y - MERCATOR_HALF_WORLD).abs() < 1e-3);
        assert!((mercator.min_y + MERCATOR_HALF_WORLD).abs() < 1e-3);

        let mut corner = [(0.0, WEB_MERCATOR_MAX_LATITUDE)];
        transform.transform_coords(&Projection::epsg(4326), &Projection::epsg(3857), &mut corner)?;
        assert!((corner[0].1 - MERCATOR_HALF_WORLD).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn same_projection_is_identity() -> Result<()> {
        let transform = Proj4Transform::new();
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let projection = Projection::epsg(32633);
        assert_eq!(
            transform.transform_bounding_box(&bbox, &projection, &projection)?,
            bbox
        );
        Ok(())
    }

    #[test]
    fn unknown_projection_is_an_error() {
        let transform = Proj4Transform::new();
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let result =
            transform.transform_bounding_box(&bbox, &Projection::epsg(4326), &Projection::epsg(32633));
        assert!(matches!(result, Err(GpkgError::Projection(_))));
    }

    #[test]
    fn custom_definitions_can_be_added() -> Result<()> {
        let utm33 = Projection::epsg(32633);
        let transform = Proj4Transform::new()
            .with_definition(utm33.clone(), "+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs");
        let mut coords = [(15.0, 0.0)];
        transform.transform_coords(&Projection::epsg(4326), &utm33, &mut coords)?;
        // The central meridian of zone 33 maps to the false easting.
        assert!((coords[0].0 - 500_000.0).abs() < 1e-3);
        assert!(coords[0].1.abs() < 1e-3);
        Ok(())
    }
}
