//! Axis-aligned extents used by the feature index.
//!
//! [`Envelope`] is what the index backends store and compare: X/Y bounds are
//! always present, while Z and M ranges only exist when the source geometry
//! carries that dimension. [`BoundingBox`] is the 2D query frame callers pass
//! to [`FeatureIndexManager`](crate::FeatureIndexManager), which may be
//! expressed in a projection other than the feature table's.

use geo_traits::{
    CoordTrait, Dimensions, GeometryCollectionTrait, GeometryTrait, LineStringTrait, LineTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait, RectTrait,
    TriangleTrait,
};

/// A closed range `[min, max]` on one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Non-strict overlap: touching ranges overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.min <= other.max && self.max >= other.min
    }

    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: Interval) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Spatial extent of a geometry, with optional Z and M ranges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub z: Option<Interval>,
    pub m: Option<Interval>,
}

impl Envelope {
    /// Create a 2D envelope. Arguments follow the GeoPackage envelope order.
    pub const fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            z: None,
            m: None,
        }
    }

    /// A degenerate envelope covering a single point.
    pub const fn from_point(x: f64, y: f64) -> Self {
        Self::new(x, x, y, y)
    }

    pub const fn with_z(mut self, min_z: f64, max_z: f64) -> Self {
        self.z = Some(Interval::new(min_z, max_z));
        self
    }

    pub const fn with_m(mut self, min_m: f64, max_m: f64) -> Self {
        self.m = Some(Interval::new(min_m, max_m));
        self
    }

    pub const fn has_z(&self) -> bool {
        self.z.is_some()
    }

    pub const fn has_m(&self) -> bool {
        self.m.is_some()
    }

    /// Whether every present range is ordered (`min <= max`).
    ///
    /// NaN bounds make an envelope invalid.
    pub fn is_valid(&self) -> bool {
        let ordered = |interval: Option<Interval>| {
            interval.is_none_or(|interval| interval.min <= interval.max)
        };
        self.min_x <= self.max_x && self.min_y <= self.max_y && ordered(self.z) && ordered(self.m)
    }

    /// Grow the X/Y bounds outwards by `tolerance`. Z and M are left as is.
    pub fn expand_by(&self, tolerance: f64) -> Self {
        Self {
            min_x: self.min_x - tolerance,
            max_x: self.max_x + tolerance,
            min_y: self.min_y - tolerance,
            max_y: self.max_y + tolerance,
            ..*self
        }
    }

    /// Grow this envelope so that it also covers `other`.
    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        merge_optional(&mut self.z, other.z);
        merge_optional(&mut self.m, other.m);
    }

    /// Non-strict rectangle overlap on X/Y.
    ///
    /// Z and M only take part when both envelopes carry the dimension, so a 2D
    /// query matches 3D entries and a 3D query matches 2D entries.
    pub fn intersects(&self, other: &Envelope) -> bool {
        let xy = self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y;
        xy && optional_overlaps(self.z, other.z) && optional_overlaps(self.m, other.m)
    }
}

fn optional_overlaps(a: Option<Interval>, b: Option<Interval>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.overlaps(&b),
        _ => true,
    }
}

fn merge_optional(target: &mut Option<Interval>, other: Option<Interval>) {
    match (target.as_mut(), other) {
        (Some(existing), Some(other)) => existing.merge(other),
        (None, Some(other)) => *target = Some(other),
        _ => {}
    }
}

/// A 2D query rectangle. Arguments follow the same order as [`Envelope::new`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub const fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// The smallest box covering all `points`, or `None` when there are none.
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |bbox, (x, y)| match bbox {
            None => Some(Self::new(x, x, y, y)),
            Some(bbox) => Some(Self::new(
                bbox.min_x.min(x),
                bbox.max_x.max(x),
                bbox.min_y.min(y),
                bbox.max_y.max(y),
            )),
        })
    }

    /// Lower-left, upper-left, upper-right, lower-right.
    pub const fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.min_x, self.max_y),
            (self.max_x, self.max_y),
            (self.max_x, self.min_y),
        ]
    }

    pub const fn to_envelope(&self) -> Envelope {
        Envelope::new(self.min_x, self.max_x, self.min_y, self.max_y)
    }
}

impl From<BoundingBox> for Envelope {
    fn from(bbox: BoundingBox) -> Self {
        bbox.to_envelope()
    }
}

impl From<Envelope> for BoundingBox {
    fn from(envelope: Envelope) -> Self {
        Self::new(
            envelope.min_x,
            envelope.max_x,
            envelope.min_y,
            envelope.max_y,
        )
    }
}

/// Compute the envelope of a decoded geometry.
///
/// Returns `None` for empty geometries. Coordinates with a non-finite X or Y
/// are skipped, since WKB has no other way to spell `POINT EMPTY`.
pub fn envelope_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Envelope> {
    let mut builder = EnvelopeBuilder::default();
    builder.add_geometry(geom);
    builder.envelope
}

#[derive(Default)]
struct EnvelopeBuilder {
    envelope: Option<Envelope>,
}

impl EnvelopeBuilder {
    fn add_geometry<G: GeometryTrait<T = f64>>(&mut self, geom: &G) {
        use geo_traits::GeometryType as GeoType;

        match geom.as_type() {
            GeoType::Point(point) => self.add_point(point),
            GeoType::LineString(line) => self.add_line_string(line),
            GeoType::Polygon(poly) => self.add_polygon(poly),
            GeoType::MultiPoint(multi) => {
                for point in multi.points() {
                    self.add_point(&point);
                }
            }
            GeoType::MultiLineString(multi) => {
                for line in multi.line_strings() {
                    self.add_line_string(&line);
                }
            }
            GeoType::MultiPolygon(multi) => {
                for poly in multi.polygons() {
                    self.add_polygon(&poly);
                }
            }
            GeoType::GeometryCollection(collection) => {
                for sub_geom in collection.geometries() {
                    self.add_geometry(&sub_geom);
                }
            }
            GeoType::Rect(rect) => {
                self.add_coord(&rect.min());
                self.add_coord(&rect.max());
            }
            GeoType::Triangle(triangle) => {
                self.add_coord(&triangle.first());
                self.add_coord(&triangle.second());
                self.add_coord(&triangle.third());
            }
            GeoType::Line(line) => {
                self.add_coord(&line.start());
                self.add_coord(&line.end());
            }
        }
    }

    fn add_point<P: PointTrait<T = f64>>(&mut self, point: &P) {
        if let Some(coord) = point.coord() {
            self.add_coord(&coord);
        }
    }

    fn add_line_string<L: LineStringTrait<T = f64>>(&mut self, line: &L) {
        for coord in line.coords() {
            self.add_coord(&coord);
        }
    }

    fn add_polygon<P: PolygonTrait<T = f64>>(&mut self, poly: &P) {
        if let Some(ring) = poly.exterior() {
            self.add_line_string(&ring);
        }
        for ring in poly.interiors() {
            self.add_line_string(&ring);
        }
    }

    fn add_coord<C: CoordTrait<T = f64>>(&mut self, coord: &C) {
        let (x, y) = coord.x_y();
        if !x.is_finite() || !y.is_finite() {
            return;
        }

        let (z, m) = match coord.dim() {
            Dimensions::Xyz => (coord.nth(2), None),
            Dimensions::Xym => (None, coord.nth(2)),
            Dimensions::Xyzm => (coord.nth(2), coord.nth(3)),
            _ => (None, None),
        };
        let z = z.filter(|value| value.is_finite());
        let m = m.filter(|value| value.is_finite());

        match self.envelope.as_mut() {
            Some(existing) => {
                existing.min_x = existing.min_x.min(x);
                existing.max_x = existing.max_x.max(x);
                existing.min_y = existing.min_y.min(y);
                existing.max_y = existing.max_y.max(y);
                include_optional(&mut existing.z, z);
                include_optional(&mut existing.m, m);
            }
            None => {
                self.envelope = Some(Envelope {
                    z: z.map(|z| Interval::new(z, z)),
                    m: m.map(|m| Interval::new(m, m)),
                    ..Envelope::from_point(x, y)
                });
            }
        }
    }
}

fn include_optional(target: &mut Option<Interval>, value: Option<f64>) {
    match (target.as_mut(), value) {
        (Some(interval), Some(value)) => interval.include(value),
        (None, Some(value)) => *target = Some(Interval::new(value, value)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundingBox, Envelope, Interval, envelope_from_geometry};
    use geo_types::{Geometry, GeometryCollection, LineString, MultiPoint, Point, Polygon};
    use std::str::FromStr;
    use wkt::Wkt;

    #[test]
    fn touching_envelopes_intersect() {
        let point = Envelope::from_point(1.0, 1.0);
        let query = Envelope::new(0.0, 1.0, 0.0, 1.0);
        assert!(point.intersects(&query));
        assert!(query.intersects(&point));

        let outside = Envelope::new(1.0 + 1e-9, 2.0, 0.0, 1.0);
        assert!(!outside.intersects(&query));
    }

    #[test]
    fn z_and_m_only_filter_when_both_sides_have_them() {
        let entry = Envelope::new(0.0, 1.0, 0.0, 1.0).with_z(10.0, 20.0);
        let flat_query = Envelope::new(0.0, 1.0, 0.0, 1.0);
        assert!(entry.intersects(&flat_query));

        let low_query = flat_query.with_z(0.0, 5.0);
        assert!(!entry.intersects(&low_query));

        let m_query = flat_query.with_z(15.0, 30.0).with_m(0.0, 1.0);
        assert!(entry.intersects(&m_query));
    }

    #[test]
    fn expand_by_only_touches_xy() {
        let envelope = Envelope::new(0.0, 1.0, 2.0, 3.0).with_m(5.0, 6.0);
        let expanded = envelope.expand_by(0.5);
        assert_eq!(expanded.min_x, -0.5);
        assert_eq!(expanded.max_x, 1.5);
        assert_eq!(expanded.min_y, 1.5);
        assert_eq!(expanded.max_y, 3.5);
        assert_eq!(expanded.m, Some(Interval::new(5.0, 6.0)));
    }

    #[test]
    fn expand_to_include_merges_optional_ranges() {
        let mut envelope = Envelope::from_point(0.0, 0.0);
        envelope.expand_to_include(&Envelope::new(-1.0, 2.0, 1.0, 3.0).with_z(4.0, 5.0));
        assert_eq!(envelope.min_x, -1.0);
        assert_eq!(envelope.max_x, 2.0);
        assert_eq!(envelope.min_y, 0.0);
        assert_eq!(envelope.max_y, 3.0);
        assert_eq!(envelope.z, Some(Interval::new(4.0, 5.0)));
        assert!(envelope.m.is_none());
    }

    #[test]
    fn invalid_when_bounds_are_reversed_or_nan() {
        assert!(Envelope::new(0.0, 1.0, 0.0, 1.0).is_valid());
        assert!(!Envelope::new(2.0, 1.0, 0.0, 1.0).is_valid());
        assert!(!Envelope::new(0.0, 1.0, 0.0, 1.0).with_z(3.0, 2.0).is_valid());
        assert!(!Envelope::new(f64::NAN, 1.0, 0.0, 1.0).is_valid());
    }

    #[test]
    fn envelope_of_polygon_and_collection() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 2.0), (0.0, 0.0)]),
            vec![],
        );
        assert_eq!(
            envelope_from_geometry(&polygon),
            Some(Envelope::new(0.0, 4.0, 0.0, 2.0))
        );

        let collection = GeometryCollection::from(vec![
            Geometry::Point(Point::new(5.0, -1.0)),
            Geometry::MultiPoint(MultiPoint::from(vec![Point::new(-2.0, 2.0)])),
        ]);
        assert_eq!(
            envelope_from_geometry(&collection),
            Some(Envelope::new(-2.0, 5.0, -1.0, 2.0))
        );
    }

    #[test]
    fn envelope_tracks_z_and_m() {
        let line = Wkt::<f64>::from_str("LINESTRING ZM (0 0 1 10, 2 3 -1 12)").expect("valid wkt");
        let envelope = envelope_from_geometry(&line).expect("non-empty");
        assert_eq!(envelope.z, Some(Interval::new(-1.0, 1.0)));
        assert_eq!(envelope.m, Some(Interval::new(10.0, 12.0)));

        let point_m = Wkt::<f64>::from_str("POINT M (1 2 7)").expect("valid wkt");
        let envelope = envelope_from_geometry(&point_m).expect("non-empty");
        assert!(envelope.z.is_none());
        assert_eq!(envelope.m, Some(Interval::new(7.0, 7.0)));
    }

    #[test]
    fn empty_geometries_have_no_envelope() {
        let line: LineString<f64> = LineString::new(Vec::new());
        assert!(envelope_from_geometry(&line).is_none());

        let nan_point = Point::new(f64::NAN, f64::NAN);
        assert!(envelope_from_geometry(&nan_point).is_none());
    }

    #[test]
    fn bounding_box_from_points() {
        let bbox = BoundingBox::from_points([(1.0, 5.0), (-2.0, 3.0), (0.0, 9.0)])
            .expect("non-empty");
        assert_eq!(bbox, BoundingBox::new(-2.0, 1.0, 3.0, 9.0));
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
        assert_eq!(Envelope::from(bbox), Envelope::new(-2.0, 1.0, 3.0, 9.0));
    }
}
