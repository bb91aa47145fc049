// SPDX-License-Identifier: MIT
//! In-memory geometry model
//!
//! Every variant carries plain WGS 84 degrees. Dimensionality is a property
//! of the points: a geometry is 3D as soon as one of its points carries an
//! elevation.

mod assemble;
mod ring;

pub use assemble::assemble_polygons;
pub use ring::{LinearRing, MIN_RING_POINTS};

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single position in decimal degrees, elevation in meters
///
/// Values are passed through unclamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
    pub elevation: Option<f64>,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon,
            lat,
            elevation: None,
        }
    }

    pub fn with_elevation(lon: f64, lat: f64, elevation: f64) -> Self {
        Self {
            lon,
            lat,
            elevation: Some(elevation),
        }
    }

    pub fn is_3d(&self) -> bool {
        self.elevation.is_some()
    }

    /// Elevation, with 2D points sitting at zero
    pub fn z(&self) -> f64 {
        self.elevation.unwrap_or(0.0)
    }
}

/// Axis-aligned extent, optionally with an elevation range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub z_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn from_point(p: &Point) -> Self {
        Self {
            min_lon: p.lon,
            min_lat: p.lat,
            max_lon: p.lon,
            max_lat: p.lat,
            z_range: p.elevation.map(|z| (z, z)),
        }
    }

    pub fn is_3d(&self) -> bool {
        self.z_range.is_some()
    }

    pub fn include_point(&mut self, p: &Point) {
        self.min_lon = self.min_lon.min(p.lon);
        self.min_lat = self.min_lat.min(p.lat);
        self.max_lon = self.max_lon.max(p.lon);
        self.max_lat = self.max_lat.max(p.lat);
        if let Some(z) = p.elevation {
            self.include_z(z, z);
        }
    }

    fn include_z(&mut self, lo: f64, hi: f64) {
        self.z_range = Some(match self.z_range {
            Some((min, max)) => (min.min(lo), max.max(hi)),
            None => (lo, hi),
        });
    }

    /// Grow this box to cover `other`
    pub fn union(&mut self, other: &BoundingBox) {
        self.min_lon = self.min_lon.min(other.min_lon);
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lon = self.max_lon.max(other.max_lon);
        self.max_lat = self.max_lat.max(other.max_lat);
        if let Some((lo, hi)) = other.z_range {
            self.include_z(lo, hi);
        }
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.min_lon
            && self.min_lat <= other.min_lat
            && self.max_lon >= other.max_lon
            && self.max_lat >= other.max_lat
    }

    /// X/Y extent as `(west, south, east, north)` adjusted for ESRI tools
    ///
    /// An east edge of exactly -180 becomes +180, and a box whose east edge
    /// lies west of its west edge (wrapping the antimeridian) is widened to
    /// the full -180..180 span.
    pub fn esri_extent(&self) -> (f64, f64, f64, f64) {
        let mut west = self.min_lon;
        let mut east = self.max_lon;
        if east == -180.0 {
            east = 180.0;
        } else if east < west {
            west = -180.0;
            east = 180.0;
        }
        (west, self.min_lat, east, self.max_lat)
    }
}

/// An open sequence of points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub points: Vec<Point>,
}

impl Line {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }
}

/// An outer boundary with zero or more holes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub outer: LinearRing,
    pub holes: Vec<LinearRing>,
}

impl Polygon {
    pub fn new(outer: LinearRing, holes: Vec<LinearRing>) -> Self {
        Self { outer, holes }
    }

    /// Outer ring followed by the holes
    pub fn rings(&self) -> impl Iterator<Item = &LinearRing> {
        std::iter::once(&self.outer).chain(self.holes.iter())
    }
}

/// Tagged geometry value
///
/// `Bag` is a heterogeneous collection; it can be classified and spilled but
/// never written to a shapefile directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point),
    MultiPoint(Vec<Point>),
    Line(Line),
    MultiLine(Vec<Line>),
    LinearRing(LinearRing),
    MultiLinearRings(Vec<LinearRing>),
    Polygon(Polygon),
    MultiPolygons(Vec<Polygon>),
    Bag(Vec<Geometry>),
}

/// Geometry variant without its payload, used for grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryClass {
    Point,
    MultiPoint,
    Line,
    MultiLine,
    LinearRing,
    MultiLinearRings,
    Polygon,
    MultiPolygons,
    Bag,
}

impl GeometryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryClass::Point => "Point",
            GeometryClass::MultiPoint => "MultiPoint",
            GeometryClass::Line => "Line",
            GeometryClass::MultiLine => "MultiLine",
            GeometryClass::LinearRing => "LinearRing",
            GeometryClass::MultiLinearRings => "MultiLinearRings",
            GeometryClass::Polygon => "Polygon",
            GeometryClass::MultiPolygons => "MultiPolygons",
            GeometryClass::Bag => "GeometryBag",
        }
    }
}

impl fmt::Display for GeometryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Geometry {
    pub fn class(&self) -> GeometryClass {
        match self {
            Geometry::Point(_) => GeometryClass::Point,
            Geometry::MultiPoint(_) => GeometryClass::MultiPoint,
            Geometry::Line(_) => GeometryClass::Line,
            Geometry::MultiLine(_) => GeometryClass::MultiLine,
            Geometry::LinearRing(_) => GeometryClass::LinearRing,
            Geometry::MultiLinearRings(_) => GeometryClass::MultiLinearRings,
            Geometry::Polygon(_) => GeometryClass::Polygon,
            Geometry::MultiPolygons(_) => GeometryClass::MultiPolygons,
            Geometry::Bag(_) => GeometryClass::Bag,
        }
    }

    /// Call `f` for every point, in storage order
    pub fn for_each_point<F: FnMut(&Point)>(&self, f: &mut F) {
        match self {
            Geometry::Point(p) => f(p),
            Geometry::MultiPoint(points) => points.iter().for_each(f),
            Geometry::Line(line) => line.points.iter().for_each(f),
            Geometry::MultiLine(lines) => {
                lines.iter().flat_map(|l| l.points.iter()).for_each(f)
            }
            Geometry::LinearRing(ring) => ring.points().iter().for_each(f),
            Geometry::MultiLinearRings(rings) => {
                rings.iter().flat_map(|r| r.points().iter()).for_each(f)
            }
            Geometry::Polygon(poly) => poly.rings().flat_map(|r| r.points().iter()).for_each(f),
            Geometry::MultiPolygons(polys) => polys
                .iter()
                .flat_map(|p| p.rings())
                .flat_map(|r| r.points().iter())
                .for_each(f),
            Geometry::Bag(members) => {
                for member in members {
                    member.for_each_point(f);
                }
            }
        }
    }

    /// True when any point carries an elevation
    pub fn is_3d(&self) -> bool {
        let mut found = false;
        self.for_each_point(&mut |p: &Point| found |= p.is_3d());
        found
    }

    /// Extent of all points, `None` for an empty geometry
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut bbox: Option<BoundingBox> = None;
        self.for_each_point(&mut |p: &Point| match bbox.as_mut() {
            Some(b) => b.include_point(p),
            None => bbox = Some(BoundingBox::from_point(p)),
        });
        bbox
    }

    pub fn num_points(&self) -> usize {
        let mut count = 0;
        self.for_each_point(&mut |_: &Point| count += 1);
        count
    }

    /// Point runs in record order: one per line or ring
    ///
    /// Point variants yield a single run holding every point.
    pub fn parts(&self) -> Vec<&[Point]> {
        match self {
            Geometry::Point(p) => vec![std::slice::from_ref(p)],
            Geometry::MultiPoint(points) => vec![points.as_slice()],
            Geometry::Line(line) => vec![line.points.as_slice()],
            Geometry::MultiLine(lines) => lines.iter().map(|l| l.points.as_slice()).collect(),
            Geometry::LinearRing(ring) => vec![ring.points()],
            Geometry::MultiLinearRings(rings) => rings.iter().map(|r| r.points()).collect(),
            Geometry::Polygon(poly) => poly.rings().map(|r| r.points()).collect(),
            Geometry::MultiPolygons(polys) => polys
                .iter()
                .flat_map(|p| p.rings())
                .map(|r| r.points())
                .collect(),
            Geometry::Bag(members) => members.iter().flat_map(|m| m.parts()).collect(),
        }
    }

    pub fn num_parts(&self) -> usize {
        self.parts().len()
    }
}

impl From<Point> for Geometry {
    fn from(p: Point) -> Self {
        Geometry::Point(p)
    }
}

impl From<Line> for Geometry {
    fn from(line: Line) -> Self {
        Geometry::Line(line)
    }
}

impl From<LinearRing> for Geometry {
    fn from(ring: LinearRing) -> Self {
        Geometry::LinearRing(ring)
    }
}

impl From<Polygon> for Geometry {
    fn from(poly: Polygon) -> Self {
        Geometry::Polygon(poly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> LinearRing {
        LinearRing::new(vec![
            Point::new(min, min),
            Point::new(min, max),
            Point::new(max, max),
            Point::new(max, min),
        ])
        .unwrap()
    }

    #[test]
    fn test_bbox_union() {
        let mut a = BoundingBox::from_point(&Point::new(1.0, 2.0));
        a.include_point(&Point::new(-3.0, 5.0));
        let b = BoundingBox::from_point(&Point::with_elevation(10.0, -1.0, 7.5));
        a.union(&b);

        assert_eq!(a.min_lon, -3.0);
        assert_eq!(a.max_lon, 10.0);
        assert_eq!(a.min_lat, -1.0);
        assert_eq!(a.max_lat, 5.0);
        assert_eq!(a.z_range, Some((7.5, 7.5)));
        assert!(a.contains(&b));
    }

    #[test]
    fn test_esri_extent_east_at_minus_180() {
        let bbox = BoundingBox {
            min_lon: 170.0,
            min_lat: -10.0,
            max_lon: -180.0,
            max_lat: 10.0,
            z_range: None,
        };
        assert_eq!(bbox.esri_extent(), (170.0, -10.0, 180.0, 10.0));
    }

    #[test]
    fn test_esri_extent_wrapped_box_is_widened() {
        let bbox = BoundingBox {
            min_lon: 170.0,
            min_lat: -10.0,
            max_lon: -170.0,
            max_lat: 10.0,
            z_range: None,
        };
        assert_eq!(bbox.esri_extent(), (-180.0, -10.0, 180.0, 10.0));
    }

    #[test]
    fn test_polygon_parts_and_counts() {
        let poly = Polygon::new(square(0.0, 10.0), vec![square(2.0, 4.0).reversed()]);
        let geom = Geometry::Polygon(poly);
        assert_eq!(geom.class(), GeometryClass::Polygon);
        assert_eq!(geom.num_parts(), 2);
        assert_eq!(geom.num_points(), 10);
        assert!(!geom.is_3d());
    }

    #[test]
    fn test_is_3d_when_any_point_has_elevation() {
        let geom = Geometry::MultiPoint(vec![
            Point::new(0.0, 0.0),
            Point::with_elevation(1.0, 1.0, 3.0),
        ]);
        assert!(geom.is_3d());
        let bbox = geom.bounding_box().unwrap();
        assert_eq!(bbox.z_range, Some((3.0, 3.0)));
    }

    #[test]
    fn test_empty_geometry_has_no_bbox() {
        assert!(Geometry::MultiPoint(vec![]).bounding_box().is_none());
    }
}
