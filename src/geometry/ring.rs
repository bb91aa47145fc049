// SPDX-License-Identifier: MIT
//! Closed rings and the planar predicates used to rebuild polygon topology

use serde::{Deserialize, Serialize};

use super::{BoundingBox, Point};
use crate::error::{Result, ShapefileError};

/// Minimum number of points in a closed ring (three corners plus closure)
pub const MIN_RING_POINTS: usize = 4;

/// A closed sequence of points
///
/// The last point always equals the first: an open sequence is closed on
/// construction by repeating its first point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct LinearRing {
    points: Vec<Point>,
}

impl LinearRing {
    /// Build a ring, closing it if necessary
    ///
    /// Fails with a format error when fewer than four points remain after
    /// closing.
    pub fn new(mut points: Vec<Point>) -> Result<Self> {
        let open = match (points.first(), points.last()) {
            (Some(first), Some(last)) => first != last,
            _ => false,
        };
        if open {
            points.push(points[0]);
        }
        if points.len() < MIN_RING_POINTS {
            return Err(ShapefileError::Format(format!(
                "ring needs at least {} points, got {}",
                MIN_RING_POINTS,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    /// Points of the ring, closure point included
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_3d(&self) -> bool {
        self.points.iter().any(Point::is_3d)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::from_point(&self.points[0]);
        for p in &self.points[1..] {
            bbox.include_point(p);
        }
        bbox
    }

    /// Shoelace area; negative for clockwise vertex order
    pub fn signed_area(&self) -> f64 {
        let mut double_area = 0.0;
        for pair in self.points.windows(2) {
            double_area += pair[0].lon * pair[1].lat;
            double_area -= pair[0].lat * pair[1].lon;
        }
        double_area / 2.0
    }

    /// Clockwise rings are outer boundaries, counter-clockwise rings are holes
    pub fn is_clockwise(&self) -> bool {
        self.signed_area() < 0.0
    }

    /// The same ring with its vertex order reversed
    pub fn reversed(&self) -> Self {
        let mut points = self.points.clone();
        points.reverse();
        Self { points }
    }

    /// Even-odd point-in-ring test
    pub fn contains_point(&self, p: &Point) -> bool {
        let (x, y) = (p.lon, p.lat);
        let mut inside = false;
        for pair in self.points.windows(2) {
            let (xi, yi) = (pair[0].lon, pair[0].lat);
            let (xj, yj) = (pair[1].lon, pair[1].lat);
            let straddles = (yi <= y && y < yj) || (yj <= y && y < yi);
            if straddles && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
        }
        inside
    }

    /// Whether any segment of this ring crosses or touches a segment of `other`
    pub fn overlaps(&self, other: &LinearRing) -> bool {
        for a in self.points.windows(2) {
            for b in other.points.windows(2) {
                if segments_intersect(&a[0], &a[1], &b[0], &b[1]) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether `other` lies entirely inside this ring
    ///
    /// Without crossing segments the rings are either nested or disjoint, so
    /// testing one vertex settles it.
    pub fn contains_ring(&self, other: &LinearRing) -> bool {
        !self.overlaps(other) && self.contains_point(&other.points[0])
    }
}

impl TryFrom<Vec<Point>> for LinearRing {
    type Error = ShapefileError;

    fn try_from(points: Vec<Point>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<LinearRing> for Vec<Point> {
    fn from(ring: LinearRing) -> Self {
        ring.points
    }
}

/// Closed-segment intersection test, collinear overlaps included
fn segments_intersect(p1: &Point, p2: &Point, p3: &Point, p4: &Point) -> bool {
    // Translate so p1 is the origin
    let (ax, ay) = (p2.lon - p1.lon, p2.lat - p1.lat);
    let (bx, by) = (p3.lon - p1.lon, p3.lat - p1.lat);
    let (cx, cy) = (p4.lon - p1.lon, p4.lat - p1.lat);

    let a_cross_b = ax * by - bx * ay;
    let a_cross_c = ax * cy - cx * ay;

    if a_cross_b == 0.0 && a_cross_c == 0.0 {
        // Collinear: compare projections on the dominant axis
        if ax != 0.0 {
            return (cx * bx <= 0.0)
                || ((bx * ax >= 0.0)
                    && if ax > 0.0 {
                        bx <= ax || cx <= ax
                    } else {
                        bx >= ax || cx >= ax
                    });
        }
        if ay != 0.0 {
            return (cy * by <= 0.0)
                || ((by * ay >= 0.0)
                    && if ay > 0.0 {
                        by <= ay || cy <= ay
                    } else {
                        by >= ay || cy >= ay
                    });
        }
        return false;
    }

    let b_cross_c = bx * cy - cx * by;
    (a_cross_b * a_cross_c <= 0.0) && (b_cross_c * (a_cross_b + b_cross_c - a_cross_c) <= 0.0)
}
