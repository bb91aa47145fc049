// SPDX-License-Identifier: MIT
//! Rebuild polygon topology from the flat ring list of a polygon record
//!
//! Shapefiles store outer boundaries and holes as one undifferentiated list
//! of parts. Orientation tells them apart: clockwise rings are boundaries,
//! counter-clockwise rings are holes.
//!
//! Every hole is checked against every boundary seen so far, so assembly is
//! quadratic in the number of rings. Record part counts keep this cheap in
//! practice. When several boundaries could contain the same hole, the first
//! boundary discovered wins.

use tracing::debug;

use super::{Geometry, LinearRing, Polygon};
use crate::error::{Result, ShapefileError};

/// A boundary collecting the holes assigned to it
struct Holder {
    outer: LinearRing,
    holes: Vec<LinearRing>,
}

impl Holder {
    fn into_polygon(self) -> Polygon {
        Polygon::new(self.outer, self.holes)
    }
}

/// Offer `ring` to each holder in discovery order; hand it back if none takes it
fn adopt(holders: &mut [Holder], ring: LinearRing) -> Option<LinearRing> {
    match holders.iter_mut().find(|h| h.outer.contains_ring(&ring)) {
        Some(holder) => {
            holder.holes.push(ring);
            None
        }
        None => Some(ring),
    }
}

/// Group rings into polygons
///
/// A hole that precedes its boundary in the record gets a second chance once
/// every boundary is known. A hole that still matches nothing is kept as a
/// polygon of its own with its vertex order reversed; this accommodates
/// writers that ignore the orientation convention.
///
/// Returns a bare [`Geometry::LinearRing`] for a single hole-less polygon, a
/// [`Geometry::Polygon`] for a single polygon with holes, and
/// [`Geometry::MultiPolygons`] otherwise. Orphaned rings come first in the
/// collection, followed by the boundaries in record order.
pub fn assemble_polygons(rings: Vec<LinearRing>) -> Result<Geometry> {
    let mut holders: Vec<Holder> = Vec::new();
    let mut unmatched: Vec<LinearRing> = Vec::new();

    for ring in rings {
        if ring.is_clockwise() {
            holders.push(Holder {
                outer: ring,
                holes: Vec::new(),
            });
        } else if let Some(orphan) = adopt(&mut holders, ring) {
            unmatched.push(orphan);
        }
    }

    let mut polygons: Vec<Polygon> = Vec::new();
    for ring in unmatched {
        if let Some(orphan) = adopt(&mut holders, ring) {
            debug!(points = orphan.len(), "Promoting unmatched hole to polygon");
            polygons.push(Polygon::new(orphan.reversed(), Vec::new()));
        }
    }
    polygons.extend(holders.into_iter().map(Holder::into_polygon));

    match polygons.len() {
        0 => Err(ShapefileError::Format(
            "polygon record contains no rings".to_string(),
        )),
        1 => {
            let polygon = polygons.remove(0);
            if polygon.holes.is_empty() {
                Ok(Geometry::LinearRing(polygon.outer))
            } else {
                Ok(Geometry::Polygon(polygon))
            }
        }
        _ => Ok(Geometry::MultiPolygons(polygons)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn cw_square(min: f64, max: f64) -> LinearRing {
        LinearRing::new(vec![
            Point::new(min, min),
            Point::new(min, max),
            Point::new(max, max),
            Point::new(max, min),
        ])
        .unwrap()
    }

    fn ccw_square(min: f64, max: f64) -> LinearRing {
        cw_square(min, max).reversed()
    }

    #[test]
    fn test_single_boundary_is_bare_ring() {
        let geom = assemble_polygons(vec![cw_square(0.0, 10.0)]).unwrap();
        assert!(matches!(geom, Geometry::LinearRing(_)));
    }

    #[test]
    fn test_boundary_with_hole() {
        let geom = assemble_polygons(vec![cw_square(0.0, 10.0), ccw_square(2.0, 4.0)]).unwrap();
        match geom {
            Geometry::Polygon(poly) => {
                assert_eq!(poly.outer, cw_square(0.0, 10.0));
                assert_eq!(poly.holes, vec![ccw_square(2.0, 4.0)]);
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_hole_before_boundary_is_matched_on_second_pass() {
        let geom = assemble_polygons(vec![ccw_square(2.0, 4.0), cw_square(0.0, 10.0)]).unwrap();
        match geom {
            Geometry::Polygon(poly) => assert_eq!(poly.holes.len(), 1),
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_first_boundary_wins() {
        // Both boundaries contain the hole; the earlier one takes it
        let geom = assemble_polygons(vec![
            cw_square(0.0, 10.0),
            cw_square(1.0, 9.0),
            ccw_square(2.0, 4.0),
        ])
        .unwrap();
        match geom {
            Geometry::MultiPolygons(polys) => {
                assert_eq!(polys.len(), 2);
                assert_eq!(polys[0].holes.len(), 1);
                assert!(polys[1].holes.is_empty());
            }
            other => panic!("expected multipolygons, got {other:?}"),
        }
    }

    #[test]
    fn test_orphan_hole_becomes_reversed_polygon() {
        let geom = assemble_polygons(vec![cw_square(0.0, 1.0), ccw_square(5.0, 6.0)]).unwrap();
        match geom {
            Geometry::MultiPolygons(polys) => {
                assert_eq!(polys.len(), 2);
                // Orphans lead the collection
                assert_eq!(polys[0].outer, ccw_square(5.0, 6.0).reversed());
                assert!(polys[0].outer.is_clockwise());
                assert_eq!(polys[1].outer, cw_square(0.0, 1.0));
            }
            other => panic!("expected multipolygons, got {other:?}"),
        }
    }

    #[test]
    fn test_lone_hole_is_bare_ring() {
        let geom = assemble_polygons(vec![ccw_square(0.0, 1.0)]).unwrap();
        match geom {
            Geometry::LinearRing(ring) => assert!(ring.is_clockwise()),
            other => panic!("expected ring, got {other:?}"),
        }
    }

    #[test]
    fn test_no_rings_is_format_error() {
        assert!(matches!(
            assemble_polygons(Vec::new()),
            Err(ShapefileError::Format(_))
        ));
    }
}
