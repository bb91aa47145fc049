// SPDX-License-Identifier: MIT
//! Shapefile binary layout
//!
//! A `.shp` file is a 100-byte header followed by variable-length records.
//! The `.shx` index shares the header layout and holds one fixed-size entry
//! per record. Lengths and offsets are counted in 16-bit words.
//!
//! ```text
//! Header (100 bytes)
//!   0  i32 BE  file code (9994)
//!   4  5x i32  unused
//!  24  i32 BE  file length in words
//!  28  i32 LE  version (1000)
//!  32  i32 LE  shape type
//!  36  8x f64 LE  Xmin Ymin Xmax Ymax Zmin Zmax Mmin Mmax
//!
//! Record
//!   0  i32 BE  record number (1-based)
//!   4  i32 BE  content length in words
//!   8  i32 LE  shape type, then the shape body
//! ```

use std::fmt;

use crate::codec::{ByteCursor, ByteOrder, ByteSink};
use crate::error::{Result, ShapefileError};
use crate::geometry::{BoundingBox, Geometry};

/// File code found in the first word of every `.shp` and `.shx`
pub const FILE_CODE: i32 = 9994;

/// The only version ever written
pub const VERSION: i32 = 1000;

/// Header size in bytes
pub const HEADER_SIZE: usize = 100;

/// Header size in 16-bit words; the offset of the first record
pub const HEADER_WORDS: i32 = (HEADER_SIZE / 2) as i32;

/// Record header size in words (number + content length)
pub const RECORD_HEADER_WORDS: i32 = 4;

/// Smallest legal content length in words: the shape type field alone
///
/// Other readers reject anything up to 4 words. A null record is exactly
/// 2 words, so the floor sits there to keep null records readable.
pub const MIN_CONTENT_WORDS: i32 = 2;

/// Size of one `.shx` entry in words
pub const INDEX_ENTRY_WORDS: i32 = 4;

/// ESRI shape type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

impl ShapeType {
    pub fn code(&self) -> i32 {
        match self {
            ShapeType::Null => 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
            ShapeType::PointZ => 11,
            ShapeType::PolyLineZ => 13,
            ShapeType::PolygonZ => 15,
            ShapeType::MultiPointZ => 18,
            ShapeType::PointM => 21,
            ShapeType::PolyLineM => 23,
            ShapeType::PolygonM => 25,
            ShapeType::MultiPointM => 28,
            ShapeType::MultiPatch => 31,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            0 => ShapeType::Null,
            1 => ShapeType::Point,
            3 => ShapeType::PolyLine,
            5 => ShapeType::Polygon,
            8 => ShapeType::MultiPoint,
            11 => ShapeType::PointZ,
            13 => ShapeType::PolyLineZ,
            15 => ShapeType::PolygonZ,
            18 => ShapeType::MultiPointZ,
            21 => ShapeType::PointM,
            23 => ShapeType::PolyLineM,
            25 => ShapeType::PolygonM,
            28 => ShapeType::MultiPointM,
            31 => ShapeType::MultiPatch,
            other => {
                return Err(ShapefileError::UnsupportedGeometry(format!(
                    "unknown shape type code {other}"
                )))
            }
        })
    }

    /// Types carrying a Z array
    pub fn has_z(&self) -> bool {
        matches!(
            self,
            ShapeType::PointZ
                | ShapeType::PolyLineZ
                | ShapeType::PolygonZ
                | ShapeType::MultiPointZ
                | ShapeType::MultiPatch
        )
    }

    /// Types whose records always carry a measure array
    pub fn has_measures(&self) -> bool {
        self.code() > 20
    }

    /// The 2D base type: Z and M variants collapse onto their plain form
    pub fn base(&self) -> ShapeType {
        match self {
            ShapeType::PointZ | ShapeType::PointM => ShapeType::Point,
            ShapeType::PolyLineZ | ShapeType::PolyLineM => ShapeType::PolyLine,
            ShapeType::PolygonZ | ShapeType::PolygonM => ShapeType::Polygon,
            ShapeType::MultiPointZ | ShapeType::MultiPointM => ShapeType::MultiPoint,
            other => *other,
        }
    }

    /// Shape type a geometry is written as
    ///
    /// Heterogeneous bags have no shapefile representation.
    pub fn for_geometry(geometry: &Geometry) -> Result<Self> {
        let is_3d = geometry.is_3d();
        let pick = |flat: ShapeType, z: ShapeType| if is_3d { z } else { flat };
        Ok(match geometry {
            Geometry::Point(_) => pick(ShapeType::Point, ShapeType::PointZ),
            Geometry::MultiPoint(_) => pick(ShapeType::MultiPoint, ShapeType::MultiPointZ),
            Geometry::Line(_) | Geometry::MultiLine(_) => {
                pick(ShapeType::PolyLine, ShapeType::PolyLineZ)
            }
            Geometry::LinearRing(_)
            | Geometry::MultiLinearRings(_)
            | Geometry::Polygon(_)
            | Geometry::MultiPolygons(_) => pick(ShapeType::Polygon, ShapeType::PolygonZ),
            Geometry::Bag(_) => {
                return Err(ShapefileError::UnsupportedGeometry(
                    "geometry bags cannot be written to a shapefile".to_string(),
                ))
            }
        })
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// Content length of one record in 16-bit words
///
/// Base, per-part and per-point byte counts follow the ESRI tables. Point
/// counts for polygon types include ring closure points, which every
/// [`LinearRing`](crate::geometry::LinearRing) already stores. No M values
/// are written, so measured types are sized as their Z or 2D counterparts.
pub fn record_length_words(shape_type: ShapeType, geometry: &Geometry) -> Result<i32> {
    let parts = geometry.num_parts();
    let points = geometry.num_points();
    let (base, per_part, per_point) = match shape_type {
        ShapeType::Null => (4, 0, 0),
        ShapeType::Point => (4, 0, 16),
        // x, y, z and the unused measure
        ShapeType::PointZ => (4, 0, 32),
        ShapeType::MultiPoint => (40, 0, 16),
        ShapeType::MultiPointZ => (56, 0, 24),
        ShapeType::PolyLine | ShapeType::Polygon => (44, 4, 16),
        ShapeType::PolyLineZ | ShapeType::PolygonZ => (60, 4, 24),
        other => {
            return Err(ShapefileError::UnsupportedGeometry(format!(
                "cannot write shape type {other}"
            )))
        }
    };
    let parts = if per_part == 0 { 0 } else { parts };
    let bytes = base + parts * per_part + points * per_point;
    i32::try_from(bytes / 2).map_err(|_| {
        ShapefileError::UnsupportedGeometry(format!("record of {bytes} bytes is too large"))
    })
}

/// Header shared by `.shp` and `.shx`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeHeader {
    /// Total file length in 16-bit words, header included
    pub file_length: i32,
    pub shape_type: ShapeType,
    pub bbox: BoundingBox,
}

impl ShapeHeader {
    /// Parse and validate a 100-byte header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let code = cursor.read_i32(ByteOrder::Big)?;
        if code != FILE_CODE {
            return Err(ShapefileError::Format(format!(
                "invalid file code: expected {FILE_CODE}, got {code}"
            )));
        }
        cursor.skip(20)?;
        let file_length = cursor.read_i32(ByteOrder::Big)?;
        let version = cursor.read_i32(ByteOrder::Little)?;
        if version != VERSION {
            return Err(ShapefileError::Format(format!(
                "unsupported version: expected {VERSION}, got {version}"
            )));
        }
        let shape_type = ShapeType::from_code(cursor.read_i32(ByteOrder::Little)?)?;

        let min_lon = cursor.read_f64(ByteOrder::Little)?;
        let min_lat = cursor.read_f64(ByteOrder::Little)?;
        let max_lon = cursor.read_f64(ByteOrder::Little)?;
        let max_lat = cursor.read_f64(ByteOrder::Little)?;
        let z_min = cursor.read_f64(ByteOrder::Little)?;
        let z_max = cursor.read_f64(ByteOrder::Little)?;
        // M range is never used
        cursor.skip(16)?;

        Ok(Self {
            file_length,
            shape_type,
            bbox: BoundingBox {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
                z_range: shape_type.has_z().then_some((z_min, z_max)),
            },
        })
    }

    /// Read a header from the start of a stream
    pub fn read_from<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        read_full(reader, &mut bytes, "file header")?;
        Self::parse(&bytes)
    }

    /// Serialize with the antimeridian-corrected X/Y extent
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sink = ByteSink::with_capacity(HEADER_SIZE);
        sink.write_i32(FILE_CODE, ByteOrder::Big);
        for _ in 0..5 {
            sink.write_i32(0, ByteOrder::Big);
        }
        sink.write_i32(self.file_length, ByteOrder::Big);
        sink.write_i32(VERSION, ByteOrder::Little);
        sink.write_i32(self.shape_type.code(), ByteOrder::Little);
        write_extent(&mut sink, &self.bbox);
        let (z_min, z_max) = if self.shape_type.has_z() {
            self.bbox.z_range.unwrap_or((0.0, 0.0))
        } else {
            (0.0, 0.0)
        };
        sink.write_f64(z_min, ByteOrder::Little);
        sink.write_f64(z_max, ByteOrder::Little);
        sink.write_f64(0.0, ByteOrder::Little);
        sink.write_f64(0.0, ByteOrder::Little);
        debug_assert_eq!(sink.len(), HEADER_SIZE);
        sink.into_inner()
    }
}

/// Write the four X/Y extent doubles used by headers and record bodies
pub(crate) fn write_extent(sink: &mut ByteSink, bbox: &BoundingBox) {
    let (west, south, east, north) = bbox.esri_extent();
    sink.write_f64(west, ByteOrder::Little);
    sink.write_f64(south, ByteOrder::Little);
    sink.write_f64(east, ByteOrder::Little);
    sink.write_f64(north, ByteOrder::Little);
}

/// Fill `buf` completely, reporting how much arrived on a short read
///
/// Returns `Ok(false)` when the stream is already at end of file, so callers
/// can tell a clean record boundary from a cut-off record.
pub(crate) fn read_full_or_eof<R: std::io::Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 if !buf.is_empty() => Ok(false),
        n if n == buf.len() => Ok(true),
        n => Err(ShapefileError::Truncated {
            context,
            needed: buf.len(),
            available: n,
        }),
    }
}

/// Like [`read_full_or_eof`] but end of file is a truncation too
pub(crate) fn read_full<R: std::io::Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<()> {
    if read_full_or_eof(reader, buf, context)? {
        Ok(())
    } else {
        Err(ShapefileError::Truncated {
            context,
            needed: buf.len(),
            available: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Line, LinearRing, Point, Polygon};

    fn header(shape_type: ShapeType) -> ShapeHeader {
        ShapeHeader {
            file_length: 64,
            shape_type,
            bbox: BoundingBox {
                min_lon: -10.0,
                min_lat: -5.0,
                max_lon: 10.0,
                max_lat: 5.0,
                z_range: Some((1.0, 2.0)),
            },
        }
    }

    #[test]
    fn test_shape_type_codes() {
        for code in [0, 1, 3, 5, 8, 11, 13, 15, 18, 21, 23, 25, 28, 31] {
            assert_eq!(ShapeType::from_code(code).unwrap().code(), code);
        }
        assert!(matches!(
            ShapeType::from_code(2),
            Err(ShapefileError::UnsupportedGeometry(_))
        ));
    }

    #[test]
    fn test_dimension_flags() {
        assert!(ShapeType::PolygonZ.has_z());
        assert!(!ShapeType::PolygonZ.has_measures());
        assert!(ShapeType::PolygonM.has_measures());
        assert!(!ShapeType::PolygonM.has_z());
        assert_eq!(ShapeType::MultiPointM.base(), ShapeType::MultiPoint);
    }

    #[test]
    fn test_header_layout() {
        let bytes = header(ShapeType::PointZ).to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x27, 0x0A]);
        assert_eq!(&bytes[24..28], &64i32.to_be_bytes());
        assert_eq!(&bytes[28..32], &1000i32.to_le_bytes());
        assert_eq!(&bytes[32..36], &11i32.to_le_bytes());
        assert_eq!(&bytes[36..44], &(-10.0f64).to_le_bytes());
        assert_eq!(&bytes[68..76], &1.0f64.to_le_bytes());
    }

    #[test]
    fn test_header_parse_round_trip() {
        let original = header(ShapeType::PolygonZ);
        let parsed = ShapeHeader::parse(&original.to_bytes()).unwrap();
        assert_eq!(parsed, original);

        // 2D headers drop the Z range
        let flat = ShapeHeader::parse(&header(ShapeType::Polygon).to_bytes()).unwrap();
        assert_eq!(flat.bbox.z_range, None);
    }

    #[test]
    fn test_bad_file_code() {
        let mut bytes = header(ShapeType::Point).to_bytes();
        bytes[3] = 0x0B;
        assert!(matches!(
            ShapeHeader::parse(&bytes),
            Err(ShapefileError::Format(_))
        ));
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = header(ShapeType::Point).to_bytes();
        bytes[28..32].copy_from_slice(&999i32.to_le_bytes());
        assert!(matches!(
            ShapeHeader::parse(&bytes),
            Err(ShapefileError::Format(_))
        ));
    }

    #[test]
    fn test_record_lengths() {
        let point = Geometry::Point(Point::new(1.0, 2.0));
        assert_eq!(record_length_words(ShapeType::Point, &point).unwrap(), 10);

        let point_z = Geometry::Point(Point::with_elevation(1.0, 2.0, 3.0));
        assert_eq!(record_length_words(ShapeType::PointZ, &point_z).unwrap(), 18);

        let line = Geometry::MultiLine(vec![
            Line::new(vec![Point::new(0.0, 0.0); 3]),
            Line::new(vec![Point::new(0.0, 0.0); 2]),
            Line::new(vec![Point::new(0.0, 0.0); 4]),
        ]);
        // 44 + 3 * 4 + 9 * 16
        assert_eq!(record_length_words(ShapeType::PolyLine, &line).unwrap(), 100);

        let ring = LinearRing::new(vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
        ])
        .unwrap();
        let poly = Geometry::Polygon(Polygon::new(ring, vec![]));
        // closure point counted: 44 + 4 + 4 * 16
        assert_eq!(record_length_words(ShapeType::Polygon, &poly).unwrap(), 56);
    }

    #[test]
    fn test_bag_has_no_shape_type() {
        let bag = Geometry::Bag(vec![Geometry::Point(Point::new(0.0, 0.0))]);
        assert!(matches!(
            ShapeType::for_geometry(&bag),
            Err(ShapefileError::UnsupportedGeometry(_))
        ));
    }

    #[test]
    fn test_short_read_is_truncation() {
        let data = [0u8; 10];
        let mut reader = &data[..];
        let err = ShapeHeader::read_from(&mut reader).unwrap_err();
        assert!(matches!(err, ShapefileError::Truncated { available: 10, .. }));
    }
}
