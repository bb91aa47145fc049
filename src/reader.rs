// SPDX-License-Identifier: MIT
//! Sequential `.shp` record reader and `.shx` index reader
//!
//! The reader walks `Header -> Record* -> Eof`. Each record body is read in
//! full according to its declared content length before decoding, so the
//! stream is always positioned at the next record even when a decoder
//! consumes fewer bytes than declared.

use std::io::Read;

use tracing::{debug, warn};

use crate::codec::{ByteCursor, ByteOrder};
use crate::error::{Result, ShapefileError};
use crate::format::{
    read_full_or_eof, ShapeHeader, ShapeType, HEADER_WORDS, INDEX_ENTRY_WORDS,
    MIN_CONTENT_WORDS, RECORD_HEADER_WORDS,
};
use crate::geometry::{assemble_polygons, Geometry, Line, LinearRing, Point};

/// One decoded record
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    /// 1-based record number as stored in the file
    pub number: i32,
    /// `None` for null-shape records
    pub geometry: Option<Geometry>,
}

/// Pull-based reader over a `.shp` stream
pub struct ShapefileReader<R> {
    reader: R,
    header: ShapeHeader,
    /// Word offset of the next record
    offset: i64,
    done: bool,
}

impl<R: Read> ShapefileReader<R> {
    /// Read and validate the file header
    pub fn new(mut reader: R) -> Result<Self> {
        let header = ShapeHeader::read_from(&mut reader)?;
        if header.shape_type == ShapeType::MultiPatch {
            return Err(ShapefileError::UnsupportedGeometry(
                "MultiPatch shapefiles are not supported".to_string(),
            ));
        }
        debug!(
            shape_type = %header.shape_type,
            file_length = header.file_length,
            "Opened shapefile"
        );
        Ok(Self {
            reader,
            header,
            offset: HEADER_WORDS as i64,
            done: false,
        })
    }

    pub fn header(&self) -> &ShapeHeader {
        &self.header
    }

    pub fn shape_type(&self) -> ShapeType {
        self.header.shape_type
    }

    /// Read the next record, `None` once the declared length is consumed
    pub fn read_record(&mut self) -> Result<Option<ShapeRecord>> {
        if self.done {
            return Ok(None);
        }
        if self.offset >= self.header.file_length as i64 {
            self.done = true;
            return Ok(None);
        }

        let mut record_header = [0u8; 8];
        if !read_full_or_eof(&mut self.reader, &mut record_header, "record header")? {
            warn!(
                offset = self.offset,
                declared = self.header.file_length,
                "Shapefile ended before its declared length"
            );
            self.done = true;
            return Ok(None);
        }
        let mut cursor = ByteCursor::new(&record_header);
        let number = cursor.read_i32(ByteOrder::Big)?;
        let content_words = cursor.read_i32(ByteOrder::Big)?;
        if content_words < MIN_CONTENT_WORDS {
            self.done = true;
            return Err(ShapefileError::Format(format!(
                "record {number} declares {content_words} words, below the shape type field"
            )));
        }

        let content_bytes = content_words as usize * 2;
        let mut content = Vec::new();
        (&mut self.reader)
            .take(content_bytes as u64)
            .read_to_end(&mut content)?;
        if content.len() < content_bytes {
            self.done = true;
            return Err(ShapefileError::Truncated {
                context: "record content",
                needed: content_bytes,
                available: content.len(),
            });
        }
        self.offset += (RECORD_HEADER_WORDS + content_words) as i64;

        let geometry = decode_record(&content, self.header.shape_type, number)?;
        Ok(Some(ShapeRecord { number, geometry }))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for ShapefileReader<R> {
    type Item = Result<ShapeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode one record body (shape type onward) for a file of `file_type`
///
/// Returns `None` for null records.
pub fn decode_record(content: &[u8], file_type: ShapeType, number: i32) -> Result<Option<Geometry>> {
    let mut cursor = ByteCursor::new(content);
    let code = cursor.read_i32(ByteOrder::Little)?;
    let record_type = ShapeType::from_code(code)?;
    if record_type == ShapeType::Null {
        return Ok(None);
    }
    if record_type != file_type {
        return Err(ShapefileError::Format(format!(
            "record {number} has shape type {record_type}, file declares {file_type}"
        )));
    }

    let layout = Layout {
        has_z: file_type.has_z(),
        has_measures: file_type.has_measures(),
        number,
    };
    let geometry = match file_type.base() {
        ShapeType::Point => layout.point(&mut cursor)?,
        ShapeType::MultiPoint => {
            cursor.skip(32)?;
            layout.multi_point(&mut cursor)?
        }
        ShapeType::PolyLine => {
            cursor.skip(32)?;
            layout.poly_line(&mut cursor)?
        }
        ShapeType::Polygon => {
            cursor.skip(32)?;
            layout.polygon(&mut cursor)?
        }
        _ => {
            return Err(ShapefileError::UnsupportedGeometry(format!(
                "shape type {file_type} is not supported"
            )))
        }
    };
    Ok(Some(geometry))
}

/// Per-file decoding switches
struct Layout {
    has_z: bool,
    has_measures: bool,
    number: i32,
}

impl Layout {
    fn point(&self, cursor: &mut ByteCursor<'_>) -> Result<Geometry> {
        let lon = cursor.read_f64(ByteOrder::Little)?;
        let lat = cursor.read_f64(ByteOrder::Little)?;
        if !self.has_z {
            // PointM carries one trailing measure, which is ignored
            return Ok(Geometry::Point(Point::new(lon, lat)));
        }
        let z = match cursor.read_f64(ByteOrder::Little) {
            Ok(z) => z,
            Err(_) => {
                warn!(record = self.number, "Point record is missing its z value, using 0.0");
                0.0
            }
        };
        Ok(Geometry::Point(Point::with_elevation(lon, lat, z)))
    }

    fn multi_point(&self, cursor: &mut ByteCursor<'_>) -> Result<Geometry> {
        let count = self.count(cursor, "point")?;
        let mut points = self.points(cursor, count)?;
        if points.len() == 1 {
            return Ok(Geometry::Point(points.remove(0)));
        }
        Ok(Geometry::MultiPoint(points))
    }

    fn poly_line(&self, cursor: &mut ByteCursor<'_>) -> Result<Geometry> {
        let runs = self.parts(cursor)?;
        let mut lines: Vec<Line> = runs.into_iter().map(Line::new).collect();
        if lines.len() == 1 {
            return Ok(Geometry::Line(lines.remove(0)));
        }
        Ok(Geometry::MultiLine(lines))
    }

    fn polygon(&self, cursor: &mut ByteCursor<'_>) -> Result<Geometry> {
        let rings = self
            .parts(cursor)?
            .into_iter()
            .map(LinearRing::new)
            .collect::<Result<Vec<_>>>()?;
        assemble_polygons(rings)
    }

    fn count(&self, cursor: &mut ByteCursor<'_>, what: &str) -> Result<usize> {
        let n = cursor.read_i32(ByteOrder::Little)?;
        usize::try_from(n).map_err(|_| {
            ShapefileError::Format(format!("record {} has negative {what} count {n}", self.number))
        })
    }

    /// Part count, point count, part offsets, then the shared point arrays
    fn parts(&self, cursor: &mut ByteCursor<'_>) -> Result<Vec<Vec<Point>>> {
        let num_parts = self.count(cursor, "part")?;
        let num_points = self.count(cursor, "point")?;
        if num_parts.saturating_mul(4) > cursor.remaining() {
            return Err(ShapefileError::Truncated {
                context: "part offsets",
                needed: num_parts.saturating_mul(4),
                available: cursor.remaining(),
            });
        }
        let mut offsets = Vec::with_capacity(num_parts + 1);
        for _ in 0..num_parts {
            offsets.push(self.count(cursor, "part offset")?);
        }
        offsets.push(num_points);
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(ShapefileError::Format(format!(
                "record {} has part offsets out of order",
                self.number
            )));
        }

        let points = self.points(cursor, num_points)?;
        Ok(offsets
            .windows(2)
            .map(|w| points[w[0]..w[1]].to_vec())
            .collect())
    }

    /// X/Y array, then the Z range and array, then the M range and array
    ///
    /// Only the X/Y array is mandatory. Missing Z values become 0.0 and
    /// missing measures are ignored, each with a warning.
    fn points(&self, cursor: &mut ByteCursor<'_>, count: usize) -> Result<Vec<Point>> {
        if count.saturating_mul(16) > cursor.remaining() {
            return Err(ShapefileError::Truncated {
                context: "point array",
                needed: count.saturating_mul(16),
                available: cursor.remaining(),
            });
        }
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let lon = cursor.read_f64(ByteOrder::Little)?;
            let lat = cursor.read_f64(ByteOrder::Little)?;
            points.push(Point::new(lon, lat));
        }

        if self.has_z {
            let mut found = 0;
            if cursor.skip(16).is_ok() {
                for p in points.iter_mut() {
                    match cursor.read_f64(ByteOrder::Little) {
                        Ok(z) => {
                            p.elevation = Some(z);
                            found += 1;
                        }
                        Err(_) => break,
                    }
                }
            }
            if found < count {
                warn!(
                    record = self.number,
                    expected = count,
                    found,
                    "Found too few z values, the rest will be taken as 0.0"
                );
                for p in points.iter_mut().skip(found) {
                    p.elevation = Some(0.0);
                }
            }
        }

        if self.has_measures {
            let needed = 16 + count * 8;
            if cursor.skip(needed).is_err() {
                warn!(
                    record = self.number,
                    "Found too few m values; measures are ignored"
                );
            }
        }
        Ok(points)
    }
}

/// One `.shx` entry, both fields in 16-bit words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: i32,
    pub length: i32,
}

/// Parsed `.shx` index
#[derive(Debug, Clone)]
pub struct IndexReader {
    header: ShapeHeader,
    entries: Vec<IndexEntry>,
}

impl IndexReader {
    /// Read the header and every entry it declares
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let header = ShapeHeader::read_from(&mut reader)?;
        let body_words = header.file_length - HEADER_WORDS;
        if body_words < 0 || body_words % INDEX_ENTRY_WORDS != 0 {
            return Err(ShapefileError::Format(format!(
                "index length {} is not a whole number of entries",
                header.file_length
            )));
        }
        let count = (body_words / INDEX_ENTRY_WORDS) as usize;

        let mut body = Vec::new();
        reader.take(count as u64 * 8).read_to_end(&mut body)?;
        let mut cursor = ByteCursor::new(&body);
        let mut entries = Vec::with_capacity(body.len() / 8);
        for _ in 0..count {
            let offset = cursor.read_i32(ByteOrder::Big)?;
            let length = cursor.read_i32(ByteOrder::Big)?;
            entries.push(IndexEntry { offset, length });
        }
        Ok(Self { header, entries })
    }

    pub fn header(&self) -> &ShapeHeader {
        &self.header
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteSink;
    use crate::geometry::BoundingBox;

    fn file_header(shape_type: ShapeType, file_length: i32) -> Vec<u8> {
        ShapeHeader {
            file_length,
            shape_type,
            bbox: BoundingBox::from_point(&Point::new(0.0, 0.0)),
        }
        .to_bytes()
    }

    /// Append a record with the given body (shape type included)
    fn push_record(out: &mut Vec<u8>, number: i32, body: &[u8]) {
        let mut sink = ByteSink::new();
        sink.write_i32(number, ByteOrder::Big);
        sink.write_i32((body.len() / 2) as i32, ByteOrder::Big);
        out.extend_from_slice(sink.as_slice());
        out.extend_from_slice(body);
    }

    fn point_body(code: i32, x: f64, y: f64) -> Vec<u8> {
        let mut sink = ByteSink::new();
        sink.write_i32(code, ByteOrder::Little);
        sink.write_f64(x, ByteOrder::Little);
        sink.write_f64(y, ByteOrder::Little);
        sink.into_inner()
    }

    fn finish(mut bytes: Vec<u8>, shape_type: ShapeType) -> Vec<u8> {
        let words = (bytes.len() / 2) as i32;
        bytes[..100].copy_from_slice(&file_header(shape_type, words));
        bytes
    }

    #[test]
    fn test_reads_points_and_null_records() {
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &point_body(1, 10.5, -20.25));
        push_record(&mut bytes, 2, &0i32.to_le_bytes());
        let bytes = finish(bytes, ShapeType::Point);

        let records: Vec<_> = ShapefileReader::new(&bytes[..])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].geometry,
            Some(Geometry::Point(Point::new(10.5, -20.25)))
        );
        assert_eq!(records[1].number, 2);
        assert_eq!(records[1].geometry, None);
    }

    #[test]
    fn test_mixed_shape_types_rejected() {
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &point_body(1, 0.0, 0.0));
        let mut multi = ByteSink::new();
        multi.write_i32(8, ByteOrder::Little);
        multi.write_bytes(&[0u8; 32]);
        multi.write_i32(0, ByteOrder::Little);
        push_record(&mut bytes, 2, multi.as_slice());
        let bytes = finish(bytes, ShapeType::Point);

        let mut reader = ShapefileReader::new(&bytes[..]).unwrap();
        assert!(reader.read_record().unwrap().is_some());
        assert!(matches!(
            reader.read_record(),
            Err(ShapefileError::Format(_))
        ));
    }

    #[test]
    fn test_undersized_record_rejected() {
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &[]);
        let bytes = finish(bytes, ShapeType::Point);

        let mut reader = ShapefileReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(ShapefileError::Format(_))
        ));
    }

    #[test]
    fn test_content_length_floor_is_the_null_record() {
        // A bare null record sits exactly on the floor
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &0i32.to_le_bytes());
        let bytes = finish(bytes, ShapeType::Point);
        let mut reader = ShapefileReader::new(&bytes[..]).unwrap();
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.geometry, None);

        // One word short of it is rejected
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &[0u8; 2]);
        let bytes = finish(bytes, ShapeType::Point);
        let mut reader = ShapefileReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(ShapefileError::Format(_))
        ));
    }

    #[test]
    fn test_oversized_record_is_skipped_past() {
        // Trailing padding inside the declared content must not desync the
        // following record
        let mut padded = point_body(1, 1.0, 2.0);
        padded.extend_from_slice(&[0u8; 8]);
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &padded);
        push_record(&mut bytes, 2, &point_body(1, 3.0, 4.0));
        let bytes = finish(bytes, ShapeType::Point);

        let records: Vec<_> = ShapefileReader::new(&bytes[..])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            records[1].geometry,
            Some(Geometry::Point(Point::new(3.0, 4.0)))
        );
    }

    #[test]
    fn test_truncated_record_content() {
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &point_body(1, 1.0, 2.0));
        let declared = (bytes.len() / 2) as i32;
        bytes.truncate(bytes.len() - 4);
        bytes[..100].copy_from_slice(&file_header(ShapeType::Point, declared));

        let mut reader = ShapefileReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(ShapefileError::Truncated { .. })
        ));
    }

    #[test]
    fn test_clean_eof_before_declared_length() {
        let mut bytes = file_header(ShapeType::Point, 0);
        push_record(&mut bytes, 1, &point_body(1, 1.0, 2.0));
        let declared = (bytes.len() / 2) as i32 + 14;
        bytes[..100].copy_from_slice(&file_header(ShapeType::Point, declared));

        let mut reader = ShapefileReader::new(&bytes[..]).unwrap();
        assert!(reader.read_record().unwrap().is_some());
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_polyline_parts() {
        let mut body = ByteSink::new();
        body.write_i32(3, ByteOrder::Little);
        body.write_bytes(&[0u8; 32]);
        body.write_i32(3, ByteOrder::Little);
        body.write_i32(9, ByteOrder::Little);
        for offset in [0, 3, 5] {
            body.write_i32(offset, ByteOrder::Little);
        }
        for i in 0..9 {
            body.write_f64(i as f64, ByteOrder::Little);
            body.write_f64(0.0, ByteOrder::Little);
        }
        let geometry = decode_record(body.as_slice(), ShapeType::PolyLine, 1)
            .unwrap()
            .unwrap();
        match geometry {
            Geometry::MultiLine(lines) => {
                let counts: Vec<_> = lines.iter().map(|l| l.points.len()).collect();
                assert_eq!(counts, vec![3, 2, 4]);
                assert_eq!(lines[1].points[0], Point::new(3.0, 0.0));
            }
            other => panic!("expected multiline, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_z_values_default_to_zero() {
        let mut body = ByteSink::new();
        body.write_i32(18, ByteOrder::Little);
        body.write_bytes(&[0u8; 32]);
        body.write_i32(2, ByteOrder::Little);
        for v in [1.0, 2.0, 3.0, 4.0] {
            body.write_f64(v, ByteOrder::Little);
        }
        // Z range plus only the first z value
        body.write_f64(5.0, ByteOrder::Little);
        body.write_f64(5.0, ByteOrder::Little);
        body.write_f64(5.0, ByteOrder::Little);

        let geometry = decode_record(body.as_slice(), ShapeType::MultiPointZ, 1)
            .unwrap()
            .unwrap();
        assert_eq!(
            geometry,
            Geometry::MultiPoint(vec![
                Point::with_elevation(1.0, 2.0, 5.0),
                Point::with_elevation(3.0, 4.0, 0.0),
            ])
        );
    }

    #[test]
    fn test_measured_types_read_as_2d() {
        let mut body = ByteSink::new();
        body.write_i32(21, ByteOrder::Little);
        body.write_f64(7.0, ByteOrder::Little);
        body.write_f64(8.0, ByteOrder::Little);
        body.write_f64(99.0, ByteOrder::Little);
        let geometry = decode_record(body.as_slice(), ShapeType::PointM, 1)
            .unwrap()
            .unwrap();
        assert_eq!(geometry, Geometry::Point(Point::new(7.0, 8.0)));
    }

    #[test]
    fn test_index_reader() {
        let mut bytes = file_header(ShapeType::Point, 58);
        let mut sink = ByteSink::new();
        for (offset, length) in [(50, 10), (64, 10)] {
            sink.write_i32(offset, ByteOrder::Big);
            sink.write_i32(length, ByteOrder::Big);
        }
        bytes.extend_from_slice(sink.as_slice());

        let index = IndexReader::from_reader(&bytes[..]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[1], IndexEntry { offset: 64, length: 10 });
    }
}
