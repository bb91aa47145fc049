// SPDX-License-Identifier: MIT
//! Shapefile writer
//!
//! Writing is two-phase. [`ShapeWriter::new`] reserves both headers,
//! [`ShapeWriter::write_geometry`] streams records and index entries while
//! accumulating the running offset and extent, and [`ShapeWriter::finish`]
//! seeks back to fill in the headers once the final length is known.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::codec::{ByteOrder, ByteSink};
use crate::dbf::DbfWriter;
use crate::error::{Result, ShapefileError};
use crate::format::{
    record_length_words, write_extent, ShapeHeader, ShapeType, HEADER_SIZE, HEADER_WORDS,
    INDEX_ENTRY_WORDS, RECORD_HEADER_WORDS,
};
use crate::geometry::{BoundingBox, Geometry, Point};
use crate::prj::WGS84_PRJ;
use crate::schema::{FieldType, Schema, SimpleField};
use crate::spill::SpillBuffer;
use crate::symbology::{write_shm, PointShapeMapper, Style, DEFAULT_POINT_SIZE};

/// Width of the text column that replaces a date column
const DATE_TEXT_LENGTH: u16 = 24;

/// Streaming `.shp` / `.shx` writer for one shape type
pub struct ShapeWriter<W: Write + Seek> {
    shp: W,
    shx: W,
    shape_type: ShapeType,
    /// Offset of the next record in words
    offset: i32,
    count: i32,
    bbox: Option<BoundingBox>,
}

impl<W: Write + Seek> ShapeWriter<W> {
    /// Start a file pair, reserving space for both headers
    pub fn new(mut shp: W, mut shx: W, shape_type: ShapeType) -> Result<Self> {
        if !is_writable(shape_type) {
            return Err(ShapefileError::UnsupportedGeometry(format!(
                "cannot write shape type {shape_type}"
            )));
        }
        let placeholder = [0u8; HEADER_SIZE];
        shp.write_all(&placeholder)?;
        shx.write_all(&placeholder)?;
        Ok(Self {
            shp,
            shx,
            shape_type,
            offset: HEADER_WORDS,
            count: 0,
            bbox: None,
        })
    }

    pub fn shape_type(&self) -> ShapeType {
        self.shape_type
    }

    /// Number of records written so far
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one record, a null record for `None`; returns the record number
    pub fn write_geometry(&mut self, geometry: Option<&Geometry>) -> Result<i32> {
        let (record_type, content) = match geometry {
            Some(geometry) => {
                self.check_compatible(geometry)?;
                let content = encode_record(self.shape_type, geometry)?;
                if let Some(bbox) = record_extent(self.shape_type, geometry) {
                    match &mut self.bbox {
                        Some(total) => total.union(&bbox),
                        None => self.bbox = Some(bbox),
                    }
                }
                (self.shape_type, content)
            }
            None => {
                let mut sink = ByteSink::with_capacity(4);
                sink.write_i32(ShapeType::Null.code(), ByteOrder::Little);
                (ShapeType::Null, sink.into_inner())
            }
        };
        let content_words = (content.len() / 2) as i32;
        debug_assert!(record_type == ShapeType::Null || content_words > 0);

        self.count += 1;
        let mut record_header = ByteSink::with_capacity(8);
        record_header.write_i32(self.count, ByteOrder::Big);
        record_header.write_i32(content_words, ByteOrder::Big);
        self.shp.write_all(record_header.as_slice())?;
        self.shp.write_all(&content)?;

        let mut entry = ByteSink::with_capacity(8);
        entry.write_i32(self.offset, ByteOrder::Big);
        entry.write_i32(content_words, ByteOrder::Big);
        self.shx.write_all(entry.as_slice())?;

        self.offset = self
            .offset
            .checked_add(content_words + RECORD_HEADER_WORDS)
            .ok_or_else(|| {
                ShapefileError::UnsupportedGeometry(
                    "shapefile exceeds the maximum file length".to_string(),
                )
            })?;
        Ok(self.count)
    }

    fn check_compatible(&self, geometry: &Geometry) -> Result<()> {
        let found = ShapeType::for_geometry(geometry)?;
        let dimension_lost = found.has_z() && !self.shape_type.has_z();
        if found.base() != self.shape_type.base() || dimension_lost {
            return Err(ShapefileError::HeterogeneousBucket {
                expected: self.shape_type,
                found,
            });
        }
        Ok(())
    }

    /// Fill in both headers and return the writers
    pub fn finish(mut self) -> Result<(W, W, ShapeHeader)> {
        let bbox = self.bbox.unwrap_or(BoundingBox {
            min_lon: 0.0,
            min_lat: 0.0,
            max_lon: 0.0,
            max_lat: 0.0,
            z_range: None,
        });
        let header = ShapeHeader {
            file_length: self.offset,
            shape_type: self.shape_type,
            bbox,
        };
        let index_header = ShapeHeader {
            file_length: HEADER_WORDS + INDEX_ENTRY_WORDS * self.count,
            ..header
        };

        self.shp.flush()?;
        self.shp.seek(SeekFrom::Start(0))?;
        self.shp.write_all(&header.to_bytes())?;
        self.shp.seek(SeekFrom::End(0))?;
        self.shp.flush()?;

        self.shx.flush()?;
        self.shx.seek(SeekFrom::Start(0))?;
        self.shx.write_all(&index_header.to_bytes())?;
        self.shx.seek(SeekFrom::End(0))?;
        self.shx.flush()?;

        debug!(
            shape_type = %self.shape_type,
            records = self.count,
            length_words = self.offset,
            "Finished shape file"
        );
        Ok((self.shp, self.shx, header))
    }
}

fn is_writable(shape_type: ShapeType) -> bool {
    matches!(
        shape_type,
        ShapeType::Point
            | ShapeType::PointZ
            | ShapeType::MultiPoint
            | ShapeType::MultiPointZ
            | ShapeType::PolyLine
            | ShapeType::PolyLineZ
            | ShapeType::Polygon
            | ShapeType::PolygonZ
    )
}

/// Elevation range over every point, missing elevations counting as zero
fn z_range(geometry: &Geometry) -> (f64, f64) {
    let mut range: Option<(f64, f64)> = None;
    geometry.for_each_point(&mut |p: &Point| {
        let z = p.z();
        range = Some(match range {
            Some((lo, hi)) => (lo.min(z), hi.max(z)),
            None => (z, z),
        });
    });
    range.unwrap_or((0.0, 0.0))
}

/// Extent a record contributes to the file header
fn record_extent(shape_type: ShapeType, geometry: &Geometry) -> Option<BoundingBox> {
    let mut bbox = geometry.bounding_box()?;
    bbox.z_range = shape_type.has_z().then(|| z_range(geometry));
    Some(bbox)
}

/// Encode a record body: the shape type followed by the shape
///
/// The body length always equals [`record_length_words`] in bytes.
pub fn encode_record(shape_type: ShapeType, geometry: &Geometry) -> Result<Vec<u8>> {
    let expected = record_length_words(shape_type, geometry)? as usize * 2;
    let has_z = shape_type.has_z();
    let mut sink = ByteSink::with_capacity(expected);
    sink.write_i32(shape_type.code(), ByteOrder::Little);

    match shape_type.base() {
        ShapeType::Point => {
            let Geometry::Point(p) = geometry else {
                return Err(ShapefileError::UnsupportedGeometry(format!(
                    "{} is not a point",
                    geometry.class()
                )));
            };
            sink.write_f64(p.lon, ByteOrder::Little);
            sink.write_f64(p.lat, ByteOrder::Little);
            if has_z {
                sink.write_f64(p.z(), ByteOrder::Little);
                // Measure
                sink.write_f64(0.0, ByteOrder::Little);
            }
        }
        ShapeType::MultiPoint => {
            let points = geometry.parts().concat();
            write_record_extent(&mut sink, geometry);
            sink.write_i32(points.len() as i32, ByteOrder::Little);
            write_xy(&mut sink, &points);
            if has_z {
                write_z(&mut sink, geometry, &points);
            }
        }
        ShapeType::PolyLine | ShapeType::Polygon => {
            let parts = geometry.parts();
            let points: Vec<Point> = parts.concat();
            write_record_extent(&mut sink, geometry);
            sink.write_i32(parts.len() as i32, ByteOrder::Little);
            sink.write_i32(points.len() as i32, ByteOrder::Little);
            let mut start = 0i32;
            for part in &parts {
                sink.write_i32(start, ByteOrder::Little);
                start += part.len() as i32;
            }
            write_xy(&mut sink, &points);
            if has_z {
                write_z(&mut sink, geometry, &points);
            }
        }
        other => {
            return Err(ShapefileError::UnsupportedGeometry(format!(
                "cannot write shape type {other}"
            )))
        }
    }

    let body = sink.into_inner();
    assert_eq!(
        body.len(),
        expected,
        "record length mismatch for {shape_type} {}",
        geometry.class()
    );
    Ok(body)
}

fn write_record_extent(sink: &mut ByteSink, geometry: &Geometry) {
    match geometry.bounding_box() {
        Some(bbox) => write_extent(sink, &bbox),
        None => {
            for _ in 0..4 {
                sink.write_f64(0.0, ByteOrder::Little);
            }
        }
    }
}

fn write_xy(sink: &mut ByteSink, points: &[Point]) {
    for p in points {
        sink.write_f64(p.lon, ByteOrder::Little);
        sink.write_f64(p.lat, ByteOrder::Little);
    }
}

fn write_z(sink: &mut ByteSink, geometry: &Geometry, points: &[Point]) {
    let (lo, hi) = z_range(geometry);
    sink.write_f64(lo, ByteOrder::Little);
    sink.write_f64(hi, ByteOrder::Little);
    for p in points {
        sink.write_f64(p.z(), ByteOrder::Little);
    }
}

/// Files produced for one shapefile set
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSet {
    pub name: String,
    pub shape_type: ShapeType,
    pub records: usize,
    pub shp: PathBuf,
    pub shx: PathBuf,
    pub dbf: PathBuf,
    pub prj: PathBuf,
    pub shm: Option<PathBuf>,
}

impl WrittenSet {
    /// Every component file, in bundling order
    pub fn files(&self) -> Vec<&Path> {
        let mut files = vec![
            self.shp.as_path(),
            self.shx.as_path(),
            self.dbf.as_path(),
            self.prj.as_path(),
        ];
        if let Some(shm) = &self.shm {
            files.push(shm.as_path());
        }
        files
    }
}

/// Writes a complete shapefile set from one homogeneous bucket
pub struct ShapefileSetWriter<'a> {
    dir: &'a Path,
    name: String,
    schema: &'a Schema,
    style: Option<&'a Style>,
    mapper: PointShapeMapper,
    point_size: u32,
}

impl<'a> ShapefileSetWriter<'a> {
    pub fn new(dir: &'a Path, name: impl Into<String>, schema: &'a Schema) -> Self {
        Self {
            dir,
            name: name.into(),
            schema,
            style: None,
            mapper: PointShapeMapper::new(),
            point_size: DEFAULT_POINT_SIZE,
        }
    }

    /// Style whose icon produces a `.shm` file
    pub fn with_style(mut self, style: Option<&'a Style>) -> Self {
        self.style = style;
        self
    }

    pub fn with_mapper(mut self, mapper: PointShapeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_point_size(mut self, point_size: u32) -> Self {
        self.point_size = point_size;
        self
    }

    fn path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{extension}", self.name))
    }

    /// Write `.prj`, `.shp`, `.shx`, `.dbf` and, with an icon style, `.shm`
    pub fn write(&self, shape_type: ShapeType, features: &mut SpillBuffer) -> Result<WrittenSet> {
        let prj = self.path("prj");
        std::fs::write(&prj, WGS84_PRJ)?;

        let shp = self.path("shp");
        let shx = self.path("shx");
        let mut writer = ShapeWriter::new(
            BufWriter::new(File::create(&shp)?),
            BufWriter::new(File::create(&shx)?),
            shape_type,
        )?;
        for feature in features.reader()? {
            writer.write_geometry(feature?.geometry.as_ref())?;
        }
        let records = writer.len();
        let (shp_out, shx_out, _) = writer.finish()?;
        shp_out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        shx_out.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        let dbf = self.path("dbf");
        let dbf_schema = displayable_schema(self.schema);
        let mut out = BufWriter::new(File::create(&dbf)?);
        DbfWriter::new(&dbf_schema)?.write(&mut out, records, features.reader()?)?;
        out.flush()?;

        let shm = match self.style {
            Some(style) if style.icon_url.is_some() => {
                let path = self.path("shm");
                let mut out = BufWriter::new(File::create(&path)?);
                write_shm(&mut out, style, &self.mapper, self.point_size)?;
                out.flush()?;
                Some(path)
            }
            _ => None,
        };

        info!(
            name = %self.name,
            shape_type = %shape_type,
            records,
            "Wrote shapefile set"
        );
        Ok(WrittenSet {
            name: self.name.clone(),
            shape_type,
            records,
            shp,
            shx,
            dbf,
            prj,
            shm,
        })
    }
}

/// Date columns become text columns holding ISO 8601 values
fn displayable_schema(schema: &Schema) -> Schema {
    let mut out = Schema::new(schema.id.clone());
    out.name = schema.name.clone();
    for field in schema.fields() {
        if field.field_type == FieldType::Date {
            out.put(SimpleField::new(field.name.clone(), FieldType::String).with_length(DATE_TEXT_LENGTH));
        } else {
            out.put(field.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::geometry::{Line, LinearRing, Polygon};
    use crate::reader::{IndexReader, ShapefileReader};
    use std::io::Cursor;

    fn square(x: f64, y: f64, size: f64, clockwise: bool) -> LinearRing {
        let mut points = vec![
            Point::new(x, y),
            Point::new(x + size, y),
            Point::new(x + size, y + size),
            Point::new(x, y + size),
        ];
        if clockwise {
            points.reverse();
        }
        LinearRing::new(points).unwrap()
    }

    fn write_all(shape_type: ShapeType, geometries: &[Geometry]) -> (Vec<u8>, Vec<u8>) {
        let mut writer =
            ShapeWriter::new(Cursor::new(Vec::new()), Cursor::new(Vec::new()), shape_type).unwrap();
        for g in geometries {
            writer.write_geometry(Some(g)).unwrap();
        }
        let (shp, shx, _) = writer.finish().unwrap();
        (shp.into_inner(), shx.into_inner())
    }

    #[test]
    fn test_single_point_layout() {
        let (shp, shx) = write_all(ShapeType::Point, &[Point::new(10.5, -20.25).into()]);
        // header + record header + type + x + y
        assert_eq!(shp.len(), 100 + 8 + 20);
        assert_eq!(&shp[24..28], &64i32.to_be_bytes());
        assert_eq!(&shp[32..36], &1i32.to_le_bytes());
        assert_eq!(&shp[36..44], &10.5f64.to_le_bytes());
        assert_eq!(&shp[44..52], &(-20.25f64).to_le_bytes());
        assert_eq!(&shp[100..104], &1i32.to_be_bytes());
        assert_eq!(&shp[104..108], &10i32.to_be_bytes());

        assert_eq!(shx.len(), 108);
        assert_eq!(&shx[24..28], &54i32.to_be_bytes());
        assert_eq!(&shx[100..104], &50i32.to_be_bytes());
        assert_eq!(&shx[104..108], &10i32.to_be_bytes());
    }

    #[test]
    fn test_part_offsets() {
        let line = |n: usize| Line::new((0..n).map(|i| Point::new(i as f64, 1.0)).collect());
        let geometry = Geometry::MultiLine(vec![line(3), line(2), line(4)]);
        let body = encode_record(ShapeType::PolyLine, &geometry).unwrap();
        let int_at = |at: usize| i32::from_le_bytes(body[at..at + 4].try_into().unwrap());
        // type + bbox, then part and point counts
        assert_eq!(int_at(36), 3);
        assert_eq!(int_at(40), 9);
        assert_eq!((int_at(44), int_at(48), int_at(52)), (0, 3, 5));
        assert_eq!(body.len(), 44 + 3 * 4 + 9 * 16);
    }

    #[test]
    fn test_z_range_uses_true_min_and_max() {
        let geometry = Geometry::MultiPoint(vec![
            Point::with_elevation(0.0, 0.0, 5.0),
            Point::with_elevation(1.0, 1.0, -3.0),
            Point::new(2.0, 2.0),
        ]);
        let body = encode_record(ShapeType::MultiPointZ, &geometry).unwrap();
        let f64_at = |at: usize| f64::from_le_bytes(body[at..at + 8].try_into().unwrap());
        // type 4 + bbox 32 + count 4 + xy 48
        let z = 88;
        assert_eq!((f64_at(z), f64_at(z + 8)), (-3.0, 5.0));
        assert_eq!(
            (f64_at(z + 16), f64_at(z + 24), f64_at(z + 32)),
            (5.0, -3.0, 0.0)
        );
    }

    #[test]
    fn test_antimeridian_extent() {
        let geometry = Geometry::MultiPoint(vec![Point::new(170.0, 0.0), Point::new(-180.0, 1.0)]);
        let body = encode_record(ShapeType::MultiPoint, &geometry).unwrap();
        let f64_at = |at: usize| f64::from_le_bytes(body[at..at + 8].try_into().unwrap());
        // min_lon -180, max_lon 170: no wrap
        assert_eq!((f64_at(4), f64_at(20)), (-180.0, 170.0));

        let bbox = BoundingBox {
            min_lon: 10.0,
            min_lat: 0.0,
            max_lon: -180.0,
            max_lat: 1.0,
            z_range: None,
        };
        let mut sink = ByteSink::new();
        write_extent(&mut sink, &bbox);
        let bytes = sink.into_inner();
        assert_eq!(&bytes[16..24], &180.0f64.to_le_bytes());
    }

    #[test]
    fn test_heterogeneous_bucket_rejected() {
        let mut writer =
            ShapeWriter::new(Cursor::new(Vec::new()), Cursor::new(Vec::new()), ShapeType::Point)
                .unwrap();
        writer.write_geometry(Some(&Point::new(0.0, 0.0).into())).unwrap();
        let line = Geometry::Line(Line::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]));
        assert!(matches!(
            writer.write_geometry(Some(&line)),
            Err(ShapefileError::HeterogeneousBucket { .. })
        ));
        assert!(matches!(
            writer.write_geometry(Some(&Point::with_elevation(0.0, 0.0, 1.0).into())),
            Err(ShapefileError::HeterogeneousBucket { .. })
        ));
    }

    #[test]
    fn test_bag_rejected() {
        let bag = Geometry::Bag(vec![Point::new(0.0, 0.0).into()]);
        let mut writer =
            ShapeWriter::new(Cursor::new(Vec::new()), Cursor::new(Vec::new()), ShapeType::Point)
                .unwrap();
        assert!(matches!(
            writer.write_geometry(Some(&bag)),
            Err(ShapefileError::UnsupportedGeometry(_))
        ));
    }

    #[test]
    fn test_polygon_with_hole_round_trip() {
        let polygon = Polygon::new(square(0.0, 0.0, 10.0, true), vec![square(2.0, 2.0, 2.0, false)]);
        let (shp, shx) = write_all(ShapeType::Polygon, &[polygon.clone().into()]);

        let mut reader = ShapefileReader::new(&shp[..]).unwrap();
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.geometry, Some(Geometry::Polygon(polygon)));

        let index = IndexReader::from_reader(&shx[..]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].offset, 50);
    }

    #[test]
    fn test_null_records() {
        let mut writer =
            ShapeWriter::new(Cursor::new(Vec::new()), Cursor::new(Vec::new()), ShapeType::Point)
                .unwrap();
        writer.write_geometry(None).unwrap();
        writer.write_geometry(Some(&Point::new(1.0, 2.0).into())).unwrap();
        let (shp, _, header) = writer.finish().unwrap();
        assert_eq!(header.file_length, 50 + 6 + 14);

        let records: Vec<_> = ShapefileReader::new(&shp.into_inner()[..])
            .unwrap()
            .map(|r| r.unwrap().geometry)
            .collect();
        assert_eq!(records, vec![None, Some(Point::new(1.0, 2.0).into())]);
    }

    #[test]
    fn test_set_writer_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut schema = Schema::new("urn:t")
            .with_field(SimpleField::new("seen", FieldType::Date));
        schema.ensure_oid();
        let mut buffer = SpillBuffer::new(None).unwrap();
        buffer
            .append(&Feature::new().with_geometry(Point::new(1.0, 2.0)))
            .unwrap();

        let style = Style::new("s").with_icon_url("http://host/star.png");
        let set = ShapefileSetWriter::new(dir.path(), "places", &schema)
            .with_style(Some(&style))
            .write(ShapeType::Point, &mut buffer)
            .unwrap();
        assert_eq!(set.records, 1);
        assert_eq!(set.files().len(), 5);
        for file in set.files() {
            assert!(file.exists(), "{file:?}");
        }
        let prj = std::fs::read_to_string(&set.prj).unwrap();
        assert_eq!(prj, WGS84_PRJ);

        let dbf = std::fs::read(&set.dbf).unwrap();
        let reader = crate::dbf::DbfReader::new(&dbf[..]).unwrap();
        assert_eq!(reader.schema().get("seen").unwrap().field_type, FieldType::String);
    }
}
