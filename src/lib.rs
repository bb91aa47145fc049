// SPDX-License-Identifier: MIT
//! # Shapefile Codec
//!
//! Reader and writer for ESRI Shapefile sets: the `.shp` geometry records,
//! the `.shx` offset index, the `.dbf` attribute table, the `.prj`
//! projection text and the optional `.shm` point symbology.
//!
//! ## Format Overview
//!
//! ```text
//! <name>.shp   100-byte header, then (record header, shape) pairs
//! <name>.shx   same header, then one (offset, length) entry per record
//! <name>.dbf   dBASE III table, row n belongs to record n
//! <name>.prj   projection text, always WGS 84 when written here
//! <name>.shm   optional point symbology
//! ```
//!
//! Headers mix byte orders: file code and lengths are big-endian, version,
//! shape type and coordinates little-endian. A file holds one shape type,
//! so mixed feature streams are partitioned into homogeneous buckets before
//! writing.
//!
//! ## Usage
//!
//! ```no_run
//! use shapefile_codec::{
//!     CodecConfig, Feature, OutputEvent, Point, ShapefileInput, ShapefileOutput, InputItem,
//! };
//!
//! # fn main() -> shapefile_codec::Result<()> {
//! let mut output = ShapefileOutput::new("out", CodecConfig::default())?;
//! output.write(OutputEvent::Feature(
//!     Feature::new().with_geometry(Point::new(10.5, -20.25)),
//! ))?;
//! let sets = output.close()?;
//! println!("wrote {} set(s)", sets.len());
//!
//! for item in ShapefileInput::open_dir("out")? {
//!     if let InputItem::Feature(feature) = item? {
//!         println!("{:?}", feature.geometry);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod codec;
pub mod config;
pub mod dbf;
pub mod error;
pub mod feature;
pub mod format;
pub mod geometry;
pub mod input;
pub mod logging;
pub mod output;
pub mod prj;
pub mod reader;
pub mod schema;
pub mod sorter;
pub mod spill;
pub mod symbology;
pub mod writer;

// Re-export main types
pub use config::CodecConfig;
pub use dbf::{esri_field_name, AttributeItem, AttributeSource, DbfReader, DbfWriter};
pub use error::{Result, ShapefileError};
pub use feature::{Feature, Value};
pub use format::{ShapeHeader, ShapeType, FILE_CODE, HEADER_SIZE, VERSION};
pub use geometry::{
    assemble_polygons, BoundingBox, Geometry, GeometryClass, Line, LinearRing, Point, Polygon,
};
pub use input::{InputItem, ShapefileInput};
pub use output::{OutputEvent, ShapefileOutput};
pub use reader::{IndexEntry, IndexReader, ShapeRecord, ShapefileReader};
pub use schema::{FieldType, Schema, SimpleField};
pub use sorter::{FeatureKey, FeatureSorter};
pub use symbology::{Color, PointShapeMapper, Style};
pub use writer::{ShapeWriter, ShapefileSetWriter, WrittenSet};
