// SPDX-License-Identifier: MIT
//! Feature stream to shapefile sets
//!
//! [`ShapefileOutput`] consumes container, style, schema and feature events.
//! Features are sorted into homogeneous buckets as they arrive; closing the
//! output writes one shapefile set per bucket.

use std::collections::{HashMap, HashSet};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::archive;
use crate::config::CodecConfig;
use crate::error::{Result, ShapefileError};
use crate::feature::Feature;
use crate::format::ShapeType;
use crate::geometry::GeometryClass;
use crate::schema::Schema;
use crate::sorter::{FeatureKey, FeatureSorter};
use crate::symbology::{PointShapeMapper, Style};
use crate::writer::{ShapefileSetWriter, WrittenSet};

/// Events accepted by [`ShapefileOutput`]
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Open a named container; nested names form the output path
    ContainerStart(String),
    ContainerEnd,
    Style(Style),
    /// Alias `id` for the style referenced by `normal` (`#other`)
    StyleMap { id: String, normal: String },
    Schema(Schema),
    Feature(Feature),
}

/// Writes a feature stream as shapefile sets in a directory
pub struct ShapefileOutput {
    dir: PathBuf,
    config: CodecConfig,
    sorter: FeatureSorter,
    mapper: PointShapeMapper,
    path: Vec<String>,
    styles: HashMap<String, Style>,
    style_maps: HashMap<String, String>,
}

impl ShapefileOutput {
    /// Write into `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>, config: CodecConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut sorter = FeatureSorter::new(config.split_on_style);
        if let Some(scratch) = &config.scratch_dir {
            sorter = sorter.with_scratch_dir(scratch.clone());
        }
        Ok(Self {
            dir,
            config,
            sorter,
            mapper: PointShapeMapper::new(),
            path: Vec::new(),
            styles: HashMap::new(),
            style_maps: HashMap::new(),
        })
    }

    pub fn with_mapper(mut self, mapper: PointShapeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&mut self, event: OutputEvent) -> Result<()> {
        match event {
            OutputEvent::ContainerStart(name) => self.path.push(name),
            OutputEvent::ContainerEnd => {
                self.path.pop();
            }
            OutputEvent::Style(style) => {
                self.styles.insert(style.id.clone(), style);
            }
            OutputEvent::StyleMap { id, normal } => {
                self.style_maps.insert(id, normal);
            }
            OutputEvent::Schema(schema) => self.sorter.add_schema(schema),
            OutputEvent::Feature(feature) => {
                if feature.geometry.is_none() {
                    debug!("Skipping feature without geometry");
                    return Ok(());
                }
                let path = self.path.join("_");
                self.sorter.add(&feature, &path)?;
            }
        }
        Ok(())
    }

    /// Style for a bucket, following one level of style map indirection
    fn resolve_style(&self, id: &str) -> Option<Style> {
        let id = match self.style_maps.get(id) {
            Some(normal) => normal.strip_prefix('#').unwrap_or(normal),
            None => id,
        };
        self.styles.get(id).cloned()
    }

    /// Write one shapefile set per bucket
    ///
    /// Every bucket is attempted; if any fails, the first error is returned.
    pub fn close(mut self) -> Result<Vec<WrittenSet>> {
        let mut written = Vec::new();
        let mut first_error = None;
        let mut names = HashSet::new();

        for key in self.sorter.keys().to_vec() {
            match self.write_bucket(&key, &mut names) {
                Ok(Some(set)) => written.push(set),
                Ok(None) => {}
                Err(e) => {
                    error!(path = %key.path, schema = %key.schema, error = %e, "Failed to write bucket");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.sorter.cleanup();

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(sets = written.len(), dir = %self.dir.display(), "Closed shapefile output");
                Ok(written)
            }
        }
    }

    fn write_bucket(
        &mut self,
        key: &FeatureKey,
        names: &mut HashSet<String>,
    ) -> Result<Option<WrittenSet>> {
        let Some(class) = key.geometry else {
            return Ok(None);
        };
        let is_3d = self.sorter.bounds(key).is_some_and(|b| b.is_3d());
        let shape_type = shape_type_for(class, is_3d)?;
        let name = unique_name(&bucket_name(&key.path, class), names);
        let schema = self
            .sorter
            .schema(&key.schema)
            .cloned()
            .ok_or_else(|| ShapefileError::Format(format!("unknown schema {}", key.schema)))?;
        let style = key.style.as_deref().and_then(|id| self.resolve_style(id));

        let writer = ShapefileSetWriter::new(&self.dir, name, &schema)
            .with_style(style.as_ref())
            .with_mapper(self.mapper.clone())
            .with_point_size(self.config.point_size);
        let Some(buffer) = self.sorter.buffer(key) else {
            return Ok(None);
        };
        writer.write(shape_type, buffer).map(Some)
    }

    /// Write every set, then bundle their files into a zip archive
    pub fn close_into_archive<W: Write + Seek>(self, out: W) -> Result<(W, Vec<WrittenSet>)> {
        let compress = self.config.compress_archives;
        let sets = self.close()?;
        let files: Vec<&Path> = sets.iter().flat_map(|s| s.files()).collect();
        let out = archive::bundle(out, &files, None, compress)?;
        Ok((out, sets))
    }
}

fn shape_type_for(class: GeometryClass, is_3d: bool) -> Result<ShapeType> {
    let (flat, z) = match class {
        GeometryClass::Point => (ShapeType::Point, ShapeType::PointZ),
        GeometryClass::MultiPoint => (ShapeType::MultiPoint, ShapeType::MultiPointZ),
        GeometryClass::Line | GeometryClass::MultiLine => {
            (ShapeType::PolyLine, ShapeType::PolyLineZ)
        }
        GeometryClass::LinearRing
        | GeometryClass::MultiLinearRings
        | GeometryClass::Polygon
        | GeometryClass::MultiPolygons => (ShapeType::Polygon, ShapeType::PolygonZ),
        GeometryClass::Bag => {
            return Err(ShapefileError::UnsupportedGeometry(
                "geometry bags must be flattened before writing".to_string(),
            ))
        }
    };
    Ok(if is_3d { z } else { flat })
}

/// File name for a bucket: path and geometry class, no whitespace
fn bucket_name(path: &str, class: GeometryClass) -> String {
    let raw = if path.is_empty() {
        class.as_str().to_string()
    } else {
        format!("{path}_{class}")
    };
    raw.chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn unique_name(base: &str, names: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut counter = 1;
    while names.contains(&name) {
        name = format!("{base}_{counter}");
        counter += 1;
    }
    names.insert(name.clone());
    name
}
