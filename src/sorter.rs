// SPDX-License-Identifier: MIT
//! Partitioning of a mixed feature stream into homogeneous buckets
//!
//! A shapefile holds one geometry type, so features are grouped by
//! [`FeatureKey`] and spilled to one buffer per key until the writer drains
//! them.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::feature::Feature;
use crate::geometry::{BoundingBox, GeometryClass};
use crate::schema::{Schema, SimpleField};
use crate::spill::{check_coordinates, SpillBuffer};

/// Grouping identity of a bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureKey {
    /// Identifier of the bucket's schema
    pub schema: String,
    /// Container path the features were found under
    pub path: String,
    /// `None` for features without geometry
    pub geometry: Option<GeometryClass>,
    /// Style identifier, only set when splitting on style
    pub style: Option<String>,
}

#[derive(Debug)]
struct Bucket {
    buffer: SpillBuffer,
    bounds: Option<BoundingBox>,
}

/// Sorts features into spill buffers by schema, path, geometry class and style
#[derive(Debug, Default)]
pub struct FeatureSorter {
    split_on_style: bool,
    scratch_dir: Option<PathBuf>,
    schemata: HashMap<String, Schema>,
    inline_schemata: HashMap<BTreeSet<SimpleField>, String>,
    keys: Vec<FeatureKey>,
    buckets: HashMap<FeatureKey, Bucket>,
}

impl FeatureSorter {
    pub fn new(split_on_style: bool) -> Self {
        Self {
            split_on_style,
            ..Self::default()
        }
    }

    /// Place spill buffers in `dir` instead of the system temporary directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Register a declared schema, adding the object identifier field
    pub fn add_schema(&mut self, mut schema: Schema) {
        schema.ensure_oid();
        debug!(schema = %schema.id, fields = schema.len(), "Registered schema");
        self.schemata.insert(schema.id.clone(), schema);
    }

    pub fn schema(&self, id: &str) -> Option<&Schema> {
        self.schemata.get(id)
    }

    pub fn schemata(&self) -> impl Iterator<Item = &Schema> {
        self.schemata.values()
    }

    /// Schema identifier for a feature, registering one if needed
    ///
    /// A declared but unknown identifier gets an empty placeholder. Features
    /// without a declared schema share a generated one with every other
    /// feature carrying the same field set.
    fn resolve_schema(&mut self, feature: &Feature) -> String {
        if let Some(id) = &feature.schema {
            if !self.schemata.contains_key(id) {
                self.add_schema(Schema::new(id.clone()));
            }
            return id.clone();
        }

        let fields: BTreeSet<SimpleField> = feature.fields().cloned().collect();
        if let Some(id) = self.inline_schemata.get(&fields) {
            return id.clone();
        }
        let mut schema = Schema::generated();
        for field in feature.fields() {
            schema.put(field.clone());
        }
        let id = schema.id.clone();
        self.add_schema(schema);
        self.inline_schemata.insert(fields, id.clone());
        id
    }

    /// Append a feature to its bucket and return the bucket's key
    ///
    /// Geometry with a NaN or infinite coordinate is refused before any
    /// bucket is opened for it.
    pub fn add(&mut self, feature: &Feature, path: &str) -> Result<FeatureKey> {
        check_coordinates(feature)?;
        let schema = self.resolve_schema(feature);
        let style = if self.split_on_style {
            feature
                .style_url
                .as_deref()
                .and_then(|url| url.strip_prefix('#'))
                .map(str::to_string)
        } else {
            None
        };
        let key = FeatureKey {
            schema,
            path: path.to_string(),
            geometry: feature.geometry.as_ref().map(|g| g.class()),
            style,
        };

        let bucket = match self.buckets.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let buffer = SpillBuffer::new(self.scratch_dir.as_deref())?;
                debug!(
                    schema = %key.schema,
                    path = %key.path,
                    geometry = ?key.geometry,
                    "Opened bucket"
                );
                self.keys.push(key.clone());
                entry.insert(Bucket {
                    buffer,
                    bounds: None,
                })
            }
        };
        bucket.buffer.append(feature)?;
        if let Some(bbox) = feature.geometry.as_ref().and_then(|g| g.bounding_box()) {
            match &mut bucket.bounds {
                Some(bounds) => bounds.union(&bbox),
                None => bucket.bounds = Some(bbox),
            }
        }
        Ok(key)
    }

    /// Keys in the order their buckets were opened
    pub fn keys(&self) -> &[FeatureKey] {
        &self.keys
    }

    pub fn buffer(&mut self, key: &FeatureKey) -> Option<&mut SpillBuffer> {
        self.buckets.get_mut(key).map(|b| &mut b.buffer)
    }

    /// Union of the bounding boxes of every geometry in the bucket
    pub fn bounds(&self, key: &FeatureKey) -> Option<&BoundingBox> {
        self.buckets.get(key).and_then(|b| b.bounds.as_ref())
    }

    /// Drop every bucket and schema, deleting the spill files
    pub fn cleanup(&mut self) {
        self.schemata.clear();
        self.inline_schemata.clear();
        self.keys.clear();
        self.buckets.clear();
    }
}
