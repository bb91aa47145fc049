// SPDX-License-Identifier: MIT
//! Append-only on-disk feature buffers
//!
//! Each buffer is a temporary file holding one JSON document per line. The
//! file is removed when the buffer is dropped, so an aborted session leaves
//! nothing behind.
//!
//! Floats are parsed with `serde_json`'s `float_roundtrip` feature, so every
//! coordinate reads back with the bits it was written with. JSON has no
//! NaN or infinity: geometry holding one is refused, and such attribute
//! values spill as null, which is what the attribute table stores for them.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::trace;

use crate::error::{Result, ShapefileError};
use crate::feature::{Feature, Value};
use crate::geometry::Point;

/// Features spilled to a temporary file in insertion order
#[derive(Debug)]
pub struct SpillBuffer {
    writer: BufWriter<NamedTempFile>,
    len: usize,
}

impl SpillBuffer {
    /// Create a buffer in `dir`, or the system temporary directory
    pub fn new(dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        Ok(Self {
            writer: BufWriter::new(file),
            len: 0,
        })
    }

    pub fn append(&mut self, feature: &Feature) -> Result<()> {
        check_coordinates(feature)?;
        serde_json::to_writer(&mut self.writer, finite_attributes(feature).as_ref())?;
        self.writer.write_all(b"\n")?;
        self.len += 1;
        trace!(len = self.len, "Spilled feature");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read back every feature from the start
    ///
    /// The buffer stays appendable; the reader sees what was written before
    /// this call.
    pub fn reader(&mut self) -> Result<SpillReader> {
        self.writer.flush()?;
        // Independent handle positioned at the start
        let file = self.writer.get_ref().reopen()?;
        Ok(SpillReader {
            lines: BufReader::new(file),
            remaining: self.len,
            line: String::new(),
        })
    }
}

/// Refuse geometry that JSON cannot carry
pub(crate) fn check_coordinates(feature: &Feature) -> Result<()> {
    let Some(geometry) = &feature.geometry else {
        return Ok(());
    };
    let mut bad = None;
    geometry.for_each_point(&mut |p: &Point| {
        let finite = p.lon.is_finite()
            && p.lat.is_finite()
            && p.elevation.map_or(true, f64::is_finite);
        if !finite && bad.is_none() {
            bad = Some(*p);
        }
    });
    match bad {
        Some(p) => Err(ShapefileError::Format(format!(
            "non-finite coordinate ({}, {}, {:?})",
            p.lon, p.lat, p.elevation
        ))),
        None => Ok(()),
    }
}

fn finite_attributes(feature: &Feature) -> Cow<'_, Feature> {
    let non_finite = |v: &Value| matches!(v, Value::Double(d) if !d.is_finite());
    if !feature.attributes().iter().any(|(_, v)| non_finite(v)) {
        return Cow::Borrowed(feature);
    }
    let mut owned = feature.clone();
    for (field, value) in feature.attributes() {
        if non_finite(value) {
            owned.set(field.clone(), Value::Null);
        }
    }
    Cow::Owned(owned)
}

/// Iterator over the features of a [`SpillBuffer`]
#[derive(Debug)]
pub struct SpillReader {
    lines: BufReader<File>,
    remaining: usize,
    line: String,
}

impl Iterator for SpillReader {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.line.clear();
        match self.lines.read_line(&mut self.line) {
            Ok(0) => {
                self.remaining = 0;
                None
            }
            Ok(_) => Some(serde_json::from_str(self.line.trim_end()).map_err(Into::into)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(e.into()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
