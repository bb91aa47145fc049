// SPDX-License-Identifier: MIT
//! Multi-file shapefile input
//!
//! [`ShapefileInput`] walks every `.shp` in a working directory. Each set
//! yields its schema, then one feature per geometry record with the
//! matching attribute row. A set whose schema is rejected by the accept
//! predicate is skipped as a whole. A set that fails is dropped and the
//! next pull moves on to the following set.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::archive;
use crate::dbf::{AttributeItem, AttributeSource, DbfReader};
use crate::error::{Result, ShapefileError};
use crate::feature::Feature;
use crate::format::FILE_CODE;
use crate::prj;
use crate::reader::ShapefileReader;
use crate::schema::Schema;

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Items produced by [`ShapefileInput`]
#[derive(Debug, Clone, PartialEq)]
pub enum InputItem {
    Schema(Schema),
    Feature(Feature),
}

type AcceptSchema = Box<dyn FnMut(&Schema) -> bool>;

/// Forward-only reader over every shapefile set in a directory
pub struct ShapefileInput {
    working_dir: PathBuf,
    scratch: Option<TempDir>,
    shapefiles: Vec<PathBuf>,
    current: usize,
    set: Option<SetReader>,
    accept: Option<AcceptSchema>,
    strict_datum: bool,
}

impl ShapefileInput {
    /// Read every `.shp` in `dir`, in file name order
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = dir.into();
        let shapefiles = list_with_extension(&working_dir, "shp")?;
        debug!(dir = %working_dir.display(), sets = shapefiles.len(), "Opened shapefile directory");
        Ok(Self::with_files(working_dir, shapefiles, None))
    }

    /// Read a directory, or a single `.shp` file and its companions
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::open_dir(path);
        }
        if path.is_file() && has_extension(path, "shp") {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            return Ok(Self::with_files(dir, vec![path.to_path_buf()], None));
        }
        Err(ShapefileError::Format(format!(
            "{} is neither a directory nor a .shp file",
            path.display()
        )))
    }

    /// Read a raw `.shp` or zip archive stream
    ///
    /// The stream is spooled into a scratch directory under `scratch_parent`
    /// (or the system temporary directory) that is removed on close.
    pub fn from_reader<R: Read>(mut reader: R, scratch_parent: Option<&Path>) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                ShapefileError::Format("not a shapefile: stream too short".to_string())
            }
            _ => e.into(),
        })?;

        let scratch = match scratch_parent {
            Some(parent) => tempfile::Builder::new()
                .prefix("shapefile-")
                .tempdir_in(parent)?,
            None => tempfile::Builder::new().prefix("shapefile-").tempdir()?,
        };
        let mut rest = io::Cursor::new(magic).chain(reader);

        if magic == FILE_CODE.to_be_bytes() {
            let target = scratch.path().join("input.shp");
            let mut out = File::create(&target)?;
            io::copy(&mut rest, &mut out)?;
            out.flush()?;
        } else if magic == ZIP_MAGIC {
            let mut spool = tempfile::tempfile_in(scratch.path())?;
            io::copy(&mut rest, &mut spool)?;
            io::Seek::rewind(&mut spool)?;
            let entries = archive::extract(spool, scratch.path())?;
            debug!(entries = entries.len(), "Extracted shapefile archive");
        } else {
            return Err(ShapefileError::Format(
                "not a shapefile: unrecognized header".to_string(),
            ));
        }

        let working_dir = scratch.path().to_path_buf();
        let shapefiles = list_with_extension(&working_dir, "shp")?;
        Ok(Self::with_files(working_dir, shapefiles, Some(scratch)))
    }

    fn with_files(working_dir: PathBuf, shapefiles: Vec<PathBuf>, scratch: Option<TempDir>) -> Self {
        Self {
            working_dir,
            scratch,
            shapefiles,
            current: 0,
            set: None,
            accept: None,
            strict_datum: false,
        }
    }

    /// Only read sets whose schema passes `accept`
    pub fn with_accept(mut self, accept: impl FnMut(&Schema) -> bool + 'static) -> Self {
        self.accept = Some(Box::new(accept));
        self
    }

    /// Fail a set whose projection is not WGS 84 instead of warning
    pub fn with_strict_datum(mut self, strict: bool) -> Self {
        self.strict_datum = strict;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Geometry files that will be read, in order
    pub fn shapefiles(&self) -> &[PathBuf] {
        &self.shapefiles
    }

    /// Schema of every attribute file in the working directory
    pub fn enumerate_schemata(&self) -> Result<Vec<Schema>> {
        let mut schemata = Vec::new();
        for dbf in list_with_extension(&self.working_dir, "dbf")? {
            let mut reader = DbfReader::new(BufReader::new(File::open(&dbf)?))?;
            if let Some(stem) = file_stem(&dbf) {
                reader.schema_mut().name = Some(stem);
            }
            schemata.push(reader.schema().clone());
        }
        Ok(schemata)
    }

    /// Next schema or feature, `None` once every set is exhausted
    pub fn read(&mut self) -> Result<Option<InputItem>> {
        while self.current < self.shapefiles.len() {
            if self.set.is_none() {
                let path = &self.shapefiles[self.current];
                match SetReader::open(path, self.strict_datum) {
                    Ok(set) => self.set = Some(set),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable shapefile");
                        self.current += 1;
                        return Err(e);
                    }
                }
            }
            let Some(set) = self.set.as_mut() else {
                continue;
            };

            let next = set.next_item();
            match next {
                Ok(Some(InputItem::Schema(schema))) => {
                    if let Some(accept) = self.accept.as_mut() {
                        if !accept(&schema) {
                            debug!(schema = schema.label(), "Schema rejected, skipping set");
                            self.advance();
                            continue;
                        }
                    }
                    return Ok(Some(InputItem::Schema(schema)));
                }
                Ok(Some(item)) => return Ok(Some(item)),
                Ok(None) => self.advance(),
                Err(e) => {
                    self.advance();
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    fn advance(&mut self) {
        self.set = None;
        self.current += 1;
    }

    /// Release open files and remove any scratch directory
    pub fn close(mut self) -> Result<()> {
        self.set = None;
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Iterator for ShapefileInput {
    type Item = Result<InputItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

/// One `.shp` with its optional `.dbf` and `.prj`
struct SetReader {
    name: String,
    shapes: ShapefileReader<BufReader<File>>,
    attributes: Option<DbfReader<BufReader<File>>>,
    pending_schema: Option<Schema>,
}

impl SetReader {
    fn open(shp: &Path, strict_datum: bool) -> Result<Self> {
        let name = file_stem(shp).unwrap_or_default();

        if let Some(prj_path) = companion(shp, "prj") {
            check_datum(&prj_path, strict_datum)?;
        }

        let mut pending_schema = None;
        let attributes = match companion(shp, "dbf") {
            Some(dbf_path) => {
                let mut dbf = DbfReader::new(BufReader::new(File::open(&dbf_path)?))?;
                match dbf.next_item()? {
                    Some(AttributeItem::Schema(schema)) => {
                        pending_schema = Some(schema.with_name(name.clone()));
                    }
                    _ => {
                        return Err(ShapefileError::Format(format!(
                            "schema is not the first item of {}",
                            dbf_path.display()
                        )))
                    }
                }
                Some(dbf)
            }
            None => None,
        };

        let shapes = ShapefileReader::new(BufReader::new(File::open(shp)?))?;
        info!(
            name = %name,
            shape_type = %shapes.shape_type(),
            attributes = attributes.is_some(),
            "Reading shapefile"
        );
        Ok(Self {
            name,
            shapes,
            attributes,
            pending_schema,
        })
    }

    fn next_item(&mut self) -> Result<Option<InputItem>> {
        if let Some(schema) = self.pending_schema.take() {
            return Ok(Some(InputItem::Schema(schema)));
        }

        let mut feature = match self.attributes.as_mut() {
            Some(dbf) => match dbf.read_row()? {
                Some(row) => row,
                None => {
                    if self.shapes.read_record()?.is_some() {
                        warn!(name = %self.name, "Attribute rows ended before geometry records");
                    }
                    return Ok(None);
                }
            },
            None => Feature::new(),
        };

        match self.shapes.read_record()? {
            Some(record) => {
                feature.geometry = record.geometry;
                Ok(Some(InputItem::Feature(feature)))
            }
            None => {
                if self.attributes.is_some() {
                    warn!(name = %self.name, "Geometry records ended before attribute rows");
                }
                Ok(None)
            }
        }
    }
}

fn check_datum(path: &Path, strict: bool) -> Result<()> {
    let text = String::from_utf8_lossy(&fs::read(path)?).into_owned();
    match prj::parse(&text) {
        Ok(root) => match prj::geographic_datum(&root) {
            Some(datum) if !prj::is_wgs84(datum) => {
                if strict {
                    return Err(ShapefileError::Format(format!(
                        "{} uses datum {datum}, expected WGS 84",
                        path.display()
                    )));
                }
                warn!(path = %path.display(), datum, "Shapefile is not in the WGS 84 datum");
            }
            Some(_) => {}
            None => debug!(path = %path.display(), "Projection declares no geographic system"),
        },
        Err(e) if strict => return Err(e),
        Err(e) => warn!(path = %path.display(), error = %e, "Unreadable projection file"),
    }
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Sibling file with the same stem, lower-case extension first
fn companion(shp: &Path, extension: &str) -> Option<PathBuf> {
    [extension.to_ascii_lowercase(), extension.to_ascii_uppercase()]
        .into_iter()
        .map(|ext| shp.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
