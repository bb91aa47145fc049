// SPDX-License-Identifier: MIT
//! Zip bundling of shapefile sets

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, ShapefileError};

/// Extract every file entry of an archive into `dir`
///
/// Directory structure inside the archive is flattened; entries whose names
/// would escape the archive root are skipped. Returns the extracted paths.
pub fn extract<R: Read + Seek>(reader: R, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut extracted = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        else {
            warn!(entry = entry.name(), "Skipping archive entry with unsafe name");
            continue;
        };
        let target = dir.join(name);
        let mut out = BufWriter::new(File::create(&target)?);
        io::copy(&mut entry, &mut out)?;
        out.flush()?;
        debug!(path = %target.display(), "Extracted archive entry");
        extracted.push(target);
    }
    Ok(extracted)
}

/// Write `files` into a zip archive under their file names
///
/// With `prefix`, entries are placed in that folder inside the archive.
pub fn bundle<W, P>(out: W, files: &[P], prefix: Option<&str>, compress: bool) -> Result<W>
where
    W: Write + Seek,
    P: AsRef<Path>,
{
    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default().compression_method(method);
    let mut zip = ZipWriter::new(out);
    for file in files {
        let path = file.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ShapefileError::Format(format!("cannot bundle {}", path.display()))
            })?;
        let entry = match prefix {
            Some(prefix) => format!("{}/{name}", prefix.trim_end_matches('/')),
            None => name.to_string(),
        };
        zip.start_file(entry, options)?;
        io::copy(&mut File::open(path)?, &mut zip)?;
    }
    Ok(zip.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_bundle_then_extract() {
        let src = TempDir::new().unwrap();
        let a = src.path().join("roads.shp");
        let b = src.path().join("roads.dbf");
        std::fs::write(&a, b"shape bytes").unwrap();
        std::fs::write(&b, b"table bytes").unwrap();

        let archive = bundle(Cursor::new(Vec::new()), &[&a, &b], Some("layers"), true).unwrap();

        let dst = TempDir::new().unwrap();
        let mut archive = archive;
        archive.set_position(0);
        let extracted = extract(archive, dst.path()).unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(std::fs::read(dst.path().join("roads.shp")).unwrap(), b"shape bytes");
        assert_eq!(std::fs::read(dst.path().join("roads.dbf")).unwrap(), b"table bytes");
    }

    #[test]
    fn test_not_an_archive() {
        let dst = TempDir::new().unwrap();
        let result = extract(Cursor::new(b"plain text".to_vec()), dst.path());
        assert!(matches!(result, Err(ShapefileError::Archive(_))));
    }
}
