//! Package archive access
//!
//! Embedded icons are read straight out of the package archive (a zip file).

use bytes::Bytes;
use std::io::{Cursor, Read};
use zip::result::ZipError;
use zip::ZipArchive;

/// Reads single entries out of a package archive
pub trait ArchiveReader: Send + Sync {
    /// Returns the content of `entry_name`, or `None` if the archive has no
    /// such entry
    fn open_entry(&self, archive: &[u8], entry_name: &str) -> std::io::Result<Option<Bytes>>;
}

/// Zip-based archive reader
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiveReader;

impl ZipArchiveReader {
    /// Entry names in package metadata may use either path separator
    fn normalize_entry_name(entry_name: &str) -> String {
        entry_name.trim().replace('\\', "/").trim_start_matches('/').to_string()
    }
}

impl ArchiveReader for ZipArchiveReader {
    fn open_entry(&self, archive: &[u8], entry_name: &str) -> std::io::Result<Option<Bytes>> {
        let name = Self::normalize_entry_name(entry_name);
        let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(zip_to_io)?;

        // Fall back to a case-insensitive match; archive entry casing is not
        // always preserved by packing tools.
        let resolved = if zip.file_names().any(|n| n == name) {
            Some(name)
        } else {
            zip.file_names()
                .find(|n| n.eq_ignore_ascii_case(&name))
                .map(str::to_string)
        };

        let Some(resolved) = resolved else {
            return Ok(None);
        };

        let mut entry = match zip.by_name(&resolved) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(zip_to_io(e)),
        };

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        Ok(Some(Bytes::from(content)))
    }
}

fn zip_to_io(e: ZipError) -> std::io::Error {
    match e {
        ZipError::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
    }
}
