//! Multi-page artifact packaging.
//!
//! Page images are already compressed, so entries are stored rather than
//! deflated again.

use crate::error::ConvertError;
use crate::output::ArchiveEntry;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Serialise archive entries into a zip file, preserving entry order.
pub fn write_zip(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ConvertError> {
    let zip_err = |e: zip::result::ZipError| ConvertError::Internal(format!("archive: {e}"));

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        zip.start_file(entry.filename.as_str(), options)
            .map_err(zip_err)?;
        zip.write_all(&entry.bytes)
            .map_err(|e| ConvertError::Internal(format!("archive: {e}")))?;
    }
    let cursor = zip.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}
