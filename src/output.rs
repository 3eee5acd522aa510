//! Output types: per-page results and the final artifact of a request.

use crate::config::OutputFormat;
use crate::error::{ConvertError, PageError};
use crate::pipeline::archive::write_zip;
use serde::Serialize;

/// Filename of the document produced by images→document.
pub const DOCUMENT_FILENAME: &str = "images.pdf";
/// MIME type of the document produced by images→document.
pub const DOCUMENT_MIME: &str = "application/pdf";
/// Filename of the archive produced by document→images.
pub const ARCHIVE_FILENAME: &str = "pages.zip";
/// MIME type of the archive produced by document→images.
pub const ARCHIVE_MIME: &str = "application/zip";

/// How the bytes of an [`EncodedPage`] are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// A complete PNG file.
    Png,
    /// A complete JPEG file. Also embeddable in a PDF as-is (`DCTDecode`).
    Jpeg,
    /// zlib-compressed 8-bit RGB samples (`FlateDecode`), with an optional
    /// zlib-compressed 8-bit alpha plane for a soft mask.
    FlateRgb { alpha: Option<Vec<u8>> },
}

/// A successfully processed page or image.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 0-based job index; determines final ordering.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
}

/// Outcome of one page job. Exactly one exists per job once the pool drains.
#[derive(Debug, Clone)]
pub enum PageResult {
    Ok(EncodedPage),
    Failed { index: usize, cause: PageError },
}

impl PageResult {
    /// The 0-based job index this result belongs to.
    pub fn index(&self) -> usize {
        match self {
            PageResult::Ok(page) => page.index,
            PageResult::Failed { index, .. } => *index,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, PageResult::Ok(_))
    }
}

/// One named file inside an [`OutputArtifact::Archive`].
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub filename: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// The complete output of a request. Never produced partially.
#[derive(Debug, Clone)]
pub enum OutputArtifact {
    Single {
        bytes: Vec<u8>,
        mime: String,
        filename: String,
    },
    /// Entries in ascending page order.
    Archive { entries: Vec<ArchiveEntry> },
}

impl OutputArtifact {
    /// Build the artifact for ordered rasterised pages.
    ///
    /// One page yields `Single`; more yield `Archive` with entries named
    /// `page_{n}.{ext}` (1-based, ascending). Pages must already be sorted.
    pub fn from_pages(pages: Vec<EncodedPage>, format: OutputFormat) -> Self {
        let ext = format.extension();
        if pages.len() == 1 {
            let page = pages.into_iter().next().map(|p| p.bytes).unwrap_or_default();
            return OutputArtifact::Single {
                bytes: page,
                mime: format.mime().to_string(),
                filename: page_filename(0, ext),
            };
        }

        let entries = pages
            .into_iter()
            .enumerate()
            .map(|(position, page)| ArchiveEntry {
                filename: page_filename(position, ext),
                bytes: page.bytes,
            })
            .collect();
        OutputArtifact::Archive { entries }
    }

    /// MIME type of the serialised artifact.
    pub fn mime(&self) -> &str {
        match self {
            OutputArtifact::Single { mime, .. } => mime,
            OutputArtifact::Archive { .. } => ARCHIVE_MIME,
        }
    }

    /// Download filename of the serialised artifact.
    pub fn filename(&self) -> &str {
        match self {
            OutputArtifact::Single { filename, .. } => filename,
            OutputArtifact::Archive { .. } => ARCHIVE_FILENAME,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, OutputArtifact::Archive { .. })
    }

    /// Number of pages or images carried.
    pub fn page_count(&self) -> usize {
        match self {
            OutputArtifact::Single { .. } => 1,
            OutputArtifact::Archive { entries } => entries.len(),
        }
    }

    /// Serialise to the bytes sent to the caller; archives become a zip.
    pub fn into_bytes(self) -> Result<Vec<u8>, ConvertError> {
        match self {
            OutputArtifact::Single { bytes, .. } => Ok(bytes),
            OutputArtifact::Archive { entries } => write_zip(&entries),
        }
    }
}

/// `page_{position+1}.{ext}`.
pub fn page_filename(position: usize, ext: &str) -> String {
    format!("page_{}.{}", position + 1, ext)
}
