//! Request inputs: uploaded images, the uploaded document, and the
//! [`ConversionRequest`] that ties them to a direction.
//!
//! Inputs may arrive as bytes (library callers, tests) or as files already
//! streamed into the request's scratch area (the HTTP surface). Documents
//! are staged to disk before rendering because pdfium and poppler open
//! documents by path, and their `%PDF` magic bytes are checked first so a
//! stray upload produces a validation error instead of a renderer failure.

use crate::config::RasterOptions;
use crate::error::ConvertError;
use crate::pipeline::scratch::ScratchArea;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const STAGED_DOCUMENT: &str = "input.pdf";

/// The two accepted raster input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// Kind from a declared MIME type (parameters such as `; charset` are ignored).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageKind::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageKind::Jpeg),
            _ => None,
        }
    }

    /// Kind from a filename extension.
    pub fn from_extension(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageKind::Png),
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            _ => None,
        }
    }

    /// Resolve an upload's kind: the declared MIME type wins, the filename
    /// extension is the fallback.
    pub fn detect(mime: Option<&str>, filename: Option<&str>) -> Option<Self> {
        mime.and_then(Self::from_mime)
            .or_else(|| filename.and_then(Self::from_extension))
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Where an image's bytes live.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    /// A file inside the request's scratch area.
    File(PathBuf),
}

/// One uploaded image, in upload order.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub kind: ImageKind,
    pub source: ImageSource,
}

impl RawImage {
    pub fn from_bytes(kind: ImageKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            source: ImageSource::Bytes(bytes.into()),
        }
    }

    pub fn from_file(kind: ImageKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: ImageSource::File(path.into()),
        }
    }

    /// Load the raw encoded bytes. Blocking.
    pub fn read_bytes(&self) -> std::io::Result<std::borrow::Cow<'_, [u8]>> {
        match &self.source {
            ImageSource::Bytes(bytes) => Ok(std::borrow::Cow::Borrowed(bytes)),
            ImageSource::File(path) => std::fs::read(path).map(std::borrow::Cow::Owned),
        }
    }
}

/// Where the uploaded document lives.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes(Vec<u8>),
    /// A file on disk. If it lies outside the scratch area it is adopted by
    /// the area and removed when the request ends.
    File(PathBuf),
    /// A file the caller keeps ownership of. Read in place, never removed.
    Borrowed(PathBuf),
}

/// A staged document ready for the renderer.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    pub path: PathBuf,
    pub page_count: usize,
}

/// A validated conversion request.
#[derive(Debug, Clone)]
pub enum ConversionRequest {
    ImagesToDocument {
        images: Vec<RawImage>,
    },
    DocumentToImages {
        document: DocumentSource,
        options: RasterOptions,
    },
}

impl ConversionRequest {
    /// Label used in logs.
    pub fn direction(&self) -> &'static str {
        match self {
            ConversionRequest::ImagesToDocument { .. } => "images-to-document",
            ConversionRequest::DocumentToImages { .. } => "document-to-images",
        }
    }
}

/// Put the document inside (or under the ownership of) `area` and verify
/// it looks like a PDF. Returns the path the renderer should open.
pub async fn stage_document(
    area: &mut ScratchArea,
    source: DocumentSource,
) -> Result<PathBuf, ConvertError> {
    let path = match source {
        DocumentSource::Bytes(bytes) => {
            if bytes.is_empty() {
                return Err(ConvertError::NoDocument);
            }
            let path = area.child(STAGED_DOCUMENT);
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|source| ConvertError::Staging {
                    path: path.clone(),
                    source,
                })?;
            path
        }
        DocumentSource::File(path) => {
            area.adopt(&path);
            path
        }
        DocumentSource::Borrowed(path) => path,
    };

    let check = path.clone();
    tokio::task::spawn_blocking(move || check_pdf_magic(&check))
        .await
        .map_err(|e| ConvertError::Internal(format!("staging task failed: {e}")))??;

    debug!("Staged document {}", path.display());
    Ok(path)
}

/// Validate that the file at `path` begins with `%PDF`.
pub fn check_pdf_magic(path: &Path) -> Result<(), ConvertError> {
    let mut file = std::fs::File::open(path).map_err(|source| ConvertError::Staging {
        path: path.to_path_buf(),
        source,
    })?;
    let mut magic = Vec::with_capacity(PDF_MAGIC.len());
    file.by_ref()
        .take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .map_err(|source| ConvertError::Staging {
            path: path.to_path_buf(),
            source,
        })?;

    if magic.is_empty() {
        return Err(ConvertError::NoDocument);
    }
    if magic.as_slice() != PDF_MAGIC {
        return Err(ConvertError::NotAPdf { magic });
    }
    Ok(())
}
