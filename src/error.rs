//! Error types for the pagemill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`]: **Fatal**: the request cannot produce an artifact
//!   (empty upload, zero-page document, scratch directory unavailable, a page
//!   failed). Returned as `Err(ConvertError)` from
//!   [`crate::convert::ConversionPipeline`].
//!
//! * [`PageError`]: **Captured**: a single page or image failed inside a
//!   worker. Stored in [`crate::output::PageResult::Failed`] so the job pool
//!   never aborts sibling jobs; the assembler turns the lowest-index failure
//!   into [`ConvertError::PageFailed`].
//!
//! Every `ConvertError` belongs to one [`ErrorKind`], which is what the HTTP
//! layer maps to a status code.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Reported as a client error; retrying will not help.
    Validation,
    /// A page or image failed to rasterise, decode, or encode.
    Render,
    /// Scratch space, staging, or renderer binding failed.
    Resource,
    /// The caller cancelled the request before it completed.
    Cancelled,
    /// Invariant violation inside the pipeline or an invalid configuration.
    Internal,
}

/// All fatal errors returned by the pagemill library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Images→document request carried no images.
    #[error("No images supplied; at least one PNG or JPEG image is required")]
    NoImages,

    /// An uploaded image is neither PNG nor JPEG.
    #[error("Unsupported image type '{declared}' for upload #{position}; expected image/png or image/jpeg")]
    UnsupportedImageKind { position: usize, declared: String },

    /// Document→images request carried no document.
    #[error("No document supplied")]
    NoDocument,

    /// The staged document does not start with the `%PDF` magic bytes.
    #[error("Uploaded file is not a PDF document (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The document is encrypted.
    #[error("PDF document is encrypted and cannot be rasterised")]
    PasswordProtected,

    /// The renderer could not open the document.
    #[error("PDF document could not be loaded: {detail}")]
    UnreadableDocument { detail: String },

    /// The document loaded but has no pages.
    #[error("PDF document has no pages")]
    ZeroPages,

    /// The multipart upload could not be read.
    #[error("Upload could not be read: {detail}")]
    UnreadableUpload { detail: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// The lowest-index page that failed; aborts the whole request.
    #[error("Conversion failed at page {}: {cause}", index + 1)]
    PageFailed { index: usize, cause: PageError },

    // ── Resource errors ───────────────────────────────────────────────────
    /// The per-request scratch directory could not be created.
    #[error("Failed to create scratch directory under '{root}': {source}")]
    ScratchCreate {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The per-request scratch directory could not be removed.
    #[error("Failed to remove scratch artifact '{path}': {source}")]
    ScratchRelease {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input could not be written into or read from the scratch area.
    #[error("Failed to stage '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write a converted artifact to its destination.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured page renderer could not be initialised.
    #[error("Page renderer '{renderer}' is unavailable: {detail}")]
    RendererUnavailable { renderer: String, detail: String },

    // ── Control flow ──────────────────────────────────────────────────────
    /// The request was cancelled; no artifact is produced.
    #[error("Conversion cancelled after {completed}/{total} pages")]
    Cancelled { completed: usize, total: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (pipeline invariant violated).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// The [`ErrorKind`] this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::NoImages
            | ConvertError::UnsupportedImageKind { .. }
            | ConvertError::NoDocument
            | ConvertError::NotAPdf { .. }
            | ConvertError::PasswordProtected
            | ConvertError::UnreadableDocument { .. }
            | ConvertError::ZeroPages
            | ConvertError::UnreadableUpload { .. } => ErrorKind::Validation,
            ConvertError::PageFailed { .. } => ErrorKind::Render,
            ConvertError::ScratchCreate { .. }
            | ConvertError::ScratchRelease { .. }
            | ConvertError::Staging { .. }
            | ConvertError::OutputWrite { .. }
            | ConvertError::RendererUnavailable { .. } => ErrorKind::Resource,
            ConvertError::Cancelled { .. } => ErrorKind::Cancelled,
            ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short summary used as the `error` field of machine-readable responses.
    pub fn summary(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "Invalid input",
            ErrorKind::Render => "Conversion failed",
            ErrorKind::Resource => "Server resource error",
            ErrorKind::Cancelled => "Conversion cancelled",
            ErrorKind::Internal => "Internal error",
        }
    }

    /// `true` if the caller sent bad input.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// A captured failure for a single page or image.
///
/// `index` is the 0-based job index; messages report it 1-based.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Input image bytes could not be decoded.
    #[error("image #{}: decode failed: {detail}", index + 1)]
    Decode { index: usize, detail: String },

    /// Page rasterisation failed.
    #[error("page {}: rasterisation failed: {detail}", index + 1)]
    Render { index: usize, detail: String },

    /// The raster could not be encoded to the target format.
    #[error("page {}: encoding failed: {detail}", index + 1)]
    Encode { index: usize, detail: String },

    /// The worker panicked; the panic was contained at the pool boundary.
    #[error("page {}: worker panicked: {detail}", index + 1)]
    WorkerPanicked { index: usize, detail: String },
}

impl PageError {
    /// The 0-based job index this failure belongs to.
    pub fn index(&self) -> usize {
        match self {
            PageError::Decode { index, .. }
            | PageError::Render { index, .. }
            | PageError::Encode { index, .. }
            | PageError::WorkerPanicked { index, .. } => *index,
        }
    }
}
