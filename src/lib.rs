//! # pagemill
//!
//! Convert images into a paginated PDF document, and PDF pages into images.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images→document                         document→images
//!  │                                       │
//!  ├─ 1. Scratch  one area per request     ├─ 1. Scratch  one area per request
//!  ├─ 2. Pool     decode + prepare XObject ├─ 2. Stage    %PDF check, page count
//!  ├─ 3. Collect  job order, fail fast     ├─ 3. Pool     render + encode per page
//!  └─ 4. Document one full-bleed page each ├─ 4. Collect  job order, fail fast
//!                                          └─ 5. Output   one image, or pages.zip
//! ```
//!
//! Per-item work runs on a bounded job pool whose ceiling is set per
//! direction (`images_concurrency`, `pages_concurrency`). Results are put
//! back into input order before assembly. If any item fails the request
//! fails with the lowest failing index, and no partial artifact is produced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagemill::{CancelToken, ConversionPipeline, ConversionRequest, ImageKind, PipelineConfig, RawImage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = ConversionPipeline::from_config(PipelineConfig::default())?;
//!     let request = ConversionRequest::ImagesToDocument {
//!         images: vec![RawImage::from_bytes(ImageKind::Png, std::fs::read("scan.png")?)],
//!     };
//!     let artifact = pipeline.convert(request, &CancelToken::new()).await?;
//!     let filename = artifact.filename().to_string();
//!     std::fs::write(filename, artifact.into_bytes()?)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | With `server`, enables the `pagemill` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | Enables the HTTP surface in [`server`] (axum + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! pagemill = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OutputFormat, PipelineConfig, PipelineConfigBuilder, RasterOptions, RendererKind};
pub use convert::{write_artifact, ConversionPipeline};
pub use error::{ConvertError, ErrorKind, PageError};
pub use output::{ArchiveEntry, EncodedPage, Encoding, OutputArtifact, PageResult};
pub use pipeline::input::{ConversionRequest, DocumentSource, ImageKind, ImageSource, RawImage};
pub use pipeline::pool::{CancelToken, JobPool, PageJob};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, PopplerRenderer};
pub use pipeline::scratch::{ScratchArea, ScratchLease, ScratchSpace};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
