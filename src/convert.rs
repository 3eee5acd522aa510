//! Request-level conversion entry points.
//!
//! [`ConversionPipeline`] owns everything that outlives a single request:
//! the page renderer, the scratch space, and the configuration. Each call to
//! [`ConversionPipeline::convert`] acquires one scratch area, runs one
//! direction to completion, releases the area on every exit path, and
//! returns either a complete [`OutputArtifact`] or an error. Nothing partial
//! is ever returned.

use crate::config::{OutputFormat, PipelineConfig, RasterOptions};
use crate::error::{ConvertError, PageError};
use crate::output::{EncodedPage, Encoding, OutputArtifact, DOCUMENT_FILENAME, DOCUMENT_MIME};
use crate::pipeline::assemble::{assemble, collect_ordered};
use crate::pipeline::input::{
    stage_document, ConversionRequest, DocumentHandle, DocumentSource, ImageKind, RawImage,
};
use crate::pipeline::pool::{CancelToken, JobPool, PageJob};
use crate::pipeline::render::{renderer_from_config, PageRenderer};
use crate::pipeline::scratch::{ScratchArea, ScratchSpace};
use crate::pipeline::{document, encode};
use crate::progress::ProgressCallback;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

const DOCUMENT_TITLE: &str = "Images";

/// Long-lived conversion service shared by all requests.
pub struct ConversionPipeline {
    config: PipelineConfig,
    renderer: Arc<dyn PageRenderer>,
    scratch: ScratchSpace,
    progress: Option<ProgressCallback>,
}

impl ConversionPipeline {
    /// Build a pipeline around an explicit renderer.
    pub fn new(config: PipelineConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        let scratch = match &config.scratch_root {
            Some(root) => ScratchSpace::new(root),
            None => ScratchSpace::in_temp_dir(),
        };
        Self {
            config,
            renderer,
            scratch,
            progress: None,
        }
    }

    /// Build a pipeline with the renderer selected by `config.renderer`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ConvertError> {
        let renderer = renderer_from_config(&config)?;
        Ok(Self::new(config, renderer))
    }

    /// Receive per-page progress events for every request.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Arc<dyn PageRenderer> {
        &self.renderer
    }

    /// Create the scratch area for a new request.
    ///
    /// Callers that stream uploads to disk acquire the area first, write
    /// into it, then hand it to [`ConversionPipeline::convert_in`].
    pub fn acquire_scratch(&self) -> Result<ScratchArea, ConvertError> {
        self.scratch.acquire()
    }

    /// Run `request` in a fresh scratch area.
    pub async fn convert(
        &self,
        request: ConversionRequest,
        cancel: &CancelToken,
    ) -> Result<OutputArtifact, ConvertError> {
        let area = self.acquire_scratch()?;
        self.convert_in(area, request, cancel).await
    }

    /// Run `request` in `area`, then release the area.
    ///
    /// A release failure after a successful run is returned as
    /// [`ConvertError::ScratchRelease`]; after a failed run the original
    /// error wins and the release failure is logged.
    pub async fn convert_in(
        &self,
        mut area: ScratchArea,
        request: ConversionRequest,
        cancel: &CancelToken,
    ) -> Result<OutputArtifact, ConvertError> {
        let direction = request.direction();
        let start = Instant::now();
        info!("Starting {} in {}", direction, area.path().display());

        let outcome = self.run(&mut area, request, cancel).await;
        let released = area.release();

        match (outcome, released) {
            (Ok(artifact), Ok(())) => {
                info!(
                    "{} finished: {} page(s) in {}ms",
                    direction,
                    artifact.page_count(),
                    start.elapsed().as_millis()
                );
                Ok(artifact)
            }
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(e), Ok(())) => {
                info!("{} failed after {}ms: {}", direction, start.elapsed().as_millis(), e);
                Err(e)
            }
            (Err(e), Err(release_err)) => {
                error!("{} failed ({}); scratch release also failed: {}", direction, e, release_err);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        area: &mut ScratchArea,
        request: ConversionRequest,
        cancel: &CancelToken,
    ) -> Result<OutputArtifact, ConvertError> {
        match request {
            ConversionRequest::ImagesToDocument { images } => {
                self.images_to_document(images, cancel).await
            }
            ConversionRequest::DocumentToImages { document, options } => {
                self.document_to_images(area, document, options, cancel).await
            }
        }
    }

    /// Decode and embed each image as one page, in upload order.
    pub async fn images_to_document(
        &self,
        images: Vec<RawImage>,
        cancel: &CancelToken,
    ) -> Result<OutputArtifact, ConvertError> {
        if images.is_empty() {
            return Err(ConvertError::NoImages);
        }
        let total = images.len();
        let quality = self.config.embed_jpeg_quality;

        let pool = JobPool::new("images", self.config.images_concurrency);
        let results = pool
            .run(
                PageJob::sequence(images),
                move |job| embed_image(job, quality),
                cancel,
                self.progress.as_ref(),
            )
            .await?;
        let pages = collect_ordered(results, total)?;

        let bytes = tokio::task::spawn_blocking(move || {
            let mut doc = document::build_document(&pages)?;
            document::stamp_metadata(&mut doc, DOCUMENT_TITLE);
            document::to_bytes(&mut doc)
        })
        .await
        .map_err(|e| ConvertError::Internal(format!("document assembly task failed: {e}")))??;
        debug!("Document serialised: {} bytes", bytes.len());

        Ok(OutputArtifact::Single {
            bytes,
            mime: DOCUMENT_MIME.to_string(),
            filename: DOCUMENT_FILENAME.to_string(),
        })
    }

    /// Rasterise every page of the document into `options.format`.
    pub async fn document_to_images(
        &self,
        area: &mut ScratchArea,
        source: DocumentSource,
        options: RasterOptions,
        cancel: &CancelToken,
    ) -> Result<OutputArtifact, ConvertError> {
        let handle = self.open_document(area, source).await?;
        info!(
            "Rasterising {} pages as {:?} at scale {}",
            handle.page_count, options.format, options.scale
        );

        let renderer = Arc::clone(&self.renderer);
        let document = handle.path.clone();
        // Held by the worker, so the area outlives every page job even if
        // this future is dropped mid-render.
        let scratch = area.lease();
        let quality = self.config.output_jpeg_quality;

        let pool = JobPool::new("pages", self.config.pages_concurrency);
        let results = pool
            .run(
                PageJob::sequence(0..handle.page_count),
                move |job| {
                    rasterise_page(
                        renderer.as_ref(),
                        &document,
                        scratch.path(),
                        job.index,
                        options,
                        quality,
                    )
                },
                cancel,
                self.progress.as_ref(),
            )
            .await?;

        assemble(results, handle.page_count, options.format)
    }

    /// Stage the document and read its page count.
    async fn open_document(
        &self,
        area: &mut ScratchArea,
        source: DocumentSource,
    ) -> Result<DocumentHandle, ConvertError> {
        let path = stage_document(area, source).await?;

        let renderer = Arc::clone(&self.renderer);
        let count_path = path.clone();
        let page_count = tokio::task::spawn_blocking(move || renderer.page_count(&count_path))
            .await
            .map_err(|e| ConvertError::Internal(format!("page count task failed: {e}")))??;

        if page_count == 0 {
            return Err(ConvertError::ZeroPages);
        }
        Ok(DocumentHandle { path, page_count })
    }
}

/// Worker for images→document.
fn embed_image(job: PageJob<RawImage>, jpeg_quality: u8) -> Result<EncodedPage, PageError> {
    let index = job.index;
    let decode_err = |detail: String| PageError::Decode { index, detail };

    let raw = job.source.read_bytes().map_err(|e| decode_err(e.to_string()))?;
    let img = image::load_from_memory_with_format(&raw, job.source.kind.image_format())
        .map_err(|e| decode_err(e.to_string()))?;

    let embedded =
        encode::encode_for_embedding(&img, job.source.kind == ImageKind::Jpeg, jpeg_quality)
            .map_err(|e| PageError::Encode {
                index,
                detail: e.to_string(),
            })?;

    Ok(EncodedPage {
        index,
        width: embedded.width,
        height: embedded.height,
        bytes: embedded.bytes,
        encoding: embedded.encoding,
    })
}

/// Worker for document→images.
fn rasterise_page(
    renderer: &dyn PageRenderer,
    document: &Path,
    scratch: &Path,
    index: usize,
    options: RasterOptions,
    jpeg_quality: u8,
) -> Result<EncodedPage, PageError> {
    let img = renderer.render_page(document, index, options.scale, scratch)?;
    let bytes = encode::encode_image(&img, options.format, jpeg_quality).map_err(|e| {
        PageError::Encode {
            index,
            detail: e.to_string(),
        }
    })?;

    Ok(EncodedPage {
        index,
        width: img.width(),
        height: img.height(),
        bytes,
        encoding: match options.format {
            OutputFormat::Png => Encoding::Png,
            OutputFormat::Jpeg => Encoding::Jpeg,
        },
    })
}

/// Write a serialised artifact to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_artifact(artifact: OutputArtifact, path: &Path) -> Result<(), ConvertError> {
    let write_err = |source| ConvertError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let bytes = tokio::task::spawn_blocking(move || artifact.into_bytes())
        .await
        .map_err(|e| ConvertError::Internal(format!("serialisation task failed: {e}")))??;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, &bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
