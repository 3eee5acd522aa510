//! Page rasterisation behind the [`PageRenderer`] capability.
//!
//! The pipeline never names a rendering backend. It holds an
//! `Arc<dyn PageRenderer>` selected from [`RendererKind`] at startup:
//!
//! * [`PdfiumRenderer`] binds the pdfium library once and renders in-process.
//! * [`PopplerRenderer`] shells out to `pdfinfo` / `pdftoppm`, writing page
//!   images into the request's scratch area.
//!
//! Both are blocking and are only ever called from inside the job pool's
//! `spawn_blocking` workers (or from `spawn_blocking` directly for the page
//! count), never from an async worker thread.
//!
//! `max_rendered_pixels` caps the longest edge regardless of scale, so an A0
//! poster at scale 8 cannot exhaust memory.

use crate::config::{PipelineConfig, RendererKind, POINTS_PER_INCH};
use crate::error::{ConvertError, PageError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

/// Rasterises pages of a staged document.
pub trait PageRenderer: Send + Sync {
    /// Backend name, for logs and error messages.
    fn name(&self) -> &'static str;

    /// Number of pages in the document at `document`.
    ///
    /// Load failures are validation errors: the document is the caller's.
    fn page_count(&self, document: &Path) -> Result<usize, ConvertError>;

    /// Render page `index` (0-based) at `scale` × its size in points.
    ///
    /// `scratch` is the request's scratch area, for backends that need
    /// intermediate files.
    fn render_page(
        &self,
        document: &Path,
        index: usize,
        scale: f32,
        scratch: &Path,
    ) -> Result<DynamicImage, PageError>;
}

/// Build the renderer selected by `config.renderer`.
pub fn renderer_from_config(config: &PipelineConfig) -> Result<Arc<dyn PageRenderer>, ConvertError> {
    let renderer: Arc<dyn PageRenderer> = match config.renderer {
        RendererKind::Pdfium => Arc::new(PdfiumRenderer::bind(
            config.pdfium_library.as_deref(),
            config.max_rendered_pixels,
        )?),
        RendererKind::Poppler => Arc::new(PopplerRenderer::new(config.max_rendered_pixels)?),
    };
    info!("Page renderer: {}", renderer.name());
    Ok(renderer)
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// In-process renderer backed by pdfium.
///
/// Shared by every page worker; pdfium-render's `sync` feature makes the
/// bound library `Send + Sync` and serialises calls into it.
pub struct PdfiumRenderer {
    pdfium: Pdfium,
    max_pixels: u32,
}

impl PdfiumRenderer {
    /// Bind pdfium from `library` (a file or a directory containing the
    /// platform library) or, if `None`, from the system library path.
    pub fn bind(library: Option<&Path>, max_pixels: u32) -> Result<Self, ConvertError> {
        let bindings = match library {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ConvertError::RendererUnavailable {
            renderer: "pdfium".into(),
            detail: format!("{:?}", e),
        })?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
            max_pixels,
        })
    }

    fn load<'a>(&'a self, document: &Path) -> Result<PdfDocument<'a>, ConvertError> {
        self.pdfium
            .load_pdf_from_file(document, None)
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.contains("Password") || detail.contains("password") {
                    ConvertError::PasswordProtected
                } else {
                    ConvertError::UnreadableDocument { detail }
                }
            })
    }
}

impl PageRenderer for PdfiumRenderer {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn page_count(&self, document: &Path) -> Result<usize, ConvertError> {
        let doc = self.load(document)?;
        let count = doc.pages().len() as usize;
        debug!("pdfium: {} has {} pages", document.display(), count);
        Ok(count)
    }

    fn render_page(
        &self,
        document: &Path,
        index: usize,
        scale: f32,
        _scratch: &Path,
    ) -> Result<DynamicImage, PageError> {
        let render_err = |detail: String| PageError::Render { index, detail };

        // A loaded document borrows `self.pdfium` and cannot be parked
        // between jobs, so each page opens its own handle. pdfium parses
        // objects lazily: opening reads the trailer and xref, and only this
        // page's objects are parsed when it is rendered.
        let doc = self.load(document).map_err(|e| render_err(e.to_string()))?;
        let pages = doc.pages();
        if index >= pages.len() as usize {
            return Err(render_err(format!(
                "page index out of range (document has {} pages)",
                pages.len()
            )));
        }
        let page = pages
            .get(index as u16)
            .map_err(|e| render_err(format!("{:?}", e)))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| render_err(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

// ── poppler ──────────────────────────────────────────────────────────────

/// Subprocess renderer backed by poppler-utils.
pub struct PopplerRenderer {
    pdfinfo: PathBuf,
    pdftoppm: PathBuf,
    max_pixels: u32,
}

impl PopplerRenderer {
    /// Locate `pdfinfo` and `pdftoppm` on `PATH`.
    pub fn new(max_pixels: u32) -> Result<Self, ConvertError> {
        let renderer = Self {
            pdfinfo: PathBuf::from("pdfinfo"),
            pdftoppm: PathBuf::from("pdftoppm"),
            max_pixels,
        };
        for tool in [&renderer.pdfinfo, &renderer.pdftoppm] {
            Command::new(tool)
                .arg("-v")
                .output()
                .map_err(|e| ConvertError::RendererUnavailable {
                    renderer: "poppler".into(),
                    detail: format!("{}: {}", tool.display(), e),
                })?;
        }
        Ok(renderer)
    }
}

impl PageRenderer for PopplerRenderer {
    fn name(&self) -> &'static str {
        "poppler"
    }

    fn page_count(&self, document: &Path) -> Result<usize, ConvertError> {
        let output = Command::new(&self.pdfinfo)
            .arg(document)
            .output()
            .map_err(|e| ConvertError::RendererUnavailable {
                renderer: "poppler".into(),
                detail: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if stderr.to_ascii_lowercase().contains("password") {
                return Err(ConvertError::PasswordProtected);
            }
            return Err(ConvertError::UnreadableDocument {
                detail: stderr.trim().to_string(),
            });
        }

        parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ConvertError::UnreadableDocument {
                detail: "pdfinfo reported no page count".into(),
            }
        })
    }

    fn render_page(
        &self,
        document: &Path,
        index: usize,
        scale: f32,
        scratch: &Path,
    ) -> Result<DynamicImage, PageError> {
        let render_err = |detail: String| PageError::Render { index, detail };
        let page_num = (index + 1).to_string();
        let dpi = (POINTS_PER_INCH * scale).round().max(1.0) as u32;
        let stem = scratch.join(format!("page-{}", page_num));

        let output = Command::new(&self.pdftoppm)
            .args(["-f", &page_num, "-l", &page_num])
            .args(["-r", &dpi.to_string()])
            .arg("-png")
            .arg("-singlefile")
            .arg(document)
            .arg(&stem)
            .output()
            .map_err(|e| render_err(e.to_string()))?;
        if !output.status.success() {
            return Err(render_err(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let produced = stem.with_extension("png");
        let image = image::open(&produced).map_err(|e| render_err(e.to_string()))?;
        // The intermediate is not needed once decoded; the area removes leftovers.
        let _ = std::fs::remove_file(&produced);

        let image = if image.width().max(image.height()) > self.max_pixels {
            image.resize(
                self.max_pixels,
                self.max_pixels,
                image::imageops::FilterType::Triangle,
            )
        } else {
            image
        };
        debug!(
            "Rendered page {} at {} dpi → {}x{} px",
            page_num,
            dpi,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

/// Extract the `Pages:` value from `pdfinfo` output.
fn parse_pdfinfo_pages(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdfinfo_page_count_is_parsed() {
        let stdout = "Title:          Report\nProducer:       LaTeX\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_pages(stdout), Some(12));
        assert_eq!(parse_pdfinfo_pages("Pages:  0\n"), Some(0));
        assert_eq!(parse_pdfinfo_pages("Title: x\n"), None);
        assert_eq!(parse_pdfinfo_pages("Pages: many\n"), None);
    }

    #[test]
    fn renderers_can_be_shared_across_workers() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<PdfiumRenderer>();
        assert_send_sync::<PopplerRenderer>();
        assert_send_sync::<Arc<dyn PageRenderer>>();
    }

    #[test]
    fn missing_pdfium_library_is_reported() {
        let err = PdfiumRenderer::bind(Some(Path::new("/nonexistent/libpdfium.so")), 1000)
            .err()
            .expect("binding a missing library must fail");
        assert!(matches!(
            err,
            ConvertError::RendererUnavailable { ref renderer, .. } if renderer == "pdfium"
        ));
    }
}
