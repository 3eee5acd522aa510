//! Shared fixtures for integration tests.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object};
use pagemill::{CancelToken, ConvertError, PageError, PageRenderer, PipelineConfig};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Renders synthetic pages: 100×50 points scaled by `scale`, page count read
/// with lopdf. Pages listed in `fail_pages` fail to render.
#[derive(Default)]
pub struct StubRenderer {
    pub fail_pages: Vec<usize>,
    pub rendered: AtomicUsize,
}

impl StubRenderer {
    pub fn failing(pages: &[usize]) -> Self {
        Self {
            fail_pages: pages.to_vec(),
            ..Self::default()
        }
    }
}

impl PageRenderer for StubRenderer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn page_count(&self, document: &Path) -> Result<usize, ConvertError> {
        lopdf_page_count(document)
    }

    fn render_page(
        &self,
        _document: &Path,
        index: usize,
        scale: f32,
        scratch: &Path,
    ) -> Result<DynamicImage, PageError> {
        assert!(scratch.is_dir(), "scratch area must exist while rendering");
        if self.fail_pages.contains(&index) {
            return Err(PageError::Render {
                index,
                detail: format!("synthetic failure on page {}", index + 1),
            });
        }
        self.rendered.fetch_add(1, Ordering::SeqCst);
        let width = (100.0 * scale).round() as u32;
        let height = (50.0 * scale).round() as u32;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([index as u8, 128, 255]),
        )))
    }
}

fn lopdf_page_count(document: &Path) -> Result<usize, ConvertError> {
    let doc = Document::load(document).map_err(|e| ConvertError::UnreadableDocument {
        detail: e.to_string(),
    })?;
    Ok(doc.get_pages().len())
}

/// Renders page `i` as a `(i + 1) * 10` × 10 raster after `delays_ms[i]`,
/// writing partial files into the scratch area while it works.
///
/// Records completion order and whether the scratch area ever disappeared
/// under a running page. `cancel_on` cancels a token when that page starts.
#[derive(Default)]
pub struct SlowRenderer {
    pub delays_ms: Vec<u64>,
    pub cancel_on: Option<(usize, CancelToken)>,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub completion_order: Mutex<Vec<usize>>,
    pub scratch_lost: AtomicBool,
}

impl SlowRenderer {
    pub fn with_delays(delays_ms: Vec<u64>) -> Self {
        Self {
            delays_ms,
            ..Self::default()
        }
    }
}

impl PageRenderer for SlowRenderer {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn page_count(&self, document: &Path) -> Result<usize, ConvertError> {
        lopdf_page_count(document)
    }

    fn render_page(
        &self,
        _document: &Path,
        index: usize,
        _scale: f32,
        scratch: &Path,
    ) -> Result<DynamicImage, PageError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some((page, token)) = &self.cancel_on {
            if *page == index {
                token.cancel();
            }
        }

        const STEPS: u64 = 5;
        let delay = self.delays_ms.get(index).copied().unwrap_or(0);
        let parts: Vec<_> = (0..STEPS)
            .map(|step| scratch.join(format!("page-{index}-{step}.part")))
            .collect();
        for part in &parts {
            if std::fs::write(part, b"partial").is_err() {
                self.scratch_lost.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(delay / STEPS));
        }
        for part in &parts {
            let _ = std::fs::remove_file(part);
        }

        self.completion_order.lock().unwrap().push(index);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            (index as u32 + 1) * 10,
            10,
            Rgb([0, 0, 0]),
        )))
    }
}

/// Config whose scratch areas live under `root`.
pub fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .scratch_root(root)
        .images_concurrency(4)
        .pages_concurrency(2)
        .build()
        .expect("test config is valid")
}

/// Like [`config_in`] with `pages` concurrent page jobs.
pub fn config_with_pages(root: &Path, pages: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .scratch_root(root)
        .images_concurrency(pages.max(4))
        .pages_concurrency(pages)
        .build()
        .expect("test config is valid")
}

/// Number of entries directly under `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encode");
    buf
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 100, 50])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("jpeg encode");
    buf
}

/// A minimal PDF with `pages` blank Letter-size pages.
pub fn pdf_with_pages(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let catalog_id = doc.new_object_id();
    let pages_id = doc.new_object_id();

    let mut page_ids = Vec::new();
    for _ in 0..pages {
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => pages as i64,
        }),
    );
    doc.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("pdf serialise");
    buf
}

/// MediaBox of every page, in page order.
pub fn media_boxes(pdf: &[u8]) -> Vec<Vec<i64>> {
    let doc = Document::load_mem(pdf).expect("valid pdf");
    doc.get_pages()
        .values()
        .map(|&id| {
            doc.get_dictionary(id)
                .and_then(|page| page.get(b"MediaBox"))
                .and_then(Object::as_array)
                .expect("page has MediaBox")
                .iter()
                .map(|v| v.as_i64().expect("integer MediaBox"))
                .collect()
        })
        .collect()
}
